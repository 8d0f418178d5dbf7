// src/engine/sinks.rs

//! Where events and unhandled errors go besides the state machine.

use std::io::Write;
use std::sync::{Mutex, PoisonError};

use tracing::{debug, error, info, warn};

use crate::engine::events::TaskEvent;

/// Receives every event, informational or not, in posting order.
pub trait EventLogger: Send + Sync {
    fn post_event(&self, event: &TaskEvent);
}

/// Receives errors no step runner knew how to classify.
pub trait TelemetrySink: Send + Sync {
    /// `caught_at` identifies where the error was caught.
    fn report_unhandled_exception(&self, error: &anyhow::Error, caught_at: &str);
}

/// Logs events through `tracing`.
///
/// Fields such as the task name come from the enclosing span.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventLogger;

impl EventLogger for TracingEventLogger {
    fn post_event(&self, event: &TaskEvent) {
        let kind = event.kind();

        if event.is_failure() {
            warn!(event = kind, "{event}");
        } else if event.is_informational() {
            debug!(event = kind, "{event}");
        } else {
            info!(event = kind, "{event}");
        }
    }
}

/// Writes each event as one JSON object per line.
pub struct JsonLinesEventLogger<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesEventLogger<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> EventLogger for JsonLinesEventLogger<W> {
    fn post_event(&self, event: &TaskEvent) {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let written = serde_json::to_writer(&mut *writer, event)
            .map_err(std::io::Error::from)
            .and_then(|()| writer.write_all(b"\n"))
            .and_then(|()| writer.flush());

        if let Err(err) = written {
            warn!(error = %err, event = event.kind(), "failed to write event log entry");
        }
    }
}

/// Fans one event out to several loggers, in order.
pub struct CompositeEventLogger {
    loggers: Vec<Box<dyn EventLogger>>,
}

impl CompositeEventLogger {
    pub fn new(loggers: Vec<Box<dyn EventLogger>>) -> Self {
        Self { loggers }
    }
}

impl EventLogger for CompositeEventLogger {
    fn post_event(&self, event: &TaskEvent) {
        for logger in &self.loggers {
            logger.post_event(event);
        }
    }
}

/// Reports unhandled errors as `error`-level log records.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn report_unhandled_exception(&self, error: &anyhow::Error, caught_at: &str) {
        let message = format!("{error:#}");
        error!(caught_at, error = %message, "unhandled exception");
    }
}
