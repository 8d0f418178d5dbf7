use std::sync::Mutex;

use taskrig::engine::{EventLogger, TaskEvent, TaskEventSink, TelemetrySink};

/// Event logger that keeps every event it sees.
#[derive(Debug, Default)]
pub struct RecordingEventLogger {
    events: Mutex<Vec<TaskEvent>>,
}

impl RecordingEventLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TaskEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Event kinds in posting order.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(TaskEvent::kind).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }
}

impl EventLogger for RecordingEventLogger {
    fn post_event(&self, event: &TaskEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Telemetry sink that keeps `(message, caught_at)` pairs.
#[derive(Debug, Default)]
pub struct TelemetryCaptor {
    reports: Mutex<Vec<(String, String)>>,
}

impl TelemetryCaptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<(String, String)> {
        self.reports.lock().unwrap().clone()
    }
}

impl TelemetrySink for TelemetryCaptor {
    fn report_unhandled_exception(&self, error: &anyhow::Error, caught_at: &str) {
        self.reports
            .lock()
            .unwrap()
            .push((format!("{error:#}"), caught_at.to_string()));
    }
}

/// Event sink for driving step runners directly.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<TaskEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TaskEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Non-informational events only.
    pub fn outcomes(&self) -> Vec<TaskEvent> {
        self.events()
            .into_iter()
            .filter(|e| !e.is_informational())
            .collect()
    }
}

impl TaskEventSink for RecordingEventSink {
    fn post_event(&self, event: TaskEvent) {
        self.events.lock().unwrap().push(event);
    }
}
