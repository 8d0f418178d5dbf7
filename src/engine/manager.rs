// src/engine/manager.rs

//! Parallel execution manager.
//!
//! Pulls ready steps from the [`TaskStateMachine`], runs them concurrently
//! through a [`StepRunner`], and feeds the events they post back in. A
//! semaphore caps how many "counts against cap" steps run at once; the cap
//! is applied around dispatch and never inside rule evaluation.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::anyhow;
use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info};

use crate::engine::events::{TaskEvent, TaskEventSink};
use crate::engine::sinks::{EventLogger, TelemetrySink};
use crate::engine::state_machine::{ExecutionOutcome, InFlightStep, TaskStateMachine};
use crate::exec::cancellation::is_cancellation;
use crate::exec::step_runner::StepRunner;

const CAUGHT_AT: &str = concat!(module_path!(), "::run_step");

/// Drives one task's state machine to completion.
pub struct ParallelExecutionManager {
    state_machine: Arc<TaskStateMachine>,
    step_runner: Arc<dyn StepRunner>,
    event_logger: Arc<dyn EventLogger>,
    telemetry: Arc<dyn TelemetrySink>,
    max_parallelism: Option<usize>,
    cancellation: CancellationToken,
}

impl ParallelExecutionManager {
    pub fn new(
        state_machine: Arc<TaskStateMachine>,
        step_runner: Arc<dyn StepRunner>,
        event_logger: Arc<dyn EventLogger>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            state_machine,
            step_runner,
            event_logger,
            telemetry,
            max_parallelism: None,
            cancellation: CancellationToken::new(),
        }
    }

    /// Cap on concurrently running capped steps. `None` means unlimited.
    pub fn with_max_parallelism(mut self, max_parallelism: Option<usize>) -> Self {
        self.max_parallelism = max_parallelism;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    /// Run until the state machine is finished and every dispatched step
    /// has completed.
    ///
    /// Once cancellation is requested, a single `UserInterruptedExecution`
    /// event is posted and run-stage steps are no longer started; cleanup
    /// steps still run.
    pub async fn run(&self) -> ExecutionOutcome {
        let shared = Arc::new(ManagerShared {
            state_machine: Arc::clone(&self.state_machine),
            step_runner: Arc::clone(&self.step_runner),
            event_logger: Arc::clone(&self.event_logger),
            telemetry: Arc::clone(&self.telemetry),
            cancellation: self.cancellation.clone(),
            event_order: Mutex::new(()),
        });

        let permits = self
            .max_parallelism
            .map(|limit| Arc::new(Semaphore::new(limit)));

        let interrupt_watcher = {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                shared.cancellation.cancelled().await;
                info!(task = %shared.state_machine.graph().task_name(), "interrupt requested");
                shared.post_event(TaskEvent::UserInterruptedExecution);
            }
            .in_current_span())
        };

        let mut running = JoinSet::new();

        while let Some(step) = self.state_machine.pop_next_step(true).await {
            if self.cancellation.is_cancelled() && !step.is_cleanup_step() {
                debug!(step = %*step, "not starting step after cancellation");
                continue;
            }

            let permits = if step.counts_against_parallelism_cap() {
                permits.clone()
            } else {
                None
            };

            let shared = Arc::clone(&shared);
            running.spawn(async move { shared.dispatch(step, permits).await }.in_current_span());

            while let Some(joined) = running.try_join_next() {
                log_join_error(joined);
            }
        }

        while let Some(joined) = running.join_next().await {
            log_join_error(joined);
        }

        // A cancelled run always records its interrupt, even if every step
        // wound down before the watcher got to it.
        if self.cancellation.is_cancelled() {
            if let Err(err) = interrupt_watcher.await {
                error!(error = %err, "interrupt watcher did not complete");
            }
        } else {
            interrupt_watcher.abort();
        }

        self.state_machine.outcome()
    }
}

fn log_join_error(joined: Result<(), tokio::task::JoinError>) {
    if let Err(err) = joined {
        error!(error = %err, "step task did not complete");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// State shared between the dispatch loop and running steps.
struct ManagerShared {
    state_machine: Arc<TaskStateMachine>,
    step_runner: Arc<dyn StepRunner>,
    event_logger: Arc<dyn EventLogger>,
    telemetry: Arc<dyn TelemetrySink>,
    cancellation: CancellationToken,
    /// Keeps logger and state machine delivery in the same order.
    event_order: Mutex<()>,
}

impl ManagerShared {
    async fn dispatch(&self, step: InFlightStep, permits: Option<Arc<Semaphore>>) {
        let _permit = match permits {
            Some(permits) => match permits.acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(err) => {
                    error!(error = %err, step = %*step, "parallelism limiter closed");
                    return;
                }
            },
            None => None,
        };

        if self.cancellation.is_cancelled() && !step.is_cleanup_step() {
            debug!(step = %*step, "cancelled while waiting for a permit");
            return;
        }

        self.run_step(&step).await;
    }

    async fn run_step(&self, step: &InFlightStep) {
        self.post_event(TaskEvent::StepStarting {
            step: step.step().clone(),
        });

        let result = AssertUnwindSafe(self.step_runner.run(step.step(), self))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(anyhow!("step runner panicked: {}", panic_message(&*panic)))
            });

        match result {
            Ok(()) => debug!(step = %**step, "step finished"),
            Err(err) if is_cancellation(&err) => {
                debug!(step = %**step, "step cancelled");
            }
            Err(err) => {
                error!(step = %**step, error = %format!("{err:#}"), "step failed unexpectedly");
                self.post_event(TaskEvent::ExecutionFailed {
                    message: format!(
                        "During execution of step of kind '{}': {err:#}",
                        step.kind()
                    ),
                });
                self.telemetry.report_unhandled_exception(&err, CAUGHT_AT);
            }
        }
    }
}

impl TaskEventSink for ManagerShared {
    /// Log first, then (for non-informational events) update the state
    /// machine, both under one lock so every observer sees the same order.
    fn post_event(&self, event: TaskEvent) {
        let _ordered = self
            .event_order
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        self.event_logger.post_event(&event);

        if !event.is_informational() {
            self.state_machine.post_event(event);
        }
    }
}
