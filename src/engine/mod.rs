// src/engine/mod.rs

//! Task execution engine.
//!
//! Execution is event-sourced: steps post [`TaskEvent`]s, the
//! [`TaskStateMachine`] appends them to its history and re-evaluates the
//! active stage's rules, and the [`ParallelExecutionManager`] runs whatever
//! becomes ready.
//!
//! - [`events`] and [`steps`] are the vocabulary.
//! - [`history`] answers questions about what has happened so far.
//! - [`rules`] holds the pure rules and the Run/Cleanup planners.
//! - [`state_machine`] owns history, dispatch bookkeeping and stage changes.
//! - [`manager`] is the async shell: permits, concurrency, failure handling.
//! - [`sinks`] are the logging and telemetry collaborators.

pub mod events;
pub mod history;
pub mod manager;
pub mod rules;
pub mod sinks;
pub mod state_machine;
pub mod steps;

pub use events::{TaskEvent, TaskEventSink};
pub use history::EventHistory;
pub use manager::ParallelExecutionManager;
pub use rules::{
    CleanupStagePlanner, RuleEvaluation, RunStagePlanner, StagePlanner, TaskStepRule,
    manual_cleanup_commands,
};
pub use sinks::{
    CompositeEventLogger, EventLogger, JsonLinesEventLogger, TelemetrySink, TracingEventLogger,
    TracingTelemetrySink,
};
pub use state_machine::{CleanupPolicy, ExecutionOutcome, InFlightStep, Stage, TaskStateMachine};
pub use steps::TaskStep;
