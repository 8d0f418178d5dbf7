// src/session.rs

//! Running tasks end to end.
//!
//! [`TaskRunner`] builds a task's container graph, hands it to a fresh state
//! machine and execution manager, and reports the outcome. A session runs a
//! task's prerequisites first and stops at the first task that fails.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};

use crate::config::model::{ConfigFile, ConfigSection, Task};
use crate::dag::{ContainerDependencyGraph, TaskExecutionOrderResolver};
use crate::engine::{
    CleanupPolicy, EventLogger, ExecutionOutcome, ParallelExecutionManager, TaskStateMachine,
    TelemetrySink, TracingEventLogger, TracingTelemetrySink,
};
use crate::errors::Result;
use crate::exec::{ContainerRuntime, StepRunner, TaskStepRunner};
use crate::types::TaskName;

/// Knobs that apply to every task in a session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunOptions {
    pub max_parallelism: Option<usize>,
    pub cleanup_policy: CleanupPolicy,
    /// Existing network to attach containers to.
    pub existing_network: Option<String>,
    pub skip_prerequisites: bool,
}

impl RunOptions {
    pub fn from_config(section: &ConfigSection) -> Self {
        Self {
            max_parallelism: section.max_parallelism,
            cleanup_policy: CleanupPolicy {
                after_failure: section.cleanup_after_failure,
                after_success: section.cleanup_after_success,
            },
            existing_network: section.network.clone(),
            skip_prerequisites: false,
        }
    }
}

/// Outcome of one task in a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
    pub task: TaskName,
    pub outcome: ExecutionOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// Tasks that ran, in order.
    pub tasks: Vec<TaskResult>,
    /// Process exit code: the last main container's exit code, `1` if a task
    /// failed, `0` if no task had a main container.
    pub exit_code: i32,
}

impl SessionOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs tasks from a validated configuration against a container runtime.
pub struct TaskRunner {
    config: ConfigFile,
    runtime: Arc<dyn ContainerRuntime>,
    event_logger: Arc<dyn EventLogger>,
    telemetry: Arc<dyn TelemetrySink>,
    options: RunOptions,
    cancellation: CancellationToken,
}

impl TaskRunner {
    /// Options default to the configuration's `[config]` section.
    pub fn new(config: ConfigFile, runtime: Arc<dyn ContainerRuntime>) -> Self {
        let options = RunOptions::from_config(&config.config);
        Self {
            config,
            runtime,
            event_logger: Arc::new(TracingEventLogger),
            telemetry: Arc::new(TracingTelemetrySink),
            options,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_event_logger(mut self, event_logger: Arc<dyn EventLogger>) -> Self {
        self.event_logger = event_logger;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Run one task (without its prerequisites).
    ///
    /// Graph errors are returned before any step runs.
    pub async fn run_task(&self, task: &Task) -> Result<ExecutionOutcome> {
        let graph = Arc::new(ContainerDependencyGraph::new(task, &self.config.container)?);
        let state_machine = Arc::new(TaskStateMachine::new(
            graph,
            self.options.cleanup_policy,
        ));

        let step_runner: Arc<dyn StepRunner> = Arc::new(TaskStepRunner::new(
            Arc::clone(&self.runtime),
            self.cancellation.clone(),
            self.options.existing_network.clone(),
        ));

        let manager = ParallelExecutionManager::new(
            state_machine,
            step_runner,
            Arc::clone(&self.event_logger),
            Arc::clone(&self.telemetry),
        )
        .with_max_parallelism(self.options.max_parallelism)
        .with_cancellation(self.cancellation.clone());

        let span = info_span!("task", task = %task.name);
        let outcome = manager.run().instrument(span).await;

        if outcome.succeeded() {
            info!(task = %task.name, exit_code = ?outcome.exit_code, "task finished");
        } else {
            warn!(task = %task.name, failures = outcome.failures.len(), "task failed");
        }

        for command in &outcome.manual_cleanup_commands {
            warn!(task = %task.name, command = %command, "manual cleanup required");
        }

        Ok(outcome)
    }

    /// Run `task_name` and (unless skipped) its prerequisites, in order.
    pub async fn run_session(&self, task_name: &str) -> Result<SessionOutcome> {
        let tasks = TaskExecutionOrderResolver::new(&self.config)
            .resolve(task_name, self.options.skip_prerequisites)?;

        let mut results = Vec::with_capacity(tasks.len());
        let mut exit_code = 0;

        for task in tasks {
            let outcome = self.run_task(task).await?;

            let stop = if !outcome.succeeded() {
                exit_code = 1;
                true
            } else {
                exit_code = match outcome.exit_code {
                    Some(code) => i32::try_from(code).unwrap_or(1),
                    None => exit_code,
                };
                exit_code != 0
            };

            results.push(TaskResult {
                task: task.name.clone(),
                outcome,
            });

            if stop || self.cancellation.is_cancelled() {
                break;
            }
        }

        Ok(SessionOutcome {
            tasks: results,
            exit_code,
        })
    }
}
