// src/engine/state_machine.rs

//! Event-sourced task state machine.
//!
//! The state machine owns the event history and the active stage's rules.
//! [`TaskStateMachine::pop_next_step`] and [`TaskStateMachine::post_event`]
//! are the only mutation points; both go through one mutex so rules never
//! see a torn history.

use std::collections::HashSet;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{debug, info};

use crate::dag::ContainerDependencyGraph;
use crate::engine::events::TaskEvent;
use crate::engine::history::EventHistory;
use crate::engine::rules::{
    CleanupStagePlanner, RuleEvaluation, RunStagePlanner, StagePlanner, TaskStepRule,
    manual_cleanup_commands,
};
use crate::engine::steps::TaskStep;

/// Whether to tear down containers and networks once the Run stage is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupPolicy {
    pub after_failure: bool,
    pub after_success: bool,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            after_failure: true,
            after_success: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Run,
    Cleanup,
    Finished,
}

/// Final result of one task execution.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionOutcome {
    /// Every failure-kind event observed, in posting order.
    pub failures: Vec<TaskEvent>,
    /// Exit code of the main container, if it ran to completion.
    pub exit_code: Option<i64>,
    /// Commands to remove resources left behind (cleanup skipped or failed).
    pub manual_cleanup_commands: Vec<String>,
}

impl ExecutionOutcome {
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug)]
struct Inner {
    history: EventHistory,
    stage: Stage,
    rules: Vec<TaskStepRule>,
    /// Indices into `rules` already handed out in this stage.
    dispatched: HashSet<usize>,
    in_flight: usize,
    manual_cleanup: Vec<String>,
}

/// Drives one task execution from Run through Cleanup to Finished.
#[derive(Debug)]
pub struct TaskStateMachine {
    graph: Arc<ContainerDependencyGraph>,
    cleanup_policy: CleanupPolicy,
    inner: Mutex<Inner>,
    /// Bumped whenever readiness may have changed.
    changes: watch::Sender<u64>,
}

impl TaskStateMachine {
    pub fn new(graph: Arc<ContainerDependencyGraph>, cleanup_policy: CleanupPolicy) -> Self {
        let history = EventHistory::new();
        let rules = RunStagePlanner.plan(&graph, &history);
        let (changes, _) = watch::channel(0);

        debug!(
            task = %graph.task_name(),
            rules = rules.len(),
            "planned run stage"
        );

        Self {
            graph,
            cleanup_policy,
            inner: Mutex::new(Inner {
                history,
                stage: Stage::Run,
                rules,
                dispatched: HashSet::new(),
                in_flight: 0,
                manual_cleanup: Vec::new(),
            }),
            changes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version = version.wrapping_add(1));
    }

    /// Hand out the next ready step, if any.
    ///
    /// Rules are evaluated in planner order; done and already-dispatched
    /// rules are skipped. When nothing is ready and no step is in flight, the
    /// stage is over: Run moves to Cleanup (or straight to Finished if the
    /// cleanup policy says so), Cleanup moves to Finished, and Finished
    /// returns `None` for good.
    ///
    /// With `wait_for_event`, blocks until a non-informational event or a
    /// finished step changes the picture. Without it, returns `None` as soon
    /// as nothing is ready.
    pub async fn pop_next_step(self: &Arc<Self>, wait_for_event: bool) -> Option<InFlightStep> {
        let mut changes = self.changes.subscribe();

        loop {
            {
                let mut inner = self.lock();
                changes.borrow_and_update();

                loop {
                    if let Some(step) = next_ready(&mut inner) {
                        inner.in_flight += 1;
                        return Some(InFlightStep {
                            step,
                            owner: Arc::clone(self),
                        });
                    }

                    if inner.in_flight > 0 {
                        break;
                    }

                    if inner.stage == Stage::Finished {
                        return None;
                    }

                    self.advance(&mut inner);
                    self.notify();
                }
            }

            if !wait_for_event {
                return None;
            }

            if changes.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Record an event.
    ///
    /// Every event is appended; only non-informational events wake waiters
    /// in [`pop_next_step`](Self::pop_next_step).
    pub fn post_event(&self, event: TaskEvent) {
        let informational = event.is_informational();

        {
            let mut inner = self.lock();
            inner.history.push(event);
        }

        if !informational {
            self.notify();
        }
    }

    fn step_finished(&self) {
        {
            let mut inner = self.lock();
            inner.in_flight = inner.in_flight.saturating_sub(1);
        }
        self.notify();
    }

    fn advance(&self, inner: &mut Inner) {
        let task = self.graph.task_name();

        match inner.stage {
            Stage::Run => {
                let failed = inner.history.has_failures();
                let clean_up = if failed {
                    self.cleanup_policy.after_failure
                } else {
                    self.cleanup_policy.after_success
                };

                if clean_up {
                    inner.rules = CleanupStagePlanner.plan(&self.graph, &inner.history);
                    inner.dispatched.clear();
                    inner.stage = Stage::Cleanup;
                    info!(task = %task, failed, rules = inner.rules.len(), "run stage complete, cleaning up");
                } else {
                    inner.manual_cleanup = manual_cleanup_commands(&inner.history);
                    inner.rules.clear();
                    inner.dispatched.clear();
                    inner.stage = Stage::Finished;
                    info!(task = %task, failed, "run stage complete, cleanup skipped");
                }
            }
            Stage::Cleanup => {
                if inner.history.has_cleanup_failures() {
                    inner.manual_cleanup = manual_cleanup_commands(&inner.history);
                }
                inner.rules.clear();
                inner.dispatched.clear();
                inner.stage = Stage::Finished;
                info!(task = %task, "cleanup stage complete");
            }
            Stage::Finished => {}
        }
    }

    pub fn stage(&self) -> Stage {
        self.lock().stage
    }

    pub fn task_has_failed(&self) -> bool {
        self.lock().history.has_failures()
    }

    /// Snapshot of the history so far.
    pub fn history(&self) -> EventHistory {
        self.lock().history.clone()
    }

    /// Rules of the active stage, in planner order.
    pub fn rules(&self) -> Vec<TaskStepRule> {
        self.lock().rules.clone()
    }

    pub fn graph(&self) -> &ContainerDependencyGraph {
        &self.graph
    }

    pub fn outcome(&self) -> ExecutionOutcome {
        let inner = self.lock();
        let exit_code = self
            .graph
            .root()
            .and_then(|root| inner.history.exit_code(root.name()));

        ExecutionOutcome {
            failures: inner.history.failures(),
            exit_code,
            manual_cleanup_commands: inner.manual_cleanup.clone(),
        }
    }
}

fn next_ready(inner: &mut Inner) -> Option<TaskStep> {
    for (index, rule) in inner.rules.iter().enumerate() {
        if inner.dispatched.contains(&index) {
            continue;
        }

        if let RuleEvaluation::Ready(step) = rule.evaluate(&inner.history) {
            inner.dispatched.insert(index);
            return Some(step);
        }
    }

    None
}

/// A step handed out by [`TaskStateMachine::pop_next_step`].
///
/// The step counts as in flight until this guard is dropped.
#[derive(Debug)]
pub struct InFlightStep {
    step: TaskStep,
    owner: Arc<TaskStateMachine>,
}

impl InFlightStep {
    pub fn step(&self) -> &TaskStep {
        &self.step
    }
}

impl Deref for InFlightStep {
    type Target = TaskStep;

    fn deref(&self) -> &TaskStep {
        &self.step
    }
}

impl Drop for InFlightStep {
    fn drop(&mut self) {
        self.owner.step_finished();
    }
}
