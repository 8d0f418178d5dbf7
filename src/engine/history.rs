// src/engine/history.rs

//! Append-only event history and the queries rules evaluate against it.

use crate::engine::events::TaskEvent;
use crate::types::{ContainerName, ContainerReference, ImageReference, NetworkReference};

/// Every event posted for one task execution, in posting order.
///
/// Rules never keep their own state: every "is this done yet?" question is
/// answered by scanning the history, so the same history always gives the
/// same answer.
#[derive(Debug, Clone, Default)]
pub struct EventHistory {
    events: Vec<TaskEvent>,
}

impl EventHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: TaskEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[TaskEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn any(&self, predicate: impl Fn(&TaskEvent) -> bool) -> bool {
        self.events.iter().any(predicate)
    }

    pub fn built_image(&self, container: &str) -> Option<&ImageReference> {
        self.events.iter().find_map(|e| match e {
            TaskEvent::ImageBuilt { container: c, image } if c == container => Some(image),
            _ => None,
        })
    }

    pub fn pulled_image(&self, image_name: &str) -> Option<&ImageReference> {
        self.events.iter().find_map(|e| match e {
            TaskEvent::ImagePulled {
                image_name: n,
                image,
            } if n == image_name => Some(image),
            _ => None,
        })
    }

    pub fn image_build_failed(&self, container: &str) -> bool {
        self.any(|e| matches!(e, TaskEvent::ImageBuildFailed { container: c, .. } if c == container))
    }

    pub fn image_pull_failed(&self, image_name: &str) -> bool {
        self.any(|e| matches!(e, TaskEvent::ImagePullFailed { image_name: n, .. } if n == image_name))
    }

    /// Network containers attach to: created by this run or checked existing.
    pub fn task_network(&self) -> Option<&NetworkReference> {
        self.events.iter().find_map(|e| match e {
            TaskEvent::TaskNetworkCreated { network }
            | TaskEvent::CustomTaskNetworkChecked { network } => Some(network),
            _ => None,
        })
    }

    /// Network created by this run. Existing networks are never returned.
    pub fn created_network(&self) -> Option<&NetworkReference> {
        self.events.iter().find_map(|e| match e {
            TaskEvent::TaskNetworkCreated { network } => Some(network),
            _ => None,
        })
    }

    pub fn network_preparation_failed(&self) -> bool {
        self.any(|e| {
            matches!(
                e,
                TaskEvent::TaskNetworkCreationFailed { .. }
                    | TaskEvent::CustomTaskNetworkCheckFailed { .. }
            )
        })
    }

    pub fn network_deleted(&self) -> bool {
        self.any(|e| matches!(e, TaskEvent::TaskNetworkDeleted))
    }

    pub fn network_deletion_failed(&self) -> bool {
        self.any(|e| matches!(e, TaskEvent::TaskNetworkDeletionFailed { .. }))
    }

    pub fn container_reference(&self, container: &str) -> Option<&ContainerReference> {
        self.events.iter().find_map(|e| match e {
            TaskEvent::ContainerCreated {
                container: c,
                reference,
            } if c == container => Some(reference),
            _ => None,
        })
    }

    /// Containers that reached "created", in creation order.
    pub fn created_containers(&self) -> Vec<(&ContainerName, &ContainerReference)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                TaskEvent::ContainerCreated {
                    container,
                    reference,
                } => Some((container, reference)),
                _ => None,
            })
            .collect()
    }

    pub fn creation_failed(&self, container: &str) -> bool {
        self.any(
            |e| matches!(e, TaskEvent::ContainerCreationFailed { container: c, .. } if c == container),
        )
    }

    pub fn has_started(&self, container: &str) -> bool {
        self.any(|e| matches!(e, TaskEvent::ContainerStarted { container: c } if c == container))
    }

    pub fn run_failed(&self, container: &str) -> bool {
        self.any(|e| matches!(e, TaskEvent::ContainerRunFailed { container: c, .. } if c == container))
    }

    pub fn exit_code(&self, container: &str) -> Option<i64> {
        self.events.iter().find_map(|e| match e {
            TaskEvent::RunningContainerExited {
                container: c,
                exit_code,
            } if c == container => Some(*exit_code),
            _ => None,
        })
    }

    pub fn is_healthy(&self, container: &str) -> bool {
        self.any(|e| matches!(e, TaskEvent::ContainerBecameHealthy { container: c } if c == container))
    }

    pub fn health_check_failed(&self, container: &str) -> bool {
        self.any(|e| {
            matches!(e, TaskEvent::ContainerDidNotBecomeHealthy { container: c, .. } if c == container)
        })
    }

    pub fn setup_command_completed(&self, container: &str, index: usize) -> bool {
        self.any(|e| {
            matches!(
                e,
                TaskEvent::SetupCommandCompleted { container: c, index: i }
                    if c == container && *i == index
            )
        })
    }

    pub fn setup_command_failed(&self, container: &str, index: usize) -> bool {
        self.any(|e| match e {
            TaskEvent::SetupCommandFailed {
                container: c,
                index: i,
                ..
            }
            | TaskEvent::SetupCommandExecutionError {
                container: c,
                index: i,
                ..
            } => c == container && *i == index,
            _ => false,
        })
    }

    pub fn is_ready(&self, container: &str) -> bool {
        self.any(|e| matches!(e, TaskEvent::ContainerBecameReady { container: c } if c == container))
    }

    /// Stopped explicitly, or exited on its own.
    pub fn is_stopped(&self, container: &str) -> bool {
        self.any(|e| match e {
            TaskEvent::ContainerStopped { container: c }
            | TaskEvent::RunningContainerExited { container: c, .. } => c == container,
            _ => false,
        })
    }

    pub fn stop_failed(&self, container: &str) -> bool {
        self.any(|e| matches!(e, TaskEvent::ContainerStopFailed { container: c, .. } if c == container))
    }

    pub fn is_removed(&self, container: &str) -> bool {
        self.any(|e| matches!(e, TaskEvent::ContainerRemoved { container: c } if c == container))
    }

    pub fn removal_failed(&self, container: &str) -> bool {
        self.any(
            |e| matches!(e, TaskEvent::ContainerRemovalFailed { container: c, .. } if c == container),
        )
    }

    /// Every failure-kind event, in posting order.
    pub fn failures(&self) -> Vec<TaskEvent> {
        self.events
            .iter()
            .filter(|e| e.is_failure())
            .cloned()
            .collect()
    }

    pub fn has_failures(&self) -> bool {
        self.any(TaskEvent::is_failure)
    }

    pub fn has_cleanup_failures(&self) -> bool {
        self.any(TaskEvent::is_cleanup_failure)
    }
}
