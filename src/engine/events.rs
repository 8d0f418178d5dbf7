// src/engine/events.rs

//! Immutable facts posted while a task executes.

use std::fmt;

use serde::Serialize;

use crate::engine::steps::TaskStep;
use crate::types::{ContainerName, ContainerReference, ImageReference, NetworkReference};

/// Something that happened during task execution.
///
/// Events are append-only: once posted they are never mutated or removed.
/// Progress-style events are *informational*: they are logged but never
/// change scheduling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum TaskEvent {
    /// A step is about to run.
    StepStarting { step: TaskStep },
    ImageBuildProgress {
        container: ContainerName,
        progress: String,
    },
    ImagePullProgress { image_name: String, progress: String },

    ImageBuilt {
        container: ContainerName,
        image: ImageReference,
    },
    ImagePulled {
        image_name: String,
        image: ImageReference,
    },
    TaskNetworkCreated { network: NetworkReference },
    CustomTaskNetworkChecked { network: NetworkReference },
    TaskNetworkDeleted,
    ContainerCreated {
        container: ContainerName,
        reference: ContainerReference,
    },
    ContainerStarted { container: ContainerName },
    ContainerBecameHealthy { container: ContainerName },
    RunningSetupCommand {
        container: ContainerName,
        command: String,
        index: usize,
    },
    SetupCommandCompleted { container: ContainerName, index: usize },
    ContainerBecameReady { container: ContainerName },
    RunningContainerExited {
        container: ContainerName,
        exit_code: i64,
    },
    ContainerStopped { container: ContainerName },
    ContainerRemoved { container: ContainerName },

    // Failures.
    ExecutionFailed { message: String },
    UserInterruptedExecution,
    TaskNetworkCreationFailed { message: String },
    CustomTaskNetworkCheckFailed {
        network_identifier: String,
        message: String,
    },
    ImageBuildFailed {
        container: ContainerName,
        message: String,
    },
    ImagePullFailed { image_name: String, message: String },
    ContainerCreationFailed {
        container: ContainerName,
        message: String,
    },
    ContainerRunFailed {
        container: ContainerName,
        message: String,
    },
    ContainerDidNotBecomeHealthy {
        container: ContainerName,
        message: String,
    },
    SetupCommandFailed {
        container: ContainerName,
        command: String,
        index: usize,
        exit_code: i64,
        output: String,
    },
    SetupCommandExecutionError {
        container: ContainerName,
        command: String,
        index: usize,
        message: String,
    },
    ContainerStopFailed {
        container: ContainerName,
        message: String,
    },
    ContainerRemovalFailed {
        container: ContainerName,
        message: String,
    },
    TaskNetworkDeletionFailed { message: String },
}

impl TaskEvent {
    /// Informational events are logged but never forwarded to the state machine.
    pub fn is_informational(&self) -> bool {
        matches!(
            self,
            TaskEvent::StepStarting { .. }
                | TaskEvent::ImageBuildProgress { .. }
                | TaskEvent::ImagePullProgress { .. }
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TaskEvent::ExecutionFailed { .. }
                | TaskEvent::UserInterruptedExecution
                | TaskEvent::TaskNetworkCreationFailed { .. }
                | TaskEvent::CustomTaskNetworkCheckFailed { .. }
                | TaskEvent::ImageBuildFailed { .. }
                | TaskEvent::ImagePullFailed { .. }
                | TaskEvent::ContainerCreationFailed { .. }
                | TaskEvent::ContainerRunFailed { .. }
                | TaskEvent::ContainerDidNotBecomeHealthy { .. }
                | TaskEvent::SetupCommandFailed { .. }
                | TaskEvent::SetupCommandExecutionError { .. }
                | TaskEvent::ContainerStopFailed { .. }
                | TaskEvent::ContainerRemovalFailed { .. }
                | TaskEvent::TaskNetworkDeletionFailed { .. }
        )
    }

    /// Failures raised while tearing resources down.
    pub fn is_cleanup_failure(&self) -> bool {
        matches!(
            self,
            TaskEvent::ContainerStopFailed { .. }
                | TaskEvent::ContainerRemovalFailed { .. }
                | TaskEvent::TaskNetworkDeletionFailed { .. }
        )
    }

    /// Short, stable name of the event kind (used in logs).
    pub fn kind(&self) -> &'static str {
        match self {
            TaskEvent::StepStarting { .. } => "StepStarting",
            TaskEvent::ImageBuildProgress { .. } => "ImageBuildProgress",
            TaskEvent::ImagePullProgress { .. } => "ImagePullProgress",
            TaskEvent::ImageBuilt { .. } => "ImageBuilt",
            TaskEvent::ImagePulled { .. } => "ImagePulled",
            TaskEvent::TaskNetworkCreated { .. } => "TaskNetworkCreated",
            TaskEvent::CustomTaskNetworkChecked { .. } => "CustomTaskNetworkChecked",
            TaskEvent::TaskNetworkDeleted => "TaskNetworkDeleted",
            TaskEvent::ContainerCreated { .. } => "ContainerCreated",
            TaskEvent::ContainerStarted { .. } => "ContainerStarted",
            TaskEvent::ContainerBecameHealthy { .. } => "ContainerBecameHealthy",
            TaskEvent::RunningSetupCommand { .. } => "RunningSetupCommand",
            TaskEvent::SetupCommandCompleted { .. } => "SetupCommandCompleted",
            TaskEvent::ContainerBecameReady { .. } => "ContainerBecameReady",
            TaskEvent::RunningContainerExited { .. } => "RunningContainerExited",
            TaskEvent::ContainerStopped { .. } => "ContainerStopped",
            TaskEvent::ContainerRemoved { .. } => "ContainerRemoved",
            TaskEvent::ExecutionFailed { .. } => "ExecutionFailed",
            TaskEvent::UserInterruptedExecution => "UserInterruptedExecution",
            TaskEvent::TaskNetworkCreationFailed { .. } => "TaskNetworkCreationFailed",
            TaskEvent::CustomTaskNetworkCheckFailed { .. } => "CustomTaskNetworkCheckFailed",
            TaskEvent::ImageBuildFailed { .. } => "ImageBuildFailed",
            TaskEvent::ImagePullFailed { .. } => "ImagePullFailed",
            TaskEvent::ContainerCreationFailed { .. } => "ContainerCreationFailed",
            TaskEvent::ContainerRunFailed { .. } => "ContainerRunFailed",
            TaskEvent::ContainerDidNotBecomeHealthy { .. } => "ContainerDidNotBecomeHealthy",
            TaskEvent::SetupCommandFailed { .. } => "SetupCommandFailed",
            TaskEvent::SetupCommandExecutionError { .. } => "SetupCommandExecutionError",
            TaskEvent::ContainerStopFailed { .. } => "ContainerStopFailed",
            TaskEvent::ContainerRemovalFailed { .. } => "ContainerRemovalFailed",
            TaskEvent::TaskNetworkDeletionFailed { .. } => "TaskNetworkDeletionFailed",
        }
    }
}

impl fmt::Display for TaskEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskEvent::StepStarting { step } => write!(f, "starting step {step}"),
            TaskEvent::ImageBuildProgress { container, progress } => {
                write!(f, "building image for '{container}': {progress}")
            }
            TaskEvent::ImagePullProgress { image_name, progress } => {
                write!(f, "pulling '{image_name}': {progress}")
            }
            TaskEvent::ImageBuilt { container, image } => {
                write!(f, "built image {image} for '{container}'")
            }
            TaskEvent::ImagePulled { image_name, .. } => write!(f, "pulled '{image_name}'"),
            TaskEvent::TaskNetworkCreated { network } => write!(f, "created network {network}"),
            TaskEvent::CustomTaskNetworkChecked { network } => {
                write!(f, "using existing network {network}")
            }
            TaskEvent::TaskNetworkDeleted => f.write_str("deleted task network"),
            TaskEvent::ContainerCreated { container, reference } => {
                write!(f, "created container '{container}' as {reference}")
            }
            TaskEvent::ContainerStarted { container } => write!(f, "started '{container}'"),
            TaskEvent::ContainerBecameHealthy { container } => {
                write!(f, "'{container}' became healthy")
            }
            TaskEvent::RunningSetupCommand {
                container,
                command,
                index,
            } => write!(f, "running setup command {index} in '{container}': {command}"),
            TaskEvent::SetupCommandCompleted { container, index } => {
                write!(f, "setup command {index} in '{container}' completed")
            }
            TaskEvent::ContainerBecameReady { container } => write!(f, "'{container}' is ready"),
            TaskEvent::RunningContainerExited {
                container,
                exit_code,
            } => write!(f, "'{container}' exited with code {exit_code}"),
            TaskEvent::ContainerStopped { container } => write!(f, "stopped '{container}'"),
            TaskEvent::ContainerRemoved { container } => write!(f, "removed '{container}'"),
            TaskEvent::ExecutionFailed { message } => write!(f, "execution failed: {message}"),
            TaskEvent::UserInterruptedExecution => f.write_str("execution interrupted by user"),
            TaskEvent::TaskNetworkCreationFailed { message } => {
                write!(f, "could not create task network: {message}")
            }
            TaskEvent::CustomTaskNetworkCheckFailed {
                network_identifier,
                message,
            } => write!(f, "could not use network '{network_identifier}': {message}"),
            TaskEvent::ImageBuildFailed { container, message } => {
                write!(f, "could not build image for '{container}': {message}")
            }
            TaskEvent::ImagePullFailed { image_name, message } => {
                write!(f, "could not pull '{image_name}': {message}")
            }
            TaskEvent::ContainerCreationFailed { container, message } => {
                write!(f, "could not create '{container}': {message}")
            }
            TaskEvent::ContainerRunFailed { container, message } => {
                write!(f, "could not run '{container}': {message}")
            }
            TaskEvent::ContainerDidNotBecomeHealthy { container, message } => {
                write!(f, "'{container}' did not become healthy: {message}")
            }
            TaskEvent::SetupCommandFailed {
                container,
                command,
                exit_code,
                ..
            } => write!(
                f,
                "setup command '{command}' in '{container}' exited with code {exit_code}"
            ),
            TaskEvent::SetupCommandExecutionError {
                container,
                command,
                message,
                ..
            } => write!(f, "could not run setup command '{command}' in '{container}': {message}"),
            TaskEvent::ContainerStopFailed { container, message } => {
                write!(f, "could not stop '{container}': {message}")
            }
            TaskEvent::ContainerRemovalFailed { container, message } => {
                write!(f, "could not remove '{container}': {message}")
            }
            TaskEvent::TaskNetworkDeletionFailed { message } => {
                write!(f, "could not delete task network: {message}")
            }
        }
    }
}

/// Anything that accepts events from running steps.
///
/// Implemented by the execution manager; step runners only ever see this trait.
pub trait TaskEventSink: Send + Sync {
    fn post_event(&self, event: TaskEvent);
}
