// src/engine/steps.rs

//! Units of future work handed out by the state machine.

use std::fmt;

use serde::Serialize;

use crate::config::model::{Container, SetupCommand};
use crate::types::{
    ContainerName, ContainerReference, ImagePullPolicy, ImageReference, NetworkReference,
};

/// One dispatchable unit of work toward running or tearing down a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum TaskStep {
    /// Create the task network, or check the configured existing one.
    PrepareTaskNetwork,
    BuildImage {
        container: Container,
    },
    PullImage {
        image_name: String,
        pull_policy: ImagePullPolicy,
    },
    CreateContainer {
        container: Container,
        image: ImageReference,
        network: NetworkReference,
    },
    /// Start a container. For the main container, also wait for it to exit.
    RunContainer {
        container: ContainerName,
        reference: ContainerReference,
        main: bool,
    },
    WaitForContainerToBecomeHealthy {
        container: ContainerName,
        reference: ContainerReference,
    },
    RunSetupCommand {
        container: ContainerName,
        reference: ContainerReference,
        command: SetupCommand,
        index: usize,
    },
    MarkContainerReady {
        container: ContainerName,
    },
    StopContainer {
        container: ContainerName,
        reference: ContainerReference,
    },
    RemoveContainer {
        container: ContainerName,
        reference: ContainerReference,
    },
    DeleteTaskNetwork {
        network: NetworkReference,
    },
}

impl TaskStep {
    /// Name of the step kind, e.g. `"PullImage"`.
    pub fn kind(&self) -> &'static str {
        match self {
            TaskStep::PrepareTaskNetwork => "PrepareTaskNetwork",
            TaskStep::BuildImage { .. } => "BuildImage",
            TaskStep::PullImage { .. } => "PullImage",
            TaskStep::CreateContainer { .. } => "CreateContainer",
            TaskStep::RunContainer { .. } => "RunContainer",
            TaskStep::WaitForContainerToBecomeHealthy { .. } => "WaitForContainerToBecomeHealthy",
            TaskStep::RunSetupCommand { .. } => "RunSetupCommand",
            TaskStep::MarkContainerReady { .. } => "MarkContainerReady",
            TaskStep::StopContainer { .. } => "StopContainer",
            TaskStep::RemoveContainer { .. } => "RemoveContainer",
            TaskStep::DeleteTaskNetwork { .. } => "DeleteTaskNetwork",
        }
    }

    /// Whether running this step consumes a parallelism permit.
    ///
    /// Steps that mostly wait (a running container, a health check, the
    /// readiness marker) are uncapped so they cannot starve real work.
    pub fn counts_against_parallelism_cap(&self) -> bool {
        !matches!(
            self,
            TaskStep::RunContainer { .. }
                | TaskStep::WaitForContainerToBecomeHealthy { .. }
                | TaskStep::MarkContainerReady { .. }
        )
    }

    /// Cleanup steps keep running after cancellation.
    pub fn is_cleanup_step(&self) -> bool {
        matches!(
            self,
            TaskStep::StopContainer { .. }
                | TaskStep::RemoveContainer { .. }
                | TaskStep::DeleteTaskNetwork { .. }
        )
    }

    /// The configured container this step acts on, if any.
    pub fn container_name(&self) -> Option<&str> {
        match self {
            TaskStep::BuildImage { container } | TaskStep::CreateContainer { container, .. } => {
                Some(&container.name)
            }
            TaskStep::RunContainer { container, .. }
            | TaskStep::WaitForContainerToBecomeHealthy { container, .. }
            | TaskStep::RunSetupCommand { container, .. }
            | TaskStep::MarkContainerReady { container }
            | TaskStep::StopContainer { container, .. }
            | TaskStep::RemoveContainer { container, .. } => Some(container),
            TaskStep::PrepareTaskNetwork
            | TaskStep::PullImage { .. }
            | TaskStep::DeleteTaskNetwork { .. } => None,
        }
    }
}

impl fmt::Display for TaskStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStep::PrepareTaskNetwork => f.write_str("PrepareTaskNetwork"),
            TaskStep::PullImage { image_name, .. } => write!(f, "PullImage '{image_name}'"),
            TaskStep::RunSetupCommand {
                container, index, ..
            } => write!(f, "RunSetupCommand #{index} for '{container}'"),
            TaskStep::DeleteTaskNetwork { network } => write!(f, "DeleteTaskNetwork {network}"),
            other => match other.container_name() {
                Some(container) => write!(f, "{} for '{container}'", other.kind()),
                None => f.write_str(other.kind()),
            },
        }
    }
}
