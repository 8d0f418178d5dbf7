// src/exec/step_runner.rs

//! Per-kind step runners.
//!
//! Each runner performs one step against the [`ContainerRuntime`] and posts
//! the resulting events. Runtime failures become the step's typed failure
//! event; cancellation and unexpected errors are returned to the caller.
//!
//! Calls that create or start something (network, container) are not
//! interrupted by cancellation; pulls, builds and waits are.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::anyhow;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::model::{Container, SetupCommand};
use crate::engine::events::{TaskEvent, TaskEventSink};
use crate::engine::steps::TaskStep;
use crate::exec::backend::{ContainerRuntime, RuntimeError, RuntimeFuture};
use crate::exec::cancellation::{Cancelled, run_unless_cancelled};
use crate::types::{
    ContainerName, ContainerReference, ImagePullPolicy, ImageReference, NetworkReference,
};

pub type StepFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

/// Runs one step, posting its events to `events`.
///
/// `Err` means the step could not report an outcome: either it was
/// cancelled or something unexpected happened.
pub trait StepRunner: Send + Sync {
    fn run<'a>(&'a self, step: &'a TaskStep, events: &'a dyn TaskEventSink) -> StepFuture<'a>;
}

/// The production [`StepRunner`]: dispatches on step kind.
pub struct TaskStepRunner {
    runtime: Arc<dyn ContainerRuntime>,
    cancellation: CancellationToken,
    /// Existing network to use instead of creating one.
    existing_network: Option<String>,
}

impl TaskStepRunner {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        cancellation: CancellationToken,
        existing_network: Option<String>,
    ) -> Self {
        Self {
            runtime,
            cancellation,
            existing_network,
        }
    }

    /// Await a runtime call that only waits or reads, abandoning it if
    /// cancellation is requested.
    async fn guarded<T>(&self, call: RuntimeFuture<'_, T>) -> Result<T, RuntimeError> {
        run_unless_cancelled(&self.cancellation, call)
            .await
            .unwrap_or(Err(RuntimeError::Cancelled))
    }

    /// Refuse to start a call that creates a resource once cancelled.
    ///
    /// Such calls are never raced against the token: once started they run
    /// to completion so the resource is always recorded and cleaned up.
    fn ensure_not_cancelled(&self) -> anyhow::Result<()> {
        if self.cancellation.is_cancelled() {
            return Err(Cancelled.into());
        }
        Ok(())
    }

    async fn prepare_network(&self, events: &dyn TaskEventSink) -> anyhow::Result<()> {
        self.ensure_not_cancelled()?;

        match &self.existing_network {
            Some(identifier) => match self.runtime.find_network(identifier).await {
                Ok(network) => events.post_event(TaskEvent::CustomTaskNetworkChecked { network }),
                Err(RuntimeError::Failed(message)) => {
                    events.post_event(TaskEvent::CustomTaskNetworkCheckFailed {
                        network_identifier: identifier.clone(),
                        message,
                    })
                }
                Err(err) => return Err(escalate(err)),
            },
            None => match self.runtime.create_network().await {
                Ok(network) => events.post_event(TaskEvent::TaskNetworkCreated { network }),
                Err(RuntimeError::Failed(message)) => {
                    events.post_event(TaskEvent::TaskNetworkCreationFailed { message })
                }
                Err(err) => return Err(escalate(err)),
            },
        }
        Ok(())
    }

    async fn build_image(
        &self,
        container: &Container,
        events: &dyn TaskEventSink,
    ) -> anyhow::Result<()> {
        let name = container.name.clone();
        let progress = |line: String| {
            events.post_event(TaskEvent::ImageBuildProgress {
                container: name.clone(),
                progress: line,
            })
        };

        match self.guarded(self.runtime.build_image(container, &progress)).await {
            Ok(image) => events.post_event(TaskEvent::ImageBuilt {
                container: container.name.clone(),
                image,
            }),
            Err(RuntimeError::Failed(message)) => events.post_event(TaskEvent::ImageBuildFailed {
                container: container.name.clone(),
                message,
            }),
            Err(err) => return Err(escalate(err)),
        }
        Ok(())
    }

    async fn pull_image(
        &self,
        image_name: &str,
        policy: ImagePullPolicy,
        events: &dyn TaskEventSink,
    ) -> anyhow::Result<()> {
        let progress = |line: String| {
            events.post_event(TaskEvent::ImagePullProgress {
                image_name: image_name.to_string(),
                progress: line,
            })
        };

        match self
            .guarded(self.runtime.pull_image(image_name, policy, &progress))
            .await
        {
            Ok(image) => events.post_event(TaskEvent::ImagePulled {
                image_name: image_name.to_string(),
                image,
            }),
            Err(RuntimeError::Failed(message)) => events.post_event(TaskEvent::ImagePullFailed {
                image_name: image_name.to_string(),
                message,
            }),
            Err(err) => return Err(escalate(err)),
        }
        Ok(())
    }

    async fn create_container(
        &self,
        container: &Container,
        image: &ImageReference,
        network: &NetworkReference,
        events: &dyn TaskEventSink,
    ) -> anyhow::Result<()> {
        self.ensure_not_cancelled()?;

        match self
            .runtime
            .create_container(container, image, network)
            .await
        {
            Ok(reference) => events.post_event(TaskEvent::ContainerCreated {
                container: container.name.clone(),
                reference,
            }),
            Err(RuntimeError::Failed(message)) => {
                events.post_event(TaskEvent::ContainerCreationFailed {
                    container: container.name.clone(),
                    message,
                })
            }
            Err(err) => return Err(escalate(err)),
        }
        Ok(())
    }

    async fn run_container(
        &self,
        container: &ContainerName,
        reference: &ContainerReference,
        main: bool,
        events: &dyn TaskEventSink,
    ) -> anyhow::Result<()> {
        let run_failed = |message: String| TaskEvent::ContainerRunFailed {
            container: container.clone(),
            message,
        };

        self.ensure_not_cancelled()?;

        match self.runtime.start_container(reference).await {
            Ok(()) => events.post_event(TaskEvent::ContainerStarted {
                container: container.clone(),
            }),
            Err(RuntimeError::Failed(message)) => {
                events.post_event(run_failed(message));
                return Ok(());
            }
            Err(err) => return Err(escalate(err)),
        }

        if !main {
            return Ok(());
        }

        debug!(container = %container, "waiting for main container to exit");

        match self.guarded(self.runtime.wait_for_exit(reference)).await {
            Ok(exit_code) => events.post_event(TaskEvent::RunningContainerExited {
                container: container.clone(),
                exit_code,
            }),
            Err(RuntimeError::Failed(message)) => events.post_event(run_failed(message)),
            Err(err) => return Err(escalate(err)),
        }
        Ok(())
    }

    async fn wait_for_healthy(
        &self,
        container: &ContainerName,
        reference: &ContainerReference,
        events: &dyn TaskEventSink,
    ) -> anyhow::Result<()> {
        match self.guarded(self.runtime.wait_for_healthy(reference)).await {
            Ok(()) => events.post_event(TaskEvent::ContainerBecameHealthy {
                container: container.clone(),
            }),
            Err(RuntimeError::Failed(message)) => {
                events.post_event(TaskEvent::ContainerDidNotBecomeHealthy {
                    container: container.clone(),
                    message,
                })
            }
            Err(err) => return Err(escalate(err)),
        }
        Ok(())
    }

    async fn run_setup_command(
        &self,
        container: &ContainerName,
        reference: &ContainerReference,
        command: &SetupCommand,
        index: usize,
        events: &dyn TaskEventSink,
    ) -> anyhow::Result<()> {
        events.post_event(TaskEvent::RunningSetupCommand {
            container: container.clone(),
            command: command.command.clone(),
            index,
        });

        match self.guarded(self.runtime.exec(reference, command)).await {
            Ok(result) if result.exit_code == 0 => {
                events.post_event(TaskEvent::SetupCommandCompleted {
                    container: container.clone(),
                    index,
                })
            }
            Ok(result) => events.post_event(TaskEvent::SetupCommandFailed {
                container: container.clone(),
                command: command.command.clone(),
                index,
                exit_code: result.exit_code,
                output: result.output,
            }),
            Err(RuntimeError::Failed(message)) => {
                events.post_event(TaskEvent::SetupCommandExecutionError {
                    container: container.clone(),
                    command: command.command.clone(),
                    index,
                    message,
                })
            }
            Err(err) => return Err(escalate(err)),
        }
        Ok(())
    }

    // Cleanup runners do not observe the cancellation token.

    async fn stop_container(
        &self,
        container: &ContainerName,
        reference: &ContainerReference,
        events: &dyn TaskEventSink,
    ) -> anyhow::Result<()> {
        match self.runtime.stop_container(reference).await {
            Ok(()) => events.post_event(TaskEvent::ContainerStopped {
                container: container.clone(),
            }),
            Err(RuntimeError::Failed(message)) => {
                events.post_event(TaskEvent::ContainerStopFailed {
                    container: container.clone(),
                    message,
                })
            }
            Err(err) => return Err(escalate(err)),
        }
        Ok(())
    }

    async fn remove_container(
        &self,
        container: &ContainerName,
        reference: &ContainerReference,
        events: &dyn TaskEventSink,
    ) -> anyhow::Result<()> {
        match self.runtime.remove_container(reference).await {
            Ok(()) => events.post_event(TaskEvent::ContainerRemoved {
                container: container.clone(),
            }),
            Err(RuntimeError::Failed(message)) => {
                events.post_event(TaskEvent::ContainerRemovalFailed {
                    container: container.clone(),
                    message,
                })
            }
            Err(err) => return Err(escalate(err)),
        }
        Ok(())
    }

    async fn delete_network(
        &self,
        network: &NetworkReference,
        events: &dyn TaskEventSink,
    ) -> anyhow::Result<()> {
        match self.runtime.delete_network(network).await {
            Ok(()) => events.post_event(TaskEvent::TaskNetworkDeleted),
            Err(RuntimeError::Failed(message)) => {
                events.post_event(TaskEvent::TaskNetworkDeletionFailed { message })
            }
            Err(err) => return Err(escalate(err)),
        }
        Ok(())
    }
}

impl StepRunner for TaskStepRunner {
    fn run<'a>(&'a self, step: &'a TaskStep, events: &'a dyn TaskEventSink) -> StepFuture<'a> {
        Box::pin(async move {
            match step {
                TaskStep::PrepareTaskNetwork => self.prepare_network(events).await,
                TaskStep::BuildImage { container } => self.build_image(container, events).await,
                TaskStep::PullImage {
                    image_name,
                    pull_policy,
                } => self.pull_image(image_name, *pull_policy, events).await,
                TaskStep::CreateContainer {
                    container,
                    image,
                    network,
                } => {
                    self.create_container(container, image, network, events)
                        .await
                }
                TaskStep::RunContainer {
                    container,
                    reference,
                    main,
                } => self.run_container(container, reference, *main, events).await,
                TaskStep::WaitForContainerToBecomeHealthy {
                    container,
                    reference,
                } => self.wait_for_healthy(container, reference, events).await,
                TaskStep::RunSetupCommand {
                    container,
                    reference,
                    command,
                    index,
                } => {
                    self.run_setup_command(container, reference, command, *index, events)
                        .await
                }
                TaskStep::MarkContainerReady { container } => {
                    events.post_event(TaskEvent::ContainerBecameReady {
                        container: container.clone(),
                    });
                    Ok(())
                }
                TaskStep::StopContainer {
                    container,
                    reference,
                } => self.stop_container(container, reference, events).await,
                TaskStep::RemoveContainer {
                    container,
                    reference,
                } => self.remove_container(container, reference, events).await,
                TaskStep::DeleteTaskNetwork { network } => {
                    self.delete_network(network, events).await
                }
            }
        })
    }
}

/// Turn a runtime error that is not a typed failure into the step's `Err`.
fn escalate(err: RuntimeError) -> anyhow::Error {
    match err {
        RuntimeError::Cancelled => anyhow::Error::new(Cancelled),
        RuntimeError::Other(err) => err,
        RuntimeError::Failed(message) => anyhow!(message),
    }
}
