// src/engine/rules/mod.rs

//! Step rules: pure functions from event history to step readiness.
//!
//! A stage is an ordered list of [`TaskStepRule`]s produced by a planner
//! ([`run::RunStagePlanner`] or [`cleanup::CleanupStagePlanner`]). Rules hold
//! no mutable state; whether a rule is ready, waiting or done is recomputed
//! from the history on every evaluation.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::config::model::{Container, ImageSource, SetupCommand};
use crate::dag::ContainerDependencyGraph;
use crate::engine::history::EventHistory;
use crate::engine::steps::TaskStep;
use crate::types::{ContainerName, ContainerReference, ImagePullPolicy, NetworkReference};

pub mod cleanup;
pub mod run;

pub use cleanup::{CleanupStagePlanner, manual_cleanup_commands};
pub use run::RunStagePlanner;

/// Result of evaluating one rule against the current history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleEvaluation {
    /// Preconditions not met yet (and maybe never will be).
    NotReady,
    /// The step can run now.
    Ready(TaskStep),
    /// The step's outcome (success or failure) is already in the history.
    Done,
}

/// Produces the ordered rule set for a stage.
pub trait StagePlanner {
    fn plan(&self, graph: &ContainerDependencyGraph, history: &EventHistory) -> Vec<TaskStepRule>;
}

/// One producer of at most one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "rule")]
pub enum TaskStepRule {
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
        /// Containers that must be ready first.
        dependencies: BTreeSet<ContainerName>,
    },
    RunContainer {
        container: ContainerName,
        main: bool,
    },
    WaitForContainerToBecomeHealthy {
        container: ContainerName,
    },
    RunSetupCommand {
        container: ContainerName,
        command: SetupCommand,
        index: usize,
        /// Whether command 0 waits for "healthy" rather than "started".
        after_health_check: bool,
    },
    MarkContainerReady {
        container: ContainerName,
        setup_commands: usize,
        health_check: bool,
    },
    StopContainer {
        container: ContainerName,
        reference: ContainerReference,
        /// Dependents that must be stopped first.
        stop_after: BTreeSet<ContainerName>,
    },
    RemoveContainer {
        container: ContainerName,
        reference: ContainerReference,
        /// Wait for the container to stop (or fail to) before removing it.
        wait_for_stop: bool,
    },
    DeleteTaskNetwork {
        network: NetworkReference,
        /// Every container created during the run.
        containers: Vec<ContainerName>,
    },
}

impl TaskStepRule {
    pub fn evaluate(&self, history: &EventHistory) -> RuleEvaluation {
        match self {
            TaskStepRule::PrepareTaskNetwork => {
                if history.task_network().is_some() || history.network_preparation_failed() {
                    RuleEvaluation::Done
                } else {
                    RuleEvaluation::Ready(TaskStep::PrepareTaskNetwork)
                }
            }

            TaskStepRule::BuildImage { container } => {
                if history.built_image(&container.name).is_some()
                    || history.image_build_failed(&container.name)
                {
                    RuleEvaluation::Done
                } else {
                    RuleEvaluation::Ready(TaskStep::BuildImage {
                        container: container.clone(),
                    })
                }
            }

            TaskStepRule::PullImage {
                image_name,
                pull_policy,
            } => {
                if history.pulled_image(image_name).is_some()
                    || history.image_pull_failed(image_name)
                {
                    RuleEvaluation::Done
                } else {
                    RuleEvaluation::Ready(TaskStep::PullImage {
                        image_name: image_name.clone(),
                        pull_policy: *pull_policy,
                    })
                }
            }

            TaskStepRule::CreateContainer {
                container,
                dependencies,
            } => evaluate_create(history, container, dependencies),

            TaskStepRule::RunContainer { container, main } => {
                if history.has_started(container) || history.run_failed(container) {
                    return RuleEvaluation::Done;
                }
                match history.container_reference(container) {
                    Some(reference) => RuleEvaluation::Ready(TaskStep::RunContainer {
                        container: container.clone(),
                        reference: reference.clone(),
                        main: *main,
                    }),
                    None => RuleEvaluation::NotReady,
                }
            }

            TaskStepRule::WaitForContainerToBecomeHealthy { container } => {
                if history.is_healthy(container) || history.health_check_failed(container) {
                    return RuleEvaluation::Done;
                }
                match history.container_reference(container) {
                    Some(reference) if history.has_started(container) => {
                        RuleEvaluation::Ready(TaskStep::WaitForContainerToBecomeHealthy {
                            container: container.clone(),
                            reference: reference.clone(),
                        })
                    }
                    _ => RuleEvaluation::NotReady,
                }
            }

            TaskStepRule::RunSetupCommand {
                container,
                command,
                index,
                after_health_check,
            } => {
                if history.setup_command_completed(container, *index)
                    || history.setup_command_failed(container, *index)
                {
                    return RuleEvaluation::Done;
                }

                let previous_done = match index.checked_sub(1) {
                    Some(previous) => history.setup_command_completed(container, previous),
                    None if *after_health_check => history.is_healthy(container),
                    None => history.has_started(container),
                };

                match history.container_reference(container) {
                    Some(reference) if previous_done => {
                        RuleEvaluation::Ready(TaskStep::RunSetupCommand {
                            container: container.clone(),
                            reference: reference.clone(),
                            command: command.clone(),
                            index: *index,
                        })
                    }
                    _ => RuleEvaluation::NotReady,
                }
            }

            TaskStepRule::MarkContainerReady {
                container,
                setup_commands,
                health_check,
            } => {
                if history.is_ready(container) {
                    return RuleEvaluation::Done;
                }

                let prepared = match setup_commands.checked_sub(1) {
                    Some(last) => history.setup_command_completed(container, last),
                    None if *health_check => history.is_healthy(container),
                    None => history.has_started(container),
                };

                if prepared {
                    RuleEvaluation::Ready(TaskStep::MarkContainerReady {
                        container: container.clone(),
                    })
                } else {
                    RuleEvaluation::NotReady
                }
            }

            TaskStepRule::StopContainer {
                container,
                reference,
                stop_after,
            } => {
                if history.is_stopped(container)
                    || history.stop_failed(container)
                    || history.is_removed(container)
                {
                    return RuleEvaluation::Done;
                }

                let dependents_stopped = stop_after
                    .iter()
                    .all(|dependent| history.is_stopped(dependent) || history.stop_failed(dependent));

                if dependents_stopped {
                    RuleEvaluation::Ready(TaskStep::StopContainer {
                        container: container.clone(),
                        reference: reference.clone(),
                    })
                } else {
                    RuleEvaluation::NotReady
                }
            }

            TaskStepRule::RemoveContainer {
                container,
                reference,
                wait_for_stop,
            } => {
                if history.is_removed(container) || history.removal_failed(container) {
                    return RuleEvaluation::Done;
                }

                let stopped = history.is_stopped(container) || history.stop_failed(container);

                if !*wait_for_stop || stopped {
                    RuleEvaluation::Ready(TaskStep::RemoveContainer {
                        container: container.clone(),
                        reference: reference.clone(),
                    })
                } else {
                    RuleEvaluation::NotReady
                }
            }

            TaskStepRule::DeleteTaskNetwork {
                network,
                containers,
            } => {
                if history.network_deleted() || history.network_deletion_failed() {
                    return RuleEvaluation::Done;
                }

                let all_accounted_for = containers
                    .iter()
                    .all(|c| history.is_removed(c) || history.removal_failed(c));

                if all_accounted_for {
                    RuleEvaluation::Ready(TaskStep::DeleteTaskNetwork {
                        network: network.clone(),
                    })
                } else {
                    RuleEvaluation::NotReady
                }
            }
        }
    }
}

fn evaluate_create(
    history: &EventHistory,
    container: &Container,
    dependencies: &BTreeSet<ContainerName>,
) -> RuleEvaluation {
    if history.container_reference(&container.name).is_some()
        || history.creation_failed(&container.name)
    {
        return RuleEvaluation::Done;
    }

    let image = match container.image_source() {
        ImageSource::Build { .. } => history.built_image(&container.name),
        ImageSource::Pull { image_name, .. } => history.pulled_image(&image_name),
    };

    let (Some(image), Some(network)) = (image, history.task_network()) else {
        return RuleEvaluation::NotReady;
    };

    if !dependencies.iter().all(|dep| history.is_ready(dep)) {
        return RuleEvaluation::NotReady;
    }

    RuleEvaluation::Ready(TaskStep::CreateContainer {
        container: container.clone(),
        image: image.clone(),
        network: network.clone(),
    })
}

impl fmt::Display for TaskStepRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStepRule::PrepareTaskNetwork => f.write_str("prepare task network"),
            TaskStepRule::BuildImage { container } => {
                write!(f, "build image for '{}'", container.name)
            }
            TaskStepRule::PullImage {
                image_name,
                pull_policy,
            } => write!(f, "pull '{image_name}' ({pull_policy:?})"),
            TaskStepRule::CreateContainer {
                container,
                dependencies,
            } => {
                write!(f, "create '{}'", container.name)?;
                if !dependencies.is_empty() {
                    let deps: Vec<&str> = dependencies.iter().map(String::as_str).collect();
                    write!(f, " once ready: {}", deps.join(", "))?;
                }
                Ok(())
            }
            TaskStepRule::RunContainer { container, main } => {
                if *main {
                    write!(f, "run '{container}' and wait for it to exit")
                } else {
                    write!(f, "start '{container}'")
                }
            }
            TaskStepRule::WaitForContainerToBecomeHealthy { container } => {
                write!(f, "wait for '{container}' to become healthy")
            }
            TaskStepRule::RunSetupCommand {
                container,
                command,
                index,
                ..
            } => write!(
                f,
                "run setup command #{index} in '{container}': {}",
                command.command
            ),
            TaskStepRule::MarkContainerReady { container, .. } => {
                write!(f, "mark '{container}' ready")
            }
            TaskStepRule::StopContainer { container, .. } => write!(f, "stop '{container}'"),
            TaskStepRule::RemoveContainer { container, .. } => write!(f, "remove '{container}'"),
            TaskStepRule::DeleteTaskNetwork { network, .. } => {
                write!(f, "delete network {network}")
            }
        }
    }
}
