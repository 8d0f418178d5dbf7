// src/engine/rules/run.rs

use std::collections::BTreeMap;

use crate::config::model::ImageSource;
use crate::dag::ContainerDependencyGraph;
use crate::engine::history::EventHistory;
use crate::engine::rules::{StagePlanner, TaskStepRule};
use crate::types::ImagePullPolicy;

/// Plans the Run stage from the static graph.
///
/// Rule order: the network first, then for each container in graph order its
/// image, create, run, health check, setup commands and ready marker. Pulls
/// are shared between containers using the same image.
///
/// The main container is only created and run: nothing depends on it, so it
/// gets no health check, setup command or ready rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunStagePlanner;

impl StagePlanner for RunStagePlanner {
    fn plan(&self, graph: &ContainerDependencyGraph, _history: &EventHistory) -> Vec<TaskStepRule> {
        if graph.is_empty() {
            return Vec::new();
        }

        let mut rules = vec![TaskStepRule::PrepareTaskNetwork];

        // Pull policy per image: `Always` wins if any container asks for it.
        let mut pulls: BTreeMap<String, ImagePullPolicy> = BTreeMap::new();
        for node in graph.nodes_in_order() {
            if let ImageSource::Pull { image_name, policy } = node.container.image_source() {
                let entry = pulls.entry(image_name).or_insert(policy);
                if policy == ImagePullPolicy::Always {
                    *entry = ImagePullPolicy::Always;
                }
            }
        }

        for node in graph.nodes_in_order() {
            let container = &node.container;
            let name = container.name.clone();

            match container.image_source() {
                ImageSource::Build { .. } => rules.push(TaskStepRule::BuildImage {
                    container: container.clone(),
                }),
                ImageSource::Pull { image_name, .. } => {
                    if let Some(pull_policy) = pulls.remove(&image_name) {
                        rules.push(TaskStepRule::PullImage {
                            image_name,
                            pull_policy,
                        });
                    }
                }
            }

            rules.push(TaskStepRule::CreateContainer {
                container: container.clone(),
                dependencies: node.depends_on.clone(),
            });

            rules.push(TaskStepRule::RunContainer {
                container: name.clone(),
                main: node.is_root,
            });

            if node.is_root {
                continue;
            }

            let health_check = container.has_health_check();
            if health_check {
                rules.push(TaskStepRule::WaitForContainerToBecomeHealthy {
                    container: name.clone(),
                });
            }

            for (index, command) in container.setup_commands.iter().enumerate() {
                rules.push(TaskStepRule::RunSetupCommand {
                    container: name.clone(),
                    command: command.clone(),
                    index,
                    after_health_check: health_check,
                });
            }

            rules.push(TaskStepRule::MarkContainerReady {
                container: name,
                setup_commands: container.setup_commands.len(),
                health_check,
            });
        }

        rules
    }
}
