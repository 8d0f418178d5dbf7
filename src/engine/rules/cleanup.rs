// src/engine/rules/cleanup.rs

//! Cleanup-stage planning.
//!
//! Cleanup is planned from what actually happened, not from the static plan:
//! only containers with a `ContainerCreated` event get rules, and only a
//! network this run created is deleted.

use std::collections::BTreeSet;

use crate::dag::ContainerDependencyGraph;
use crate::engine::history::EventHistory;
use crate::engine::rules::{StagePlanner, TaskStepRule};
use crate::types::ContainerName;

/// Plans the Cleanup stage from the event history.
///
/// Containers are handled in reverse creation order. A container that was
/// started (and has not stopped on its own) gets a stop rule that waits for
/// its running dependents; every created container gets a remove rule. The
/// network rule comes last and waits for every removal to be accounted for.
///
/// Planning is idempotent: the same history always gives the same rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupStagePlanner;

impl StagePlanner for CleanupStagePlanner {
    fn plan(&self, graph: &ContainerDependencyGraph, history: &EventHistory) -> Vec<TaskStepRule> {
        let created = history.created_containers();

        let needs_stop: BTreeSet<&str> = created
            .iter()
            .map(|(name, _)| name.as_str())
            .filter(|name| {
                history.has_started(name) && !history.is_stopped(name) && !history.is_removed(name)
            })
            .collect();

        let mut rules = Vec::new();

        for (name, reference) in created.iter().rev() {
            let name = name.as_str();

            if needs_stop.contains(name) {
                let stop_after: BTreeSet<ContainerName> = graph
                    .dependents_of(name)
                    .into_iter()
                    .flatten()
                    .filter(|dependent| needs_stop.contains(dependent.as_str()))
                    .cloned()
                    .collect();

                rules.push(TaskStepRule::StopContainer {
                    container: name.to_string(),
                    reference: (*reference).clone(),
                    stop_after,
                });
            }

            if !history.is_removed(name) {
                rules.push(TaskStepRule::RemoveContainer {
                    container: name.to_string(),
                    reference: (*reference).clone(),
                    wait_for_stop: needs_stop.contains(name),
                });
            }
        }

        if let Some(network) = history.created_network()
            && !history.network_deleted()
        {
            rules.push(TaskStepRule::DeleteTaskNetwork {
                network: network.clone(),
                containers: created.iter().map(|(name, _)| (*name).clone()).collect(),
            });
        }

        rules
    }
}

/// Commands a user can run to remove whatever this run left behind.
///
/// Covers every created container not yet removed (newest first) and the
/// network this run created, if it still exists.
pub fn manual_cleanup_commands(history: &EventHistory) -> Vec<String> {
    let mut commands: Vec<String> = history
        .created_containers()
        .into_iter()
        .rev()
        .filter(|(name, _)| !history.is_removed(name))
        .map(|(_, reference)| format!("docker rm --force {}", reference.id))
        .collect();

    if let Some(network) = history.created_network()
        && !history.network_deleted()
    {
        commands.push(format!("docker network rm {}", network.id));
    }

    commands
}
