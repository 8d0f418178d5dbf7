// src/dag/graph.rs

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{Container, Task};
use crate::errors::GraphError;
use crate::types::{ContainerName, TaskName};

/// A container that must exist for a task to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerNode {
    /// Container definition with the task's customisations applied.
    pub container: Container,
    /// Direct dependencies: containers that must be ready before this one is created.
    pub depends_on: BTreeSet<ContainerName>,
    /// Direct dependents: containers that wait on this one.
    pub depended_on_by: BTreeSet<ContainerName>,
    /// `true` for the task's main container.
    pub is_root: bool,
}

impl ContainerNode {
    pub fn name(&self) -> &str {
        &self.container.name
    }
}

/// Immutable view of the containers one task needs: the main container plus
/// its transitive dependencies, and the edges between them.
///
/// Built once per task execution. A task without a `run` section yields an
/// empty graph.
#[derive(Debug, Clone)]
pub struct ContainerDependencyGraph {
    task_name: TaskName,
    root: Option<ContainerName>,
    nodes: BTreeMap<ContainerName, ContainerNode>,
    /// Topological order, dependencies before dependents.
    order: Vec<ContainerName>,
}

impl ContainerDependencyGraph {
    /// Build the graph for `task` from the container catalogue.
    ///
    /// Fails if a referenced container is missing, a container depends on
    /// itself, or the induced edges contain a cycle. Does not mutate its inputs.
    pub fn new(
        task: &Task,
        containers: &BTreeMap<ContainerName, Container>,
    ) -> Result<Self, GraphError> {
        let Some(run) = &task.run else {
            return Ok(Self {
                task_name: task.name.clone(),
                root: None,
                nodes: BTreeMap::new(),
                order: Vec::new(),
            });
        };

        if !containers.contains_key(&run.container) {
            return Err(GraphError::MissingContainer {
                container: run.container.clone(),
                referenced_by: format!("task '{}'", task.name),
            });
        }

        let mut nodes = Self::collect_nodes(task, &run.container, containers)?;

        // Second pass: populate dependents based on deps.
        let edges: Vec<(ContainerName, ContainerName)> = nodes
            .iter()
            .flat_map(|(name, node)| {
                node.depends_on
                    .iter()
                    .map(move |dep| (dep.clone(), name.clone()))
            })
            .collect();

        for (dep, dependent) in edges {
            if let Some(dep_node) = nodes.get_mut(&dep) {
                dep_node.depended_on_by.insert(dependent);
            }
        }

        let order = Self::topological_order(&task.name, &nodes)?;

        Ok(Self {
            task_name: task.name.clone(),
            root: Some(run.container.clone()),
            nodes,
            order,
        })
    }

    /// Breadth-first walk from the main container, resolving every reachable
    /// dependency exactly once.
    fn collect_nodes(
        task: &Task,
        root: &str,
        containers: &BTreeMap<ContainerName, Container>,
    ) -> Result<BTreeMap<ContainerName, ContainerNode>, GraphError> {
        let mut nodes = BTreeMap::new();
        let mut queue: VecDeque<ContainerName> = VecDeque::from([root.to_string()]);

        while let Some(name) = queue.pop_front() {
            if nodes.contains_key(&name) {
                continue;
            }

            let Some(container) = containers.get(&name) else {
                // Enqueued names are checked below before being pushed.
                continue;
            };

            let is_root = name == root;
            let mut depends_on: BTreeSet<ContainerName> =
                container.dependencies.iter().cloned().collect();

            if is_root {
                depends_on.extend(task.dependencies.iter().cloned());
            }

            if depends_on.contains(&name) {
                return Err(GraphError::SelfDependency { container: name });
            }

            for dep in depends_on.iter() {
                if !containers.contains_key(dep) {
                    let from_task = is_root
                        && task.dependencies.contains(dep)
                        && !container.dependencies.contains(dep);

                    let referenced_by = if from_task {
                        format!("task '{}'", task.name)
                    } else {
                        format!("container '{}'", name)
                    };

                    return Err(GraphError::MissingContainer {
                        container: dep.clone(),
                        referenced_by,
                    });
                }

                queue.push_back(dep.clone());
            }

            let node = ContainerNode {
                container: customise(&name, container, task, is_root),
                depends_on,
                depended_on_by: BTreeSet::new(),
                is_root,
            };
            nodes.insert(name, node);
        }

        Ok(nodes)
    }

    fn topological_order(
        task_name: &str,
        nodes: &BTreeMap<ContainerName, ContainerNode>,
    ) -> Result<Vec<ContainerName>, GraphError> {
        // Edge direction: dep -> dependent.
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

        for name in nodes.keys() {
            graph.add_node(name.as_str());
        }

        for (name, node) in nodes.iter() {
            for dep in node.depends_on.iter() {
                graph.add_edge(dep.as_str(), name.as_str(), ());
            }
        }

        match toposort(&graph, None) {
            Ok(order) => Ok(order.into_iter().map(str::to_string).collect()),
            Err(_cycle) => {
                let mut containers: Vec<ContainerName> = tarjan_scc(&graph)
                    .into_iter()
                    .find(|component| component.len() > 1)
                    .unwrap_or_default()
                    .into_iter()
                    .map(str::to_string)
                    .collect();
                containers.sort();

                Err(GraphError::Cycle {
                    task: task_name.to_string(),
                    containers,
                })
            }
        }
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    /// The task's main container, if it has one.
    pub fn root(&self) -> Option<&ContainerNode> {
        self.root.as_ref().and_then(|name| self.nodes.get(name))
    }

    pub fn node(&self, name: &str) -> Option<&ContainerNode> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Nodes in topological order, dependencies first.
    pub fn nodes_in_order(&self) -> impl Iterator<Item = &ContainerNode> {
        self.order.iter().filter_map(|name| self.nodes.get(name))
    }

    /// Container names in topological order, dependencies first.
    pub fn container_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    /// Immediate dependencies of a container.
    pub fn dependencies_of(&self, name: &str) -> Option<&BTreeSet<ContainerName>> {
        self.nodes.get(name).map(|n| &n.depends_on)
    }

    /// Immediate dependents of a container.
    pub fn dependents_of(&self, name: &str) -> Option<&BTreeSet<ContainerName>> {
        self.nodes.get(name).map(|n| &n.depended_on_by)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Apply the task's `run` overrides (main container) or `customise` entry
/// (dependency containers) to a catalogue container.
fn customise(name: &str, container: &Container, task: &Task, is_root: bool) -> Container {
    let mut customised = container.clone();
    customised.name = name.to_string();

    if is_root {
        if let Some(run) = &task.run {
            if run.command.is_some() {
                customised.command = run.command.clone();
            }
            if run.working_directory.is_some() {
                customised.working_directory = run.working_directory.clone();
            }
            customised.environment.extend(
                run.environment
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
        }
    } else if let Some(customisation) = task.customise.get(name) {
        if customisation.working_directory.is_some() {
            customised.working_directory = customisation.working_directory.clone();
        }
        customised.environment.extend(
            customisation
                .environment
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
    }

    customised
}
