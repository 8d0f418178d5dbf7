// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::types::{ContainerName, TaskName};

#[derive(Error, Debug)]
pub enum TaskrigError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Cycle detected in task prerequisites: {0}")]
    DagCycle(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors raised while building a task's container dependency graph.
///
/// These are fatal and always reported before any step runs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("the container '{container}' referenced by {referenced_by} does not exist")]
    MissingContainer {
        container: ContainerName,
        /// Human-readable origin of the reference, e.g. `task 'build'`.
        referenced_by: String,
    },

    #[error("the container '{container}' cannot depend on itself")]
    SelfDependency { container: ContainerName },

    #[error(
        "there is a dependency cycle in task '{task}' between containers: {}",
        containers.join(", ")
    )]
    Cycle {
        task: TaskName,
        /// Every container on the cycle, sorted by name.
        containers: Vec<ContainerName>,
    },
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TaskrigError>;
