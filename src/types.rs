use std::fmt;

use serde::{Deserialize, Serialize};

/// Container names are used as identifiers throughout the engine.
pub type ContainerName = String;

/// Task names as declared under `[task.<name>]`.
pub type TaskName = String;

/// When to pull an image that may already be present locally.
///
/// - `IfNotPresent`: only pull if the runtime does not already have the image
///   (default behaviour).
/// - `Always`: pull on every run, even if a local copy exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImagePullPolicy {
    IfNotPresent,
    Always,
}

impl Default for ImagePullPolicy {
    fn default() -> Self {
        ImagePullPolicy::IfNotPresent
    }
}

/// An image known to the container runtime (tag or ID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ImageReference {
    pub id: String,
}

impl ImageReference {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// A network known to the container runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct NetworkReference {
    pub id: String,
}

impl NetworkReference {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl fmt::Display for NetworkReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// A container created by the runtime for one of the task's containers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ContainerReference {
    /// Runtime-assigned ID.
    pub id: String,
    /// Runtime-level name (distinct from the configured container name).
    pub name: String,
}

impl ContainerReference {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ContainerReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}
