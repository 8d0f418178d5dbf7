// src/config/model.rs

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{ContainerName, ImagePullPolicy, TaskName};

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [config]
/// max_parallelism = 4
///
/// [container.db]
/// image = "postgres:16"
///
/// [container.app]
/// build_directory = "."
/// dependencies = ["db"]
///
/// [task.test]
/// run = { container = "app", command = "cargo test" }
/// ```
///
/// All sections are optional at the serde level; [`ConfigFile::try_from`]
/// enforces the semantic rules.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    /// Global behaviour config from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// Container catalogue from `[container.<name>]`.
    #[serde(default)]
    pub container: BTreeMap<ContainerName, Container>,

    /// All tasks from `[task.<name>]`.
    #[serde(default)]
    pub task: BTreeMap<TaskName, Task>,
}

/// A validated configuration.
///
/// Only obtainable through `TryFrom<RawConfigFile>`, so holders can assume
/// every cross-reference resolves. Container and task `name` fields are
/// filled in from their table keys.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub container: BTreeMap<ContainerName, Container>,
    pub task: BTreeMap<TaskName, Task>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        config: ConfigSection,
        mut container: BTreeMap<ContainerName, Container>,
        mut task: BTreeMap<TaskName, Task>,
    ) -> Self {
        for (name, c) in container.iter_mut() {
            c.name = name.clone();
        }
        for (name, t) in task.iter_mut() {
            t.name = name.clone();
        }

        Self {
            config,
            container,
            task,
        }
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Maximum number of capped steps running at once. `None` = unlimited.
    #[serde(default)]
    pub max_parallelism: Option<usize>,

    /// Whether to clean up containers and networks after a failed run.
    #[serde(default = "default_true")]
    pub cleanup_after_failure: bool,

    /// Whether to clean up containers and networks after a successful run.
    #[serde(default = "default_true")]
    pub cleanup_after_success: bool,

    /// Existing network to attach containers to instead of creating one.
    #[serde(default)]
    pub network: Option<String>,

    /// Prefix for runtime resource names (networks, containers, built images).
    #[serde(default = "default_project_name")]
    pub project_name: String,
}

fn default_true() -> bool {
    true
}

fn default_project_name() -> String {
    "taskrig".to_string()
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            max_parallelism: None,
            cleanup_after_failure: true,
            cleanup_after_success: true,
            network: None,
            project_name: default_project_name(),
        }
    }
}

/// `[container.<name>]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
pub struct Container {
    /// Filled from the table key during validation.
    #[serde(skip_deserializing)]
    pub name: ContainerName,

    /// Image to pull. Mutually exclusive with `build_directory`.
    #[serde(default)]
    pub image: Option<String>,

    #[serde(default)]
    pub image_pull_policy: ImagePullPolicy,

    /// Directory to build an image from. Mutually exclusive with `image`.
    #[serde(default)]
    pub build_directory: Option<String>,

    /// Dockerfile path relative to `build_directory`.
    #[serde(default)]
    pub dockerfile: Option<String>,

    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    #[serde(default)]
    pub working_directory: Option<String>,

    /// Port mappings in runtime syntax, e.g. `"8080:80"`.
    #[serde(default)]
    pub ports: Vec<String>,

    /// Volume mounts in runtime syntax, e.g. `"./src:/code"`.
    #[serde(default)]
    pub volumes: Vec<String>,

    /// Containers that must be ready before this one is created.
    #[serde(default)]
    pub dependencies: Vec<ContainerName>,

    /// If set, the container must report healthy before it counts as ready.
    #[serde(default)]
    pub health_check: Option<HealthCheckConfig>,

    /// Commands run inside the container, in order, before it counts as ready.
    #[serde(default)]
    pub setup_commands: Vec<SetupCommand>,
}

/// Where a container's image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Build {
        directory: String,
        dockerfile: Option<String>,
    },
    Pull {
        image_name: String,
        policy: ImagePullPolicy,
    },
}

impl Container {
    /// Image source for a validated container.
    ///
    /// Validation guarantees exactly one of `image` / `build_directory`.
    pub fn image_source(&self) -> ImageSource {
        match &self.build_directory {
            Some(directory) => ImageSource::Build {
                directory: directory.clone(),
                dockerfile: self.dockerfile.clone(),
            },
            None => ImageSource::Pull {
                image_name: self.image.clone().unwrap_or_default(),
                policy: self.image_pull_policy,
            },
        }
    }

    pub fn has_health_check(&self) -> bool {
        self.health_check.is_some()
    }
}

/// Health check run by the container runtime.
///
/// Durations are runtime duration strings (e.g. `"2s"`) passed through as-is.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
pub struct HealthCheckConfig {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub start_period: Option<String>,
    #[serde(default)]
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SetupCommand {
    pub command: String,
    #[serde(default)]
    pub working_directory: Option<String>,
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
pub struct Task {
    /// Filled from the table key during validation.
    #[serde(skip_deserializing)]
    pub name: TaskName,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub group: Option<String>,

    /// Tasks that must run (and succeed) before this one.
    #[serde(default)]
    pub prerequisites: Vec<TaskName>,

    /// Extra containers the main container depends on for this task only.
    #[serde(default)]
    pub dependencies: Vec<ContainerName>,

    /// Main container to run. `None` for tasks that only sequence prerequisites.
    #[serde(default)]
    pub run: Option<TaskRunConfiguration>,

    /// Per-task tweaks to dependency containers.
    #[serde(default)]
    pub customise: BTreeMap<ContainerName, TaskContainerCustomisation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TaskRunConfiguration {
    pub container: ContainerName,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    #[serde(default)]
    pub working_directory: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
pub struct TaskContainerCustomisation {
    #[serde(default)]
    pub working_directory: Option<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}
