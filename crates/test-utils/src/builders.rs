#![allow(dead_code)]

use std::collections::BTreeMap;

use taskrig::config::{
    ConfigFile, ConfigSection, Container, HealthCheckConfig, RawConfigFile, SetupCommand, Task,
    TaskContainerCustomisation, TaskRunConfiguration,
};
use taskrig::errors::Result;
use taskrig::types::ImagePullPolicy;

/// Builder for `Container`.
pub struct ContainerBuilder {
    container: Container,
}

impl ContainerBuilder {
    /// A container that pulls `image`.
    pub fn image(name: &str, image: &str) -> Self {
        Self {
            container: Container {
                name: name.to_string(),
                image: Some(image.to_string()),
                ..Container::default()
            },
        }
    }

    /// A container whose image is built from `directory`.
    pub fn build_directory(name: &str, directory: &str) -> Self {
        Self {
            container: Container {
                name: name.to_string(),
                build_directory: Some(directory.to_string()),
                ..Container::default()
            },
        }
    }

    pub fn depends_on(mut self, dep: &str) -> Self {
        self.container.dependencies.push(dep.to_string());
        self
    }

    pub fn command(mut self, command: &str) -> Self {
        self.container.command = Some(command.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.container
            .environment
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn pull_policy(mut self, policy: ImagePullPolicy) -> Self {
        self.container.image_pull_policy = policy;
        self
    }

    pub fn health_check(mut self, command: &str) -> Self {
        self.container.health_check = Some(HealthCheckConfig {
            command: Some(command.to_string()),
            ..HealthCheckConfig::default()
        });
        self
    }

    pub fn setup_command(mut self, command: &str) -> Self {
        self.container.setup_commands.push(SetupCommand {
            command: command.to_string(),
            working_directory: None,
        });
        self
    }

    pub fn build(self) -> Container {
        self.container
    }
}

/// Builder for `Task`.
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            task: Task {
                name: name.to_string(),
                ..Task::default()
            },
        }
    }

    /// Run `container` as the task's main container.
    pub fn run(mut self, container: &str) -> Self {
        self.task.run = Some(TaskRunConfiguration {
            container: container.to_string(),
            command: None,
            environment: BTreeMap::new(),
            working_directory: None,
        });
        self
    }

    pub fn run_command(mut self, command: &str) -> Self {
        if let Some(run) = self.task.run.as_mut() {
            run.command = Some(command.to_string());
        }
        self
    }

    pub fn run_env(mut self, key: &str, value: &str) -> Self {
        if let Some(run) = self.task.run.as_mut() {
            run.environment.insert(key.to_string(), value.to_string());
        }
        self
    }

    pub fn depends_on(mut self, container: &str) -> Self {
        self.task.dependencies.push(container.to_string());
        self
    }

    pub fn prerequisite(mut self, task: &str) -> Self {
        self.task.prerequisites.push(task.to_string());
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.task.description = Some(description.to_string());
        self
    }

    pub fn customise_env(mut self, container: &str, key: &str, value: &str) -> Self {
        self.task
            .customise
            .entry(container.to_string())
            .or_insert_with(TaskContainerCustomisation::default)
            .environment
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn customise_working_directory(mut self, container: &str, dir: &str) -> Self {
        self.task
            .customise
            .entry(container.to_string())
            .or_insert_with(TaskContainerCustomisation::default)
            .working_directory = Some(dir.to_string());
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

/// Container catalogue keyed by name.
pub fn catalogue(containers: impl IntoIterator<Item = Container>) -> BTreeMap<String, Container> {
    containers
        .into_iter()
        .map(|c| (c.name.clone(), c))
        .collect()
}

/// Builder for `ConfigFile`, going through the real validation.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                container: BTreeMap::new(),
                task: BTreeMap::new(),
            },
        }
    }

    pub fn with_container(mut self, container: Container) -> Self {
        self.config
            .container
            .insert(container.name.clone(), container);
        self
    }

    pub fn with_task(mut self, task: Task) -> Self {
        self.config.task.insert(task.name.clone(), task);
        self
    }

    pub fn max_parallelism(mut self, n: usize) -> Self {
        self.config.config.max_parallelism = Some(n);
        self
    }

    pub fn network(mut self, network: &str) -> Self {
        self.config.config.network = Some(network.to_string());
        self
    }

    pub fn cleanup_after_failure(mut self, val: bool) -> Self {
        self.config.config.cleanup_after_failure = val;
        self
    }

    pub fn cleanup_after_success(mut self, val: bool) -> Self {
        self.config.config.cleanup_after_success = val;
        self
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}
