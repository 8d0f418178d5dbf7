// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{Result, TaskrigError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::TaskrigError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.config, raw.container, raw.task))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_global_config(cfg)?;
    validate_containers(cfg)?;
    validate_tasks(cfg)?;
    validate_prerequisites(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(TaskrigError::ConfigError(
            "config must contain at least one [task.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.max_parallelism == Some(0) {
        return Err(TaskrigError::ConfigError(
            "[config].max_parallelism must be >= 1 (got 0)".to_string(),
        ));
    }

    if cfg.config.project_name.trim().is_empty() {
        return Err(TaskrigError::ConfigError(
            "[config].project_name must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_containers(cfg: &RawConfigFile) -> Result<()> {
    for (name, container) in cfg.container.iter() {
        match (&container.image, &container.build_directory) {
            (Some(_), Some(_)) => {
                return Err(TaskrigError::ConfigError(format!(
                    "container '{}' must not set both `image` and `build_directory`",
                    name
                )));
            }
            (None, None) => {
                return Err(TaskrigError::ConfigError(format!(
                    "container '{}' must set one of `image` or `build_directory`",
                    name
                )));
            }
            _ => {}
        }

        for dep in container.dependencies.iter() {
            if dep == name {
                return Err(TaskrigError::ConfigError(format!(
                    "container '{}' cannot depend on itself in `dependencies`",
                    name
                )));
            }
            if !cfg.container.contains_key(dep) {
                return Err(TaskrigError::ConfigError(format!(
                    "container '{}' has unknown dependency '{}' in `dependencies`",
                    name, dep
                )));
            }
        }

        for (index, setup) in container.setup_commands.iter().enumerate() {
            if setup.command.trim().is_empty() {
                return Err(TaskrigError::ConfigError(format!(
                    "container '{}' has an empty setup command at index {}",
                    name, index
                )));
            }
        }
    }
    Ok(())
}

fn validate_tasks(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        if task.run.is_none() && task.prerequisites.is_empty() {
            return Err(TaskrigError::ConfigError(format!(
                "task '{}' must set at least one of `run` or `prerequisites`",
                name
            )));
        }

        if task.run.is_none() && !task.dependencies.is_empty() {
            return Err(TaskrigError::ConfigError(format!(
                "task '{}' sets `dependencies` but has no `run` section",
                name
            )));
        }

        if let Some(run) = &task.run {
            if !cfg.container.contains_key(&run.container) {
                return Err(TaskrigError::ConfigError(format!(
                    "task '{}' runs unknown container '{}'",
                    name, run.container
                )));
            }

            if task.customise.contains_key(&run.container) {
                return Err(TaskrigError::ConfigError(format!(
                    "task '{}' cannot customise its main container '{}'; set the corresponding properties on `run` instead",
                    name, run.container
                )));
            }
        }

        for dep in task.dependencies.iter() {
            if !cfg.container.contains_key(dep) {
                return Err(TaskrigError::ConfigError(format!(
                    "task '{}' has unknown container '{}' in `dependencies`",
                    name, dep
                )));
            }
        }

        for customised in task.customise.keys() {
            if !cfg.container.contains_key(customised) {
                return Err(TaskrigError::ConfigError(format!(
                    "task '{}' customises unknown container '{}'",
                    name, customised
                )));
            }
        }

        for prerequisite in task.prerequisites.iter() {
            if !cfg.task.contains_key(prerequisite) {
                return Err(TaskrigError::TaskNotFound(format!(
                    "'{}' (prerequisite of task '{}')",
                    prerequisite, name
                )));
            }
        }
    }
    Ok(())
}

fn validate_prerequisites(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: prerequisite -> task.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.task.keys() {
        graph.add_node(name.as_str());
    }

    for (name, task) in cfg.task.iter() {
        for prerequisite in task.prerequisites.iter() {
            graph.add_edge(prerequisite.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(TaskrigError::DagCycle(format!(
            "cycle detected in task prerequisites involving task '{}'",
            cycle.node_id()
        ))),
    }
}
