// src/config/mod.rs

//! Configuration loading and validation for taskrig.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate cross-references between tasks and containers (`validate.rs`).
//!
//! Container dependency cycles are deliberately *not* checked here: they are
//! reported per task by [`crate::dag::ContainerDependencyGraph`] when the task
//! is about to run.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{
    ConfigFile, ConfigSection, Container, HealthCheckConfig, ImageSource, RawConfigFile,
    SetupCommand, Task, TaskContainerCustomisation, TaskRunConfiguration,
};
