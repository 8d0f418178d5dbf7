// tests/config_validation.rs

use std::io::Write;

use tempfile::NamedTempFile;

use taskrig::config::{ImageSource, load_and_validate, load_from_path};
use taskrig::errors::TaskrigError;
use taskrig::types::ImagePullPolicy;
use taskrig_test_utils::builders::{ConfigFileBuilder, ContainerBuilder, TaskBuilder};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn write_config(contents: &str) -> std::io::Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    file.write_all(contents.as_bytes())?;
    Ok(file)
}

fn config_error(contents: &str) -> String {
    let file = write_config(contents).unwrap();
    match load_and_validate(file.path()) {
        Err(TaskrigError::ConfigError(message)) => message,
        other => panic!("expected a config error, got {other:?}"),
    }
}

#[test]
fn full_config_loads_with_defaults_and_names() -> TestResult {
    let file = write_config(
        r#"
[config]
max_parallelism = 3
cleanup_after_success = false

[container.db]
image = "postgres:16"
image_pull_policy = "always"
environment = { POSTGRES_PASSWORD = "secret" }
health_check = { command = "pg_isready", interval = "1s", retries = 10 }
setup_commands = [{ command = "createdb test" }, { command = "migrate", working_directory = "/app" }]

[container.app]
build_directory = "."
dockerfile = "Dockerfile.ci"
dependencies = ["db"]
ports = ["8080:80"]
volumes = ["./src:/code"]

[task.test]
description = "Run the test suite"
run = { container = "app", command = "cargo test", environment = { RUST_LOG = "debug" } }
customise = { db = { environment = { POSTGRES_DB = "test" } } }

[task.all]
prerequisites = ["test"]
"#,
    )?;

    let cfg = load_and_validate(file.path())?;

    assert_eq!(cfg.config.max_parallelism, Some(3));
    assert!(cfg.config.cleanup_after_failure);
    assert!(!cfg.config.cleanup_after_success);
    assert_eq!(cfg.config.project_name, "taskrig");
    assert_eq!(cfg.config.network, None);

    let db = &cfg.container["db"];
    assert_eq!(db.name, "db");
    assert_eq!(
        db.image_source(),
        ImageSource::Pull {
            image_name: "postgres:16".to_string(),
            policy: ImagePullPolicy::Always,
        }
    );
    assert!(db.has_health_check());
    assert_eq!(db.setup_commands.len(), 2);
    assert_eq!(db.setup_commands[1].working_directory.as_deref(), Some("/app"));

    let app = &cfg.container["app"];
    assert_eq!(
        app.image_source(),
        ImageSource::Build {
            directory: ".".to_string(),
            dockerfile: Some("Dockerfile.ci".to_string()),
        }
    );
    assert_eq!(app.image_pull_policy, ImagePullPolicy::IfNotPresent);

    let test = &cfg.task["test"];
    assert_eq!(test.name, "test");
    assert_eq!(test.run.as_ref().unwrap().environment["RUST_LOG"], "debug");
    assert_eq!(test.customise["db"].environment["POSTGRES_DB"], "test");
    assert!(cfg.task["all"].run.is_none());

    Ok(())
}

#[test]
fn raw_load_does_not_validate() -> TestResult {
    let file = write_config(
        r#"
[task.test]
run = { container = "ghost" }
"#,
    )?;

    let raw = load_from_path(file.path())?;
    assert!(raw.container.is_empty());
    assert!(load_and_validate(file.path()).is_err());
    Ok(())
}

#[test]
fn invalid_toml_is_a_toml_error() -> TestResult {
    let file = write_config("[task.test\nrun = ")?;

    assert!(matches!(
        load_and_validate(file.path()),
        Err(TaskrigError::TomlError(_))
    ));
    Ok(())
}

#[test]
fn missing_file_is_an_io_error() {
    assert!(matches!(
        load_and_validate("/definitely/not/here/taskrig.toml"),
        Err(TaskrigError::IoError(_))
    ));
}

#[test]
fn config_without_tasks_is_rejected() {
    let message = config_error(
        r#"
[container.app]
image = "alpine"
"#,
    );
    assert!(message.contains("at least one [task.<name>]"));
}

#[test]
fn image_and_build_directory_are_exclusive() {
    let both = config_error(
        r#"
[container.app]
image = "alpine"
build_directory = "."

[task.test]
run = { container = "app" }
"#,
    );
    assert!(both.contains("must not set both"));

    let neither = config_error(
        r#"
[container.app]
command = "true"

[task.test]
run = { container = "app" }
"#,
    );
    assert!(neither.contains("must set one of"));
}

#[test]
fn zero_parallelism_is_rejected() {
    let message = config_error(
        r#"
[config]
max_parallelism = 0

[container.app]
image = "alpine"

[task.test]
run = { container = "app" }
"#,
    );
    assert!(message.contains("max_parallelism"));
}

#[test]
fn unknown_container_references_are_rejected() {
    let result = ConfigFileBuilder::new()
        .with_container(ContainerBuilder::image("app", "alpine").depends_on("db").build())
        .with_task(TaskBuilder::new("test").run("app").build())
        .try_build();
    assert!(
        matches!(result, Err(TaskrigError::ConfigError(ref m)) if m.contains("unknown dependency 'db'"))
    );

    let result = ConfigFileBuilder::new()
        .with_container(ContainerBuilder::image("app", "alpine").build())
        .with_task(TaskBuilder::new("test").run("web").build())
        .try_build();
    assert!(
        matches!(result, Err(TaskrigError::ConfigError(ref m)) if m.contains("unknown container 'web'"))
    );

    let result = ConfigFileBuilder::new()
        .with_container(ContainerBuilder::image("app", "alpine").build())
        .with_task(TaskBuilder::new("test").run("app").depends_on("cache").build())
        .try_build();
    assert!(matches!(result, Err(TaskrigError::ConfigError(_))));
}

#[test]
fn main_container_cannot_be_customised() {
    let result = ConfigFileBuilder::new()
        .with_container(ContainerBuilder::image("app", "alpine").build())
        .with_task(
            TaskBuilder::new("test")
                .run("app")
                .customise_env("app", "A", "B")
                .build(),
        )
        .try_build();

    assert!(
        matches!(result, Err(TaskrigError::ConfigError(ref m)) if m.contains("cannot customise its main container"))
    );
}

#[test]
fn task_needs_run_or_prerequisites() {
    let result = ConfigFileBuilder::new()
        .with_task(TaskBuilder::new("nothing").build())
        .try_build();

    assert!(matches!(result, Err(TaskrigError::ConfigError(_))));
}

#[test]
fn unknown_prerequisite_is_task_not_found() {
    let result = ConfigFileBuilder::new()
        .with_container(ContainerBuilder::image("app", "alpine").build())
        .with_task(TaskBuilder::new("test").run("app").prerequisite("build").build())
        .try_build();

    assert!(matches!(result, Err(TaskrigError::TaskNotFound(_))));
}

#[test]
fn prerequisite_cycle_is_rejected() {
    let result = ConfigFileBuilder::new()
        .with_container(ContainerBuilder::image("app", "alpine").build())
        .with_task(TaskBuilder::new("a").run("app").prerequisite("b").build())
        .with_task(TaskBuilder::new("b").run("app").prerequisite("a").build())
        .try_build();

    assert!(matches!(result, Err(TaskrigError::DagCycle(_))));
}

#[test]
fn empty_setup_command_is_rejected() {
    let result = ConfigFileBuilder::new()
        .with_container(ContainerBuilder::image("db", "postgres").setup_command("  ").build())
        .with_task(TaskBuilder::new("test").run("db").build())
        .try_build();

    assert!(
        matches!(result, Err(TaskrigError::ConfigError(ref m)) if m.contains("empty setup command"))
    );
}
