#![allow(dead_code)]

use std::sync::Arc;

use taskrig::dag::ContainerDependencyGraph;
use taskrig::engine::{EventHistory, TaskEvent, TaskStep};
use taskrig::types::{ContainerReference, ImageReference, NetworkReference};
use taskrig_test_utils::builders::{ContainerBuilder, TaskBuilder, catalogue};

pub use taskrig_test_utils::init_tracing;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Task `test` runs `A`, which depends on `B`. Both pull their own image.
pub fn a_depends_on_b() -> Arc<ContainerDependencyGraph> {
    let containers = catalogue([
        ContainerBuilder::image("A", "image-a").depends_on("B").build(),
        ContainerBuilder::image("B", "image-b").build(),
    ]);
    let task = TaskBuilder::new("test").run("A").build();

    Arc::new(ContainerDependencyGraph::new(&task, &containers).expect("valid graph"))
}

/// Task `test` runs `app`, which depends on `db` (health check, one setup
/// command) and `cache`.
pub fn app_db_cache() -> Arc<ContainerDependencyGraph> {
    let containers = catalogue([
        ContainerBuilder::build_directory("app", "./app")
            .depends_on("db")
            .depends_on("cache")
            .command("./run-tests.sh")
            .build(),
        ContainerBuilder::image("db", "postgres:16")
            .health_check("pg_isready")
            .setup_command("psql -c 'create database test'")
            .build(),
        ContainerBuilder::image("cache", "redis:7").build(),
    ]);
    let task = TaskBuilder::new("test").run("app").build();

    Arc::new(ContainerDependencyGraph::new(&task, &containers).expect("valid graph"))
}

pub fn history_of(events: impl IntoIterator<Item = TaskEvent>) -> EventHistory {
    let mut history = EventHistory::new();
    for event in events {
        history.push(event);
    }
    history
}

pub fn reference(name: &str) -> ContainerReference {
    ContainerReference::new(format!("id-{name}"), name)
}

pub fn network_created() -> TaskEvent {
    TaskEvent::TaskNetworkCreated {
        network: NetworkReference::new("task-network"),
    }
}

pub fn image_pulled(image_name: &str) -> TaskEvent {
    TaskEvent::ImagePulled {
        image_name: image_name.to_string(),
        image: ImageReference::new(image_name),
    }
}

pub fn created(name: &str) -> TaskEvent {
    TaskEvent::ContainerCreated {
        container: name.to_string(),
        reference: reference(name),
    }
}

pub fn started(name: &str) -> TaskEvent {
    TaskEvent::ContainerStarted {
        container: name.to_string(),
    }
}

pub fn ready(name: &str) -> TaskEvent {
    TaskEvent::ContainerBecameReady {
        container: name.to_string(),
    }
}

/// Events a step posts when everything goes right.
pub fn success_events(step: &TaskStep) -> Vec<TaskEvent> {
    match step {
        TaskStep::PrepareTaskNetwork => vec![network_created()],
        TaskStep::BuildImage { container } => vec![TaskEvent::ImageBuilt {
            container: container.name.clone(),
            image: ImageReference::new(format!("image-{}", container.name)),
        }],
        TaskStep::PullImage { image_name, .. } => vec![image_pulled(image_name)],
        TaskStep::CreateContainer { container, .. } => vec![TaskEvent::ContainerCreated {
            container: container.name.clone(),
            reference: reference(&container.name),
        }],
        TaskStep::RunContainer {
            container, main, ..
        } => {
            let mut events = vec![TaskEvent::ContainerStarted {
                container: container.clone(),
            }];
            if *main {
                events.push(TaskEvent::RunningContainerExited {
                    container: container.clone(),
                    exit_code: 0,
                });
            }
            events
        }
        TaskStep::WaitForContainerToBecomeHealthy { container, .. } => {
            vec![TaskEvent::ContainerBecameHealthy {
                container: container.clone(),
            }]
        }
        TaskStep::RunSetupCommand {
            container, index, ..
        } => vec![TaskEvent::SetupCommandCompleted {
            container: container.clone(),
            index: *index,
        }],
        TaskStep::MarkContainerReady { container } => vec![TaskEvent::ContainerBecameReady {
            container: container.clone(),
        }],
        TaskStep::StopContainer { container, .. } => vec![TaskEvent::ContainerStopped {
            container: container.clone(),
        }],
        TaskStep::RemoveContainer { container, .. } => vec![TaskEvent::ContainerRemoved {
            container: container.clone(),
        }],
        TaskStep::DeleteTaskNetwork { .. } => vec![TaskEvent::TaskNetworkDeleted],
    }
}
