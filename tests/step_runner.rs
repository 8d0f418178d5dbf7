// tests/step_runner.rs

mod common;
use crate::common::{TestResult, reference};

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use taskrig::config::SetupCommand;
use taskrig::engine::{TaskEvent, TaskStep};
use taskrig::exec::{StepRunner, TaskStepRunner, is_cancellation};
use taskrig::types::{ImagePullPolicy, ImageReference, NetworkReference};
use taskrig_test_utils::builders::ContainerBuilder;
use taskrig_test_utils::fake_runtime::{FakeContainerRuntime, FakeOp};
use taskrig_test_utils::recorders::RecordingEventSink;

fn runner(runtime: FakeContainerRuntime) -> (TaskStepRunner, Arc<FakeContainerRuntime>) {
    let runtime = Arc::new(runtime);
    let runner = TaskStepRunner::new(runtime.clone(), CancellationToken::new(), None);
    (runner, runtime)
}

#[tokio::test]
async fn prepare_creates_a_network_by_default() -> TestResult {
    let (runner, runtime) = runner(FakeContainerRuntime::new());
    let sink = RecordingEventSink::new();

    runner.run(&TaskStep::PrepareTaskNetwork, &sink).await?;

    assert_eq!(
        sink.events(),
        vec![TaskEvent::TaskNetworkCreated {
            network: NetworkReference::new("task-network"),
        }]
    );
    assert_eq!(runtime.calls_for(FakeOp::CreateNetwork).len(), 1);
    Ok(())
}

#[tokio::test]
async fn prepare_checks_an_existing_network() -> TestResult {
    let runtime = Arc::new(FakeContainerRuntime::new());
    let runner = TaskStepRunner::new(
        runtime.clone(),
        CancellationToken::new(),
        Some("shared-net".to_string()),
    );
    let sink = RecordingEventSink::new();

    runner.run(&TaskStep::PrepareTaskNetwork, &sink).await?;

    assert_eq!(
        sink.events(),
        vec![TaskEvent::CustomTaskNetworkChecked {
            network: NetworkReference::new("shared-net"),
        }]
    );
    assert_eq!(runtime.calls_for(FakeOp::FindNetwork), vec!["shared-net"]);
    assert!(runtime.calls_for(FakeOp::CreateNetwork).is_empty());
    Ok(())
}

#[tokio::test]
async fn missing_existing_network_is_a_typed_failure() -> TestResult {
    let runtime = Arc::new(FakeContainerRuntime::new().fail(
        FakeOp::FindNetwork,
        "shared-net",
        "network not found",
    ));
    let runner = TaskStepRunner::new(
        runtime,
        CancellationToken::new(),
        Some("shared-net".to_string()),
    );
    let sink = RecordingEventSink::new();

    runner.run(&TaskStep::PrepareTaskNetwork, &sink).await?;

    assert_eq!(
        sink.events(),
        vec![TaskEvent::CustomTaskNetworkCheckFailed {
            network_identifier: "shared-net".to_string(),
            message: "network not found".to_string(),
        }]
    );
    Ok(())
}

#[tokio::test]
async fn pull_reports_progress_then_result() -> TestResult {
    let (runner, _runtime) = runner(FakeContainerRuntime::new());
    let sink = RecordingEventSink::new();

    let step = TaskStep::PullImage {
        image_name: "postgres:16".to_string(),
        pull_policy: ImagePullPolicy::IfNotPresent,
    };
    runner.run(&step, &sink).await?;

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert!(events[0].is_informational());
    assert_eq!(events[0].kind(), "ImagePullProgress");
    assert_eq!(
        sink.outcomes(),
        vec![TaskEvent::ImagePulled {
            image_name: "postgres:16".to_string(),
            image: ImageReference::new("postgres:16"),
        }]
    );
    Ok(())
}

#[tokio::test]
async fn failed_build_becomes_image_build_failed() -> TestResult {
    let (runner, _runtime) = runner(FakeContainerRuntime::new().fail(
        FakeOp::BuildImage,
        "app",
        "Dockerfile not found",
    ));
    let sink = RecordingEventSink::new();

    let step = TaskStep::BuildImage {
        container: ContainerBuilder::build_directory("app", "./app").build(),
    };
    runner.run(&step, &sink).await?;

    assert_eq!(
        sink.outcomes(),
        vec![TaskEvent::ImageBuildFailed {
            container: "app".to_string(),
            message: "Dockerfile not found".to_string(),
        }]
    );
    Ok(())
}

#[tokio::test]
async fn main_container_runs_to_exit() -> TestResult {
    let (runner, runtime) = runner(FakeContainerRuntime::new().main_exit_code(3));
    let sink = RecordingEventSink::new();

    let step = TaskStep::RunContainer {
        container: "app".to_string(),
        reference: reference("app"),
        main: true,
    };
    runner.run(&step, &sink).await?;

    assert_eq!(
        sink.events(),
        vec![
            TaskEvent::ContainerStarted {
                container: "app".to_string()
            },
            TaskEvent::RunningContainerExited {
                container: "app".to_string(),
                exit_code: 3,
            },
        ]
    );
    assert_eq!(runtime.calls_for(FakeOp::WaitForExit), vec!["app"]);
    Ok(())
}

#[tokio::test]
async fn dependency_container_is_only_started() -> TestResult {
    let (runner, runtime) = runner(FakeContainerRuntime::new());
    let sink = RecordingEventSink::new();

    let step = TaskStep::RunContainer {
        container: "db".to_string(),
        reference: reference("db"),
        main: false,
    };
    runner.run(&step, &sink).await?;

    assert_eq!(sink.events().len(), 1);
    assert!(runtime.calls_for(FakeOp::WaitForExit).is_empty());
    Ok(())
}

#[tokio::test]
async fn non_zero_setup_command_fails_with_its_output() -> TestResult {
    let (runner, _runtime) = runner(FakeContainerRuntime::new().exec_exit_code("migrate", 2));
    let sink = RecordingEventSink::new();

    let step = TaskStep::RunSetupCommand {
        container: "db".to_string(),
        reference: reference("db"),
        command: SetupCommand {
            command: "migrate".to_string(),
            working_directory: None,
        },
        index: 1,
    };
    runner.run(&step, &sink).await?;

    assert_eq!(
        sink.events(),
        vec![
            TaskEvent::RunningSetupCommand {
                container: "db".to_string(),
                command: "migrate".to_string(),
                index: 1,
            },
            TaskEvent::SetupCommandFailed {
                container: "db".to_string(),
                command: "migrate".to_string(),
                index: 1,
                exit_code: 2,
                output: "ran migrate".to_string(),
            },
        ]
    );
    Ok(())
}

#[tokio::test]
async fn unexpected_runtime_error_is_returned_not_posted() {
    let (runner, _runtime) = runner(FakeContainerRuntime::new().error(
        FakeOp::CreateContainer,
        "app",
        "docker binary missing",
    ));
    let sink = RecordingEventSink::new();

    let step = TaskStep::CreateContainer {
        container: ContainerBuilder::image("app", "alpine").build(),
        image: ImageReference::new("alpine"),
        network: NetworkReference::new("task-network"),
    };
    let err = runner.run(&step, &sink).await.unwrap_err();

    assert_eq!(err.to_string(), "docker binary missing");
    assert!(!is_cancellation(&err));
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn cancelled_token_stops_run_steps_but_not_cleanup() -> TestResult {
    let runtime = Arc::new(FakeContainerRuntime::new().hold_main_container());
    let token = CancellationToken::new();
    let runner = TaskStepRunner::new(runtime.clone(), token.clone(), None);
    let sink = RecordingEventSink::new();

    let run = TaskStep::RunContainer {
        container: "app".to_string(),
        reference: reference("app"),
        main: true,
    };

    let cancel = async {
        tokio::task::yield_now().await;
        token.cancel();
    };
    let (result, ()) = tokio::join!(runner.run(&run, &sink), cancel);

    let err = result.unwrap_err();
    assert!(is_cancellation(&err));
    assert_eq!(
        sink.events(),
        vec![TaskEvent::ContainerStarted {
            container: "app".to_string()
        }]
    );

    let remove = TaskStep::RemoveContainer {
        container: "app".to_string(),
        reference: reference("app"),
    };
    runner.run(&remove, &sink).await?;

    assert_eq!(
        sink.events().last(),
        Some(&TaskEvent::ContainerRemoved {
            container: "app".to_string()
        })
    );
    assert_eq!(runtime.calls_for(FakeOp::RemoveContainer), vec!["app"]);
    Ok(())
}

#[tokio::test]
async fn cancelled_token_refuses_to_create_resources() {
    let runtime = Arc::new(FakeContainerRuntime::new());
    let token = CancellationToken::new();
    token.cancel();
    let runner = TaskStepRunner::new(runtime.clone(), token, None);
    let sink = RecordingEventSink::new();

    let err = runner
        .run(&TaskStep::PrepareTaskNetwork, &sink)
        .await
        .unwrap_err();
    assert!(is_cancellation(&err));

    let create = TaskStep::CreateContainer {
        container: ContainerBuilder::image("app", "alpine").build(),
        image: ImageReference::new("alpine"),
        network: NetworkReference::new("task-network"),
    };
    let err = runner.run(&create, &sink).await.unwrap_err();
    assert!(is_cancellation(&err));

    assert!(runtime.calls().is_empty());
    assert!(sink.events().is_empty());
}

#[tokio::test]
async fn create_started_before_cancellation_runs_to_completion() -> TestResult {
    let runtime = Arc::new(FakeContainerRuntime::new().delay(
        FakeOp::CreateContainer,
        "app",
        std::time::Duration::from_millis(50),
    ));
    let token = CancellationToken::new();
    let runner = TaskStepRunner::new(runtime.clone(), token.clone(), None);
    let sink = RecordingEventSink::new();

    let create = TaskStep::CreateContainer {
        container: ContainerBuilder::image("app", "alpine").build(),
        image: ImageReference::new("alpine"),
        network: NetworkReference::new("task-network"),
    };

    let cancel = async {
        tokio::task::yield_now().await;
        token.cancel();
    };
    let (result, ()) = tokio::join!(runner.run(&create, &sink), cancel);
    result?;

    assert_eq!(
        sink.events(),
        vec![TaskEvent::ContainerCreated {
            container: "app".to_string(),
            reference: reference("app"),
        }]
    );
    Ok(())
}
