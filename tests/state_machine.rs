// tests/state_machine.rs

mod common;
use crate::common::{
    TestResult, a_depends_on_b, app_db_cache, image_pulled, init_tracing, network_created,
    success_events,
};

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::time::{Duration, sleep, timeout};

use taskrig::dag::ContainerDependencyGraph;
use taskrig::engine::{CleanupPolicy, Stage, TaskEvent, TaskStateMachine, TaskStep};
use taskrig_test_utils::builders::{ContainerBuilder, TaskBuilder, catalogue};
use taskrig_test_utils::with_timeout;

fn single_container() -> Arc<ContainerDependencyGraph> {
    let containers = catalogue([ContainerBuilder::image("app", "alpine").build()]);
    let task = TaskBuilder::new("test").run("app").build();
    Arc::new(ContainerDependencyGraph::new(&task, &containers).unwrap())
}

/// Pop and complete steps one at a time until the state machine is done.
/// `outcome` may replace the events for a step.
async fn drive(
    sm: &Arc<TaskStateMachine>,
    outcome: impl Fn(&TaskStep) -> Option<Vec<TaskEvent>>,
) -> Vec<(Stage, String)> {
    let mut seen = Vec::new();

    while let Some(step) = with_timeout(sm.pop_next_step(true)).await {
        seen.push((sm.stage(), step.kind().to_string()));
        let events = outcome(step.step()).unwrap_or_else(|| success_events(step.step()));
        for event in events {
            sm.post_event(event);
        }
    }

    seen
}

#[tokio::test]
async fn informational_event_does_not_unblock_waiting_pop() -> TestResult {
    init_tracing();

    let sm = Arc::new(TaskStateMachine::new(a_depends_on_b(), CleanupPolicy::default()));

    let mut in_flight = Vec::new();
    while let Some(step) = sm.pop_next_step(false).await {
        in_flight.push(step);
    }
    let kinds: Vec<&str> = in_flight.iter().map(|s| s.kind()).collect();
    assert_eq!(kinds, vec!["PrepareTaskNetwork", "PullImage", "PullImage"]);

    sm.post_event(TaskEvent::ImagePullProgress {
        image_name: "image-b".to_string(),
        progress: "50%".to_string(),
    });

    let blocked = timeout(Duration::from_millis(100), sm.pop_next_step(true)).await;
    assert!(blocked.is_err(), "informational event must not produce a step");

    let waiter = {
        let sm = Arc::clone(&sm);
        tokio::spawn(async move { sm.pop_next_step(true).await.map(|s| s.step().clone()) })
    };

    sleep(Duration::from_millis(20)).await;
    sm.post_event(network_created());
    sm.post_event(image_pulled("image-b"));

    let next = with_timeout(waiter).await?;
    assert!(matches!(
        next,
        Some(TaskStep::CreateContainer { ref container, .. }) if container.name == "B"
    ));

    Ok(())
}

#[tokio::test]
async fn step_is_handed_out_once() {
    let sm = Arc::new(TaskStateMachine::new(single_container(), CleanupPolicy::default()));

    let first = sm.pop_next_step(false).await.expect("network step");
    assert!(matches!(*first, TaskStep::PrepareTaskNetwork));

    let second = sm.pop_next_step(false).await.expect("pull step");
    assert_eq!(second.kind(), "PullImage");

    // Both in flight, nothing else ready.
    assert!(sm.pop_next_step(false).await.is_none());
    assert_eq!(sm.stage(), Stage::Run);

    drop(first);
    drop(second);

    // Both finished without posting outcomes: the Run stage is over.
    assert!(sm.pop_next_step(false).await.is_none());
    assert_eq!(sm.stage(), Stage::Finished);
}

#[tokio::test]
async fn successful_run_moves_through_cleanup_to_finished() {
    init_tracing();

    let sm = Arc::new(TaskStateMachine::new(single_container(), CleanupPolicy::default()));

    let seen = drive(&sm, |_| None).await;

    assert_eq!(
        seen,
        vec![
            (Stage::Run, "PrepareTaskNetwork".to_string()),
            (Stage::Run, "PullImage".to_string()),
            (Stage::Run, "CreateContainer".to_string()),
            (Stage::Run, "RunContainer".to_string()),
            (Stage::Cleanup, "RemoveContainer".to_string()),
            (Stage::Cleanup, "DeleteTaskNetwork".to_string()),
        ]
    );
    assert_eq!(sm.stage(), Stage::Finished);
    assert!(sm.pop_next_step(true).await.is_none());

    let outcome = sm.outcome();
    assert!(outcome.succeeded());
    assert_eq!(outcome.exit_code, Some(0));
    assert!(outcome.manual_cleanup_commands.is_empty());
}

#[tokio::test]
async fn skipped_cleanup_after_success_reports_manual_commands() {
    let policy = CleanupPolicy {
        after_failure: true,
        after_success: false,
    };
    let sm = Arc::new(TaskStateMachine::new(single_container(), policy));

    let seen = drive(&sm, |_| None).await;

    assert!(seen.iter().all(|(stage, _)| *stage == Stage::Run));
    assert_eq!(sm.stage(), Stage::Finished);
    assert_eq!(
        sm.outcome().manual_cleanup_commands,
        vec!["docker rm --force id-app", "docker network rm task-network"]
    );
}

#[tokio::test]
async fn failed_pull_still_cleans_up_the_network() {
    let sm = Arc::new(TaskStateMachine::new(single_container(), CleanupPolicy::default()));

    let seen = drive(&sm, |step| match step {
        TaskStep::PullImage { image_name, .. } => Some(vec![TaskEvent::ImagePullFailed {
            image_name: image_name.clone(),
            message: "manifest unknown".to_string(),
        }]),
        _ => None,
    })
    .await;

    let kinds: Vec<&str> = seen.iter().map(|(_, kind)| kind.as_str()).collect();
    assert_eq!(kinds, vec!["PrepareTaskNetwork", "PullImage", "DeleteTaskNetwork"]);

    assert!(sm.task_has_failed());
    let outcome = sm.outcome();
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].kind(), "ImagePullFailed");
    assert_eq!(outcome.exit_code, None);
}

#[tokio::test]
async fn skipped_cleanup_after_failure_reports_manual_commands() {
    let policy = CleanupPolicy {
        after_failure: false,
        after_success: true,
    };
    let sm = Arc::new(TaskStateMachine::new(single_container(), policy));

    drive(&sm, |step| match step {
        TaskStep::RunContainer { container, .. } => Some(vec![TaskEvent::ContainerRunFailed {
            container: container.clone(),
            message: "exec format error".to_string(),
        }]),
        _ => None,
    })
    .await;

    assert_eq!(sm.stage(), Stage::Finished);
    assert_eq!(
        sm.outcome().manual_cleanup_commands,
        vec!["docker rm --force id-app", "docker network rm task-network"]
    );
}

#[tokio::test]
async fn cleanup_failure_reports_what_is_left() {
    let sm = Arc::new(TaskStateMachine::new(single_container(), CleanupPolicy::default()));

    drive(&sm, |step| match step {
        TaskStep::RemoveContainer { container, .. } => {
            Some(vec![TaskEvent::ContainerRemovalFailed {
                container: container.clone(),
                message: "device busy".to_string(),
            }])
        }
        _ => None,
    })
    .await;

    let outcome = sm.outcome();
    assert!(!outcome.succeeded());
    assert_eq!(outcome.exit_code, Some(0));
    // The network was still deleted once the removal was accounted for.
    assert_eq!(outcome.manual_cleanup_commands, vec!["docker rm --force id-app"]);
}

#[tokio::test]
async fn dependency_chain_runs_in_order() {
    let sm = Arc::new(TaskStateMachine::new(a_depends_on_b(), CleanupPolicy::default()));

    let seen = drive(&sm, |_| None).await;
    let kinds: Vec<&str> = seen.iter().map(|(_, kind)| kind.as_str()).collect();

    assert_eq!(
        kinds,
        vec![
            "PrepareTaskNetwork",
            "PullImage",
            "CreateContainer",
            "RunContainer",
            "MarkContainerReady",
            "PullImage",
            "CreateContainer",
            "RunContainer",
            // A exited on its own; B is still running.
            "RemoveContainer",
            "StopContainer",
            "RemoveContainer",
            "DeleteTaskNetwork",
        ]
    );

    let history = sm.history();
    assert!(history.is_ready("B"));
    assert!(history.is_removed("A"));
    assert!(history.is_removed("B"));
    assert!(history.network_deleted());
}

#[tokio::test]
async fn task_without_containers_finishes_immediately() {
    let task = TaskBuilder::new("all").prerequisite("build").build();
    let graph = Arc::new(ContainerDependencyGraph::new(&task, &BTreeMap::new()).unwrap());
    let sm = Arc::new(TaskStateMachine::new(graph, CleanupPolicy::default()));

    assert!(sm.rules().is_empty());
    assert!(with_timeout(sm.pop_next_step(true)).await.is_none());
    assert_eq!(sm.stage(), Stage::Finished);
    assert_eq!(sm.outcome(), Default::default());
}

/// Replay successful completions in batches: pop everything ready, then
/// complete the batch in pop order. Returns the steps in hand-out order.
async fn replay_in_batches(graph: Arc<ContainerDependencyGraph>) -> Vec<TaskStep> {
    let sm = Arc::new(TaskStateMachine::new(graph, CleanupPolicy::default()));
    let mut handed_out = Vec::new();

    loop {
        let mut batch = Vec::new();
        while let Some(step) = sm.pop_next_step(false).await {
            batch.push(step);
        }
        if batch.is_empty() {
            break;
        }

        for step in batch {
            handed_out.push(step.step().clone());
            for event in success_events(step.step()) {
                sm.post_event(event);
            }
        }
    }

    assert_eq!(sm.stage(), Stage::Finished);
    handed_out
}

#[tokio::test]
async fn same_events_give_the_same_steps() {
    let first = replay_in_batches(app_db_cache()).await;
    let second = replay_in_batches(app_db_cache()).await;

    assert!(!first.is_empty());
    assert_eq!(first[0], TaskStep::PrepareTaskNetwork);
    assert_eq!(first, second);
}

