// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod session;
pub mod types;

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::loader::{default_config_path, load_and_validate};
use crate::config::model::ConfigFile;
use crate::dag::{ContainerDependencyGraph, TaskExecutionOrderResolver};
use crate::engine::{
    CompositeEventLogger, EventHistory, EventLogger, JsonLinesEventLogger, RunStagePlanner,
    StagePlanner, TracingEventLogger,
};
use crate::exec::{ContainerRuntime, DockerCliRuntime};
use crate::session::{RunOptions, SessionOutcome, TaskRunner};

/// High-level entry point used by `main.rs`. Returns the process exit code.
///
/// This wires together:
/// - config loading and CLI overrides
/// - the docker runtime and event loggers
/// - the task session
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<i32> {
    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    if args.list_tasks {
        print_task_list(&cfg);
        return Ok(0);
    }

    let task_name = args
        .task
        .clone()
        .ok_or_else(|| anyhow!("no task given (use --list-tasks to see the available tasks)"))?;

    let options = run_options(&args, &cfg);

    if args.dry_run {
        print_dry_run(&cfg, &task_name, &options)?;
        return Ok(0);
    }

    let runtime: Arc<dyn ContainerRuntime> =
        Arc::new(DockerCliRuntime::new(cfg.config.project_name.clone()));
    let event_logger = build_event_logger(args.event_log.as_deref())?;

    // Ctrl-C → cooperative cancellation; cleanup still runs.
    let cancellation = CancellationToken::new();
    {
        let token = cancellation.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            info!("Ctrl+C received; cancelling");
            token.cancel();
        });
    }

    let runner = TaskRunner::new(cfg, runtime)
        .with_options(options)
        .with_event_logger(event_logger)
        .with_cancellation(cancellation);

    let outcome = runner.run_session(&task_name).await?;
    report(&outcome);

    Ok(outcome.exit_code)
}

/// `[config]` values with command-line overrides applied.
fn run_options(args: &CliArgs, cfg: &ConfigFile) -> RunOptions {
    let mut options = RunOptions::from_config(&cfg.config);

    if args.max_parallelism.is_some() {
        options.max_parallelism = args.max_parallelism;
    }
    if args.no_cleanup_after_failure {
        options.cleanup_policy.after_failure = false;
    }
    if args.no_cleanup_after_success {
        options.cleanup_policy.after_success = false;
    }
    if args.use_network.is_some() {
        options.existing_network = args.use_network.clone();
    }
    options.skip_prerequisites = args.skip_prerequisites;

    options
}

fn build_event_logger(event_log: Option<&Path>) -> Result<Arc<dyn EventLogger>> {
    let Some(path) = event_log else {
        return Ok(Arc::new(TracingEventLogger));
    };

    let file = File::create(path)
        .with_context(|| format!("creating event log {}", path.display()))?;

    Ok(Arc::new(CompositeEventLogger::new(vec![
        Box::new(TracingEventLogger),
        Box::new(JsonLinesEventLogger::new(file)),
    ])))
}

fn print_task_list(cfg: &ConfigFile) {
    println!("tasks ({}):", cfg.task.len());
    for (name, task) in cfg.task.iter() {
        match &task.description {
            Some(description) => println!("  - {name}: {description}"),
            None => println!("  - {name}"),
        }
    }
}

/// Print the task order, each task's container graph and its Run-stage plan.
fn print_dry_run(cfg: &ConfigFile, task_name: &str, options: &RunOptions) -> Result<()> {
    let tasks =
        TaskExecutionOrderResolver::new(cfg).resolve(task_name, options.skip_prerequisites)?;

    println!("taskrig dry-run");
    println!(
        "  max_parallelism = {}",
        options
            .max_parallelism
            .map_or_else(|| "unlimited".to_string(), |n| n.to_string())
    );
    println!(
        "  cleanup_after_failure = {}, cleanup_after_success = {}",
        options.cleanup_policy.after_failure, options.cleanup_policy.after_success
    );
    if let Some(network) = &options.existing_network {
        println!("  network = {network}");
    }
    println!();

    for task in tasks {
        println!("task {}:", task.name);

        let graph = ContainerDependencyGraph::new(task, &cfg.container)?;
        if graph.is_empty() {
            println!("  (no containers)");
            continue;
        }

        println!("  containers:");
        for node in graph.nodes_in_order() {
            let marker = if node.is_root { " (main)" } else { "" };
            if node.depends_on.is_empty() {
                println!("    - {}{marker}", node.name());
            } else {
                let deps: Vec<&str> = node.depends_on.iter().map(String::as_str).collect();
                println!("    - {}{marker} after {}", node.name(), deps.join(", "));
            }
        }

        println!("  run stage:");
        for rule in RunStagePlanner.plan(&graph, &EventHistory::new()) {
            println!("    - {rule}");
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}

fn report(outcome: &SessionOutcome) {
    for result in &outcome.tasks {
        for failure in &result.outcome.failures {
            eprintln!("task '{}': {failure}", result.task);
        }

        if !result.outcome.manual_cleanup_commands.is_empty() {
            eprintln!(
                "task '{}' left resources behind; remove them with:",
                result.task
            );
            for command in &result.outcome.manual_cleanup_commands {
                eprintln!("  {command}");
            }
        }
    }
}
