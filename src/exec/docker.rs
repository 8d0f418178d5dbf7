// src/exec/docker.rs

//! [`ContainerRuntime`] backed by the `docker` command-line client.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, anyhow};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::model::{Container, SetupCommand};
use crate::exec::backend::{
    ContainerRuntime, ExecResult, ProgressCallback, RuntimeError, RuntimeFuture,
};
use crate::types::{ContainerReference, ImagePullPolicy, ImageReference, NetworkReference};

const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Talks to Docker by running `docker` subcommands.
///
/// Runtime names are `<project>-<pid>-<n>` for networks and
/// `<project>-<container>-<pid>-<n>` for containers, so concurrent runs of
/// the same project never collide.
#[derive(Debug)]
pub struct DockerCliRuntime {
    project_name: String,
    counter: AtomicU64,
}

impl DockerCliRuntime {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            counter: AtomicU64::new(0),
        }
    }

    fn unique_suffix(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", std::process::id(), n)
    }

    /// Run `docker <args>` to completion and return its trimmed stdout.
    async fn docker<S: AsRef<str>>(&self, args: &[S]) -> Result<String, RuntimeError> {
        let args: Vec<&str> = args.iter().map(|arg| arg.as_ref()).collect();
        debug!(args = ?args, "running docker");

        let output = Command::new("docker")
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("spawning `docker {}`", args.join(" ")))?;

        if !output.status.success() {
            return Err(RuntimeError::Failed(failure_message(
                &output.stderr,
                output.status.code(),
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Run `docker <args>`, passing each stdout line to `progress`.
    async fn docker_streaming(
        &self,
        args: &[String],
        progress: ProgressCallback<'_>,
    ) -> Result<(), RuntimeError> {
        debug!(args = ?args, "running docker (streaming)");

        let mut child = Command::new("docker")
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning `docker {}`", args.join(" ")))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let forward = async {
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.trim().is_empty() {
                        progress(line);
                    }
                }
            }
        };

        let ((), errors) = tokio::join!(forward, collect(stderr));

        let status = child
            .wait()
            .await
            .with_context(|| format!("waiting for `docker {}`", args.join(" ")))?;

        if !status.success() {
            return Err(RuntimeError::Failed(failure_message(
                errors.as_bytes(),
                status.code(),
            )));
        }

        Ok(())
    }

    fn create_args(
        &self,
        container: &Container,
        image: &ImageReference,
        network: &NetworkReference,
        runtime_name: &str,
    ) -> Vec<String> {
        let mut args = vec![
            "create".to_string(),
            "--name".to_string(),
            runtime_name.to_string(),
            "--network".to_string(),
            network.id.clone(),
            "--network-alias".to_string(),
            container.name.clone(),
            "--hostname".to_string(),
            container.name.clone(),
        ];

        for (key, value) in &container.environment {
            args.push("--env".to_string());
            args.push(format!("{key}={value}"));
        }

        for port in &container.ports {
            args.push("--publish".to_string());
            args.push(port.clone());
        }

        for volume in &container.volumes {
            args.push("--volume".to_string());
            args.push(volume.clone());
        }

        if let Some(dir) = &container.working_directory {
            args.push("--workdir".to_string());
            args.push(dir.clone());
        }

        if let Some(health) = &container.health_check {
            let flags = [
                ("--health-cmd", health.command.clone()),
                ("--health-interval", health.interval.clone()),
                ("--health-retries", health.retries.map(|r| r.to_string())),
                ("--health-start-period", health.start_period.clone()),
                ("--health-timeout", health.timeout.clone()),
            ];
            for (flag, value) in flags {
                if let Some(value) = value {
                    args.push(flag.to_string());
                    args.push(value);
                }
            }
        }

        args.push(image.id.clone());

        if let Some(command) = &container.command {
            args.extend(["sh".to_string(), "-c".to_string(), command.clone()]);
        }

        args
    }
}

#[derive(Debug, Deserialize)]
struct ContainerState {
    #[serde(rename = "Running")]
    running: bool,
    #[serde(rename = "ExitCode", default)]
    exit_code: i64,
    #[serde(rename = "Health", default)]
    health: Option<HealthState>,
}

#[derive(Debug, Deserialize)]
struct HealthState {
    #[serde(rename = "Status")]
    status: String,
}

async fn collect<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let mut collected = String::new();
    if let Some(reader) = reader {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            collected.push_str(&line);
            collected.push('\n');
        }
    }
    collected
}

fn failure_message(stderr: &[u8], code: Option<i32>) -> String {
    let stderr = String::from_utf8_lossy(stderr).trim().to_string();
    if stderr.is_empty() {
        match code {
            Some(code) => format!("docker exited with code {code}"),
            None => "docker was terminated by a signal".to_string(),
        }
    } else {
        stderr
    }
}

impl ContainerRuntime for DockerCliRuntime {
    fn build_image<'a>(
        &'a self,
        container: &'a Container,
        progress: ProgressCallback<'a>,
    ) -> RuntimeFuture<'a, ImageReference> {
        Box::pin(async move {
            let directory = container
                .build_directory
                .as_deref()
                .ok_or_else(|| anyhow!("container '{}' has no build directory", container.name))?;
            let tag = format!("{}-{}", self.project_name, container.name);

            let mut args = vec!["build".to_string(), "--tag".to_string(), tag.clone()];
            if let Some(dockerfile) = &container.dockerfile {
                args.push("--file".to_string());
                args.push(format!("{directory}/{dockerfile}"));
            }
            args.push(directory.to_string());

            self.docker_streaming(&args, progress).await?;
            info!(container = %container.name, image = %tag, "built image");

            Ok(ImageReference::new(tag))
        })
    }

    fn pull_image<'a>(
        &'a self,
        image_name: &'a str,
        policy: ImagePullPolicy,
        progress: ProgressCallback<'a>,
    ) -> RuntimeFuture<'a, ImageReference> {
        Box::pin(async move {
            if policy == ImagePullPolicy::IfNotPresent
                && let Ok(id) = self
                    .docker(&["image", "inspect", "--format", "{{.Id}}", image_name])
                    .await
            {
                debug!(image = %image_name, id = %id, "image already present");
                return Ok(ImageReference::new(image_name));
            }

            let args = vec!["pull".to_string(), image_name.to_string()];
            self.docker_streaming(&args, progress).await?;

            Ok(ImageReference::new(image_name))
        })
    }

    fn create_network(&self) -> RuntimeFuture<'_, NetworkReference> {
        Box::pin(async move {
            let name = format!("{}-{}", self.project_name, self.unique_suffix());
            let id = self.docker(&["network", "create", name.as_str()]).await?;
            Ok(NetworkReference::new(id))
        })
    }

    fn find_network<'a>(&'a self, identifier: &'a str) -> RuntimeFuture<'a, NetworkReference> {
        Box::pin(async move {
            let id = self
                .docker(&["network", "inspect", "--format", "{{.Id}}", identifier])
                .await?;
            Ok(NetworkReference::new(id))
        })
    }

    fn create_container<'a>(
        &'a self,
        container: &'a Container,
        image: &'a ImageReference,
        network: &'a NetworkReference,
    ) -> RuntimeFuture<'a, ContainerReference> {
        Box::pin(async move {
            let runtime_name = format!(
                "{}-{}-{}",
                self.project_name,
                container.name,
                self.unique_suffix()
            );
            let args = self.create_args(container, image, network, &runtime_name);
            let id = self.docker(args.as_slice()).await?;

            Ok(ContainerReference::new(id, runtime_name))
        })
    }

    fn start_container<'a>(&'a self, reference: &'a ContainerReference) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            self.docker(&["start", reference.id.as_str()]).await?;
            Ok(())
        })
    }

    fn wait_for_exit<'a>(&'a self, reference: &'a ContainerReference) -> RuntimeFuture<'a, i64> {
        Box::pin(async move {
            // Mirror the container's output while it runs.
            let mut logs = Command::new("docker")
                .args(["logs", "--follow", reference.id.as_str()])
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .kill_on_drop(true)
                .spawn()
                .context("spawning `docker logs`")?;

            let code = self.docker(&["wait", reference.id.as_str()]).await?;

            if let Err(err) = logs.wait().await {
                debug!(container = %reference, error = %err, "docker logs did not exit cleanly");
            }

            code.parse::<i64>()
                .with_context(|| format!("unexpected output from `docker wait`: {code:?}"))
                .map_err(RuntimeError::from)
        })
    }

    fn wait_for_healthy<'a>(&'a self, reference: &'a ContainerReference) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            loop {
                let raw = self
                    .docker(&["inspect", "--format", "{{json .State}}", reference.id.as_str()])
                    .await?;
                let state: ContainerState = serde_json::from_str(&raw)
                    .with_context(|| format!("parsing state of {reference}"))?;

                match state.health.as_ref().map(|h| h.status.as_str()) {
                    None => {
                        return Err(RuntimeError::Failed(
                            "container has no health check".to_string(),
                        ));
                    }
                    Some("healthy") => return Ok(()),
                    Some("unhealthy") => {
                        return Err(RuntimeError::Failed(
                            "container became unhealthy".to_string(),
                        ));
                    }
                    Some(_) if !state.running => {
                        return Err(RuntimeError::Failed(format!(
                            "container exited with code {} before becoming healthy",
                            state.exit_code
                        )));
                    }
                    Some(_) => tokio::time::sleep(HEALTH_POLL_INTERVAL).await,
                }
            }
        })
    }

    fn exec<'a>(
        &'a self,
        reference: &'a ContainerReference,
        command: &'a SetupCommand,
    ) -> RuntimeFuture<'a, ExecResult> {
        Box::pin(async move {
            let mut args = vec!["exec".to_string()];
            if let Some(dir) = &command.working_directory {
                args.push("--workdir".to_string());
                args.push(dir.clone());
            }
            args.extend([
                reference.id.clone(),
                "sh".to_string(),
                "-c".to_string(),
                command.command.clone(),
            ]);

            let output = Command::new("docker")
                .args(&args)
                .kill_on_drop(true)
                .output()
                .await
                .context("spawning `docker exec`")?;

            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));

            Ok(ExecResult {
                exit_code: output.status.code().map(i64::from).unwrap_or(-1),
                output: text,
            })
        })
    }

    fn stop_container<'a>(&'a self, reference: &'a ContainerReference) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            self.docker(&["stop", reference.id.as_str()]).await?;
            Ok(())
        })
    }

    fn remove_container<'a>(&'a self, reference: &'a ContainerReference) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            self.docker(&["rm", "--volumes", reference.id.as_str()]).await?;
            Ok(())
        })
    }

    fn delete_network<'a>(&'a self, network: &'a NetworkReference) -> RuntimeFuture<'a, ()> {
        Box::pin(async move {
            self.docker(&["network", "rm", network.id.as_str()]).await?;
            Ok(())
        })
    }
}
