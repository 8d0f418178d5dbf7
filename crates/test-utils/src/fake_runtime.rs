use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::Notify;
use tracing::debug;

use taskrig::config::{Container, SetupCommand};
use taskrig::exec::{ContainerRuntime, ExecResult, ProgressCallback, RuntimeError, RuntimeFuture};
use taskrig::types::{ContainerReference, ImagePullPolicy, ImageReference, NetworkReference};

/// Runtime operations the fake can be scripted to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOp {
    BuildImage,
    PullImage,
    CreateNetwork,
    FindNetwork,
    CreateContainer,
    StartContainer,
    WaitForExit,
    WaitForHealthy,
    Exec,
    StopContainer,
    RemoveContainer,
    DeleteNetwork,
}

/// One recorded call. The subject is the container name, image name or
/// network ID the call acted on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeCall {
    pub op: FakeOp,
    pub subject: String,
}

#[derive(Debug, Clone)]
enum Scripted {
    Failed(String),
    Error(String),
}

#[derive(Debug, Default)]
struct FakeState {
    calls: Vec<RuntimeCall>,
    scripted: HashMap<(FakeOp, String), Scripted>,
    exec_exit_codes: HashMap<String, i64>,
    delays: HashMap<(FakeOp, String), Duration>,
    main_exit_code: i64,
    hold_main_container: bool,
}

/// A fake container runtime that:
/// - records every call in order
/// - succeeds unless told otherwise with [`fail`](Self::fail) or
///   [`error`](Self::error)
/// - hands out references derived from container names
///   (`id-<name>` / runtime name `<name>`).
#[derive(Debug, Default)]
pub struct FakeContainerRuntime {
    state: Mutex<FakeState>,
    released: Arc<Notify>,
}

impl FakeContainerRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `op` on `subject` fail with a typed runtime failure.
    pub fn fail(self, op: FakeOp, subject: &str, message: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .scripted
            .insert((op, subject.to_string()), Scripted::Failed(message.to_string()));
        self
    }

    /// Make `op` on `subject` fail with an unexpected error.
    pub fn error(self, op: FakeOp, subject: &str, message: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .scripted
            .insert((op, subject.to_string()), Scripted::Error(message.to_string()));
        self
    }

    /// Make `op` on `subject` take `delay` after the call is recorded, like a
    /// daemon that has done the work but not answered yet.
    pub fn delay(self, op: FakeOp, subject: &str, delay: Duration) -> Self {
        self.state
            .lock()
            .unwrap()
            .delays
            .insert((op, subject.to_string()), delay);
        self
    }

    pub fn main_exit_code(self, code: i64) -> Self {
        self.state.lock().unwrap().main_exit_code = code;
        self
    }

    /// Setup command `command` exits with `code`.
    pub fn exec_exit_code(self, command: &str, code: i64) -> Self {
        self.state
            .lock()
            .unwrap()
            .exec_exit_codes
            .insert(command.to_string(), code);
        self
    }

    /// Keep the main container running until [`release_main_container`](Self::release_main_container).
    pub fn hold_main_container(self) -> Self {
        self.state.lock().unwrap().hold_main_container = true;
        self
    }

    pub fn release_main_container(&self) {
        self.state.lock().unwrap().hold_main_container = false;
        self.released.notify_waiters();
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_for(&self, op: FakeOp) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.op == op)
            .map(|c| c.subject)
            .collect()
    }

    /// Position of the first `op` call on `subject`, if any.
    pub fn position(&self, op: FakeOp, subject: &str) -> Option<usize> {
        self.calls()
            .iter()
            .position(|c| c.op == op && c.subject == subject)
    }

    async fn record(&self, op: FakeOp, subject: &str) -> Result<(), RuntimeError> {
        debug!(?op, subject, "fake runtime call");
        let key = (op, subject.to_string());

        let (scripted, delay) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(RuntimeCall {
                op,
                subject: subject.to_string(),
            });
            (state.scripted.get(&key).cloned(), state.delays.get(&key).copied())
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match scripted {
            Some(Scripted::Failed(message)) => Err(RuntimeError::Failed(message)),
            Some(Scripted::Error(message)) => Err(RuntimeError::Other(anyhow!(message))),
            None => Ok(()),
        }
    }
}

impl ContainerRuntime for FakeContainerRuntime {
    fn build_image<'a>(
        &'a self,
        container: &'a Container,
        progress: ProgressCallback<'a>,
    ) -> RuntimeFuture<'a, ImageReference> {
        Box::pin(async move {
            progress(format!("building {}", container.name));
            self.record(FakeOp::BuildImage, &container.name).await?;
            Ok(ImageReference::new(format!("image-{}", container.name)))
        })
    }

    fn pull_image<'a>(
        &'a self,
        image_name: &'a str,
        _policy: ImagePullPolicy,
        progress: ProgressCallback<'a>,
    ) -> RuntimeFuture<'a, ImageReference> {
        Box::pin(async move {
            progress(format!("pulling {image_name}"));
            self.record(FakeOp::PullImage, image_name).await?;
            Ok(ImageReference::new(image_name))
        })
    }

    fn create_network(&self) -> RuntimeFuture<'_, NetworkReference> {
        Box::pin(async move {
            self.record(FakeOp::CreateNetwork, "task-network").await?;
            Ok(NetworkReference::new("task-network"))
        })
    }

    fn find_network<'a>(&'a self, identifier: &'a str) -> RuntimeFuture<'a, NetworkReference> {
        Box::pin(async move {
            self.record(FakeOp::FindNetwork, identifier).await?;
            Ok(NetworkReference::new(identifier))
        })
    }

    fn create_container<'a>(
        &'a self,
        container: &'a Container,
        _image: &'a ImageReference,
        _network: &'a NetworkReference,
    ) -> RuntimeFuture<'a, ContainerReference> {
        Box::pin(async move {
            self.record(FakeOp::CreateContainer, &container.name).await?;
            Ok(ContainerReference::new(
                format!("id-{}", container.name),
                container.name.clone(),
            ))
        })
    }

    fn start_container<'a>(&'a self, reference: &'a ContainerReference) -> RuntimeFuture<'a, ()> {
        Box::pin(async move { self.record(FakeOp::StartContainer, &reference.name).await })
    }

    fn wait_for_exit<'a>(&'a self, reference: &'a ContainerReference) -> RuntimeFuture<'a, i64> {
        Box::pin(async move {
            self.record(FakeOp::WaitForExit, &reference.name).await?;

            loop {
                let released = self.released.notified();
                if !self.state.lock().unwrap().hold_main_container {
                    break;
                }
                released.await;
            }

            Ok(self.state.lock().unwrap().main_exit_code)
        })
    }

    fn wait_for_healthy<'a>(&'a self, reference: &'a ContainerReference) -> RuntimeFuture<'a, ()> {
        Box::pin(async move { self.record(FakeOp::WaitForHealthy, &reference.name).await })
    }

    fn exec<'a>(
        &'a self,
        reference: &'a ContainerReference,
        command: &'a SetupCommand,
    ) -> RuntimeFuture<'a, ExecResult> {
        Box::pin(async move {
            self.record(FakeOp::Exec, &reference.name).await?;
            let exit_code = self
                .state
                .lock()
                .unwrap()
                .exec_exit_codes
                .get(&command.command)
                .copied()
                .unwrap_or(0);

            Ok(ExecResult {
                exit_code,
                output: format!("ran {}", command.command),
            })
        })
    }

    fn stop_container<'a>(&'a self, reference: &'a ContainerReference) -> RuntimeFuture<'a, ()> {
        Box::pin(async move { self.record(FakeOp::StopContainer, &reference.name).await })
    }

    fn remove_container<'a>(&'a self, reference: &'a ContainerReference) -> RuntimeFuture<'a, ()> {
        Box::pin(async move { self.record(FakeOp::RemoveContainer, &reference.name).await })
    }

    fn delete_network<'a>(&'a self, network: &'a NetworkReference) -> RuntimeFuture<'a, ()> {
        Box::pin(async move { self.record(FakeOp::DeleteNetwork, &network.id).await })
    }
}
