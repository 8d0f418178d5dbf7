// src/exec/backend.rs

//! Pluggable container runtime abstraction.
//!
//! Step runners talk to a `ContainerRuntime` instead of shelling out
//! directly, so tests can swap in a fake that records calls and scripts
//! results while production uses [`DockerCliRuntime`](super::docker::DockerCliRuntime).

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::config::model::{Container, SetupCommand};
use crate::types::{ContainerReference, ImagePullPolicy, ImageReference, NetworkReference};

/// Boxed future returned by every runtime operation.
pub type RuntimeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RuntimeError>> + Send + 'a>>;

/// Receives progress lines while an image is built or pulled.
pub type ProgressCallback<'a> = &'a (dyn Fn(String) + Send + Sync);

/// How a runtime operation can fail.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The runtime reported a failure for this operation. Becomes the
    /// step's typed failure event.
    #[error("{0}")]
    Failed(String),

    /// The operation was abandoned because cancellation was requested.
    #[error("operation was cancelled")]
    Cancelled,

    /// Anything unexpected (e.g. the runtime binary could not be spawned).
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Output of a command run inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecResult {
    pub exit_code: i64,
    pub output: String,
}

/// The operations steps need from a container runtime.
pub trait ContainerRuntime: Send + Sync {
    fn build_image<'a>(
        &'a self,
        container: &'a Container,
        progress: ProgressCallback<'a>,
    ) -> RuntimeFuture<'a, ImageReference>;

    fn pull_image<'a>(
        &'a self,
        image_name: &'a str,
        policy: ImagePullPolicy,
        progress: ProgressCallback<'a>,
    ) -> RuntimeFuture<'a, ImageReference>;

    /// Create a fresh network for this task.
    fn create_network(&self) -> RuntimeFuture<'_, NetworkReference>;

    /// Look up an existing network by name or ID.
    fn find_network<'a>(&'a self, identifier: &'a str) -> RuntimeFuture<'a, NetworkReference>;

    fn create_container<'a>(
        &'a self,
        container: &'a Container,
        image: &'a ImageReference,
        network: &'a NetworkReference,
    ) -> RuntimeFuture<'a, ContainerReference>;

    fn start_container<'a>(&'a self, reference: &'a ContainerReference) -> RuntimeFuture<'a, ()>;

    /// Wait for a started container to exit and return its exit code.
    fn wait_for_exit<'a>(&'a self, reference: &'a ContainerReference) -> RuntimeFuture<'a, i64>;

    /// Wait until the runtime reports the container healthy.
    ///
    /// Fails with [`RuntimeError::Failed`] if it becomes unhealthy or exits.
    fn wait_for_healthy<'a>(&'a self, reference: &'a ContainerReference) -> RuntimeFuture<'a, ()>;

    fn exec<'a>(
        &'a self,
        reference: &'a ContainerReference,
        command: &'a SetupCommand,
    ) -> RuntimeFuture<'a, ExecResult>;

    fn stop_container<'a>(&'a self, reference: &'a ContainerReference) -> RuntimeFuture<'a, ()>;

    fn remove_container<'a>(&'a self, reference: &'a ContainerReference) -> RuntimeFuture<'a, ()>;

    fn delete_network<'a>(&'a self, network: &'a NetworkReference) -> RuntimeFuture<'a, ()>;
}
