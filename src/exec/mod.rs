// src/exec/mod.rs

//! Step execution layer.
//!
//! - [`step_runner`] defines the `StepRunner` seam the execution manager
//!   calls, and `TaskStepRunner`, which maps each step kind onto runtime
//!   calls and events.
//! - [`backend`] provides the `ContainerRuntime` trait; tests replace it with
//!   a fake.
//! - [`docker`] implements the runtime on top of the `docker` CLI.
//! - [`cancellation`] holds the `Cancelled` marker and helpers.

pub mod backend;
pub mod cancellation;
pub mod docker;
pub mod step_runner;

pub use backend::{ContainerRuntime, ExecResult, ProgressCallback, RuntimeError, RuntimeFuture};
pub use cancellation::{Cancelled, is_cancellation, run_unless_cancelled};
pub use docker::DockerCliRuntime;
pub use step_runner::{StepFuture, StepRunner, TaskStepRunner};
