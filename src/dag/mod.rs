// src/dag/mod.rs

//! Dependency graphs.
//!
//! - [`graph`] builds the validated, acyclic container graph for one task.
//! - [`task_order`] orders a task after its prerequisite tasks.

pub mod graph;
pub mod task_order;

pub use graph::{ContainerDependencyGraph, ContainerNode};
pub use task_order::TaskExecutionOrderResolver;
