// src/dag/task_order.rs

//! Ordering of a task and its prerequisite tasks.

use std::collections::HashSet;

use tracing::debug;

use crate::config::model::{ConfigFile, Task};
use crate::errors::{Result, TaskrigError};

/// Resolves which tasks run for a requested task, and in what order.
#[derive(Debug, Clone, Copy)]
pub struct TaskExecutionOrderResolver<'a> {
    config: &'a ConfigFile,
}

impl<'a> TaskExecutionOrderResolver<'a> {
    pub fn new(config: &'a ConfigFile) -> Self {
        Self { config }
    }

    /// Every task to run for `task_name`, prerequisites first.
    ///
    /// Prerequisites are visited depth-first in declared order and each task
    /// appears once, even if several tasks list it. With
    /// `skip_prerequisites`, only the requested task is returned.
    pub fn resolve(&self, task_name: &str, skip_prerequisites: bool) -> Result<Vec<&'a Task>> {
        let task = self.lookup(task_name)?;

        if skip_prerequisites {
            return Ok(vec![task]);
        }

        let mut order = Vec::new();
        let mut done: HashSet<&str> = HashSet::new();
        let mut path: Vec<&str> = Vec::new();

        self.visit(task, &mut order, &mut done, &mut path)?;

        debug!(
            task = %task_name,
            order = ?order.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            "resolved task execution order"
        );

        Ok(order)
    }

    fn visit(
        &self,
        task: &'a Task,
        order: &mut Vec<&'a Task>,
        done: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Result<()> {
        if done.contains(task.name.as_str()) {
            return Ok(());
        }

        if let Some(start) = path.iter().position(|name| *name == task.name) {
            let mut cycle: Vec<&str> = path[start..].to_vec();
            cycle.push(task.name.as_str());
            return Err(TaskrigError::DagCycle(format!(
                "cycle detected in task prerequisites: {}",
                cycle.join(" -> ")
            )));
        }

        path.push(task.name.as_str());

        for prerequisite in task.prerequisites.iter() {
            let prerequisite = self.lookup(prerequisite)?;
            self.visit(prerequisite, order, done, path)?;
        }

        path.pop();
        done.insert(task.name.as_str());
        order.push(task);

        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<&'a Task> {
        self.config
            .task
            .get(name)
            .ok_or_else(|| TaskrigError::TaskNotFound(name.to_string()))
    }
}
