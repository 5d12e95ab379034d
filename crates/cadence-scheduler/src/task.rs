//! The task contract — the capability every schedulable unit of work offers.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::result::ExecutionResult;
use crate::schedule::ServerIdentity;

/// Context handed to a task instance before it runs.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Name the task was resolved under.
    pub task_name: String,
    /// Server the task runs on.
    pub server: ServerIdentity,
}

/// A pluggable unit of work.
///
/// A fresh instance is created for every run. The engine never runs the same
/// schedule twice concurrently from timer fires, but different schedules may
/// run the same implementation at the same time.
#[async_trait]
pub trait Task: Send + Sync {
    /// Prepare the instance. Called once, before `perform`.
    fn init(&mut self, _ctx: &TaskContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Run the task with read-only parameters.
    ///
    /// An `Err` is recorded as a failed run; it never reaches the timer engine.
    async fn perform(&self, params: &BTreeMap<String, String>) -> anyhow::Result<ExecutionResult>;
}
