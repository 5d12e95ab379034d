//! Task registry — resolves a task name to a fresh task instance.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, SchedulerError};
use crate::task::{Task, TaskContext};

/// Builds a new task instance.
pub type TaskFactory = Arc<dyn Fn() -> Box<dyn Task> + Send + Sync>;

/// Name → factory map, populated once at startup.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    factories: HashMap<String, TaskFactory>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Task> + Send + Sync + 'static,
    {
        tracing::debug!("🧩 Registered task: {name}");
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered task names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build and initialize the task registered under `ctx.task_name`.
    pub fn resolve(&self, ctx: &TaskContext) -> Result<Box<dyn Task>> {
        let factory = self
            .factories
            .get(&ctx.task_name)
            .ok_or_else(|| SchedulerError::TaskNotFound(ctx.task_name.clone()))?;
        let mut task = factory();
        task.init(ctx)
            .map_err(|e| SchedulerError::SchedulerFault(format!("Task '{}' failed to initialize: {e}", ctx.task_name)))?;
        Ok(task)
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry").field("tasks", &self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::ExecutionResult;
    use crate::schedule::ServerIdentity;
    use async_trait::async_trait;
    use std::collections::BTreeMap;

    struct Echo;

    #[async_trait]
    impl Task for Echo {
        async fn perform(&self, params: &BTreeMap<String, String>) -> anyhow::Result<ExecutionResult> {
            Ok(ExecutionResult::success_with(params.get("msg").cloned().unwrap_or_default()))
        }
    }

    struct BadInit;

    #[async_trait]
    impl Task for BadInit {
        fn init(&mut self, _ctx: &TaskContext) -> anyhow::Result<()> {
            anyhow::bail!("missing binding")
        }

        async fn perform(&self, _params: &BTreeMap<String, String>) -> anyhow::Result<ExecutionResult> {
            Ok(ExecutionResult::success())
        }
    }

    fn ctx(name: &str) -> TaskContext {
        TaskContext {
            task_name: name.to_string(),
            server: ServerIdentity::new("localhost", 9992),
        }
    }

    #[tokio::test]
    async fn test_resolve_registered_task() {
        let mut registry = TaskRegistry::new();
        registry.register("echo", || Box::new(Echo));
        assert!(registry.contains("echo"));

        let task = registry.resolve(&ctx("echo")).unwrap();
        let mut params = BTreeMap::new();
        params.insert("msg".to_string(), "hi".to_string());
        let result = task.perform(&params).await.unwrap();
        assert_eq!(result.message.as_deref(), Some("hi"));
    }

    #[test]
    fn test_unknown_task_is_typed_error() {
        let registry = TaskRegistry::new();
        assert!(matches!(registry.resolve(&ctx("nope")), Err(SchedulerError::TaskNotFound(n)) if n == "nope"));
    }

    #[test]
    fn test_init_failure_surfaces() {
        let mut registry = TaskRegistry::new();
        registry.register("bad", || Box::new(BadInit));
        registry.register("echo", || Box::new(Echo));
        assert_eq!(registry.names(), vec!["bad", "echo"]);
        assert!(matches!(registry.resolve(&ctx("bad")), Err(SchedulerError::SchedulerFault(_))));
    }
}
