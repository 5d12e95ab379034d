//! # Cadence Tasks
//!
//! Built-in task implementations and the helper that registers them.
//! Tasks backed by another subsystem (publishing, revisions) are only
//! registered when that subsystem hands over its store.

pub mod publish;
pub mod purge;
pub mod run_command;

use std::sync::Arc;

use cadence_scheduler::{ExecutionLogStore, TaskRegistry};

pub use publish::{EditionPublisher, PublishEditionTask, PublishStatus};
pub use purge::{
    ExecutionLogPurge, LogPurge, PublishLogPurge, PublishLogStore, PurgeTask, RevisionPurge, RevisionStore,
};
pub use run_command::RunCommandTask;

pub const PURGE_EXECUTION_LOGS: &str = "purge_execution_logs";
pub const PURGE_PUBLISH_LOGS: &str = "purge_publish_logs";
pub const PURGE_REVISIONS: &str = "purge_revisions";
pub const RUN_COMMAND: &str = "run_command";
pub const PUBLISH_EDITION: &str = "publish_edition";

/// Collaborators the built-in tasks need.
pub struct BuiltinTasks {
    logs: Arc<dyn ExecutionLogStore>,
    publish_logs: Option<Arc<dyn PublishLogStore>>,
    revisions: Option<Arc<dyn RevisionStore>>,
    publisher: Option<Arc<dyn EditionPublisher>>,
}

impl BuiltinTasks {
    pub fn new(logs: Arc<dyn ExecutionLogStore>) -> Self {
        Self {
            logs,
            publish_logs: None,
            revisions: None,
            publisher: None,
        }
    }

    pub fn with_publish_logs(mut self, store: Arc<dyn PublishLogStore>) -> Self {
        self.publish_logs = Some(store);
        self
    }

    pub fn with_revisions(mut self, store: Arc<dyn RevisionStore>) -> Self {
        self.revisions = Some(store);
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn EditionPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Register every task whose collaborators are available.
    pub fn register(self, registry: &mut TaskRegistry) {
        let logs = self.logs;
        registry.register(PURGE_EXECUTION_LOGS, move || {
            Box::new(PurgeTask::new(ExecutionLogPurge::new(logs.clone())))
        });
        registry.register(RUN_COMMAND, || Box::new(RunCommandTask::new()));

        if let Some(store) = self.publish_logs {
            registry.register(PURGE_PUBLISH_LOGS, move || {
                Box::new(PurgeTask::new(PublishLogPurge::new(store.clone())))
            });
        }
        if let Some(store) = self.revisions {
            registry.register(PURGE_REVISIONS, move || Box::new(PurgeTask::new(RevisionPurge::new(store.clone()))));
        }
        if let Some(publisher) = self.publisher {
            registry.register(PUBLISH_EDITION, move || {
                Box::new(PublishEditionTask::new(publisher.clone()))
            });
        }
    }
}
