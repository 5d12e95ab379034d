//! Scheduling-layer errors.
//!
//! Schedule save/delete/lookup failures surface synchronously to the caller.
//! Execution-time failures never surface here: they are folded into an
//! [`ExecutionResult`](crate::result::ExecutionResult) by the adapter.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The cron specification failed to parse. The schedule was not saved.
    #[error("Invalid cron format '{spec}': {reason}")]
    InvalidCronFormat { spec: String, reason: String },

    /// The timer engine or trigger store failed underneath a valid request.
    #[error("Scheduler fault: {0}")]
    SchedulerFault(String),

    /// A stored job exists but carries no schedule payload.
    #[error("Job '{0}' has no schedule attached")]
    JobWithoutSchedule(String),

    #[error("No task registered under '{0}'")]
    TaskNotFound(String),

    /// The task returned an error or panicked. Carries the failure message.
    #[error("{0}")]
    TaskExecutionFailed(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl From<rusqlite::Error> for SchedulerError {
    fn from(e: rusqlite::Error) -> Self {
        SchedulerError::Store(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Why an execution did not reach the task's `perform` call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("Task not run: schedule targets server '{target}' but this server is '{current}'")]
    SkippedWrongServer { target: String, current: String },

    #[error("Task not run: schedule '{0}' is already running")]
    SkippedAlreadyRunning(String),
}

/// Notification failures. Always caught by the execution adapter.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("No notification target: role and address list resolved to nobody")]
    NoNotificationTarget,

    #[error("Notification template '{0}' not found")]
    TemplateNotFound(String),

    #[error("Template render error: {0}")]
    Render(String),

    #[error("Notification transport error: {0}")]
    Transport(String),
}
