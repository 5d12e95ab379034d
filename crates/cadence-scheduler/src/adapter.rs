//! Execution adapter — the single callback behind every trigger fire and
//! every manual "run now".
//!
//! Per invocation:
//! ```text
//! FIRED ─┬─ wrong server ──────── timer: drop silently / manual: failed result
//!        ├─ already running ───── timer: drop silently
//!        └─ RUNNING ─ COMPLETED | FAILED ─ LOGGED ─ NOTIFIED
//! ```
//! Nothing past this point propagates: task errors become a failed
//! [`ExecutionResult`], log and notification failures are only reported.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;

use crate::active::ActiveJobs;
use crate::error::{SchedulerError, SkipReason};
use crate::notify::NotificationDispatcher;
use crate::persistence::{ExecutionLogStore, NewExecutionLog};
use crate::registry::TaskRegistry;
use crate::result::ExecutionResult;
use crate::schedule::{Schedule, ServerIdentity};
use crate::task::TaskContext;
use crate::timer::{JobDetail, JobHandler};

/// How a run was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireKind {
    /// A trigger came due. Subject to the duplicate-run guard.
    Timer,
    /// A user asked for it. Always runs.
    Manual,
}

/// What happened during one logged run.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub schedule_id: String,
    pub result: ExecutionResult,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// None if writing the execution log failed.
    pub log_id: Option<i64>,
    /// Whether a notification was handed to the transport.
    pub notified: bool,
}

pub struct ExecutionAdapter {
    registry: TaskRegistry,
    logs: Arc<dyn ExecutionLogStore>,
    dispatcher: Arc<NotificationDispatcher>,
    active: ActiveJobs,
    server: ServerIdentity,
}

impl ExecutionAdapter {
    pub fn new(
        registry: TaskRegistry,
        logs: Arc<dyn ExecutionLogStore>,
        dispatcher: Arc<NotificationDispatcher>,
        server: ServerIdentity,
    ) -> Self {
        Self {
            registry,
            logs,
            dispatcher,
            active: ActiveJobs::new(),
            server,
        }
    }

    pub fn active_jobs(&self) -> &ActiveJobs {
        &self.active
    }

    pub fn server(&self) -> &ServerIdentity {
        &self.server
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Run `schedule` and record the outcome.
    ///
    /// Returns None when a timer fire was skipped (wrong server or already
    /// running); such skips leave no log entry and send no notification.
    pub async fn execute(&self, schedule: &Schedule, kind: FireKind) -> Option<ExecutionOutcome> {
        let start_time = Utc::now();

        let result = if !self.server.matches(schedule.server.as_deref()) {
            let skip = SkipReason::SkippedWrongServer {
                target: schedule.server.clone().unwrap_or_default(),
                current: self.server.to_string(),
            };
            if kind == FireKind::Timer {
                tracing::debug!("Skipping '{}': {skip}", schedule.name);
                return None;
            }
            tracing::warn!("⚠️ Manual run of '{}' refused: {skip}", schedule.name);
            ExecutionResult::failure(skip.to_string())
        } else {
            let _guard = match kind {
                FireKind::Timer => match self.active.try_claim(&schedule.id) {
                    Some(guard) => guard,
                    None => {
                        let skip = SkipReason::SkippedAlreadyRunning(schedule.id.clone());
                        tracing::info!("⏭️ Skipping '{}': {skip}", schedule.name);
                        return None;
                    }
                },
                FireKind::Manual => {
                    if self.active.contains(&schedule.id) {
                        tracing::info!(
                            "'{}' is already running; starting manual run anyway",
                            schedule.name
                        );
                    }
                    self.active.claim(&schedule.id)
                }
            };
            tracing::info!("▶️ Running '{}' ({})", schedule.name, schedule.task_name);
            self.run_task(schedule).await
        };

        let end_time = Utc::now();
        let result = result.with_system_variables(&schedule.task_name, &schedule.params, start_time, end_time);
        if result.success {
            tracing::info!("✅ '{}' completed", schedule.name);
        } else {
            tracing::warn!("❌ '{}' failed: {}", schedule.name, result.log_message());
        }

        let log_id = self.write_log(schedule, &result, start_time, end_time);
        let notified = match self.dispatcher.notify(schedule, &result).await {
            Ok(sent) => sent,
            Err(e) => {
                tracing::error!("❌ Notification for '{}' failed: {e}", schedule.name);
                false
            }
        };

        Some(ExecutionOutcome {
            schedule_id: schedule.id.clone(),
            result,
            start_time,
            end_time,
            log_id,
            notified,
        })
    }

    /// Resolve and perform the task, folding every failure into the result.
    async fn run_task(&self, schedule: &Schedule) -> ExecutionResult {
        match self.try_run_task(schedule).await {
            Ok(result) => result,
            Err(SchedulerError::TaskExecutionFailed(message)) => ExecutionResult::failure(message),
            Err(e) => ExecutionResult::failure(e.to_string()),
        }
    }

    async fn try_run_task(&self, schedule: &Schedule) -> Result<ExecutionResult, SchedulerError> {
        let ctx = TaskContext {
            task_name: schedule.task_name.clone(),
            server: self.server.clone(),
        };
        let task = self.registry.resolve(&ctx)?;
        let params: &BTreeMap<String, String> = &schedule.params;

        match AssertUnwindSafe(task.perform(params)).catch_unwind().await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(SchedulerError::TaskExecutionFailed(failure_message(&e))),
            Err(panic) => Err(SchedulerError::TaskExecutionFailed(panic_message(panic.as_ref()))),
        }
    }

    fn write_log(
        &self,
        schedule: &Schedule,
        result: &ExecutionResult,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Option<i64> {
        let entry = NewExecutionLog {
            schedule_id: schedule.id.clone(),
            start_time,
            end_time,
            success: result.success,
            message: result.log_message(),
            server: self.server.to_string(),
        };
        match self.logs.append_log(&entry) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::error!("❌ Failed to write execution log for '{}': {e}", schedule.name);
                None
            }
        }
    }
}

#[async_trait]
impl JobHandler for ExecutionAdapter {
    async fn fire(&self, job: JobDetail) {
        self.execute(&job.schedule, FireKind::Timer).await;
    }
}

/// The cause's message when the error is chained, else the error's own.
fn failure_message(err: &anyhow::Error) -> String {
    let message = err
        .chain()
        .nth(1)
        .map(ToString::to_string)
        .unwrap_or_else(|| err.to_string());
    if message.is_empty() {
        "Task failed without a message".to_string()
    } else {
        message
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("Task panicked: {detail}")
}
