//! Purge tasks — delete log rows older than `numberOfDays` days.
//!
//! Every variant shares [`PurgeTask`]: it computes the cutoff, hands it to a
//! [`LogPurge`] target and reports how many rows went away.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use cadence_scheduler::{ExecutionLogStore, ExecutionResult, Task};
use chrono::{DateTime, Duration, Utc};

pub const PARAM_NUMBER_OF_DAYS: &str = "numberOfDays";
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Retention period from the task parameters.
///
/// A missing value means the default. An unparseable one is logged and also
/// falls back to the default; it never fails the run.
pub fn retention_days(params: &BTreeMap<String, String>) -> u32 {
    match params.get(PARAM_NUMBER_OF_DAYS).map(|v| v.trim()) {
        None | Some("") => DEFAULT_RETENTION_DAYS,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(
                "⚠️ Invalid {PARAM_NUMBER_OF_DAYS} '{raw}', using default of {DEFAULT_RETENTION_DAYS} days"
            );
            DEFAULT_RETENTION_DAYS
        }),
    }
}

/// `days` before `now`. A retention reaching past the earliest representable
/// instant clamps to it, which keeps every entry.
pub fn cutoff(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    now.checked_sub_signed(Duration::days(i64::from(days))).unwrap_or_else(|| {
        tracing::warn!("⚠️ Retention of {days} days reaches past the earliest date; nothing will be purged");
        DateTime::<Utc>::MIN_UTC
    })
}

/// Something that can drop its rows older than a cutoff.
pub trait LogPurge: Send + Sync {
    /// What gets purged, for log and result messages.
    fn target(&self) -> &str;

    /// Delete entries older than `before`. Returns the number removed.
    fn purge_log_entries(&self, before: DateTime<Utc>, params: &BTreeMap<String, String>) -> anyhow::Result<usize>;
}

/// Task wrapper shared by every purge variant.
pub struct PurgeTask<P> {
    purge: P,
}

impl<P: LogPurge> PurgeTask<P> {
    pub fn new(purge: P) -> Self {
        Self { purge }
    }
}

#[async_trait]
impl<P: LogPurge> Task for PurgeTask<P> {
    async fn perform(&self, params: &BTreeMap<String, String>) -> anyhow::Result<ExecutionResult> {
        let days = retention_days(params);
        let before = cutoff(Utc::now(), days);
        let removed = self.purge.purge_log_entries(before, params)?;
        tracing::info!("🧹 Purged {removed} {} older than {days} days", self.purge.target());
        Ok(ExecutionResult::success_with(format!(
            "Purged {removed} {} older than {days} days",
            self.purge.target()
        ))
        .with_variable("$sys.purgedCount", removed.to_string()))
    }
}

// ─── Scheduled-task execution logs ───────────────────────

pub struct ExecutionLogPurge {
    logs: Arc<dyn ExecutionLogStore>,
}

impl ExecutionLogPurge {
    pub fn new(logs: Arc<dyn ExecutionLogStore>) -> Self {
        Self { logs }
    }
}

impl LogPurge for ExecutionLogPurge {
    fn target(&self) -> &str {
        "execution log entries"
    }

    fn purge_log_entries(&self, before: DateTime<Utc>, _params: &BTreeMap<String, String>) -> anyhow::Result<usize> {
        Ok(self.logs.purge_logs_before(before)?)
    }
}

// ─── Publishing logs ─────────────────────────────────────

/// Publishing log storage owned by the publishing subsystem.
pub trait PublishLogStore: Send + Sync {
    /// Ids of publish jobs that have log entries older than `before`.
    fn expired_jobs(&self, before: DateTime<Utc>) -> anyhow::Result<Vec<String>>;

    /// Copy one job's logs to the archive.
    fn archive_job(&self, job_id: &str) -> anyhow::Result<()>;

    fn delete_logs_before(&self, before: DateTime<Utc>) -> anyhow::Result<usize>;
}

/// Archives each expired job, then deletes. A job that fails to archive is
/// logged and skipped; the delete still runs.
pub struct PublishLogPurge {
    store: Arc<dyn PublishLogStore>,
}

impl PublishLogPurge {
    pub fn new(store: Arc<dyn PublishLogStore>) -> Self {
        Self { store }
    }
}

impl LogPurge for PublishLogPurge {
    fn target(&self) -> &str {
        "publishing log entries"
    }

    fn purge_log_entries(&self, before: DateTime<Utc>, _params: &BTreeMap<String, String>) -> anyhow::Result<usize> {
        for job_id in self.store.expired_jobs(before)? {
            if let Err(e) = self.store.archive_job(&job_id) {
                tracing::warn!("⚠️ Could not archive publishing logs of job {job_id}: {e}");
            }
        }
        self.store.delete_logs_before(before)
    }
}

// ─── Revision history ────────────────────────────────────

pub trait RevisionStore: Send + Sync {
    fn delete_revisions_before(&self, before: DateTime<Utc>) -> anyhow::Result<usize>;
}

pub struct RevisionPurge {
    store: Arc<dyn RevisionStore>,
}

impl RevisionPurge {
    pub fn new(store: Arc<dyn RevisionStore>) -> Self {
        Self { store }
    }
}

impl LogPurge for RevisionPurge {
    fn target(&self) -> &str {
        "revisions"
    }

    fn purge_log_entries(&self, before: DateTime<Utc>, _params: &BTreeMap<String, String>) -> anyhow::Result<usize> {
        self.store.delete_revisions_before(before)
    }
}
