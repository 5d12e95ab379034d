//! Scheduling engine — the facade applications talk to.
//!
//! Owns the job store, the timer engine and the execution adapter. Saving a
//! schedule replaces any trigger stored under the same id; a failed replace
//! tries to put the previous schedule back before reporting the fault.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::adapter::{ExecutionAdapter, ExecutionOutcome, FireKind};
use crate::cron;
use crate::error::{Result, SchedulerError};
use crate::persistence::SchedulerDb;
use crate::schedule::Schedule;
use crate::timer::{JobDetail, JobHandler, TimerEngine};

/// Timer handler that stamps the fire in the store before executing.
struct RecordingHandler {
    db: Arc<SchedulerDb>,
    adapter: Arc<ExecutionAdapter>,
}

#[async_trait]
impl JobHandler for RecordingHandler {
    async fn fire(&self, job: JobDetail) {
        if let Err(e) = self.db.record_fire(&job.schedule.id, job.fired_at) {
            tracing::warn!("⚠️ Could not record fire of '{}': {e}", job.schedule.name);
        }
        self.adapter.fire(job).await;
    }
}

pub struct SchedulerEngine {
    db: Arc<SchedulerDb>,
    timer: Arc<TimerEngine>,
    adapter: Arc<ExecutionAdapter>,
    group: String,
    /// Serializes save/delete so a replace is never interleaved with another.
    mutation: tokio::sync::Mutex<()>,
}

impl SchedulerEngine {
    pub fn new(db: Arc<SchedulerDb>, adapter: Arc<ExecutionAdapter>, group: &str, tick_interval: Duration) -> Self {
        let handler = Arc::new(RecordingHandler {
            db: db.clone(),
            adapter: adapter.clone(),
        });
        Self {
            db,
            timer: Arc::new(TimerEngine::new(handler, tick_interval)),
            adapter,
            group: group.to_string(),
            mutation: tokio::sync::Mutex::new(()),
        }
    }

    pub fn adapter(&self) -> &Arc<ExecutionAdapter> {
        &self.adapter
    }

    pub fn db(&self) -> &Arc<SchedulerDb> {
        &self.db
    }

    /// A blank schedule with a fresh unique id. Nothing is stored.
    pub fn create_schedule(&self) -> Schedule {
        Schedule::new()
    }

    /// Store `schedule` and arm its trigger, replacing any schedule with the same id.
    pub async fn save_schedule(&self, schedule: &Schedule) -> Result<()> {
        cron::validate(&schedule.cron_spec)?;
        let _lock = self.mutation.lock().await;

        let previous = match self.db.find_job(&schedule.id) {
            Ok(previous) => previous,
            Err(SchedulerError::JobWithoutSchedule(_)) => None,
            Err(e) => {
                tracing::warn!("⚠️ Existing version of '{}' is unreadable and cannot be restored: {e}", schedule.name);
                None
            }
        };
        // The old trigger stays armed until its store rows are gone.
        self.db
            .delete_job(&schedule.id)
            .map_err(|e| fault("remove existing schedule", e))?;
        self.timer.unschedule_job(&schedule.id);

        if let Err(e) = self.install(schedule) {
            tracing::error!("❌ Failed to save schedule '{}': {e}", schedule.name);
            if let Some(previous) = previous {
                match self.install(&previous) {
                    Ok(()) => tracing::info!("↩️ Restored previous version of '{}'", previous.name),
                    Err(restore) => {
                        tracing::error!("❌ Could not restore previous version of '{}': {restore}", previous.name)
                    }
                }
            }
            return Err(fault("save schedule", e));
        }

        tracing::info!("📅 Saved schedule '{}' [{}] ({})", schedule.name, schedule.cron_spec, schedule.task_name);
        Ok(())
    }

    /// Store the job and arm its trigger, undoing the store write if arming fails.
    fn install(&self, schedule: &Schedule) -> Result<()> {
        self.db.insert_job(&self.group, schedule)?;
        if let Err(e) = self.timer.schedule_job(schedule) {
            if let Err(undo) = self.db.delete_job(&schedule.id) {
                tracing::warn!("⚠️ Could not undo store write for '{}': {undo}", schedule.name);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Remove the schedule and its trigger. Unknown ids are a no-op.
    pub async fn delete_schedule(&self, id: &str) -> Result<()> {
        let _lock = self.mutation.lock().await;
        // Disarm only once the store delete has committed.
        let removed = self.db.delete_job(id).map_err(|e| fault("delete schedule", e))?;
        if self.timer.unschedule_job(id) || removed {
            tracing::info!("🗑️ Deleted schedule {id}");
        }
        Ok(())
    }

    pub fn find_scheduled_task_by_id(&self, id: &str) -> Result<Option<Schedule>> {
        self.db.find_job(id)
    }

    pub fn find_all_schedules(&self) -> Result<Vec<Schedule>> {
        self.db.list_jobs(&self.group)
    }

    pub fn next_fire_time(&self, id: &str) -> Option<DateTime<Utc>> {
        self.timer.next_fire_time(id)
    }

    pub fn last_fire_time(&self, id: &str) -> Result<Option<DateTime<Utc>>> {
        self.db.last_fire(id)
    }

    /// Arm every stored schedule and start the timer. Idempotent.
    ///
    /// Schedules that fail to arm are logged and left in the store.
    pub fn start(&self) -> Result<()> {
        if self.timer.is_started() {
            return Ok(());
        }
        for schedule in self.find_all_schedules()? {
            if self.timer.is_scheduled(&schedule.id) {
                continue;
            }
            if let Err(e) = self.timer.schedule_job(&schedule) {
                tracing::warn!("⚠️ Could not arm '{}': {e}", schedule.name);
            }
        }
        self.timer.start();
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.timer.is_started()
    }

    pub fn shutdown(&self) {
        self.timer.shutdown();
    }

    /// Execute `schedule` immediately, outside its cron timing.
    ///
    /// Starts the timer if it is not running. The run proceeds even if the
    /// schedule is already active.
    pub fn run_now(&self, schedule: &Schedule) -> Result<RunHandle> {
        self.start()?;
        let adapter = self.adapter.clone();
        let schedule = schedule.clone();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let outcome = adapter.execute(&schedule, FireKind::Manual).await;
            let _ = tx.send(outcome);
        });
        Ok(RunHandle { rx })
    }
}

fn fault(action: &str, err: SchedulerError) -> SchedulerError {
    SchedulerError::SchedulerFault(format!("Failed to {action}: {err}"))
}

/// Completion handle for a manual run.
pub struct RunHandle {
    rx: oneshot::Receiver<Option<ExecutionOutcome>>,
}

impl RunHandle {
    /// Wait for the run to finish. None if the run was skipped or aborted.
    pub async fn wait(self) -> Option<ExecutionOutcome> {
        self.rx.await.ok().flatten()
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    pub async fn wait_timeout(self, timeout: Duration) -> Option<ExecutionOutcome> {
        tokio::time::timeout(timeout, self.wait()).await.ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::tests::{fixture, schedule};
    use crate::persistence::ExecutionLogStore;
    use crate::schedule::NotifyPolicy;

    fn engine() -> (SchedulerEngine, crate::adapter::tests::Fixture) {
        let f = fixture();
        let engine = SchedulerEngine::new(f.db.clone(), f.adapter.clone(), "cadence", Duration::from_millis(20));
        (engine, f)
    }

    #[tokio::test]
    async fn test_save_and_find_round_trip() {
        let (engine, _f) = engine();
        let mut s = engine.create_schedule();
        s.name = "nightly".into();
        s.task_name = "succeed".into();
        s.cron_spec = "0 0 2 * * ?".into();
        s.notify = NotifyPolicy::OnFailure;
        s.email_addresses = Some("ops,dev".into());
        engine.save_schedule(&s).await.unwrap();

        assert_eq!(engine.find_scheduled_task_by_id(&s.id).unwrap(), Some(s.clone()));
        assert_eq!(engine.find_all_schedules().unwrap(), vec![s.clone()]);
        assert!(engine.next_fire_time(&s.id).is_some());
    }

    #[tokio::test]
    async fn test_resave_replaces_trigger() {
        let (engine, _f) = engine();
        let mut s = schedule("succeed", NotifyPolicy::Never);
        engine.save_schedule(&s).await.unwrap();
        s.cron_spec = "0 30 * * * ?".into();
        s.name = "renamed".into();
        engine.save_schedule(&s).await.unwrap();

        let all = engine.find_all_schedules().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "renamed");
        assert_eq!(all[0].cron_spec, "0 30 * * * ?");
        assert_eq!(engine.timer.trigger_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_cron_leaves_store_unchanged() {
        let (engine, _f) = engine();
        let good = schedule("succeed", NotifyPolicy::Never);
        engine.save_schedule(&good).await.unwrap();

        let mut bad = good.clone();
        bad.cron_spec = "every tuesday".into();
        let err = engine.save_schedule(&bad).await.unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidCronFormat { ref spec, .. } if spec == "every tuesday"));
        assert_eq!(engine.find_scheduled_task_by_id(&good.id).unwrap(), Some(good.clone()));
        assert!(engine.timer.is_scheduled(&good.id));
    }

    #[tokio::test]
    async fn test_never_firing_schedule_is_kept() {
        let (engine, _f) = engine();
        let mut s = schedule("succeed", NotifyPolicy::Never);
        s.cron_spec = "0 0 0 1 1 ? 2001".into();
        engine.save_schedule(&s).await.unwrap();
        assert!(engine.timer.is_scheduled(&s.id));
        assert_eq!(engine.next_fire_time(&s.id), None);
        assert_eq!(engine.find_all_schedules().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_schedule() {
        let (engine, _f) = engine();
        let s = schedule("succeed", NotifyPolicy::Never);
        engine.save_schedule(&s).await.unwrap();
        engine.delete_schedule(&s.id).await.unwrap();
        assert_eq!(engine.find_scheduled_task_by_id(&s.id).unwrap(), None);
        assert!(!engine.timer.is_scheduled(&s.id));

        // Unknown ids are a no-op.
        engine.delete_schedule("no-such-id").await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_schedule_armed() {
        let (engine, f) = engine();
        let s = schedule("succeed", NotifyPolicy::Never);
        engine.save_schedule(&s).await.unwrap();
        f.db.block_job_deletes().unwrap();

        let err = engine.delete_schedule(&s.id).await.unwrap_err();
        assert!(matches!(err, SchedulerError::SchedulerFault(_)));
        assert_eq!(engine.find_scheduled_task_by_id(&s.id).unwrap(), Some(s.clone()));
        assert!(engine.timer.is_scheduled(&s.id));
    }

    #[tokio::test]
    async fn test_failed_replace_keeps_previous_version_armed() {
        let (engine, f) = engine();
        let s = schedule("succeed", NotifyPolicy::Never);
        engine.save_schedule(&s).await.unwrap();
        f.db.block_job_deletes().unwrap();

        let mut renamed = s.clone();
        renamed.name = "renamed".into();
        renamed.cron_spec = "0 30 * * * ?".into();
        let err = engine.save_schedule(&renamed).await.unwrap_err();
        assert!(matches!(err, SchedulerError::SchedulerFault(_)));
        assert_eq!(engine.find_scheduled_task_by_id(&s.id).unwrap(), Some(s.clone()));
        assert!(engine.timer.is_scheduled(&s.id));
        assert_eq!(engine.timer.trigger_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_store_write_restores_previous_version() {
        let (engine, f) = engine();
        let good = schedule("succeed", NotifyPolicy::Never);
        engine.save_schedule(&good).await.unwrap();
        f.db.record_fire(&good.id, Utc::now()).unwrap();
        assert!(engine.last_fire_time(&good.id).unwrap().is_some());
        f.db.block_schedule_inserts_named("rejected").unwrap();

        let mut replacement = good.clone();
        replacement.name = "rejected".into();
        let err = engine.save_schedule(&replacement).await.unwrap_err();
        assert!(matches!(err, SchedulerError::SchedulerFault(_)));

        // The previous version is back in the store and armed, with fresh fire history.
        assert_eq!(engine.find_scheduled_task_by_id(&good.id).unwrap(), Some(good.clone()));
        assert!(engine.timer.is_scheduled(&good.id));
        assert_eq!(engine.timer.trigger_count(), 1);
        assert_eq!(engine.last_fire_time(&good.id).unwrap(), None);
    }

    #[tokio::test]
    async fn test_unreadable_previous_version_can_be_overwritten() {
        let (engine, f) = engine();
        let s = schedule("succeed", NotifyPolicy::Never);
        engine.save_schedule(&s).await.unwrap();
        f.db.corrupt_schedule_column(&s.id, "params", "{not json").unwrap();

        engine.save_schedule(&s).await.unwrap();
        assert_eq!(engine.find_scheduled_task_by_id(&s.id).unwrap(), Some(s.clone()));
        assert!(engine.timer.is_scheduled(&s.id));
    }

    #[tokio::test]
    async fn test_dropping_started_engine_stops_timer() {
        let (engine, _f) = engine();
        let s = Schedule::cron("every second", "succeed", "* * * * * ?");
        engine.save_schedule(&s).await.unwrap();
        engine.start().unwrap();
        let timer = Arc::downgrade(&engine.timer);

        drop(engine);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(timer.upgrade().is_none());
    }

    #[tokio::test]
    async fn test_job_without_payload_is_reported() {
        let (engine, f) = engine();
        f.db.insert_orphan_job("orphan", "cadence").unwrap();
        assert!(matches!(
            engine.find_scheduled_task_by_id("orphan"),
            Err(SchedulerError::JobWithoutSchedule(id)) if id == "orphan"
        ));
        assert!(engine.find_all_schedules().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_arms_stored_schedules() {
        let (engine, f) = engine();
        let s = schedule("succeed", NotifyPolicy::Never);
        f.db.insert_job("cadence", &s).unwrap();
        assert!(!engine.timer.is_scheduled(&s.id));

        engine.start().unwrap();
        assert!(engine.is_started());
        assert!(engine.timer.is_scheduled(&s.id));
        engine.start().unwrap();
        assert_eq!(engine.timer.trigger_count(), 1);
        engine.shutdown();
        assert!(!engine.is_started());
    }

    #[tokio::test]
    async fn test_run_now_logs_and_notifies() {
        let (engine, f) = engine();
        let s = schedule("succeed", NotifyPolicy::Always);
        engine.save_schedule(&s).await.unwrap();

        let outcome = engine
            .run_now(&s)
            .unwrap()
            .wait_timeout(Duration::from_secs(5))
            .await
            .expect("manual run should finish");
        assert!(outcome.result.success);
        assert!(engine.is_started());

        let logs = f.db.find_logs(Some(&s.id)).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(f.transport.sent.lock().unwrap().len(), 1);
        assert!(f.adapter.active_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_timer_fire_records_last_fire() {
        let (engine, f) = engine();
        let s = Schedule::cron("every second", "succeed", "* * * * * ?");
        engine.save_schedule(&s).await.unwrap();
        engine.start().unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while f.db.find_logs(Some(&s.id)).unwrap().is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "timer never fired");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        engine.shutdown();
        assert!(engine.last_fire_time(&s.id).unwrap().is_some());
    }
}
