//! Timer engine — arms one cron trigger per schedule and fires a single
//! generic handler whenever a trigger comes due.
//! Uses tokio::interval for ticking (sleeps between checks). Owns no business logic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::cron;
use crate::error::{Result, SchedulerError};
use crate::schedule::Schedule;

/// What the timer engine hands to its handler on every fire.
#[derive(Debug, Clone)]
pub struct JobDetail {
    /// Private copy of the schedule taken when the trigger was armed.
    pub schedule: Schedule,
    /// The occurrence this fire stands for.
    pub fired_at: DateTime<Utc>,
}

/// The one callback the timer engine knows about.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn fire(&self, job: JobDetail);
}

/// A live, armed trigger.
struct Trigger {
    cron: ::cron::Schedule,
    schedule: Schedule,
    next_fire: Option<DateTime<Utc>>,
    last_fire: Option<DateTime<Utc>>,
}

/// Process-wide cron timer. Create one per process and share it by `Arc`.
pub struct TimerEngine {
    triggers: Mutex<HashMap<String, Trigger>>,
    handler: Arc<dyn JobHandler>,
    tick_interval: Duration,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl TimerEngine {
    pub fn new(handler: Arc<dyn JobHandler>, tick_interval: Duration) -> Self {
        Self {
            triggers: Mutex::new(HashMap::new()),
            handler,
            tick_interval,
            ticker: Mutex::new(None),
        }
    }

    fn triggers(&self) -> MutexGuard<'_, HashMap<String, Trigger>> {
        self.triggers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ticker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.ticker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Arm a trigger for `schedule`. Fails if one is already armed under its id.
    pub fn schedule_job(&self, schedule: &Schedule) -> Result<()> {
        let parsed = cron::parse(&schedule.cron_spec)?;
        let mut triggers = self.triggers();
        if triggers.contains_key(&schedule.id) {
            return Err(SchedulerError::SchedulerFault(format!(
                "A trigger is already armed for job '{}'",
                schedule.id
            )));
        }
        let next_fire = cron::next_fire_after(&parsed, Utc::now());
        if next_fire.is_none() {
            tracing::warn!("⚠️ Schedule '{}' ({}) will never fire", schedule.name, schedule.cron_spec);
        }
        triggers.insert(
            schedule.id.clone(),
            Trigger {
                cron: parsed,
                schedule: schedule.clone(),
                next_fire,
                last_fire: None,
            },
        );
        tracing::debug!("⏰ Trigger armed: '{}' next fire {:?}", schedule.name, next_fire);
        Ok(())
    }

    /// Disarm the trigger for `id`. Returns false if none was armed.
    pub fn unschedule_job(&self, id: &str) -> bool {
        self.triggers().remove(id).is_some()
    }

    pub fn is_scheduled(&self, id: &str) -> bool {
        self.triggers().contains_key(id)
    }

    pub fn next_fire_time(&self, id: &str) -> Option<DateTime<Utc>> {
        self.triggers().get(id).and_then(|t| t.next_fire)
    }

    pub fn last_fire_time(&self, id: &str) -> Option<DateTime<Utc>> {
        self.triggers().get(id).and_then(|t| t.last_fire)
    }

    pub fn trigger_count(&self) -> usize {
        self.triggers().len()
    }

    /// Collect every trigger due at `now` and advance it to its next occurrence.
    ///
    /// A trigger that missed several occurrences fires once.
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<JobDetail> {
        let mut due = Vec::new();
        for trigger in self.triggers().values_mut() {
            let Some(next) = trigger.next_fire else {
                continue;
            };
            if next > now {
                continue;
            }
            trigger.last_fire = Some(next);
            trigger.next_fire = cron::next_fire_after(&trigger.cron, now);
            due.push(JobDetail {
                schedule: trigger.schedule.clone(),
                fired_at: next,
            });
        }
        due
    }

    /// Start the tick loop. Idempotent. Must be called inside a Tokio runtime.
    pub fn start(self: &Arc<Self>) {
        let mut ticker = self.ticker();
        if ticker.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        tracing::info!(
            "⏰ Timer engine started ({} triggers, tick {}ms)",
            self.trigger_count(),
            self.tick_interval.as_millis()
        );
        // The loop holds only a weak reference; dropping the last owner stops it.
        let weak = Arc::downgrade(self);
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        *ticker = Some(tokio::spawn(async move {
            loop {
                interval.tick().await;
                let Some(engine) = weak.upgrade() else {
                    tracing::debug!("⏹️ Timer engine dropped, tick loop exiting");
                    break;
                };
                for job in engine.take_due(Utc::now()) {
                    let handler = Arc::clone(&engine.handler);
                    tracing::debug!("🔔 Trigger fired: '{}'", job.schedule.name);
                    tokio::spawn(async move { handler.fire(job).await });
                }
            }
        }));
    }

    pub fn is_started(&self) -> bool {
        self.ticker().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop firing triggers. Runs already in progress are left to finish.
    pub fn shutdown(&self) {
        if let Some(handle) = self.ticker().take() {
            handle.abort();
            tracing::info!("⏹️ Timer engine stopped");
        }
    }
}

impl Drop for TimerEngine {
    fn drop(&mut self) {
        if let Some(handle) = self.ticker.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
    }
}
