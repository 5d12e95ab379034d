//! SQLite-backed persistence for scheduled jobs and execution logs.
//!
//! A job is two rows: `scheduled_jobs` holds what the timer engine needs (id,
//! group, cron spec, fire bookkeeping) and `schedules` holds the schedule
//! payload. Both are written and removed in one transaction.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};
use crate::schedule::{NotifyPolicy, Schedule};

/// One completed (or attempted) execution. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub log_id: i64,
    pub schedule_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub success: bool,
    pub message: String,
    /// Server that executed (or refused) the run.
    pub server: String,
}

/// A log row before it has been assigned an id.
#[derive(Debug, Clone)]
pub struct NewExecutionLog {
    pub schedule_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub success: bool,
    pub message: String,
    pub server: String,
}

/// Queryable, purgeable execution log.
pub trait ExecutionLogStore: Send + Sync {
    fn append_log(&self, entry: &NewExecutionLog) -> Result<i64>;

    /// Newest first. `None` lists every schedule.
    fn find_logs(&self, schedule_id: Option<&str>) -> Result<Vec<ExecutionLogEntry>>;

    fn find_log(&self, log_id: i64) -> Result<Option<ExecutionLogEntry>>;

    /// Returns the number of rows deleted.
    fn purge_logs_by_ids(&self, log_ids: &[i64]) -> Result<usize>;

    /// Deletes rows with `end_time < cutoff`. Returns the number deleted.
    fn purge_logs_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    fn purge_all_logs(&self) -> Result<usize>;
}

/// Timestamps are stored in one fixed-width UTC format so text comparison
/// orders them chronologically.
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

/// SQLite-backed store for all scheduler data.
pub struct SchedulerDb {
    conn: Mutex<Connection>,
}

impl SchedulerDb {
    /// Open or create the scheduler database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SchedulerError::Store(format!("DB dir: {e}")))?;
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Private in-memory database (tests, dry runs).
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.lock().execute_batch(
            "
            PRAGMA foreign_keys = ON;

            -- Timer-side job record
            CREATE TABLE IF NOT EXISTS scheduled_jobs (
                id TEXT PRIMARY KEY,
                job_group TEXT NOT NULL,
                cron_spec TEXT NOT NULL,
                last_fire TEXT,
                created_at TEXT NOT NULL
            );

            -- Schedule payload attached to a job
            CREATE TABLE IF NOT EXISTS schedules (
                id TEXT PRIMARY KEY REFERENCES scheduled_jobs(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                task_name TEXT NOT NULL,
                cron_spec TEXT NOT NULL,
                server TEXT,
                notify TEXT NOT NULL DEFAULT 'NEVER',
                notify_template TEXT,
                notify_role TEXT,
                email_addresses TEXT,
                params TEXT NOT NULL DEFAULT '{}'   -- JSON object
            );

            -- Append-only execution log
            CREATE TABLE IF NOT EXISTS execution_logs (
                log_id INTEGER PRIMARY KEY AUTOINCREMENT,
                schedule_id TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                success INTEGER NOT NULL,
                message TEXT NOT NULL DEFAULT '',
                server TEXT NOT NULL DEFAULT ''
            );
            CREATE INDEX IF NOT EXISTS idx_execution_logs_end ON execution_logs(end_time);
            CREATE INDEX IF NOT EXISTS idx_execution_logs_schedule ON execution_logs(schedule_id);
            ",
        )?;
        Ok(())
    }

    // ─── Scheduled jobs ──────────────────────────────────────

    /// Store a job and its schedule payload.
    pub fn insert_job(&self, group: &str, schedule: &Schedule) -> Result<()> {
        let params = serde_json::to_string(&schedule.params)
            .map_err(|e| SchedulerError::Store(format!("Serialize params: {e}")))?;
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO scheduled_jobs (id, job_group, cron_spec, created_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![schedule.id, group, schedule.cron_spec, ts(Utc::now())],
        )?;
        tx.execute(
            "INSERT INTO schedules
             (id, name, task_name, cron_spec, server, notify, notify_template, notify_role, email_addresses, params)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                schedule.id,
                schedule.name,
                schedule.task_name,
                schedule.cron_spec,
                schedule.server,
                schedule.notify.to_string(),
                schedule.notify_template,
                schedule.notify_role,
                schedule.email_addresses,
                params,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Remove a job and its payload. Returns false if the id was unknown.
    pub fn delete_job(&self, id: &str) -> Result<bool> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM schedules WHERE id = ?1", [id])?;
        let removed = tx.execute("DELETE FROM scheduled_jobs WHERE id = ?1", [id])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    /// Whether a job record exists for `id`, with or without payload.
    pub fn job_exists(&self, id: &str) -> Result<bool> {
        let found = self
            .lock()
            .query_row("SELECT 1 FROM scheduled_jobs WHERE id = ?1", [id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// Load the schedule attached to job `id`.
    ///
    /// Fails with `JobWithoutSchedule` when the job exists but has no payload.
    pub fn find_job(&self, id: &str) -> Result<Option<Schedule>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                &format!("SELECT j.id, {SCHEDULE_COLUMNS} FROM scheduled_jobs j LEFT JOIN schedules s ON s.id = j.id WHERE j.id = ?1"),
                [id],
                schedule_from_row,
            )
            .optional()?;
        match row {
            None => Ok(None),
            Some(None) => Err(SchedulerError::JobWithoutSchedule(id.to_string())),
            Some(Some(schedule)) => Ok(Some(schedule)),
        }
    }

    /// All schedules in `group`. Jobs without a payload are skipped.
    pub fn list_jobs(&self, group: &str) -> Result<Vec<Schedule>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT j.id, {SCHEDULE_COLUMNS} FROM scheduled_jobs j LEFT JOIN schedules s ON s.id = j.id
             WHERE j.job_group = ?1 ORDER BY j.created_at, j.id"
        ))?;
        let rows = stmt.query_map([group], schedule_from_row)?;
        let mut schedules = Vec::new();
        for row in rows {
            match row {
                Ok(Some(schedule)) => schedules.push(schedule),
                Ok(None) => tracing::warn!("⚠️ Skipping scheduled job without schedule payload"),
                Err(e @ rusqlite::Error::FromSqlConversionFailure(..)) => {
                    tracing::warn!("⚠️ Skipping unreadable schedule: {e}")
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(schedules)
    }

    /// Record that job `id` fired at `at`.
    pub fn record_fire(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.lock().execute(
            "UPDATE scheduled_jobs SET last_fire = ?1 WHERE id = ?2",
            rusqlite::params![ts(at), id],
        )?;
        Ok(())
    }

    pub fn last_fire(&self, id: &str) -> Result<Option<DateTime<Utc>>> {
        let conn = self.lock();
        let value: Option<Option<String>> = conn
            .query_row("SELECT last_fire FROM scheduled_jobs WHERE id = ?1", [id], |row| row.get(0))
            .optional()?;
        match value.flatten() {
            Some(s) => Ok(Some(parse_ts(0, &s)?)),
            None => Ok(None),
        }
    }

    /// Insert a bare job record with no schedule payload.
    #[cfg(test)]
    pub(crate) fn insert_orphan_job(&self, id: &str, group: &str) -> Result<()> {
        self.lock().execute(
            "INSERT INTO scheduled_jobs (id, job_group, cron_spec, created_at) VALUES (?1, ?2, '0 0 * * * ?', ?3)",
            rusqlite::params![id, group, ts(Utc::now())],
        )?;
        Ok(())
    }

    /// Make every delete of a job record fail.
    #[cfg(test)]
    pub(crate) fn block_job_deletes(&self) -> Result<()> {
        self.lock().execute_batch(
            "CREATE TRIGGER block_job_delete BEFORE DELETE ON scheduled_jobs
             BEGIN SELECT RAISE(ABORT, 'disk locked'); END;",
        )?;
        Ok(())
    }

    /// Make inserts of schedules named `name` fail.
    #[cfg(test)]
    pub(crate) fn block_schedule_inserts_named(&self, name: &str) -> Result<()> {
        self.lock().execute_batch(&format!(
            "CREATE TRIGGER block_schedule_insert BEFORE INSERT ON schedules WHEN NEW.name = '{}'
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            name.replace('\'', "''")
        ))?;
        Ok(())
    }

    /// Overwrite one raw column of a stored schedule.
    #[cfg(test)]
    pub(crate) fn corrupt_schedule_column(&self, id: &str, column: &str, value: &str) -> Result<()> {
        self.lock()
            .execute(&format!("UPDATE schedules SET {column} = ?1 WHERE id = ?2"), [value, id])?;
        Ok(())
    }
}

const SCHEDULE_COLUMNS: &str =
    "s.id, s.name, s.task_name, s.cron_spec, s.server, s.notify, s.notify_template, s.notify_role, s.email_addresses, s.params";

/// Map a joined job row. `None` when the payload columns are NULL.
fn schedule_from_row(row: &Row<'_>) -> rusqlite::Result<Option<Schedule>> {
    let id: Option<String> = row.get(1)?;
    let Some(id) = id else {
        return Ok(None);
    };
    let notify: String = row.get(6)?;
    let notify = notify
        .parse::<NotifyPolicy>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, e.into()))?;
    let params: String = row.get(10)?;
    let params = serde_json::from_str(&params)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, rusqlite::types::Type::Text, Box::new(e)))?;
    Ok(Some(Schedule {
        id,
        name: row.get(2)?,
        task_name: row.get(3)?,
        cron_spec: row.get(4)?,
        server: row.get(5)?,
        notify,
        notify_template: row.get(7)?,
        notify_role: row.get(8)?,
        email_addresses: row.get(9)?,
        params,
    }))
}

fn log_from_row(row: &Row<'_>) -> rusqlite::Result<ExecutionLogEntry> {
    let start: String = row.get(2)?;
    let end: String = row.get(3)?;
    Ok(ExecutionLogEntry {
        log_id: row.get(0)?,
        schedule_id: row.get(1)?,
        start_time: parse_ts(2, &start)?,
        end_time: parse_ts(3, &end)?,
        success: row.get::<_, i32>(4)? != 0,
        message: row.get(5)?,
        server: row.get(6)?,
    })
}

const LOG_COLUMNS: &str = "log_id, schedule_id, start_time, end_time, success, message, server";

impl ExecutionLogStore for SchedulerDb {
    fn append_log(&self, entry: &NewExecutionLog) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO execution_logs (schedule_id, start_time, end_time, success, message, server)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                entry.schedule_id,
                ts(entry.start_time),
                ts(entry.end_time),
                entry.success as i32,
                entry.message,
                entry.server,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn find_logs(&self, schedule_id: Option<&str>) -> Result<Vec<ExecutionLogEntry>> {
        let conn = self.lock();
        let logs = match schedule_id {
            Some(id) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {LOG_COLUMNS} FROM execution_logs WHERE schedule_id = ?1 ORDER BY start_time DESC, log_id DESC"
                ))?;
                let rows = stmt.query_map([id], log_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {LOG_COLUMNS} FROM execution_logs ORDER BY start_time DESC, log_id DESC"
                ))?;
                let rows = stmt.query_map([], log_from_row)?.collect::<rusqlite::Result<Vec<_>>>()?;
                rows
            }
        };
        Ok(logs)
    }

    fn find_log(&self, log_id: i64) -> Result<Option<ExecutionLogEntry>> {
        let entry = self
            .lock()
            .query_row(
                &format!("SELECT {LOG_COLUMNS} FROM execution_logs WHERE log_id = ?1"),
                [log_id],
                log_from_row,
            )
            .optional()?;
        Ok(entry)
    }

    fn purge_logs_by_ids(&self, log_ids: &[i64]) -> Result<usize> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM execution_logs WHERE log_id = ?1")?;
            for id in log_ids {
                removed += stmt.execute([id])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    fn purge_logs_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let removed = self
            .lock()
            .execute("DELETE FROM execution_logs WHERE end_time < ?1", [ts(cutoff)])?;
        Ok(removed)
    }

    fn purge_all_logs(&self) -> Result<usize> {
        let removed = self.lock().execute("DELETE FROM execution_logs", [])?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn log_at(schedule_id: &str, end: DateTime<Utc>, success: bool) -> NewExecutionLog {
        NewExecutionLog {
            schedule_id: schedule_id.to_string(),
            start_time: end - Duration::seconds(5),
            end_time: end,
            success,
            message: if success { "Completed".into() } else { "boom".into() },
            server: "node-a:9992".into(),
        }
    }

    #[test]
    fn test_open_and_migrate() {
        let dir = std::env::temp_dir().join(format!("cadence-sched-db-{}", uuid::Uuid::new_v4()));
        let db = SchedulerDb::open(&dir.join("test.db")).unwrap();
        assert!(db.list_jobs("cadence").unwrap().is_empty());
        // Migrations are idempotent.
        db.migrate().unwrap();
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_save_and_load_job() {
        let db = SchedulerDb::open_in_memory().unwrap();
        let mut schedule = Schedule::cron("nightly", "run_command", "0 0 2 * * ?").with_param("command", "true");
        schedule.notify = NotifyPolicy::OnFailure;
        schedule.email_addresses = Some("ops, dev@example.com".into());
        db.insert_job("cadence", &schedule).unwrap();

        assert_eq!(db.find_job(&schedule.id).unwrap(), Some(schedule.clone()));
        assert_eq!(db.list_jobs("cadence").unwrap(), vec![schedule.clone()]);
        assert!(db.list_jobs("other").unwrap().is_empty());
        assert!(db.find_job("missing").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_insert_fails_and_keeps_original() {
        let db = SchedulerDb::open_in_memory().unwrap();
        let schedule = Schedule::cron("a", "t", "0 0 * * * ?");
        db.insert_job("cadence", &schedule).unwrap();
        let mut clash = schedule.clone();
        clash.name = "b".into();
        assert!(db.insert_job("cadence", &clash).is_err());
        assert_eq!(db.find_job(&schedule.id).unwrap().unwrap().name, "a");
    }

    #[test]
    fn test_job_without_schedule() {
        let db = SchedulerDb::open_in_memory().unwrap();
        db.insert_orphan_job("orphan", "cadence").unwrap();
        let good = Schedule::cron("good", "t", "0 0 * * * ?");
        db.insert_job("cadence", &good).unwrap();

        assert!(matches!(db.find_job("orphan"), Err(SchedulerError::JobWithoutSchedule(id)) if id == "orphan"));
        assert_eq!(db.list_jobs("cadence").unwrap(), vec![good]);
    }

    #[test]
    fn test_unreadable_columns_are_reported_not_defaulted() {
        let db = SchedulerDb::open_in_memory().unwrap();
        let mut bad_policy = Schedule::cron("alerts", "t", "0 0 * * * ?");
        bad_policy.notify = NotifyPolicy::Always;
        let bad_params = Schedule::cron("params", "t", "0 0 * * * ?").with_param("command", "true");
        let good = Schedule::cron("good", "t", "0 0 * * * ?");
        for s in [&bad_policy, &bad_params, &good] {
            db.insert_job("cadence", s).unwrap();
        }
        db.corrupt_schedule_column(&bad_policy.id, "notify", "SOMETIMES").unwrap();
        db.corrupt_schedule_column(&bad_params.id, "params", "{not json").unwrap();

        // Never silently read back as NEVER / no parameters.
        assert!(matches!(db.find_job(&bad_policy.id), Err(SchedulerError::Store(msg)) if msg.contains("SOMETIMES")));
        assert!(matches!(db.find_job(&bad_params.id), Err(SchedulerError::Store(_))));
        assert_eq!(db.list_jobs("cadence").unwrap(), vec![good]);
    }

    #[test]
    fn test_delete_job() {
        let db = SchedulerDb::open_in_memory().unwrap();
        let schedule = Schedule::cron("a", "t", "0 0 * * * ?");
        db.insert_job("cadence", &schedule).unwrap();
        assert!(db.delete_job(&schedule.id).unwrap());
        assert!(!db.job_exists(&schedule.id).unwrap());
        assert!(!db.delete_job(&schedule.id).unwrap());
    }

    #[test]
    fn test_fire_bookkeeping() {
        let db = SchedulerDb::open_in_memory().unwrap();
        let schedule = Schedule::cron("a", "t", "0 0 * * * ?");
        db.insert_job("cadence", &schedule).unwrap();
        assert!(db.last_fire(&schedule.id).unwrap().is_none());
        let at = Utc::now();
        db.record_fire(&schedule.id, at).unwrap();
        let stored = db.last_fire(&schedule.id).unwrap().unwrap();
        assert_eq!(stored.timestamp_millis(), at.timestamp_millis());
    }

    #[test]
    fn test_append_and_query_logs() {
        let db = SchedulerDb::open_in_memory().unwrap();
        let now = Utc::now();
        let first = db.append_log(&log_at("s1", now - Duration::hours(1), true)).unwrap();
        let second = db.append_log(&log_at("s1", now, false)).unwrap();
        db.append_log(&log_at("s2", now, true)).unwrap();

        let s1 = db.find_logs(Some("s1")).unwrap();
        assert_eq!(s1.len(), 2);
        assert_eq!(s1[0].log_id, second);
        assert!(!s1[0].success);
        assert_eq!(s1[0].message, "boom");
        assert_eq!(db.find_logs(None).unwrap().len(), 3);
        assert_eq!(db.find_log(first).unwrap().unwrap().schedule_id, "s1");
        assert!(db.find_log(9999).unwrap().is_none());
    }

    #[test]
    fn test_purge_before_cutoff_is_exact() {
        let db = SchedulerDb::open_in_memory().unwrap();
        let cutoff = Utc::now() - Duration::days(30);
        db.append_log(&log_at("s", cutoff - Duration::seconds(1), true)).unwrap();
        db.append_log(&log_at("s", cutoff - Duration::days(10), false)).unwrap();
        let at_cutoff = db.append_log(&log_at("s", cutoff, true)).unwrap();
        let newer = db.append_log(&log_at("s", cutoff + Duration::days(1), true)).unwrap();

        assert_eq!(db.purge_logs_before(cutoff).unwrap(), 2);
        let mut left: Vec<i64> = db.find_logs(None).unwrap().iter().map(|l| l.log_id).collect();
        left.sort_unstable();
        assert_eq!(left, vec![at_cutoff, newer]);
    }

    #[test]
    fn test_purge_by_ids_and_all() {
        let db = SchedulerDb::open_in_memory().unwrap();
        let now = Utc::now();
        let a = db.append_log(&log_at("s", now, true)).unwrap();
        let b = db.append_log(&log_at("s", now, true)).unwrap();
        db.append_log(&log_at("s", now, true)).unwrap();

        assert_eq!(db.purge_logs_by_ids(&[a, b, 4242]).unwrap(), 2);
        assert_eq!(db.find_logs(None).unwrap().len(), 1);
        assert_eq!(db.purge_all_logs().unwrap(), 1);
        assert_eq!(db.purge_all_logs().unwrap(), 0);
        assert_eq!(db.purge_logs_before(now).unwrap(), 0);
    }
}
