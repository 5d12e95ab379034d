//! # Cadence Scheduler
//!
//! Cron-driven task execution engine. Schedules are persisted, armed as
//! triggers, and every fire runs through one execution adapter that guards
//! against duplicate runs, records an execution log and sends notifications.
//!
//! ## Architecture
//! ```text
//! SchedulerEngine (save / delete / find / run_now)
//!   ├── SchedulerDb      scheduled_jobs + schedules + execution_logs (SQLite)
//!   ├── TimerEngine      tokio interval, one cron trigger per schedule
//!   └── on fire → ExecutionAdapter
//!                   ├── server check + ActiveJobs guard
//!                   ├── TaskRegistry → Task::perform
//!                   ├── ExecutionLogStore::append_log
//!                   └── NotificationDispatcher → SMTP / log
//! ```

pub mod active;
pub mod adapter;
pub mod cron;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod notify;
pub mod persistence;
pub mod registry;
pub mod result;
pub mod schedule;
pub mod task;
pub mod template;
pub mod timer;

pub use active::{ActiveGuard, ActiveJobs};
pub use adapter::{ExecutionAdapter, ExecutionOutcome, FireKind};
pub use dispatch::{LogTransport, MailMessage, NotificationTransport, SmtpTransport, transport_from_config};
pub use engine::{RunHandle, SchedulerEngine};
pub use error::{NotifyError, Result, SchedulerError, SkipReason};
pub use notify::{ConfigDirectory, DispatcherConfig, NotificationDispatcher, RoleDirectory, TemplateStore};
pub use persistence::{ExecutionLogEntry, ExecutionLogStore, NewExecutionLog, SchedulerDb};
pub use registry::TaskRegistry;
pub use result::ExecutionResult;
pub use schedule::{NotifyPolicy, Schedule, ServerIdentity};
pub use task::{Task, TaskContext};
pub use timer::{JobDetail, JobHandler, TimerEngine};
