//! # Cadence — cron-driven task scheduler
//!
//! Usage:
//!   cadence serve                                   # Run the timer engine until Ctrl-C
//!   cadence add --name nightly --task run_command --cron "0 0 2 * * ?" --param command="backup.sh"
//!   cadence list                                    # Stored schedules with next fire time
//!   cadence run <id>                                # Execute now and print the outcome
//!   cadence logs --schedule <id>                    # Execution history, newest first
//!   cadence purge-logs --days 30                    # Drop old execution logs

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cadence_core::CadenceConfig;
use cadence_scheduler::{
    ConfigDirectory, DispatcherConfig, ExecutionAdapter, ExecutionLogStore, FireKind, NotificationDispatcher, NotifyPolicy,
    Schedule, SchedulerDb, SchedulerEngine, ServerIdentity, TaskRegistry, transport_from_config,
};
use cadence_tasks::BuiltinTasks;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cadence", version, about = "⏱️ Cadence — cron-driven task scheduler")]
struct Cli {
    /// Config file (default: ~/.cadence/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Arm every stored schedule and fire triggers until interrupted
    Serve,
    /// List stored schedules
    List,
    /// Show one schedule
    Show { id: String },
    /// Create a schedule
    Add {
        #[arg(long)]
        name: String,
        /// Registered task name (see `cadence tasks`)
        #[arg(long)]
        task: String,
        /// SEC MIN HOUR DOM MON DOW [YEAR]
        #[arg(long)]
        cron: String,
        /// Task parameter, repeatable: --param key=value
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
        /// Only run on this server (host or host:port)
        #[arg(long)]
        server: Option<String>,
        /// NEVER, ALWAYS or ON_FAILURE
        #[arg(long, default_value = "NEVER")]
        notify: NotifyPolicy,
        /// Notification template id
        #[arg(long)]
        template: Option<String>,
        /// Comma-separated recipients
        #[arg(long)]
        emails: Option<String>,
        /// Notify every member of this role
        #[arg(long)]
        role: Option<String>,
    },
    /// Delete a schedule
    Delete { id: String },
    /// Run a schedule now and wait for the outcome
    Run {
        id: String,
        /// Give up waiting after this many seconds
        #[arg(long, default_value = "300")]
        timeout: u64,
    },
    /// Show execution logs, newest first
    Logs {
        /// Only this schedule
        #[arg(long)]
        schedule: Option<String>,
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Delete execution logs
    PurgeLogs {
        /// Delete entries that ended more than N days ago
        #[arg(long, conflicts_with = "all", required_unless_present = "all")]
        days: Option<u32>,
        /// Delete every entry
        #[arg(long)]
        all: bool,
    },
    /// List registered task names
    Tasks,
}

fn parse_param(raw: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

struct App {
    config: CadenceConfig,
    db: Arc<SchedulerDb>,
    engine: SchedulerEngine,
}

fn build(config: CadenceConfig) -> Result<App> {
    let db_path = config.scheduler.expanded_db_path();
    let db = Arc::new(
        SchedulerDb::open(&db_path).with_context(|| format!("Failed to open {}", db_path.display()))?,
    );

    let mut registry = TaskRegistry::new();
    BuiltinTasks::new(db.clone()).register(&mut registry);

    let directory = Arc::new(ConfigDirectory::from_config(&config.notify));
    let dispatcher = NotificationDispatcher::new(
        DispatcherConfig::from(&config.notify),
        directory.clone(),
        directory,
        Arc::from(transport_from_config(&config.notify)),
    );
    let server = ServerIdentity::new(&config.scheduler.server_name, config.scheduler.listen_port);
    let adapter = Arc::new(ExecutionAdapter::new(registry, db.clone(), Arc::new(dispatcher), server));
    let engine = SchedulerEngine::new(
        db.clone(),
        adapter,
        &config.scheduler.job_group,
        Duration::from_millis(config.scheduler.tick_interval_ms.max(10)),
    );
    Ok(App { config, db, engine })
}

fn next_fire(schedule: &Schedule) -> String {
    cadence_scheduler::cron::parse(&schedule.cron_spec)
        .ok()
        .and_then(|c| cadence_scheduler::cron::next_fire_after(&c, Utc::now()))
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string())
}

fn print_schedule(schedule: &Schedule) {
    println!("🆔 {}", schedule.id);
    println!("   Name:     {}", schedule.name);
    println!("   Task:     {}", schedule.task_name);
    println!("   Cron:     {}", schedule.cron_spec);
    println!("   Next:     {}", next_fire(schedule));
    println!("   Server:   {}", schedule.server.as_deref().unwrap_or("(any)"));
    println!("   Notify:   {}", schedule.notify);
    if let Some(template) = &schedule.notify_template {
        println!("   Template: {template}");
    }
    if let Some(role) = &schedule.notify_role {
        println!("   Role:     {role}");
    }
    if let Some(emails) = &schedule.email_addresses {
        println!("   Emails:   {emails}");
    }
    for (key, value) in &schedule.params {
        println!("   Param:    {key}={value}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "cadence=debug,cadence_scheduler=debug,cadence_tasks=debug"
    } else {
        "cadence=info,cadence_scheduler=info,cadence_tasks=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => CadenceConfig::load_from(path)?,
        None => CadenceConfig::load()?,
    };
    let app = build(config)?;

    match cli.command {
        Commands::Serve => {
            println!("⏱️ Cadence v{}", env!("CARGO_PKG_VERSION"));
            println!("   Server:   {}:{}", app.config.scheduler.server_name, app.config.scheduler.listen_port);
            println!("   Database: {}", app.config.scheduler.expanded_db_path().display());
            println!("   Tasks:    {}", app.engine.adapter().registry().names().join(", "));
            app.engine.start()?;
            tokio::signal::ctrl_c().await?;
            println!("\n👋 Shutting down...");
            app.engine.shutdown();
        }
        Commands::List => {
            let schedules = app.engine.find_all_schedules()?;
            if schedules.is_empty() {
                println!("📭 No schedules.");
            }
            for s in &schedules {
                println!("{}  {:<24} {:<22} {:<18} next: {}", s.id, s.name, s.task_name, s.cron_spec, next_fire(s));
            }
        }
        Commands::Show { id } => match app.engine.find_scheduled_task_by_id(&id)? {
            Some(schedule) => {
                print_schedule(&schedule);
                if let Some(last) = app.engine.last_fire_time(&id)? {
                    println!("   Last:     {}", last.format("%Y-%m-%d %H:%M:%S UTC"));
                }
            }
            None => anyhow::bail!("No schedule with id {id}"),
        },
        Commands::Add {
            name,
            task,
            cron,
            params,
            server,
            notify,
            template,
            emails,
            role,
        } => {
            let registry = app.engine.adapter().registry();
            if !registry.contains(&task) {
                tracing::warn!("⚠️ Task '{task}' is not registered here; known tasks: {}", registry.names().join(", "));
            }
            let mut schedule = app.engine.create_schedule();
            schedule.name = name;
            schedule.task_name = task;
            schedule.cron_spec = cron;
            schedule.params = params.into_iter().collect();
            schedule.server = server;
            schedule.notify = notify;
            schedule.notify_template = template;
            schedule.email_addresses = emails;
            schedule.notify_role = role;
            app.engine.save_schedule(&schedule).await?;
            println!("✅ Schedule saved");
            print_schedule(&schedule);
        }
        Commands::Delete { id } => {
            app.engine.delete_schedule(&id).await?;
            println!("🗑️ Deleted {id}");
        }
        Commands::Run { id, timeout } => {
            let schedule = app
                .engine
                .find_scheduled_task_by_id(&id)?
                .with_context(|| format!("No schedule with id {id}"))?;
            // Executed inline rather than through run_now so this process never
            // arms triggers that a running `serve` already owns.
            let run = app.engine.adapter().execute(&schedule, FireKind::Manual);
            match tokio::time::timeout(Duration::from_secs(timeout), run).await {
                Ok(Some(outcome)) => {
                    let icon = if outcome.result.success { "✅" } else { "❌" };
                    println!("{icon} {} — {}", schedule.name, outcome.result.log_message());
                    for (key, value) in &outcome.result.variables {
                        println!("   {key} = {value}");
                    }
                    if !outcome.result.success {
                        std::process::exit(1);
                    }
                }
                Ok(None) => anyhow::bail!("Run of {id} was skipped"),
                Err(_) => anyhow::bail!("Run of {id} did not finish within {timeout}s"),
            }
        }
        Commands::Logs { schedule, limit } => {
            let logs = app.db.find_logs(schedule.as_deref())?;
            if logs.is_empty() {
                println!("📭 No execution logs.");
            }
            for log in logs.iter().take(limit) {
                let icon = if log.success { "✅" } else { "❌" };
                println!(
                    "{icon} #{:<6} {}  {}  {:>6}ms  {}  {}",
                    log.log_id,
                    log.start_time.format("%Y-%m-%d %H:%M:%S"),
                    log.schedule_id,
                    (log.end_time - log.start_time).num_milliseconds(),
                    log.server,
                    log.message
                );
            }
        }
        Commands::PurgeLogs { days, all } => {
            let removed = if all {
                app.db.purge_all_logs()?
            } else {
                let days = days.unwrap_or(cadence_tasks::purge::DEFAULT_RETENTION_DAYS);
                app.db.purge_logs_before(cadence_tasks::purge::cutoff(Utc::now(), days))?
            };
            println!("🧹 Purged {removed} execution log entries");
        }
        Commands::Tasks => {
            for name in app.engine.adapter().registry().names() {
                println!("🧩 {name}");
            }
        }
    }

    Ok(())
}
