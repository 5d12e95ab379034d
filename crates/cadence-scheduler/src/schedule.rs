//! Schedule definitions — the persisted description of scheduled work.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A scheduled task definition.
///
/// Schedules are replaced whole: there is no partial-field update at this
/// layer. Use [`Schedule::new`] to allocate a fresh id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Globally unique schedule id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Name the task implementation is registered under.
    pub task_name: String,
    /// Cron specification (seconds minutes hours day-of-month month day-of-week [year]).
    pub cron_spec: String,
    /// Parameters handed to the task on every run.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Restricts execution to one node (`host` or `host:port`). None = any server.
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub notify: NotifyPolicy,
    #[serde(default)]
    pub notify_template: Option<String>,
    /// Comma-separated explicit recipients.
    #[serde(default)]
    pub email_addresses: Option<String>,
    #[serde(default)]
    pub notify_role: Option<String>,
}

impl Schedule {
    /// Allocate an empty schedule with a fresh unique id.
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: String::new(),
            task_name: String::new(),
            cron_spec: String::new(),
            params: BTreeMap::new(),
            server: None,
            notify: NotifyPolicy::Never,
            notify_template: None,
            email_addresses: None,
            notify_role: None,
        }
    }

    /// Convenience constructor for the common fields.
    pub fn cron(name: &str, task_name: &str, cron_spec: &str) -> Self {
        Self {
            name: name.to_string(),
            task_name: task_name.to_string(),
            cron_spec: cron_spec.to_string(),
            ..Self::new()
        }
    }

    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Self::new()
    }
}

/// When to send a notification about a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotifyPolicy {
    #[default]
    Never,
    Always,
    OnFailure,
}

impl NotifyPolicy {
    /// Whether a run with the given outcome warrants a notification.
    pub fn should_notify(self, success: bool) -> bool {
        match self {
            NotifyPolicy::Never => false,
            NotifyPolicy::Always => true,
            NotifyPolicy::OnFailure => !success,
        }
    }
}

impl fmt::Display for NotifyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyPolicy::Never => write!(f, "NEVER"),
            NotifyPolicy::Always => write!(f, "ALWAYS"),
            NotifyPolicy::OnFailure => write!(f, "ON_FAILURE"),
        }
    }
}

impl FromStr for NotifyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "NEVER" => Ok(NotifyPolicy::Never),
            "ALWAYS" => Ok(NotifyPolicy::Always),
            "ON_FAILURE" => Ok(NotifyPolicy::OnFailure),
            other => Err(format!("unknown notify policy '{other}' (expected NEVER, ALWAYS or ON_FAILURE)")),
        }
    }
}

/// Identity of the process hosting the timer engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdentity {
    pub host: String,
    pub port: u16,
}

impl ServerIdentity {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
        }
    }

    /// Whether a schedule's target server (`host` or `host:port`) names this process.
    /// An absent or blank target matches every server.
    pub fn matches(&self, target: Option<&str>) -> bool {
        let target = match target.map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => return true,
        };
        let (host, port) = match target.rsplit_once(':') {
            Some((h, p)) => match p.parse::<u16>() {
                Ok(port) => (h, Some(port)),
                Err(_) => return false,
            },
            None => (target, None),
        };
        host.eq_ignore_ascii_case(&self.host) && port.is_none_or(|p| p == self.port)
    }
}

impl fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
