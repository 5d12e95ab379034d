//! Cadence configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CadenceError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CadenceConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

impl CadenceConfig {
    /// Load config from the default path (~/.cadence/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CadenceError::Config(format!("Failed to read config: {e}")))?;
        Self::parse(&content)
    }

    /// Parse config from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| CadenceError::Config(format!("Failed to parse config: {e}")))
    }

    /// Save config to the given path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| CadenceError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Cadence home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".cadence")
    }
}

/// Timer engine and trigger store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Name this process answers to when a schedule targets a server.
    #[serde(default = "default_server_name")]
    pub server_name: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_job_group")]
    pub job_group: String,
}

fn default_db_path() -> String { "~/.cadence/scheduler.db".into() }
fn default_server_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".into())
}
fn default_listen_port() -> u16 { 9992 }
fn default_tick_interval_ms() -> u64 { 1000 }
fn default_job_group() -> String { "cadence".into() }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            server_name: default_server_name(),
            listen_port: default_listen_port(),
            tick_interval_ms: default_tick_interval_ms(),
            job_group: default_job_group(),
        }
    }
}

impl SchedulerConfig {
    /// Database path with `~` expanded.
    pub fn expanded_db_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.db_path).to_string())
    }
}

/// Notification dispatcher configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Global administrative switch. When false no notification is ever sent.
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Appended (as `@domain`) to recipient addresses that lack an `@`.
    #[serde(default)]
    pub mail_domain: String,
    #[serde(default = "default_from_address")]
    pub from_address: String,
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
    #[serde(default)]
    pub templates: Vec<TemplateConfig>,
    #[serde(default)]
    pub roles: Vec<RoleConfig>,
}

fn bool_true() -> bool { true }
fn default_from_address() -> String { "scheduler@localhost".into() }

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mail_domain: String::new(),
            from_address: default_from_address(),
            smtp: None,
            templates: Vec::new(),
            roles: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

fn default_smtp_port() -> u16 { 587 }

/// A notification template: subject expression plus body text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    pub id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
}

/// A role whose members can be notified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleConfig {
    pub name: String,
    #[serde(default)]
    pub members: Vec<RoleMemberConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleMemberConfig {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CadenceConfig::default();
        assert_eq!(config.scheduler.listen_port, 9992);
        assert_eq!(config.scheduler.tick_interval_ms, 1000);
        assert_eq!(config.scheduler.job_group, "cadence");
        assert!(config.notify.enabled);
        assert!(config.notify.smtp.is_none());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [scheduler]
            server_name = "node-a"
            listen_port = 9443

            [notify]
            enabled = false
            mail_domain = "example.com"

            [notify.smtp]
            host = "smtp.example.com"

            [[notify.templates]]
            id = "default"
            subject = "{{$sys.taskName}}"
            body = "done"

            [[notify.roles]]
            name = "Admin"
            members = [{ name = "admin", email = "admin" }, { name = "guest" }]
        "#;

        let config = CadenceConfig::parse(toml_str).unwrap();
        assert_eq!(config.scheduler.server_name, "node-a");
        assert_eq!(config.scheduler.listen_port, 9443);
        assert!(!config.notify.enabled);
        assert_eq!(config.notify.mail_domain, "example.com");
        assert_eq!(config.notify.smtp.as_ref().unwrap().port, 587);
        assert_eq!(config.notify.templates[0].id, "default");
        assert_eq!(config.notify.roles[0].members.len(), 2);
        assert!(config.notify.roles[0].members[1].email.is_none());
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let config = CadenceConfig::parse("").unwrap();
        assert_eq!(config.scheduler.db_path, "~/.cadence/scheduler.db");
        assert_eq!(config.notify.from_address, "scheduler@localhost");
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = CadenceConfig::parse("[scheduler\nport = ").unwrap_err();
        assert!(matches!(err, CadenceError::Config(_)));
    }

    #[test]
    fn test_home_dir() {
        let home = CadenceConfig::home_dir();
        assert!(home.to_string_lossy().contains("cadence"));
    }

    #[test]
    fn test_db_path_is_tilde_expanded() {
        let config = SchedulerConfig::default();
        assert!(!config.expanded_db_path().to_string_lossy().starts_with('~'));
    }
}
