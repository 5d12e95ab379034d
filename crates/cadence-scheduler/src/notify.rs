//! Notification dispatcher — decides whether a finished run warrants a
//! notification, resolves recipients, renders the template and sends.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use cadence_core::config::NotifyConfig;

use crate::dispatch::{MailMessage, NotificationTransport};
use crate::error::NotifyError;
use crate::result::ExecutionResult;
use crate::schedule::Schedule;
use crate::template;

/// A member of a notify role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleMember {
    pub name: String,
    pub email: Option<String>,
}

/// Looks up role membership.
pub trait RoleDirectory: Send + Sync {
    fn members(&self, role: &str) -> Vec<RoleMember>;
}

/// A subject expression plus body template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationTemplate {
    pub id: String,
    pub subject: String,
    pub body: String,
}

/// Read-only access to notification templates.
pub trait TemplateStore: Send + Sync {
    fn find_template(&self, id: &str) -> Option<NotificationTemplate>;
}

/// Roles and templates declared in the configuration file.
#[derive(Debug, Clone, Default)]
pub struct ConfigDirectory {
    roles: HashMap<String, Vec<RoleMember>>,
    templates: HashMap<String, NotificationTemplate>,
}

impl ConfigDirectory {
    pub fn from_config(config: &NotifyConfig) -> Self {
        let roles = config
            .roles
            .iter()
            .map(|r| {
                let members = r
                    .members
                    .iter()
                    .map(|m| RoleMember {
                        name: m.name.clone(),
                        email: m.email.clone(),
                    })
                    .collect();
                (r.name.clone(), members)
            })
            .collect();
        let templates = config
            .templates
            .iter()
            .map(|t| {
                let template = NotificationTemplate {
                    id: t.id.clone(),
                    subject: t.subject.clone(),
                    body: t.body.clone(),
                };
                (t.id.clone(), template)
            })
            .collect();
        Self { roles, templates }
    }

    pub fn add_role(&mut self, name: &str, members: Vec<RoleMember>) {
        self.roles.insert(name.to_string(), members);
    }

    pub fn add_template(&mut self, template: NotificationTemplate) {
        self.templates.insert(template.id.clone(), template);
    }
}

impl RoleDirectory for ConfigDirectory {
    fn members(&self, role: &str) -> Vec<RoleMember> {
        self.roles.get(role).cloned().unwrap_or_default()
    }
}

impl TemplateStore for ConfigDirectory {
    fn find_template(&self, id: &str) -> Option<NotificationTemplate> {
        self.templates.get(id).cloned()
    }
}

/// Dispatcher settings, loaded once at startup.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub enabled: bool,
    pub mail_domain: String,
    pub from_address: String,
}

impl From<&NotifyConfig> for DispatcherConfig {
    fn from(config: &NotifyConfig) -> Self {
        Self {
            enabled: config.enabled,
            mail_domain: config.mail_domain.clone(),
            from_address: config.from_address.clone(),
        }
    }
}

pub struct NotificationDispatcher {
    config: DispatcherConfig,
    roles: Arc<dyn RoleDirectory>,
    templates: Arc<dyn TemplateStore>,
    transport: Arc<dyn NotificationTransport>,
}

impl NotificationDispatcher {
    pub fn new(
        config: DispatcherConfig,
        roles: Arc<dyn RoleDirectory>,
        templates: Arc<dyn TemplateStore>,
        transport: Arc<dyn NotificationTransport>,
    ) -> Self {
        Self {
            config,
            roles,
            templates,
            transport,
        }
    }

    pub fn should_notify(&self, schedule: &Schedule, success: bool) -> bool {
        self.config.enabled && schedule.notify.should_notify(success)
    }

    /// Append the configured mail domain to an address with no `@`.
    pub fn normalize_address(&self, address: &str) -> String {
        let address = address.trim();
        if address.contains('@') || self.config.mail_domain.is_empty() {
            address.to_string()
        } else {
            format!("{address}@{}", self.config.mail_domain.trim_start_matches('@'))
        }
    }

    /// Role members with an email plus the explicit address list, normalized and de-duplicated.
    pub fn resolve_recipients(&self, schedule: &Schedule) -> Result<Vec<String>, NotifyError> {
        let mut recipients: Vec<String> = Vec::new();
        let mut push = |addr: String| {
            if !addr.is_empty() && !recipients.iter().any(|r| r.eq_ignore_ascii_case(&addr)) {
                recipients.push(addr);
            }
        };

        if let Some(role) = schedule.notify_role.as_deref().filter(|r| !r.trim().is_empty()) {
            for member in self.roles.members(role.trim()) {
                if let Some(email) = member.email.as_deref().filter(|e| !e.trim().is_empty()) {
                    push(self.normalize_address(email));
                }
            }
        }
        if let Some(list) = &schedule.email_addresses {
            for addr in list.split(',') {
                push(self.normalize_address(addr));
            }
        }

        if recipients.is_empty() {
            return Err(NotifyError::NoNotificationTarget);
        }
        Ok(recipients)
    }

    /// Evaluate subject and body against the run's variables.
    ///
    /// A subject that fails to evaluate degrades to an empty string. A body
    /// that fails to render is an error.
    pub fn render(
        &self,
        template: &NotificationTemplate,
        schedule: &Schedule,
        result: &ExecutionResult,
    ) -> Result<(String, String), NotifyError> {
        let mut vars: BTreeMap<String, String> = result.variables.clone();
        vars.insert("taskName".into(), schedule.task_name.clone());
        vars.insert("scheduleName".into(), schedule.name.clone());

        let subject = template::render(&template.subject, &vars, true).unwrap_or_else(|e| {
            tracing::error!("❌ Notification subject for '{}' failed to evaluate: {e}", schedule.name);
            String::new()
        });
        if template.body.trim().is_empty() {
            return Err(NotifyError::Render(format!("template '{}' has an empty body", template.id)));
        }
        let body = template::render(&template.body, &vars, false)?;
        Ok((subject, body))
    }

    /// Notify about a finished run if the schedule's policy asks for it.
    /// Returns whether a message was handed to the transport.
    pub async fn notify(&self, schedule: &Schedule, result: &ExecutionResult) -> Result<bool, NotifyError> {
        if !self.should_notify(schedule, result.success) {
            return Ok(false);
        }

        let template_id = schedule.notify_template.as_deref().unwrap_or_default();
        let template = self
            .templates
            .find_template(template_id)
            .ok_or_else(|| NotifyError::TemplateNotFound(template_id.to_string()))?;
        let to = self.resolve_recipients(schedule)?;
        let (subject, body) = self.render(&template, schedule, result)?;

        let message = MailMessage {
            from: self.config.from_address.clone(),
            to,
            subject,
            body,
        };
        self.transport.send(&message).await?;
        tracing::debug!("📨 Notification sent for '{}'", schedule.name);
        Ok(true)
    }
}
