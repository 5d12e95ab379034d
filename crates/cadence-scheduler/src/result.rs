//! Execution results and the notification variables they carry.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of the task implementation that ran.
pub const VAR_TASK_NAME: &str = "$sys.taskName";
/// `true` / `false`.
pub const VAR_COMPLETED: &str = "$sys.completed";
/// Failure message, empty on success.
pub const VAR_PROBLEM_DESC: &str = "$sys.problemDesc";
/// Start of the run, RFC 3339.
pub const VAR_EXECUTION_DATETIME: &str = "$sys.executionDatetime";
/// Run duration in milliseconds.
pub const VAR_EXECUTION_ELAPSED_TIME: &str = "$sys.executionElapsedTime";

/// Outcome of one task run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    /// Primary failure message. Usually None on success.
    pub message: Option<String>,
    /// Notification variable name → value.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

impl ExecutionResult {
    pub fn success() -> Self {
        Self {
            success: true,
            message: None,
            variables: BTreeMap::new(),
        }
    }

    pub fn success_with(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::success()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            variables: BTreeMap::new(),
        }
    }

    /// Attach a task-specific notification variable.
    pub fn with_variable(mut self, key: &str, value: impl Into<String>) -> Self {
        self.variables.insert(key.to_string(), value.into());
        self
    }

    /// Message as stored in the execution log; never empty on failure.
    pub fn log_message(&self) -> String {
        match (&self.message, self.success) {
            (Some(m), _) if !m.is_empty() => m.clone(),
            (_, true) => "Completed".to_string(),
            (_, false) => "Failed".to_string(),
        }
    }

    /// Add the framework-injected variables and re-expose the input parameters.
    ///
    /// Parameters are prefixed with `$` unless they already are. Variables the
    /// task set itself are kept, except the `$sys.*` keys owned by the framework.
    pub fn with_system_variables(
        mut self,
        task_name: &str,
        params: &BTreeMap<String, String>,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Self {
        for (key, value) in params {
            let key = if key.starts_with('$') {
                key.clone()
            } else {
                format!("${key}")
            };
            self.variables.entry(key).or_insert_with(|| value.clone());
        }

        let elapsed_ms = (ended_at - started_at).num_milliseconds().max(0);
        let problem = if self.success {
            String::new()
        } else {
            self.log_message()
        };
        self.variables.insert(VAR_TASK_NAME.into(), task_name.to_string());
        self.variables.insert(VAR_COMPLETED.into(), self.success.to_string());
        self.variables.insert(VAR_PROBLEM_DESC.into(), problem);
        self.variables.insert(VAR_EXECUTION_DATETIME.into(), started_at.to_rfc3339());
        self.variables.insert(VAR_EXECUTION_ELAPSED_TIME.into(), elapsed_ms.to_string());
        self
    }
}
