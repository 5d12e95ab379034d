//! Run Command task — execute an external command through the system shell.
//!
//! Parameters: `command` (required), `timeout_secs` (default 300).
//! Exit status 0 is success. Output is exposed as `$sys.commandOutput`.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use cadence_scheduler::{ExecutionResult, Task};

pub const PARAM_COMMAND: &str = "command";
pub const PARAM_TIMEOUT_SECS: &str = "timeout_secs";
pub const VAR_COMMAND_OUTPUT: &str = "$sys.commandOutput";
pub const VAR_EXIT_CODE: &str = "$sys.exitCode";

const DEFAULT_TIMEOUT_SECS: u64 = 300;
const MAX_OUTPUT_BYTES: usize = 8000;

#[derive(Debug, Default)]
pub struct RunCommandTask;

impl RunCommandTask {
    pub fn new() -> Self {
        Self
    }
}

fn shell_command(command: &str) -> tokio::process::Command {
    if cfg!(windows) {
        let mut cmd = tokio::process::Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    } else {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...\n[truncated, {} bytes total]", &text[..end], text.len())
}

#[async_trait]
impl Task for RunCommandTask {
    async fn perform(&self, params: &BTreeMap<String, String>) -> anyhow::Result<ExecutionResult> {
        let command = params
            .get(PARAM_COMMAND)
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .context("Missing 'command' parameter")?;
        let timeout = match params.get(PARAM_TIMEOUT_SECS) {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("Invalid '{PARAM_TIMEOUT_SECS}': {raw}"))?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        tracing::debug!("🖥️ Running command: {command}");
        let started = std::time::Instant::now();
        let output = tokio::time::timeout(
            Duration::from_secs(timeout),
            shell_command(command).kill_on_drop(true).output(),
        )
        .await
        .map_err(|_| anyhow::anyhow!("⏰ Command timed out after {timeout}s: {command}"))?
        .with_context(|| format!("Failed to start command: {command}"))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut combined = stdout.trim_end().to_string();
        if !stderr.trim().is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(stderr.trim_end());
        }
        let combined = truncate(&combined, MAX_OUTPUT_BYTES);
        let exit_code = output.status.code().unwrap_or(-1);

        let summary = format!(
            "Exit: {exit_code} | Time: {:.1}s",
            started.elapsed().as_secs_f64()
        );
        let result = if output.status.success() {
            ExecutionResult::success_with(summary)
        } else {
            let detail = stderr.trim();
            if detail.is_empty() {
                ExecutionResult::failure(summary)
            } else {
                ExecutionResult::failure(format!("{summary} | {}", truncate(detail, 500)))
            }
        };
        Ok(result
            .with_variable(VAR_COMMAND_OUTPUT, combined)
            .with_variable(VAR_EXIT_CODE, exit_code.to_string()))
    }
}
