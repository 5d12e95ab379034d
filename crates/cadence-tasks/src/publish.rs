//! Publish Edition task — runs a publish through the publishing subsystem and
//! reports its status.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use cadence_scheduler::{ExecutionResult, Task};

pub const PARAM_EDITION_ID: &str = "edition_id";
pub const VAR_EDITION_ID: &str = "$sys.editionId";
pub const VAR_PUBLISH_STATUS: &str = "$sys.publishStatus";

/// Final state of one publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishStatus {
    pub success: bool,
    /// Short status word, e.g. "PUBLISHED" or "PARTIAL".
    pub status: String,
    pub detail: String,
}

#[async_trait]
pub trait EditionPublisher: Send + Sync {
    /// Publish `edition_id` and wait for it to finish.
    async fn publish(&self, edition_id: &str) -> anyhow::Result<PublishStatus>;
}

pub struct PublishEditionTask {
    publisher: Arc<dyn EditionPublisher>,
}

impl PublishEditionTask {
    pub fn new(publisher: Arc<dyn EditionPublisher>) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl Task for PublishEditionTask {
    async fn perform(&self, params: &BTreeMap<String, String>) -> anyhow::Result<ExecutionResult> {
        let edition_id = params
            .get(PARAM_EDITION_ID)
            .map(|id| id.trim())
            .filter(|id| !id.is_empty())
            .context("Missing 'edition_id' parameter")?;

        tracing::info!("📰 Publishing edition {edition_id}");
        let status = self.publisher.publish(edition_id).await?;
        let message = if status.detail.is_empty() {
            format!("Edition {edition_id}: {}", status.status)
        } else {
            format!("Edition {edition_id}: {} ({})", status.status, status.detail)
        };
        let result = if status.success {
            ExecutionResult::success_with(message)
        } else {
            ExecutionResult::failure(message)
        };
        Ok(result
            .with_variable(VAR_EDITION_ID, edition_id)
            .with_variable(VAR_PUBLISH_STATUS, status.status))
    }
}
