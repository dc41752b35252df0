/// Resource group deletion
use anyhow::{Context, Result};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

use crate::azure::{AccessToken, DeleteOperation, DeletionStatus, ManagementApi};
use crate::config::Settings;
use crate::utils::polling::{Attempt, PollingConfig};

/// Deletes the resource group holding the cluster and waits for the provider to finish
pub struct Teardown<'a> {
    api: &'a dyn ManagementApi,
    interval: Duration,
    timeout: Duration,
}

impl<'a> Teardown<'a> {
    pub fn new(api: &'a dyn ManagementApi, settings: &Settings) -> Self {
        // zero waits for as long as the provider takes
        let timeout = match settings.polling.deletion_timeout_secs {
            0 => Duration::MAX,
            secs => Duration::from_secs(secs),
        };
        Self {
            api,
            interval: Duration::from_secs(settings.polling.deletion_interval_secs),
            timeout,
        }
    }

    pub async fn delete_resource_group(&self, resource_group: &str) -> Result<()> {
        let token = self
            .api
            .get_token()
            .await
            .context("Failed to get token from credential")?;

        info!("Deleting resource group {}", resource_group);
        let operation = self
            .api
            .begin_delete_resource_group(&token, resource_group)
            .await
            .with_context(|| format!("Failed to delete resource group {:?}", resource_group))?;

        if operation != DeleteOperation::Completed {
            self.wait(token, &operation, resource_group).await?;
        }

        info!("Resource group {} deleted", resource_group);
        Ok(())
    }

    async fn wait(
        &self,
        token: AccessToken,
        operation: &DeleteOperation,
        resource_group: &str,
    ) -> Result<()> {
        let polling = PollingConfig::new(
            self.timeout,
            self.interval,
            format!("Waiting for deletion of resource group {}", resource_group),
        );
        let api = self.api;
        let token = Mutex::new(token);
        let token = &token;

        polling
            .poll_attempts(|| async move {
                let mut token = token.lock().await;
                // deletions can outlive a single token
                if token.is_expired() {
                    *token = api
                        .get_token()
                        .await
                        .context("Failed to refresh token")?;
                }

                let status = api
                    .deletion_status(&token, operation)
                    .await
                    .with_context(|| {
                        format!("Deletion of resource group {:?} failed", resource_group)
                    })?;
                Ok(match status {
                    DeletionStatus::Finished => Attempt::Ready(()),
                    DeletionStatus::Pending { retry_after: None } => Attempt::Pending,
                    DeletionStatus::Pending {
                        retry_after: Some(delay),
                    } => Attempt::RetryAfter(delay),
                })
            })
            .await
    }
}
