/// Waiting for cluster credentials and persisting the kubeconfig
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::azure::{AccessToken, ClusterRef, CredentialKind, ManagementApi};
use crate::config::Settings;
use crate::utils::polling::PollingConfig;

/// Polls the credential endpoint until the new cluster hands out a kubeconfig
pub struct CredentialPoller<'a> {
    api: &'a dyn ManagementApi,
    kind: CredentialKind,
    interval: Duration,
    timeout: Duration,
    output_dir: PathBuf,
}

impl<'a> CredentialPoller<'a> {
    pub fn new(api: &'a dyn ManagementApi, settings: &Settings, kind: CredentialKind) -> Self {
        Self {
            api,
            kind,
            interval: Duration::from_secs(settings.polling.credential_interval_secs),
            timeout: Duration::from_secs(settings.polling.credential_timeout_secs),
            output_dir: settings.kubeconfig_dir.clone(),
        }
    }

    /// Fetch the first kubeconfig of `cluster` and write it under the output directory
    ///
    /// 404 responses are retried until the timeout; anything else stops at once.
    pub async fn fetch_kubeconfig(
        &self,
        token: &AccessToken,
        cluster: &ClusterRef,
    ) -> Result<PathBuf> {
        let polling = PollingConfig::new(
            self.timeout,
            self.interval,
            format!("Waiting for credentials of cluster {:?}", cluster.name),
        );
        let api = self.api;
        let kind = self.kind;

        let results = polling
            .poll(|| async move {
                match api.list_cluster_credentials(token, cluster, kind).await {
                    Ok(results) => Ok(Some(results)),
                    Err(e) if e.is_not_found() => {
                        info!("Cluster credentials are not available yet, retrying");
                        Ok(None)
                    }
                    Err(e) => Err(anyhow::Error::new(e).context(format!(
                        "Failed to list cluster credentials with resource group name {:?}, cluster {:?}",
                        cluster.resource_group, cluster.name
                    ))),
                }
            })
            .await?;

        let kubeconfig = results
            .kubeconfigs
            .into_iter()
            .next()
            .context("Failed to find a valid kubeconfig")?;

        let dest = self
            .output_dir
            .join(format!("{}_{}.kubeconfig", cluster.resource_group, cluster.name));
        write_kubeconfig(&dest, &kubeconfig.value).await?;

        info!(
            "Succeeded in getting kubeconfig of cluster {:?} in resource group {:?}",
            cluster.name, cluster.resource_group
        );
        Ok(dest)
    }
}

/// Write `contents` to `dest` through a temporary sibling so `dest` never holds a partial file
pub async fn write_kubeconfig(dest: &Path, contents: &[u8]) -> Result<()> {
    let dir = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create kubeconfig directory {}", dir.display()))?;

    let tmp = dest.with_extension("kubeconfig.tmp");
    if let Err(e) = tokio::fs::write(&tmp, contents).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e).with_context(|| format!("Failed to write kubeconfig to {}", dest.display()));
    }
    if let Err(e) = tokio::fs::rename(&tmp, dest).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e)
            .with_context(|| format!("Failed to move kubeconfig into place at {}", dest.display()));
    }

    info!("Kubeconfig written to {}", dest.display());
    Ok(())
}
