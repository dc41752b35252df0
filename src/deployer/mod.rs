/// Deployer workflows: build, up, down and kubeconfig lookup
pub mod credentials;
pub mod provision;
pub mod teardown;

#[cfg(test)]
pub(crate) mod fake;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::azure::{CredentialKind, ManagementApi};
use crate::build::{BuildRequest, ImageBuilder, ImageTag};
use crate::config::Settings;
use crate::utils::command::CommandRunner;

pub use self::credentials::CredentialPoller;
pub use self::provision::{ClusterProvisioner, ClusterTemplates, ProvisioningRequest};
pub use self::teardown::Teardown;

/// Inputs of one `up` run
#[derive(Debug, Clone)]
pub struct UpOptions {
    pub cluster_name: String,
    /// Overrides the configured location
    pub location: Option<String>,
    /// Outer cluster template
    pub config_path: PathBuf,
    /// Inner custom configuration template
    pub custom_config_path: PathBuf,
    /// Tag of previously pushed images; ignored when `build` is set
    pub ccm_image_tag: Option<String>,
    pub kubernetes_version: Option<String>,
    pub credential_kind: CredentialKind,
    /// Build images first and use their tag
    pub build: Option<BuildRequest>,
}

/// Build and push images, returning their tag
pub async fn build(
    runner: &dyn CommandRunner,
    settings: &Settings,
    request: &BuildRequest,
) -> Result<ImageTag> {
    ImageBuilder::new(runner, settings)
        .build(request)
        .await
        .context("Failed to build images")
}

/// Provision the cluster and write its kubeconfig, returning the kubeconfig path
///
/// Settings, flags and templates are all checked before anything is built or
/// any cloud call is made.
pub async fn up(
    api: &dyn ManagementApi,
    runner: &dyn CommandRunner,
    settings: &Settings,
    options: &UpOptions,
) -> Result<PathBuf> {
    if options.cluster_name.is_empty() {
        anyhow::bail!("cluster name cannot be empty");
    }
    if options.build.is_none() && options.ccm_image_tag.is_none() {
        anyhow::bail!("either a build target or a CCM image tag is required");
    }

    let identity = settings.identity()?;
    let resource_group = settings.resource_group()?;
    let location = settings.location(options.location.as_deref())?;
    let registry = settings.image_registry()?;
    let templates =
        ClusterTemplates::load(&options.config_path, &options.custom_config_path).await?;

    let image_tag = match &options.build {
        Some(request) => {
            if options.ccm_image_tag.is_some() {
                warn!("Ignoring the CCM image tag flag; using the tag of the images built now");
            }
            build(runner, settings, request).await?
        }
        None => ImageTag::new(options.ccm_image_tag.clone().unwrap_or_default()),
    };

    let (ccm_image, cnm_image) = ProvisioningRequest::image_references(&registry, &image_tag);
    info!("Using images {} and {}", ccm_image, cnm_image);

    let request = ProvisioningRequest {
        cluster_name: options.cluster_name.clone(),
        location,
        resource_group,
        subscription_id: identity.subscription_id,
        client_id: identity.client_id,
        client_secret: identity.client_secret,
        kubernetes_version: options.kubernetes_version.clone(),
        ccm_image,
        cnm_image,
    };

    let token = ClusterProvisioner::new(api)
        .provision(&request, &templates)
        .await?;

    CredentialPoller::new(api, settings, options.credential_kind)
        .fetch_kubeconfig(&token, &request.cluster())
        .await
        .context("Failed to get AKS cluster kubeconfig")
}

/// Delete the configured resource group and everything in it
pub async fn down(api: &dyn ManagementApi, settings: &Settings) -> Result<()> {
    let resource_group = settings.resource_group()?;
    Teardown::new(api, settings)
        .delete_resource_group(&resource_group)
        .await
}

/// Kubeconfig a test harness should use: explicit flag, then `$KUBECONFIG`, then `~/.kube/config`
pub fn kubeconfig_location(
    flag: Option<&Path>,
    env_kubeconfig: Option<String>,
    home: Option<String>,
) -> Result<PathBuf> {
    if let Some(path) = flag.filter(|p| !p.as_os_str().is_empty()) {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = env_kubeconfig {
        return Ok(PathBuf::from(path));
    }
    let home = home
        .filter(|h| !h.is_empty())
        .context("Cannot locate a kubeconfig: HOME is not set")?;
    Ok(Path::new(&home).join(".kube").join("config"))
}
