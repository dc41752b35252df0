/// Cluster provisioning: resource group, payload rendering and the creation request
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::Path;
use tracing::{info, warn};

use crate::azure::{AccessToken, ClusterRef, ManagementApi};
use crate::build::ImageTag;
use crate::template::{Substitutions, Template};

/// Everything needed to create one cluster, fixed for the whole `up` run
#[derive(Debug, Clone)]
pub struct ProvisioningRequest {
    pub cluster_name: String,
    pub location: String,
    pub resource_group: String,
    pub subscription_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub kubernetes_version: Option<String>,
    pub ccm_image: String,
    pub cnm_image: String,
}

impl ProvisioningRequest {
    /// Image references for the controller-manager and node-manager built at `tag`
    pub fn image_references(registry: &str, tag: &ImageTag) -> (String, String) {
        (
            format!("{}/azure-cloud-controller-manager:{}", registry, tag),
            format!("{}/azure-cloud-node-manager:{}-linux-amd64", registry, tag),
        )
    }

    pub fn cluster(&self) -> ClusterRef {
        ClusterRef::new(&self.subscription_id, &self.resource_group, &self.cluster_name)
    }
}

/// The outer cluster template and the inner custom configuration template
#[derive(Debug, Clone)]
pub struct ClusterTemplates {
    pub cluster: Template,
    pub custom_config: Template,
}

impl ClusterTemplates {
    pub async fn load(cluster_path: &Path, custom_config_path: &Path) -> Result<Self> {
        Ok(Self {
            cluster: Template::from_file(cluster_path).await?,
            custom_config: Template::from_file(custom_config_path).await?,
        })
    }

    /// Render the custom configuration, base64 it into the cluster template, and
    /// render the cluster template
    pub fn render(&self, request: &ProvisioningRequest) -> Result<String> {
        let custom_config = self
            .custom_config
            .render_strict(
                &Substitutions::new()
                    .with("CUSTOM_CCM_IMAGE", &request.ccm_image)
                    .with("CUSTOM_CNM_IMAGE", &request.cnm_image),
            )
            .context("Failed to render custom configuration")?;
        let encoded_custom_config = STANDARD.encode(custom_config.as_bytes());

        let mut values = Substitutions::new()
            .with("AKS_CLUSTER_ID", request.cluster().resource_id())
            .with("CLUSTER_NAME", &request.cluster_name)
            .with("AZURE_LOCATION", &request.location)
            .with("AZURE_CLIENT_ID", &request.client_id)
            .with("AZURE_CLIENT_SECRET", &request.client_secret)
            .with_bare("CUSTOM_CONFIG", encoded_custom_config);
        if let Some(version) = &request.kubernetes_version {
            values = values.with("KUBERNETES_VERSION", version);
        }

        let body = self
            .cluster
            .render_strict(&values)
            .context("Failed to render cluster configuration")?;

        serde_json::from_str::<serde_json::Value>(&body).with_context(|| {
            format!(
                "Rendered cluster configuration from {} is not valid JSON",
                self.cluster.describe()
            )
        })?;

        Ok(body)
    }
}

/// Runs the ordered provisioning steps against the management API
pub struct ClusterProvisioner<'a> {
    api: &'a dyn ManagementApi,
}

impl<'a> ClusterProvisioner<'a> {
    pub fn new(api: &'a dyn ManagementApi) -> Self {
        Self { api }
    }

    /// Token, resource group, render, submit. Returns the token for later steps.
    ///
    /// A resource group created here is left in place if a later step fails.
    pub async fn provision(
        &self,
        request: &ProvisioningRequest,
        templates: &ClusterTemplates,
    ) -> Result<AccessToken> {
        let token = self
            .api
            .get_token()
            .await
            .context("Failed to get token from credential")?;

        let group = self
            .api
            .create_or_update_resource_group(&token, &request.resource_group, &request.location)
            .await
            .with_context(|| {
                format!("Failed to create the resource group {:?}", request.resource_group)
            })?;
        match group.properties.as_ref().and_then(|p| p.provisioning_state.as_deref()) {
            Some("Succeeded") | None => info!("Resource group {} created", group.id),
            Some(state) => warn!("Resource group {} is in provisioning state {}", group.id, state),
        }

        let body = templates.render(request)?;

        let cluster = request.cluster();
        info!("Creating AKS cluster {}", cluster.resource_id());
        self.api
            .create_managed_cluster(&token, &cluster, body)
            .await
            .with_context(|| {
                format!("Failed to create the AKS cluster {:?}", request.cluster_name)
            })?;

        info!(
            "An AKS cluster {:?} in resource group {:?} is created",
            request.cluster_name, request.resource_group
        );
        Ok(token)
    }
}
