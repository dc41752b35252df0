/// Azure Resource Manager data models
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

pub const MANAGED_CLUSTER_API_VERSION: &str = "2022-04-02-preview";
pub const RESOURCE_GROUP_API_VERSION: &str = "2021-04-01";

/// Identifies a managed cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterRef {
    pub subscription_id: String,
    pub resource_group: String,
    pub name: String,
}

impl ClusterRef {
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            name: name.into(),
        }
    }

    /// ARM resource id of the managed cluster
    pub fn resource_id(&self) -> String {
        format!(
            "/subscriptions/{}/resourcegroups/{}/providers/Microsoft.ContainerService/managedClusters/{}",
            self.subscription_id, self.resource_group, self.name
        )
    }
}

/// Which kubeconfig flavour to request from the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CredentialKind {
    Admin,
    User,
}

impl CredentialKind {
    /// ARM action name for this credential kind
    pub fn action(self) -> &'static str {
        match self {
            CredentialKind::Admin => "listClusterAdminCredential",
            CredentialKind::User => "listClusterUserCredential",
        }
    }
}

/// Resource group resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceGroup {
    pub id: String,
    pub name: String,
    pub location: String,
    #[serde(default)]
    pub properties: Option<ResourceGroupProperties>,
}

/// Resource group properties
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceGroupProperties {
    pub provisioning_state: Option<String>,
}

/// Request body for creating or updating a resource group
#[derive(Debug, Serialize)]
pub struct ResourceGroupRequest<'a> {
    pub location: &'a str,
}

/// Response of the list*Credential actions
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialResults {
    #[serde(default)]
    pub kubeconfigs: Vec<CredentialResult>,
}

/// A single named kubeconfig; `value` is base64 on the wire
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialResult {
    pub name: String,
    #[serde(deserialize_with = "decode_base64")]
    pub value: Vec<u8>,
}

fn decode_base64<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let encoded = String::deserialize(deserializer)?;
    STANDARD
        .decode(encoded.as_bytes())
        .map_err(serde::de::Error::custom)
}

/// Error response from Azure Resource Manager
#[derive(Debug, Serialize, Deserialize)]
pub struct CloudErrorResponse {
    pub error: CloudErrorBody,
}

/// ARM error details
#[derive(Debug, Serialize, Deserialize)]
pub struct CloudErrorBody {
    pub code: String,
    pub message: String,
}

/// Azure AD token endpoint response
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: i64,
    #[allow(dead_code)]
    pub token_type: String,
}

/// Azure AD token endpoint error
#[derive(Debug, Deserialize)]
pub struct TokenErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: String,
}

/// State of a resource group deletion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOperation {
    Completed,
    Pending { status_url: String },
}

/// Result of one status check on a pending deletion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionStatus {
    Finished,
    /// Still running; `retry_after` carries the provider's `Retry-After` hint
    Pending { retry_after: Option<Duration> },
}
