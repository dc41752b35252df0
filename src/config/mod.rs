/// Settings for the AKS deployer
///
/// Values come from an optional YAML settings file; anything left unset there
/// is filled from the environment. The result is built once at startup and
/// passed by reference to every workflow step.
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_SUBSCRIPTION_ID: &str = "AZURE_SUBSCRIPTION_ID";
pub const ENV_TENANT_ID: &str = "AZURE_TENANT_ID";
pub const ENV_CLIENT_ID: &str = "AZURE_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "AZURE_CLIENT_SECRET";
pub const ENV_LOCATION: &str = "AZURE_LOCATION";
pub const ENV_RESOURCE_GROUP: &str = "AZURE_RESOURCEGROUP";
pub const ENV_AUTHORITY_HOST: &str = "AZURE_AUTHORITY_HOST";
pub const ENV_RESOURCE_MANAGER_ENDPOINT: &str = "AZURE_RESOURCE_MANAGER_ENDPOINT";
pub const ENV_IMAGE_REGISTRY: &str = "IMAGE_REGISTRY";
pub const ENV_CLOUD_PROVIDER_AZURE_PATH: &str = "CLOUD_PROVIDER_AZURE_PATH";

/// Top-level deployer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Azure identity and placement
    pub azure: AzureSettings,

    /// Container registry the custom images are pushed to and pulled from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_registry: Option<String>,

    /// Local cloud-provider-azure checkout used when no build source is given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_provider_azure_path: Option<PathBuf>,

    /// Directory that receives `<resource group>_<cluster>.kubeconfig`
    pub kubeconfig_dir: PathBuf,

    /// Scratch directory for component clones
    pub git_clone_dir: PathBuf,

    /// Polling intervals and ceilings
    pub polling: PollingSettings,
}

/// Azure identity, subscription and resource placement
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    /// Service principal client id, also substituted into the cluster template
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Service principal secret (prefer the AZURE_CLIENT_SECRET env var)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Default location for the resource group and cluster
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_group: Option<String>,

    /// Azure AD authority (e.g., "https://login.microsoftonline.com")
    pub authority_host: String,

    /// Azure Resource Manager endpoint (e.g., "https://management.azure.com")
    pub resource_manager_endpoint: String,
}

/// Polling configuration for the asynchronous cloud operations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingSettings {
    pub credential_interval_secs: u64,
    pub credential_timeout_secs: u64,
    pub deletion_interval_secs: u64,
    /// `0` waits for as long as the deletion takes
    pub deletion_timeout_secs: u64,
}

/// Fully resolved service principal identity
#[derive(Debug, Clone)]
pub struct AzureIdentity {
    pub subscription_id: String,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            azure: AzureSettings::default(),
            image_registry: None,
            cloud_provider_azure_path: None,
            kubeconfig_dir: PathBuf::from("_kubeconfig"),
            git_clone_dir: PathBuf::from("_git"),
            polling: PollingSettings::default(),
        }
    }
}

impl Default for AzureSettings {
    fn default() -> Self {
        Self {
            subscription_id: None,
            tenant_id: None,
            client_id: None,
            client_secret: None,
            location: None,
            resource_group: None,
            authority_host: "https://login.microsoftonline.com".to_string(),
            resource_manager_endpoint: "https://management.azure.com".to_string(),
        }
    }
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            credential_interval_secs: 10,
            credential_timeout_secs: 180,
            deletion_interval_secs: 15,
            deletion_timeout_secs: 3600,
        }
    }
}

impl Settings {
    /// Load settings from an optional YAML file, then fill gaps from the environment
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok().filter(|v| !v.is_empty()));
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read settings file {}: {}", path.display(), e)
        })?;
        let settings: Settings = serde_yaml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Invalid settings file {}: {}", path.display(), e))?;
        Ok(settings)
    }

    /// Fill every unset value from `lookup` (normally the process environment)
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let azure = &mut self.azure;
        fill(&mut azure.subscription_id, &lookup, ENV_SUBSCRIPTION_ID);
        fill(&mut azure.tenant_id, &lookup, ENV_TENANT_ID);
        fill(&mut azure.client_id, &lookup, ENV_CLIENT_ID);
        fill(&mut azure.client_secret, &lookup, ENV_CLIENT_SECRET);
        fill(&mut azure.location, &lookup, ENV_LOCATION);
        fill(&mut azure.resource_group, &lookup, ENV_RESOURCE_GROUP);
        if let Some(host) = lookup(ENV_AUTHORITY_HOST) {
            azure.authority_host = host;
        }
        if let Some(endpoint) = lookup(ENV_RESOURCE_MANAGER_ENDPOINT) {
            azure.resource_manager_endpoint = endpoint;
        }
        fill(&mut self.image_registry, &lookup, ENV_IMAGE_REGISTRY);
        if self.cloud_provider_azure_path.is_none() {
            self.cloud_provider_azure_path =
                lookup(ENV_CLOUD_PROVIDER_AZURE_PATH).map(PathBuf::from);
        }
    }

    /// Validate the settings
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, endpoint) in [
            ("authority_host", &self.azure.authority_host),
            ("resource_manager_endpoint", &self.azure.resource_manager_endpoint),
        ] {
            let url = url::Url::parse(endpoint)
                .map_err(|e| anyhow::anyhow!("Invalid azure.{} {:?}: {}", name, endpoint, e))?;
            if url.scheme() != "https" && url.scheme() != "http" {
                anyhow::bail!("azure.{} must be an http(s) URL: {}", name, endpoint);
            }
        }

        if self.kubeconfig_dir.as_os_str().is_empty() {
            anyhow::bail!("kubeconfig_dir cannot be empty");
        }
        if self.git_clone_dir.as_os_str().is_empty() {
            anyhow::bail!("git_clone_dir cannot be empty");
        }

        let polling = &self.polling;
        if polling.credential_interval_secs == 0 || polling.deletion_interval_secs == 0 {
            anyhow::bail!("polling intervals must be greater than zero");
        }
        if polling.credential_interval_secs > polling.credential_timeout_secs {
            anyhow::bail!(
                "polling.credential_interval_secs exceeds polling.credential_timeout_secs"
            );
        }

        Ok(())
    }

    /// Resolve the service principal identity, naming whatever is missing
    pub fn identity(&self) -> anyhow::Result<AzureIdentity> {
        Ok(AzureIdentity {
            subscription_id: required(
                &self.azure.subscription_id,
                ENV_SUBSCRIPTION_ID,
                "azure.subscription_id",
            )?,
            tenant_id: required(&self.azure.tenant_id, ENV_TENANT_ID, "azure.tenant_id")?,
            client_id: required(&self.azure.client_id, ENV_CLIENT_ID, "azure.client_id")?,
            client_secret: required(
                &self.azure.client_secret,
                ENV_CLIENT_SECRET,
                "azure.client_secret",
            )?,
        })
    }

    /// Resource group that holds the cluster
    pub fn resource_group(&self) -> anyhow::Result<String> {
        required(&self.azure.resource_group, ENV_RESOURCE_GROUP, "azure.resource_group")
    }

    /// Location, with an explicit flag value taking precedence over settings
    pub fn location(&self, flag: Option<&str>) -> anyhow::Result<String> {
        match flag {
            Some(location) if !location.is_empty() => Ok(location.to_string()),
            _ => required(&self.azure.location, ENV_LOCATION, "azure.location"),
        }
    }

    /// Container registry for the custom images
    pub fn image_registry(&self) -> anyhow::Result<String> {
        required(&self.image_registry, ENV_IMAGE_REGISTRY, "image_registry")
    }

    /// Generate an example settings file
    pub fn example() -> Self {
        Self {
            azure: AzureSettings {
                subscription_id: Some("00000000-0000-0000-0000-000000000000".to_string()),
                tenant_id: Some("00000000-0000-0000-0000-000000000000".to_string()),
                client_id: Some("00000000-0000-0000-0000-000000000000".to_string()),
                client_secret: None,
                location: Some("westus2".to_string()),
                resource_group: Some("aks-ccm-e2e".to_string()),
                ..AzureSettings::default()
            },
            image_registry: Some("example.azurecr.io".to_string()),
            ..Self::default()
        }
    }
}

fn fill<F>(slot: &mut Option<String>, lookup: &F, key: &str)
where
    F: Fn(&str) -> Option<String>,
{
    if slot.is_none() {
        *slot = lookup(key);
    }
}

fn required(value: &Option<String>, env: &str, field: &str) -> anyhow::Result<String> {
    value
        .clone()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "{} is not set. Set the {} environment variable or `{}` in the settings file",
                field,
                env,
                field
            )
        })
}
