/// Azure management plane access
pub mod auth;
pub mod client;
pub mod error;
pub mod models;

#[cfg(test)]
mod test_server;

pub use auth::AccessToken;
pub use error::ArmError;
pub use models::{
    ClusterRef, CredentialKind, CredentialResults, DeleteOperation, DeletionStatus, ResourceGroup,
};

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use self::auth::{ClientSecretCredential, MANAGEMENT_SCOPE};
use self::client::ArmClient;
use self::models::{
    ResourceGroupRequest, MANAGED_CLUSTER_API_VERSION, RESOURCE_GROUP_API_VERSION,
};
use crate::config::Settings;

/// Feature header that enables the custom cloud-controller-manager configuration
pub const CUSTOM_FEATURES_HEADER: &str = "AKSHTTPCustomFeatures";
pub const CUSTOM_FEATURES_VALUE: &str = "Microsoft.ContainerService/EnableCloudControllerManager";

/// Operations the deployer needs from the cloud
#[async_trait]
pub trait ManagementApi: Send + Sync {
    /// Obtain a bearer token for the management plane
    async fn get_token(&self) -> Result<AccessToken, ArmError>;

    async fn create_or_update_resource_group(
        &self,
        token: &AccessToken,
        name: &str,
        location: &str,
    ) -> Result<ResourceGroup, ArmError>;

    /// Submit the rendered managed cluster document; any status >= 400 fails
    async fn create_managed_cluster(
        &self,
        token: &AccessToken,
        cluster: &ClusterRef,
        body: String,
    ) -> Result<(), ArmError>;

    async fn list_cluster_credentials(
        &self,
        token: &AccessToken,
        cluster: &ClusterRef,
        kind: CredentialKind,
    ) -> Result<CredentialResults, ArmError>;

    async fn begin_delete_resource_group(
        &self,
        token: &AccessToken,
        name: &str,
    ) -> Result<DeleteOperation, ArmError>;

    /// Check a pending deletion
    async fn deletion_status(
        &self,
        token: &AccessToken,
        operation: &DeleteOperation,
    ) -> Result<DeletionStatus, ArmError>;
}

/// [`ManagementApi`] backed by Azure AD and Azure Resource Manager
pub struct AzureCloud {
    credential: ClientSecretCredential,
    arm: ArmClient,
    subscription_id: String,
}

impl AzureCloud {
    /// Create a client from settings; fails if identity values are missing
    pub fn new(settings: &Settings) -> anyhow::Result<Self> {
        // Certificate verification stays on (rustls defaults)
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Self::with_client(http, settings)
    }

    /// Create a client from settings using an existing HTTP client
    pub fn with_client(http: Client, settings: &Settings) -> anyhow::Result<Self> {
        let identity = settings.identity()?;
        let credential =
            ClientSecretCredential::new(http.clone(), &settings.azure.authority_host, &identity)?;
        let arm = ArmClient::new(http, &settings.azure.resource_manager_endpoint)?;

        Ok(Self {
            credential,
            arm,
            subscription_id: identity.subscription_id,
        })
    }

    fn resource_group_path(&self, name: &str) -> String {
        format!("/subscriptions/{}/resourcegroups/{}", self.subscription_id, name)
    }
}

#[async_trait]
impl ManagementApi for AzureCloud {
    async fn get_token(&self) -> Result<AccessToken, ArmError> {
        self.credential.get_token(MANAGEMENT_SCOPE).await
    }

    async fn create_or_update_resource_group(
        &self,
        token: &AccessToken,
        name: &str,
        location: &str,
    ) -> Result<ResourceGroup, ArmError> {
        self.arm
            .put(
                token,
                &self.resource_group_path(name),
                RESOURCE_GROUP_API_VERSION,
                &ResourceGroupRequest { location },
            )
            .await
    }

    async fn create_managed_cluster(
        &self,
        token: &AccessToken,
        cluster: &ClusterRef,
        body: String,
    ) -> Result<(), ArmError> {
        let response = self
            .arm
            .put_raw(
                token,
                &cluster.resource_id(),
                MANAGED_CLUSTER_API_VERSION,
                body,
                &[(CUSTOM_FEATURES_HEADER, CUSTOM_FEATURES_VALUE)],
            )
            .await?;
        debug!("Managed cluster PUT returned {}", response.status());
        Ok(())
    }

    async fn list_cluster_credentials(
        &self,
        token: &AccessToken,
        cluster: &ClusterRef,
        kind: CredentialKind,
    ) -> Result<CredentialResults, ArmError> {
        let path = format!("{}/{}", cluster.resource_id(), kind.action());
        self.arm
            .post(token, &path, MANAGED_CLUSTER_API_VERSION)
            .await
    }

    async fn begin_delete_resource_group(
        &self,
        token: &AccessToken,
        name: &str,
    ) -> Result<DeleteOperation, ArmError> {
        let response = self
            .arm
            .delete(token, &self.resource_group_path(name), RESOURCE_GROUP_API_VERSION)
            .await?;

        if response.status() != StatusCode::ACCEPTED {
            return Ok(DeleteOperation::Completed);
        }

        match response.headers().get(header::LOCATION) {
            Some(location) => {
                let status_url = location
                    .to_str()
                    .map_err(|e| ArmError::InvalidResponse(format!("bad Location header: {}", e)))?
                    .to_string();
                Ok(DeleteOperation::Pending { status_url })
            }
            None => Err(ArmError::InvalidResponse(
                "deletion accepted without a Location header".to_string(),
            )),
        }
    }

    async fn deletion_status(
        &self,
        token: &AccessToken,
        operation: &DeleteOperation,
    ) -> Result<DeletionStatus, ArmError> {
        match operation {
            DeleteOperation::Completed => Ok(DeletionStatus::Finished),
            DeleteOperation::Pending { status_url } => {
                let response = self.arm.get_absolute(token, status_url).await?;
                if response.status() == StatusCode::ACCEPTED {
                    Ok(DeletionStatus::Pending {
                        retry_after: retry_after(response.headers()),
                    })
                } else {
                    Ok(DeletionStatus::Finished)
                }
            }
        }
    }
}

/// `Retry-After` given in seconds; HTTP-date values are ignored
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::test_server::{response, TestServer};
    use super::*;
    use chrono::Utc;

    async fn cloud(server: &TestServer) -> AzureCloud {
        let mut settings = Settings::example();
        settings.azure.subscription_id = Some("sub".to_string());
        settings.azure.tenant_id = Some("tenant".to_string());
        settings.azure.client_id = Some("client".to_string());
        settings.azure.client_secret = Some("secret".to_string());
        settings.azure.authority_host = server.endpoint();
        settings.azure.resource_manager_endpoint = server.endpoint();

        let http = Client::builder().no_proxy().build().unwrap();
        AzureCloud::with_client(http, &settings).unwrap()
    }

    fn token() -> AccessToken {
        AccessToken::new("token", Utc::now() + chrono::Duration::hours(1))
    }

    fn cluster() -> ClusterRef {
        ClusterRef::new("sub", "rg1", "aks1")
    }

    #[tokio::test]
    async fn test_token_request_uses_client_credentials() {
        let server = TestServer::start(vec![response(
            "200 OK",
            &[("Content-Type", "application/json")],
            r#"{"access_token":"abc","expires_in":3599,"token_type":"Bearer"}"#,
        )])
        .await;

        let token = cloud(&server).await.get_token().await.unwrap();

        assert_eq!(token.secret(), "abc");
        assert!(!token.is_expired());
        let requests = server.requests();
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].target, "/tenant/oauth2/v2.0/token");
        assert!(requests[0].body.contains("grant_type=client_credentials"));
        assert!(requests[0].body.contains("client_id=client"));
        assert!(requests[0]
            .body
            .contains("scope=https%3A%2F%2Fmanagement.azure.com%2F.default"));
    }

    #[tokio::test]
    async fn test_rejected_credentials_are_an_authentication_error() {
        let server = TestServer::start(vec![response(
            "401 Unauthorized",
            &[("Content-Type", "application/json")],
            r#"{"error":"invalid_client","error_description":"AADSTS7000215: Invalid client secret"}"#,
        )])
        .await;

        let err = cloud(&server).await.get_token().await.unwrap_err();

        assert!(matches!(err, ArmError::Authentication(ref m) if m.contains("invalid_client")));
    }

    #[tokio::test]
    async fn test_resource_group_put() {
        let server = TestServer::start(vec![response(
            "201 Created",
            &[("Content-Type", "application/json")],
            r#"{"id":"/subscriptions/sub/resourceGroups/rg1","name":"rg1","location":"eastus","properties":{"provisioningState":"Succeeded"}}"#,
        )])
        .await;

        let group = cloud(&server)
            .await
            .create_or_update_resource_group(&token(), "rg1", "eastus")
            .await
            .unwrap();

        assert_eq!(group.name, "rg1");
        let requests = server.requests();
        assert_eq!(requests[0].method, "PUT");
        assert_eq!(
            requests[0].target,
            "/subscriptions/sub/resourcegroups/rg1?api-version=2021-04-01"
        );
        assert_eq!(requests[0].header("authorization"), Some("Bearer token"));
        let body: serde_json::Value = serde_json::from_str(&requests[0].body).unwrap();
        assert_eq!(body, serde_json::json!({"location": "eastus"}));
    }

    #[tokio::test]
    async fn test_cluster_put_sends_headers_and_body() {
        let server = TestServer::start(vec![response("201 Created", &[], "{}")]).await;
        let document = r#"{"location":"eastus"}"#.to_string();

        cloud(&server)
            .await
            .create_managed_cluster(&token(), &cluster(), document.clone())
            .await
            .unwrap();

        let requests = server.requests();
        let request = &requests[0];
        assert_eq!(request.method, "PUT");
        assert_eq!(
            request.target,
            "/subscriptions/sub/resourcegroups/rg1/providers/Microsoft.ContainerService/managedClusters/aks1?api-version=2022-04-02-preview"
        );
        assert_eq!(
            request.header(CUSTOM_FEATURES_HEADER),
            Some(CUSTOM_FEATURES_VALUE)
        );
        assert_eq!(request.header("content-type"), Some("application/json"));
        assert_eq!(request.header("authorization"), Some("Bearer token"));
        assert_eq!(request.body, document);
    }

    #[tokio::test]
    async fn test_cluster_put_error_statuses() {
        let server = TestServer::start(vec![
            response(
                "404 Not Found",
                &[("Content-Type", "application/json")],
                r#"{"error":{"code":"ResourceGroupNotFound","message":"Resource group 'rg1' could not be found."}}"#,
            ),
            response("400 Bad Request", &[], "bad document"),
        ])
        .await;
        let cloud = cloud(&server).await;

        let err = cloud
            .create_managed_cluster(&token(), &cluster(), "{}".to_string())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("ResourceGroupNotFound"));

        let err = cloud
            .create_managed_cluster(&token(), &cluster(), "{}".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, ArmError::Status { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_credentials_are_posted_to_the_kind_action() {
        let server = TestServer::start(vec![response(
            "200 OK",
            &[("Content-Type", "application/json")],
            r#"{"kubeconfigs":[{"name":"clusterUser","value":"YXBpVmVyc2lvbjogdjEK"}]}"#,
        )])
        .await;

        let results = cloud(&server)
            .await
            .list_cluster_credentials(&token(), &cluster(), CredentialKind::User)
            .await
            .unwrap();

        assert_eq!(results.kubeconfigs[0].value, b"apiVersion: v1\n");
        let requests = server.requests();
        assert_eq!(requests[0].method, "POST");
        assert_eq!(
            requests[0].target,
            "/subscriptions/sub/resourcegroups/rg1/providers/Microsoft.ContainerService/managedClusters/aks1/listClusterUserCredential?api-version=2022-04-02-preview"
        );
    }

    #[tokio::test]
    async fn test_accepted_deletion_is_polled_at_location() {
        let server = TestServer::start_with(|endpoint| {
            let location = format!("{}/operations/op1", endpoint);
            vec![
                response("202 Accepted", &[("Location", location.as_str())], ""),
                response("202 Accepted", &[("Retry-After", "30")], ""),
                response("200 OK", &[], ""),
            ]
        })
        .await;
        let status_url = format!("{}/operations/op1", server.endpoint());
        let cloud = cloud(&server).await;

        let operation = cloud
            .begin_delete_resource_group(&token(), "rg1")
            .await
            .unwrap();
        assert_eq!(operation, DeleteOperation::Pending { status_url });

        assert_eq!(
            cloud.deletion_status(&token(), &operation).await.unwrap(),
            DeletionStatus::Pending {
                retry_after: Some(Duration::from_secs(30))
            }
        );
        assert_eq!(
            cloud.deletion_status(&token(), &operation).await.unwrap(),
            DeletionStatus::Finished
        );

        let requests = server.requests();
        assert_eq!(requests[0].method, "DELETE");
        assert_eq!(
            requests[0].target,
            "/subscriptions/sub/resourcegroups/rg1?api-version=2021-04-01"
        );
        assert_eq!(requests[1].method, "GET");
        assert_eq!(requests[1].target, "/operations/op1");
    }

    #[tokio::test]
    async fn test_deletion_outcomes_without_polling() {
        let server = TestServer::start(vec![
            response("200 OK", &[], ""),
            response("202 Accepted", &[], ""),
            response("409 Conflict", &[], "deletion already in progress"),
        ])
        .await;
        let cloud = cloud(&server).await;

        assert_eq!(
            cloud
                .begin_delete_resource_group(&token(), "rg1")
                .await
                .unwrap(),
            DeleteOperation::Completed
        );
        assert!(matches!(
            cloud.begin_delete_resource_group(&token(), "rg1").await,
            Err(ArmError::InvalidResponse(_))
        ));
        assert!(matches!(
            cloud.begin_delete_resource_group(&token(), "rg1").await,
            Err(ArmError::Status { status: 409, .. })
        ));
    }
}
