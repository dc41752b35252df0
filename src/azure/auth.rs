/// Azure AD client-credentials authentication
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use std::fmt;
use tracing::debug;
use url::Url;

use super::error::ArmError;
use super::models::{TokenErrorResponse, TokenResponse};
use crate::config::AzureIdentity;

/// Scope for Azure Resource Manager
pub const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";

/// Tokens this close to expiry are treated as expired
const EXPIRY_MARGIN_SECS: i64 = 300;

/// Bearer token for the management plane
#[derive(Clone)]
pub struct AccessToken {
    secret: String,
    pub expires_on: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>, expires_on: DateTime<Utc>) -> Self {
        Self {
            secret: secret.into(),
            expires_on,
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Whether the token should be refreshed before the next call
    pub fn is_expired(&self) -> bool {
        Utc::now() + Duration::seconds(EXPIRY_MARGIN_SECS) >= self.expires_on
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Service principal credential using a client secret
pub struct ClientSecretCredential {
    http: Client,
    token_url: Url,
    client_id: String,
    client_secret: String,
}

impl ClientSecretCredential {
    /// Create a credential against `authority_host` (e.g., "https://login.microsoftonline.com")
    pub fn new(
        http: Client,
        authority_host: &str,
        identity: &AzureIdentity,
    ) -> Result<Self, ArmError> {
        let token_url = Url::parse(authority_host)?
            .join(&format!("{}/oauth2/v2.0/token", identity.tenant_id))?;
        Ok(Self {
            http,
            token_url,
            client_id: identity.client_id.clone(),
            client_secret: identity.client_secret.clone(),
        })
    }

    /// Request a token for `scope`
    pub async fn get_token(&self, scope: &str) -> Result<AccessToken, ArmError> {
        debug!("POST {}", self.token_url);

        let response = self
            .http
            .post(self.token_url.clone())
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", scope),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let reason = match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(err) => format!("{}: {}", err.error, err.error_description),
                Err(_) => format!("status {}: {}", status, body.trim()),
            };
            return Err(ArmError::Authentication(reason));
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| ArmError::InvalidResponse(format!("token response: {}", e)))?;

        Ok(AccessToken::new(
            token.access_token,
            Utc::now() + Duration::seconds(token.expires_in),
        ))
    }
}
