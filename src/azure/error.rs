/// Errors returned by Azure AD and Azure Resource Manager calls
use thiserror::Error;

use super::models::CloudErrorResponse;

#[derive(Debug, Error)]
pub enum ArmError {
    /// HTTP 404 from the management plane
    #[error("not found (404): {message}")]
    NotFound { message: String },

    /// Any other status >= 400
    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("failed to send request: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid request URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

impl ArmError {
    /// Build an error from a failed response, extracting the ARM error body when present
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = match serde_json::from_str::<CloudErrorResponse>(body) {
            Ok(response) => format!("{} - {}", response.error.code, response.error.message),
            Err(_) if body.trim().is_empty() => "<empty body>".to_string(),
            Err(_) => body.trim().to_string(),
        };

        if status == 404 {
            ArmError::NotFound { message }
        } else {
            ArmError::Status { status, message }
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ArmError::NotFound { .. })
    }
}
