/// Azure Resource Manager REST client
use reqwest::{header, Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use url::Url;

use super::auth::AccessToken;
use super::error::ArmError;

/// Thin client over the ARM REST surface
#[derive(Clone)]
pub struct ArmClient {
    http: Client,
    endpoint: Url,
}

impl ArmClient {
    /// Create a client for `endpoint` (e.g., "https://management.azure.com")
    pub fn new(http: Client, endpoint: &str) -> Result<Self, ArmError> {
        Ok(Self {
            http,
            endpoint: Url::parse(endpoint)?,
        })
    }

    /// Absolute URL for a resource path with its `api-version`
    pub fn url(&self, path: &str, api_version: &str) -> Result<Url, ArmError> {
        let mut url = self.endpoint.join(path)?;
        url.query_pairs_mut().append_pair("api-version", api_version);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url, token: &AccessToken) -> RequestBuilder {
        debug!("{} {}", method, url);
        self.http
            .request(method, url)
            .bearer_auth(token.secret())
    }

    /// Make a PUT request with a JSON body
    pub async fn put<T: Serialize, R: DeserializeOwned>(
        &self,
        token: &AccessToken,
        path: &str,
        api_version: &str,
        body: &T,
    ) -> Result<R, ArmError> {
        let response = self
            .request(Method::PUT, self.url(path, api_version)?, token)
            .json(body)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Make a PUT request with a pre-rendered JSON document and extra headers
    pub async fn put_raw(
        &self,
        token: &AccessToken,
        path: &str,
        api_version: &str,
        body: String,
        headers: &[(&'static str, &str)],
    ) -> Result<Response, ArmError> {
        let mut request = self
            .request(Method::PUT, self.url(path, api_version)?, token)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }

        check_status(request.send().await?).await
    }

    /// Make a POST request with an empty body
    pub async fn post<R: DeserializeOwned>(
        &self,
        token: &AccessToken,
        path: &str,
        api_version: &str,
    ) -> Result<R, ArmError> {
        let response = self
            .request(Method::POST, self.url(path, api_version)?, token)
            .header(header::CONTENT_LENGTH, "0")
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Make a DELETE request, returning the accepted response
    pub async fn delete(
        &self,
        token: &AccessToken,
        path: &str,
        api_version: &str,
    ) -> Result<Response, ArmError> {
        let response = self
            .request(Method::DELETE, self.url(path, api_version)?, token)
            .send()
            .await?;

        check_status(response).await
    }

    /// GET an absolute URL (async operation status), returning the response
    pub async fn get_absolute(&self, token: &AccessToken, url: &str) -> Result<Response, ArmError> {
        let response = self
            .request(Method::GET, Url::parse(url)?, token)
            .send()
            .await?;

        check_status(response).await
    }

    /// Handle API response, checking for errors
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: Response,
    ) -> Result<T, ArmError> {
        let response = check_status(response).await?;
        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| ArmError::InvalidResponse(format!("failed to parse API response: {}", e)))
    }
}

/// Any status >= 400 becomes an [`ArmError`]
pub async fn check_status(response: Response) -> Result<Response, ArmError> {
    let status = response.status();
    if status.as_u16() < 400 {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ArmError::from_status(status.as_u16(), &body))
}
