//! Usage: Request executor — attaches the bearer token and recovers from a
//! stale one with a single refresh-and-retry.

use crate::oauth::flow::Authenticator;
use crate::oauth::token_exchange::parse_provider_error;
use crate::shared::error::{GatewayError, GatewayResult};
use crate::shared::security::sanitize_error_body;
use reqwest::header::ACCEPT;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::sync::Arc;

/// Executes Bitbucket API calls on behalf of an [`Authenticator`].
///
/// Every call goes through the same lifecycle: obtain a token (cached or via
/// a fresh login), send with `Authorization: Bearer`, and on 401 refresh the
/// token and retry exactly once. A failed retry never loops back into
/// another refresh.
pub struct BitbucketClient {
    auth: Arc<Authenticator>,
    base_url: String,
}

impl BitbucketClient {
    pub fn new(auth: Arc<Authenticator>) -> Self {
        let base_url = auth.config().api_base_url.trim_end_matches('/').to_string();
        Self { auth, base_url }
    }

    pub(crate) fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    /// One authenticated API call. `endpoint` is relative to the configured
    /// API base URL; `body` is sent as JSON when present.
    pub async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
    ) -> GatewayResult<Value> {
        let url = self.endpoint_url(endpoint);
        let token = self.auth.authenticate().await?;

        let response = self.send(method.clone(), &url, body.as_ref(), &token).await?;
        let status = response.status();
        if status.is_success() {
            return read_json_body(response).await;
        }

        let failure = render_failure(status, response).await;
        if status != StatusCode::UNAUTHORIZED {
            return Err(GatewayError::api(Some(status.as_u16()), failure));
        }

        tracing::warn!(%url, "api call got 401, refreshing access token");
        let fresh_token = self.auth.refresh().await.map_err(|refresh_err| {
            GatewayError::Authentication {
                message: format!("{failure}; refresh failed: {refresh_err}"),
            }
        })?;

        let retry = self
            .send(method, &url, body.as_ref(), &fresh_token)
            .await
            .map_err(|retry_err| GatewayError::Authentication {
                message: format!("{failure}; retry failed: {retry_err}"),
            })?;
        let retry_status = retry.status();
        if retry_status.is_success() {
            return read_json_body(retry).await;
        }

        let retry_failure = render_failure(retry_status, retry).await;
        Err(GatewayError::Authentication {
            message: format!("{failure}; retry failed: {retry_failure}"),
        })
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        token: &str,
    ) -> GatewayResult<reqwest::Response> {
        let mut request = self
            .auth
            .http()
            .request(method, url)
            .header(ACCEPT, "application/json")
            .bearer_auth(token);
        if let Some(body) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.to_string());
        }
        request
            .send()
            .await
            .map_err(|e| GatewayError::api(None, format!("request to {url} failed: {e}")))
    }
}

async fn read_json_body(response: reqwest::Response) -> GatewayResult<Value> {
    let body = response
        .text()
        .await
        .map_err(|e| GatewayError::api(None, format!("response read failed: {e}")))?;
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body)
        .map_err(|e| GatewayError::api(None, format!("response is not valid json: {e}")))
}

async fn render_failure(status: StatusCode, response: reqwest::Response) -> String {
    let body = response.text().await.unwrap_or_default();
    let (_, provider_message) = parse_provider_error(&body);
    match provider_message {
        Some(message) => format!("status={status} message={message}"),
        None => format!("status={status} body={}", sanitize_error_body(&body)),
    }
}
