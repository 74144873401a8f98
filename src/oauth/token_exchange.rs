//! Usage: Token endpoint helpers (authorization_code + refresh_token grants).

use crate::shared::error::{GatewayError, GatewayResult};
use crate::shared::security::sanitize_error_body;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::AUTHORIZATION;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub(crate) struct TokenExchangeRequest {
    pub(crate) token_url: String,
    pub(crate) client_id: String,
    pub(crate) client_secret: Option<String>,
    pub(crate) code: String,
    pub(crate) redirect_uri: String,
    pub(crate) code_verifier: String,
}

#[derive(Debug, Clone)]
pub(crate) struct TokenRefreshRequest {
    pub(crate) token_url: String,
    pub(crate) client_id: String,
    pub(crate) client_secret: Option<String>,
    pub(crate) refresh_token: String,
}

/// What a successful token response boils down to. Expiry is not tracked:
/// token validity is discovered reactively when a protected call gets 401.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OAuthTokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum GrantKind {
    AuthorizationCode,
    RefreshToken,
}

impl GrantKind {
    fn error(self, message: String) -> GatewayError {
        match self {
            Self::AuthorizationCode => GatewayError::TokenExchange { message },
            Self::RefreshToken => GatewayError::TokenRefresh { message },
        }
    }
}

/// `client_id:client_secret` (or `client_id:` for public clients) as an
/// HTTP Basic `Authorization` header value.
pub(crate) fn basic_auth_value(client_id: &str, client_secret: Option<&str>) -> String {
    let credentials = format!("{}:{}", client_id.trim(), client_secret.unwrap_or("").trim());
    format!("Basic {}", STANDARD.encode(credentials))
}

/// Trade an authorization code (plus its PKCE verifier) for a token pair.
/// Confidential clients put their credentials in the body; public clients
/// authenticate the request itself via Basic auth with an empty password.
pub(crate) async fn exchange_authorization_code(
    client: &reqwest::Client,
    req: &TokenExchangeRequest,
) -> GatewayResult<OAuthTokenSet> {
    let mut form: HashMap<&str, String> = HashMap::new();
    form.insert("grant_type", "authorization_code".to_string());
    form.insert("code", req.code.trim().to_string());
    form.insert("redirect_uri", req.redirect_uri.trim().to_string());
    form.insert("code_verifier", req.code_verifier.trim().to_string());

    let mut request = client.post(req.token_url.trim());
    match req.client_secret.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        Some(secret) => {
            form.insert("client_id", req.client_id.trim().to_string());
            form.insert("client_secret", secret.to_string());
        }
        None => {
            request = request.header(AUTHORIZATION, basic_auth_value(&req.client_id, None));
        }
    }

    let response = request.form(&form).send().await.map_err(|e| {
        GrantKind::AuthorizationCode.error(format!("token endpoint request failed: {e}"))
    })?;

    parse_token_response(response, GrantKind::AuthorizationCode).await
}

/// Trade a refresh token for a new access token. Always Basic auth, with or
/// without a secret, matching Bitbucket's token endpoint expectations.
pub(crate) async fn refresh_access_token(
    client: &reqwest::Client,
    req: &TokenRefreshRequest,
) -> GatewayResult<OAuthTokenSet> {
    let mut form: HashMap<&str, String> = HashMap::new();
    form.insert("grant_type", "refresh_token".to_string());
    form.insert("refresh_token", req.refresh_token.trim().to_string());

    let response = client
        .post(req.token_url.trim())
        .header(
            AUTHORIZATION,
            basic_auth_value(&req.client_id, req.client_secret.as_deref()),
        )
        .form(&form)
        .send()
        .await
        .map_err(|e| GrantKind::RefreshToken.error(format!("refresh request failed: {e}")))?;

    parse_token_response(response, GrantKind::RefreshToken).await
}

async fn parse_token_response(
    response: reqwest::Response,
    kind: GrantKind,
) -> GatewayResult<OAuthTokenSet> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| kind.error(format!("token response read failed: {e}")))?;
    parse_token_body(status.is_success(), status.as_u16(), &body, kind)
}

fn parse_token_body(
    success: bool,
    status: u16,
    body: &str,
    kind: GrantKind,
) -> GatewayResult<OAuthTokenSet> {
    if !success {
        let mut message = format!("token endpoint returned status={status}");
        let (code, detail) = parse_provider_error(body);
        if let Some(code) = code {
            message.push_str(&format!(" code={code}"));
        }
        if let Some(detail) = detail {
            message.push_str(&format!(" message={detail}"));
        }
        message.push_str(&format!(" body={}", sanitize_error_body(body)));
        return Err(kind.error(message));
    }

    let value: Value = serde_json::from_str(body)
        .map_err(|e| kind.error(format!("token response is not valid json: {e}")))?;

    let access_token = value
        .get("access_token")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| kind.error("token response is missing access_token".to_string()))?
        .to_string();

    let refresh_token = value
        .get("refresh_token")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    Ok(OAuthTokenSet {
        access_token,
        refresh_token,
    })
}

/// Pull a machine code and a human message out of an OAuth/Bitbucket error
/// body. Handles both the RFC 6749 flat shape
/// (`{"error": "...", "error_description": "..."}`) and Bitbucket's nested
/// one (`{"error": {"message": "..."}}`).
pub(crate) fn parse_provider_error(body: &str) -> (Option<String>, Option<String>) {
    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) => return (None, None),
    };

    let mut code = None;
    let mut message = value
        .get("error_description")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    if let Some(error_value) = value.get("error") {
        if let Some(err_str) = error_value.as_str() {
            code = Some(err_str.trim().to_string());
        } else if let Some(err_obj) = error_value.as_object() {
            code = err_obj
                .get("code")
                .and_then(Value::as_str)
                .or_else(|| err_obj.get("type").and_then(Value::as_str))
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string);
            if message.is_none() {
                message = err_obj
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string);
            }
        }
    }

    (code, message)
}
