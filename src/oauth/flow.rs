//! Usage: End-to-end authorization flow — authorize URL, browser, callback,
//! token exchange, refresh.

use crate::config::GatewayConfig;
use crate::oauth::callback_server::{bind_callback_listener, wait_for_callback};
use crate::oauth::pkce::generate_pkce_pair;
use crate::oauth::store::TokenStore;
use crate::oauth::token_exchange::{
    exchange_authorization_code, refresh_access_token, TokenExchangeRequest, TokenRefreshRequest,
};
use crate::shared::error::{GatewayError, GatewayResult};
use crate::shared::security::mask_token;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const USER_AGENT: &str = concat!("bitbucket-gateway/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the OAuth client configuration, the token store, and the single-flow
/// guard. One instance per Bitbucket consumer; clone the `Arc` to share it
/// with a [`crate::BitbucketClient`].
pub struct Authenticator {
    config: GatewayConfig,
    store: Arc<TokenStore>,
    client: reqwest::Client,
    flow_pending: AtomicBool,
}

impl Authenticator {
    pub fn new(config: GatewayConfig) -> GatewayResult<Self> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::config(format!("http client build failed: {e}")))?;

        Ok(Self {
            config,
            store: Arc::new(TokenStore::new()),
            client,
            flow_pending: AtomicBool::new(false),
        })
    }

    pub fn store(&self) -> Arc<TokenStore> {
        Arc::clone(&self.store)
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.client
    }

    pub(crate) fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Access token for the next request: the cached one if a session exists,
    /// otherwise a full interactive login.
    pub async fn authenticate(&self) -> GatewayResult<String> {
        if let Some(token) = self.store.access_token() {
            return Ok(token);
        }
        self.login().await
    }

    /// Run the interactive authorization-code flow in the system browser.
    pub async fn login(&self) -> GatewayResult<String> {
        self.login_with(open_browser).await
    }

    /// Same flow, but the caller decides how the user reaches the authorize
    /// URL. `opener` receives the full URL once the callback listener is
    /// already accepting connections.
    pub async fn login_with<F>(&self, opener: F) -> GatewayResult<String>
    where
        F: FnOnce(&str) -> GatewayResult<()>,
    {
        if self.flow_pending.swap(true, Ordering::SeqCst) {
            return Err(GatewayError::FlowInProgress);
        }
        let result = self.run_login(opener).await;
        self.flow_pending.store(false, Ordering::SeqCst);
        result
    }

    async fn run_login<F>(&self, opener: F) -> GatewayResult<String>
    where
        F: FnOnce(&str) -> GatewayResult<()>,
    {
        let pkce = generate_pkce_pair();
        let state = generate_state();
        let redirect_uri = self.config.redirect_uri();

        let listener = bind_callback_listener(self.config.callback_port).await?;
        let authorize_url = build_authorize_url(&self.config, &pkce.code_challenge, &state)?;
        tracing::info!(port = listener.port(), "oauth callback listener ready");

        let timeout = self.config.flow_timeout;
        let expected_state = state.clone();
        let callback_task = tokio::spawn(async move {
            wait_for_callback(listener, &expected_state, timeout).await
        });
        // Give the listener task a chance to reach accept() first.
        tokio::task::yield_now().await;

        if let Err(err) = opener(&authorize_url) {
            callback_task.abort();
            return Err(err);
        }

        let payload = callback_task
            .await
            .map_err(|e| GatewayError::callback(format!("callback task failed: {e}")))??;

        if let Some(error) = payload.error {
            let description = payload
                .error_description
                .unwrap_or_else(|| "no description provided".to_string());
            return Err(GatewayError::callback(format!("{error}: {description}")));
        }

        let code = payload
            .code
            .ok_or_else(|| GatewayError::callback("callback carried no authorization code"))?;

        let tokens = exchange_authorization_code(
            &self.client,
            &TokenExchangeRequest {
                token_url: self.config.token_url.clone(),
                client_id: self.config.client_id.clone(),
                client_secret: self.config.client_secret.clone(),
                code,
                redirect_uri,
                code_verifier: pkce.code_verifier,
            },
        )
        .await?;

        tracing::info!(
            access_token = %mask_token(&tokens.access_token),
            has_refresh_token = tokens.refresh_token.is_some(),
            "oauth login completed"
        );
        let access_token = tokens.access_token.clone();
        self.store.replace(&tokens);
        Ok(access_token)
    }

    /// Trade the stored refresh token for a new access token.
    pub async fn refresh(&self) -> GatewayResult<String> {
        let refresh_token = self.store.refresh_token().ok_or_else(|| {
            GatewayError::TokenRefresh {
                message: "no refresh token available".to_string(),
            }
        })?;

        let tokens = refresh_access_token(
            &self.client,
            &TokenRefreshRequest {
                token_url: self.config.token_url.clone(),
                client_id: self.config.client_id.clone(),
                client_secret: self.config.client_secret.clone(),
                refresh_token,
            },
        )
        .await?;

        tracing::info!(
            access_token = %mask_token(&tokens.access_token),
            "oauth access token refreshed"
        );
        let access_token = tokens.access_token.clone();
        self.store.apply_refresh(&tokens);
        Ok(access_token)
    }

    pub fn logout(&self) {
        self.store.clear();
        tracing::info!("oauth session cleared");
    }
}

fn generate_state() -> String {
    let mut random = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut random);
    URL_SAFE_NO_PAD.encode(random)
}

fn build_authorize_url(
    config: &GatewayConfig,
    code_challenge: &str,
    state: &str,
) -> GatewayResult<String> {
    let mut url = reqwest::Url::parse(config.authorize_url.trim())
        .map_err(|e| GatewayError::config(format!("invalid authorize url: {e}")))?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", config.client_id.trim())
        .append_pair("redirect_uri", &config.redirect_uri())
        .append_pair("scope", &config.scopes.join(" "))
        .append_pair("state", state)
        .append_pair("code_challenge", code_challenge)
        .append_pair("code_challenge_method", "S256");
    Ok(url.to_string())
}

#[cfg(target_os = "windows")]
fn open_browser(url: &str) -> GatewayResult<()> {
    std::process::Command::new("rundll32")
        .args(["url.dll,FileProtocolHandler", url])
        .spawn()
        .map_err(|e| GatewayError::config(format!("failed to open browser: {e}")))?;
    Ok(())
}

#[cfg(target_os = "macos")]
fn open_browser(url: &str) -> GatewayResult<()> {
    std::process::Command::new("open")
        .arg(url)
        .spawn()
        .map_err(|e| GatewayError::config(format!("failed to open browser: {e}")))?;
    Ok(())
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn open_browser(url: &str) -> GatewayResult<()> {
    std::process::Command::new("xdg-open")
        .arg(url)
        .spawn()
        .map_err(|e| GatewayError::config(format!("failed to open browser: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorize_url_carries_the_pkce_and_state_parameters() {
        let config = GatewayConfig::new("client-1")
            .with_scopes(vec!["repositories".to_string(), "account".to_string()])
            .with_callback_port(9123);
        let url = build_authorize_url(&config, "challenge-1", "state-1").expect("url");
        let parsed = reqwest::Url::parse(&url).expect("parse");
        let pairs: std::collections::HashMap<_, _> = parsed.query_pairs().collect();

        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["client_id"], "client-1");
        assert_eq!(pairs["redirect_uri"], "http://localhost:9123/callback");
        assert_eq!(pairs["scope"], "repositories account");
        assert_eq!(pairs["state"], "state-1");
        assert_eq!(pairs["code_challenge"], "challenge-1");
        assert_eq!(pairs["code_challenge_method"], "S256");
    }

    #[test]
    fn state_values_are_unique_and_url_safe() {
        let a = generate_state();
        let b = generate_state();
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[tokio::test]
    async fn authenticate_returns_the_cached_token_without_a_flow() {
        let auth = Authenticator::new(GatewayConfig::new("client-1")).expect("authenticator");
        auth.store().replace(&crate::oauth::token_exchange::OAuthTokenSet {
            access_token: "at-cached".to_string(),
            refresh_token: None,
        });
        let token = auth.authenticate().await.expect("token");
        assert_eq!(token, "at-cached");
    }

    #[tokio::test]
    async fn refresh_without_a_refresh_token_fails_fast() {
        let auth = Authenticator::new(GatewayConfig::new("client-1")).expect("authenticator");
        let err = auth.refresh().await.expect_err("should fail");
        assert!(matches!(err, GatewayError::TokenRefresh { .. }));
    }
}
