//! Usage: Gateway configuration (OAuth client, endpoints, callback port).

use crate::shared::error::{GatewayError, GatewayResult};
use std::time::Duration;

pub const BITBUCKET_AUTHORIZE_URL: &str = "https://bitbucket.org/site/oauth2/authorize";
pub const BITBUCKET_TOKEN_URL: &str = "https://bitbucket.org/site/oauth2/access_token";
pub const BITBUCKET_API_BASE_URL: &str = "https://api.bitbucket.org/2.0";

const DEFAULT_CALLBACK_PORT: u16 = 8080;
const DEFAULT_SCOPE: &str = "repositories";
const DEFAULT_FLOW_TIMEOUT: Duration = Duration::from_secs(300);

const CLIENT_ID_ENV: &str = "BITBUCKET_OAUTH_CLIENT_ID";
const CLIENT_SECRET_ENV: &str = "BITBUCKET_OAUTH_CLIENT_SECRET";

/// Everything the authenticator and executor need to know up front.
///
/// The callback port stays configuration rather than a constant: it must
/// match the redirect URI registered with the OAuth consumer.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub client_id: String,
    /// Absent for public clients; they authenticate the token endpoint
    /// request via HTTP Basic with an empty password instead.
    pub client_secret: Option<String>,
    pub authorize_url: String,
    pub token_url: String,
    pub api_base_url: String,
    pub scopes: Vec<String>,
    pub callback_port: u16,
    /// How long one authorization attempt may wait for the browser callback.
    pub flow_timeout: Duration,
}

impl GatewayConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            authorize_url: BITBUCKET_AUTHORIZE_URL.to_string(),
            token_url: BITBUCKET_TOKEN_URL.to_string(),
            api_base_url: BITBUCKET_API_BASE_URL.to_string(),
            scopes: vec![DEFAULT_SCOPE.to_string()],
            callback_port: DEFAULT_CALLBACK_PORT,
            flow_timeout: DEFAULT_FLOW_TIMEOUT,
        }
    }

    /// Read client credentials from `BITBUCKET_OAUTH_CLIENT_ID` /
    /// `BITBUCKET_OAUTH_CLIENT_SECRET`, with Bitbucket Cloud defaults for
    /// everything else.
    pub fn from_env() -> GatewayResult<Self> {
        let client_id = std::env::var(CLIENT_ID_ENV)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| GatewayError::config(format!("{CLIENT_ID_ENV} is not set")))?;

        let mut config = Self::new(client_id);
        config.client_secret = std::env::var(CLIENT_SECRET_ENV)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        Ok(config)
    }

    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn with_callback_port(mut self, port: u16) -> Self {
        self.callback_port = port;
        self
    }

    pub fn with_flow_timeout(mut self, timeout: Duration) -> Self {
        self.flow_timeout = timeout;
        self
    }

    pub fn with_authorize_url(mut self, url: impl Into<String>) -> Self {
        self.authorize_url = url.into();
        self
    }

    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub(crate) fn redirect_uri(&self) -> String {
        format!("http://localhost:{}/callback", self.callback_port)
    }

    pub(crate) fn validate(&self) -> GatewayResult<()> {
        if self.client_id.trim().is_empty() {
            return Err(GatewayError::config("oauth client id is required"));
        }
        if self.callback_port == 0 {
            return Err(GatewayError::config(
                "callback port must match the registered redirect uri; 0 is not allowed",
            ));
        }
        Ok(())
    }
}
