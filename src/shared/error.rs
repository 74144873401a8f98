//! Usage: Unified error model for the OAuth flow and the API executor.

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Everything that can go wrong between "no token" and "parsed API response".
///
/// Messages prefer the provider's own error payload when one was returned
/// and fall back to the transport-level failure text.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// The provider redirected back with an `error` parameter, or the
    /// callback was malformed (missing code, bad state, non-GET).
    #[error("oauth callback rejected: {reason}")]
    OAuthCallback { reason: String },

    /// No callback arrived within the configured flow timeout.
    #[error("oauth authorization timed out waiting for the browser callback")]
    OAuthTimeout,

    /// The token endpoint rejected the authorization-code grant.
    #[error("oauth token exchange failed: {message}")]
    TokenExchange { message: String },

    /// The token endpoint rejected the refresh grant, or there was no
    /// refresh token to send.
    #[error("oauth token refresh failed: {message}")]
    TokenRefresh { message: String },

    /// A protected call got 401, and the single refresh-and-retry did not
    /// recover. Wraps the original failure; the executor never loops.
    #[error("authentication failed: {message}")]
    Authentication { message: String },

    /// Any other non-2xx or transport failure on a protected call.
    #[error("api request failed: {message}")]
    ApiRequest { status: Option<u16>, message: String },

    /// A second authorization flow was started while one was pending.
    #[error("an oauth authorization flow is already in progress")]
    FlowInProgress,

    /// Invalid configuration or a local environment failure (bind, browser).
    #[error("{message}")]
    Config { message: String },
}

impl GatewayError {
    pub(crate) fn callback(reason: impl Into<String>) -> Self {
        Self::OAuthCallback {
            reason: reason.into(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub(crate) fn api(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::ApiRequest {
            status,
            message: message.into(),
        }
    }
}
