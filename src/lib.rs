//! OAuth 2.0 (PKCE) authenticated gateway to the Bitbucket Cloud REST API.
//!
//! The crate drives the full browser-based authorization-code flow
//! (loopback callback listener, token exchange, reactive refresh) and
//! funnels every protected API call through a single executor that
//! refreshes and retries exactly once on 401.

mod api;
mod config;
mod oauth;
mod shared;

pub use api::bitbucket::{parse_repository_url, PullRequestState, RepositorySlug};
pub use api::executor::BitbucketClient;
pub use config::{
    GatewayConfig, BITBUCKET_API_BASE_URL, BITBUCKET_AUTHORIZE_URL, BITBUCKET_TOKEN_URL,
};
pub use oauth::flow::Authenticator;
pub use oauth::pkce::{code_challenge_s256, generate_pkce_pair, PkcePair};
pub use oauth::store::{TokenPair, TokenStore};
pub use oauth::token_exchange::OAuthTokenSet;
pub use shared::error::{GatewayError, GatewayResult};
