//! Usage: In-process token store shared between the flow and the executor.

use crate::oauth::token_exchange::OAuthTokenSet;
use std::sync::Mutex;

/// Access/refresh tokens for the current session.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Holds at most one token pair. Updates are atomic: a login replaces both
/// fields together, a refresh keeps the old refresh token when the provider
/// does not rotate it, so readers never see a half-updated pair.
#[derive(Debug, Default)]
pub struct TokenStore {
    inner: Mutex<Option<TokenPair>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<TokenPair>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("token store mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Store the result of a fresh login, replacing whatever was there.
    pub fn replace(&self, tokens: &OAuthTokenSet) {
        *self.lock() = Some(TokenPair {
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
        });
    }

    /// Store the result of a refresh. Bitbucket does not always rotate the
    /// refresh token; when the response omits it the stored one survives.
    pub fn apply_refresh(&self, tokens: &OAuthTokenSet) {
        let mut guard = self.lock();
        let retained = tokens
            .refresh_token
            .clone()
            .or_else(|| guard.as_ref().and_then(|pair| pair.refresh_token.clone()));
        *guard = Some(TokenPair {
            access_token: tokens.access_token.clone(),
            refresh_token: retained,
        });
    }

    /// Current pair, for callers that persist sessions across restarts.
    pub fn snapshot(&self) -> Option<TokenPair> {
        self.lock().clone()
    }

    /// Seed the store from a persisted session.
    pub fn restore(&self, pair: TokenPair) {
        *self.lock() = Some(pair);
    }

    pub fn access_token(&self) -> Option<String> {
        self.lock().as_ref().map(|pair| pair.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.lock()
            .as_ref()
            .and_then(|pair| pair.refresh_token.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock().is_some()
    }

    pub fn clear(&self) {
        *self.lock() = None;
    }
}
