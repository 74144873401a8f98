//! Usage: OAuth 2.0 authorization-code flow with PKCE — listener, exchange,
//! refresh, and the in-process token store.

pub(crate) mod callback_server;
pub(crate) mod flow;
pub(crate) mod pkce;
pub(crate) mod store;
pub(crate) mod token_exchange;
