//! Usage: Authenticated access to the Bitbucket Cloud REST API.

pub(crate) mod bitbucket;
pub(crate) mod executor;
