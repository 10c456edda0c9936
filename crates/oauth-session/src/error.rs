//! Error types for OAuth session operations

use std::net::SocketAddr;
use std::time::Duration;

/// Errors from credential storage, the authorization flow, and token
/// endpoint interactions.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("reading credential file failed: {0}")]
    StoreRead(String),

    #[error("credential file is malformed: {0}")]
    StoreDecode(String),

    #[error("writing credential file failed: {0}")]
    StoreWrite(String),

    #[error("callback listener could not bind: {0}")]
    Bind(String),

    #[error("callback address {0} is already in use")]
    PortInUse(SocketAddr),

    #[error("no authorization callback received within {}s", .0.as_secs())]
    AuthTimeout(Duration),

    #[error("authorization denied by provider: {0}")]
    AuthDenied(String),

    #[error("authorization flow failed: {0}")]
    AuthFlow(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("token expired: {0}")]
    TokenExpired(String),

    #[error("could not obtain a token for {provider}: {source} (re-run to authenticate)")]
    Authorization {
        provider: String,
        #[source]
        source: Box<Error>,
    },
}

/// Result alias for OAuth session operations.
pub type Result<T> = std::result::Result<T, Error>;
