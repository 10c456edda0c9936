//! Token sources
//!
//! A `TokenSource` hands out a currently usable token. Two implementations
//! stack on top of each other for every provider session:
//!
//! - `RefreshingTokenSource` caches the token and refreshes it through the
//!   token endpoint once it is (nearly) expired.
//! - `PersistingTokenSource` writes whatever the inner source returns to the
//!   credential store before handing it out, so a silent refresh inside some
//!   outbound call is on disk before anyone else reads the store.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::client::OAuthClient;
use crate::credentials::CredentialStore;
use crate::error::{Error, Result};
use crate::token::Token;

/// Boxed future returned by `TokenSource::token`.
pub type TokenFuture<'a> = Pin<Box<dyn Future<Output = Result<Token>> + Send + 'a>>;

/// Anything that can produce a usable token on demand.
///
/// Uses `Pin<Box<dyn Future>>` so sources can be stacked as `Arc<dyn TokenSource>`.
pub trait TokenSource: Send + Sync {
    fn token(&self) -> TokenFuture<'_>;
}

/// Caches a token and refreshes it when it expires.
///
/// The mutex is held across the refresh, so concurrent callers that all see
/// an expired token trigger a single refresh and share its result.
pub struct RefreshingTokenSource {
    provider: String,
    client: Arc<OAuthClient>,
    current: Mutex<Token>,
}

impl RefreshingTokenSource {
    pub fn new(provider: impl Into<String>, client: Arc<OAuthClient>, token: Token) -> Self {
        Self {
            provider: provider.into(),
            client,
            current: Mutex::new(token),
        }
    }
}

impl TokenSource for RefreshingTokenSource {
    fn token(&self) -> TokenFuture<'_> {
        Box::pin(async move {
            let mut current = self.current.lock().await;
            if current.is_valid() {
                return Ok(current.clone());
            }

            let Some(refresh_token) = current.refresh_token.clone() else {
                return Err(Error::TokenExpired(format!(
                    "{} access token expired and no refresh token is stored",
                    self.provider
                )));
            };

            debug!(provider = %self.provider, "access token expired, refreshing");
            let token = self.client.refresh(&refresh_token).await?;
            info!(provider = %self.provider, expiry = ?token.expiry, "refreshed access token");
            *current = token.clone();
            Ok(token)
        })
    }
}

/// Writes every token the inner source returns through to the store.
///
/// Inner errors propagate unchanged and nothing is written. A failed write
/// is logged and the token is still returned: the call in flight matters
/// more than the cached copy, which the next refresh re-derives anyway.
pub struct PersistingTokenSource {
    provider: String,
    inner: Arc<dyn TokenSource>,
    store: Arc<CredentialStore>,
}

impl PersistingTokenSource {
    pub fn new(
        provider: impl Into<String>,
        inner: Arc<dyn TokenSource>,
        store: Arc<CredentialStore>,
    ) -> Self {
        Self {
            provider: provider.into(),
            inner,
            store,
        }
    }
}

impl TokenSource for PersistingTokenSource {
    fn token(&self) -> TokenFuture<'_> {
        Box::pin(async move {
            let token = self.inner.token().await?;
            if let Err(e) = self.store.set(&self.provider, token.clone()).await {
                warn!(
                    provider = %self.provider,
                    error = %e,
                    "failed to persist token, continuing with in-memory copy"
                );
            }
            Ok(token)
        })
    }
}
