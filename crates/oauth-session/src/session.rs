//! Provider sessions
//!
//! `Authenticator::session` is the one place collaborators come to for an
//! authenticated HTTP client. It looks the provider up in the credential
//! store, runs the browser flow when nothing is stored, and stacks the
//! refreshing and persisting token sources under an `AuthorizedClient`.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest::{IntoUrl, Method, Request, RequestBuilder, Response};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::client::{OAuthClient, OAuthConfig};
use crate::constants::DEFAULT_TOKEN_TIMEOUT;
use crate::credentials::CredentialStore;
use crate::error::{Error, Result};
use crate::flow::AuthorizationFlowRunner;
use crate::source::{PersistingTokenSource, RefreshingTokenSource, TokenSource};
use crate::token::Token;

/// Hands out authenticated clients per provider.
pub struct Authenticator {
    store: Arc<CredentialStore>,
    runner: AuthorizationFlowRunner,
    http: reqwest::Client,
    token_timeout: Duration,
    /// One browser flow at a time; they all share the callback address.
    flow_lock: Mutex<()>,
}

impl Authenticator {
    pub fn new(
        store: Arc<CredentialStore>,
        runner: AuthorizationFlowRunner,
        http: reqwest::Client,
    ) -> Self {
        Self {
            store,
            runner,
            http,
            token_timeout: DEFAULT_TOKEN_TIMEOUT,
            flow_lock: Mutex::new(()),
        }
    }

    /// Bound on each token endpoint request made for sessions handed out here.
    pub fn with_token_timeout(mut self, timeout: Duration) -> Self {
        self.token_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Authenticated client for `provider`, authorizing through the browser
    /// first if no token is stored.
    pub async fn session(&self, provider: &str, config: OAuthConfig) -> Result<AuthorizedClient> {
        let client = Arc::new(
            OAuthClient::new(config, self.http.clone()).with_request_timeout(self.token_timeout),
        );

        let token = match self.store.get(provider).await {
            Some(token) => {
                debug!(provider, "using stored token");
                token
            }
            None => self
                .authorize(provider, &client)
                .await
                .map_err(|e| Error::Authorization {
                    provider: provider.to_string(),
                    source: Box::new(e),
                })?,
        };

        let refreshing = Arc::new(RefreshingTokenSource::new(provider, client, token));
        let source = Arc::new(PersistingTokenSource::new(
            provider,
            refreshing,
            self.store.clone(),
        ));

        Ok(AuthorizedClient {
            provider: provider.to_string(),
            http: self.http.clone(),
            source,
        })
    }

    async fn authorize(&self, provider: &str, client: &OAuthClient) -> Result<Token> {
        let _guard = self.flow_lock.lock().await;

        // A flow that finished while we waited for the lock may have covered us
        if let Some(token) = self.store.get(provider).await {
            return Ok(token);
        }

        info!(provider, "no stored token, starting browser authorization");
        let token = self.runner.run(client).await?;
        self.store.set(provider, token.clone()).await?;
        info!(provider, "authorization complete, token stored");
        Ok(token)
    }
}

/// HTTP client that authenticates every request with the provider's token.
///
/// Each send pulls a token from the persisting source, so an expired token
/// is refreshed and written to the store before the request goes out.
#[derive(Clone)]
pub struct AuthorizedClient {
    provider: String,
    http: reqwest::Client,
    source: Arc<dyn TokenSource>,
}

impl AuthorizedClient {
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Current token, refreshed if needed.
    pub async fn token(&self) -> Result<Token> {
        self.source.token().await
    }

    /// Start a request. The token is attached by `send`, not here.
    pub fn request<U: IntoUrl>(&self, method: Method, url: U) -> RequestBuilder {
        self.http.request(method, url)
    }

    pub async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let request = builder
            .build()
            .map_err(|e| Error::Http(format!("building request: {e}")))?;
        self.execute(request).await
    }

    pub async fn execute(&self, mut request: Request) -> Result<Response> {
        let token = self.source.token().await?;
        let value = HeaderValue::from_str(&token.authorization_value())
            .map_err(|e| Error::Http(format!("invalid authorization header: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, value);

        debug!(
            provider = %self.provider,
            method = %request.method(),
            url = %request.url(),
            "sending authorized request"
        );
        self.http
            .execute(request)
            .await
            .map_err(|e| Error::Http(e.to_string()))
    }

    pub async fn get<U: IntoUrl>(&self, url: U) -> Result<Response> {
        self.send(self.request(Method::GET, url)).await
    }
}
