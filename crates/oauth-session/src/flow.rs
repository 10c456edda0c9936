//! Authorization-code flow with a local redirect listener
//!
//! Flow:
//! 1. Bind the callback listener (fixed address from `FlowConfig`)
//! 2. Present the authorize URL to the operator
//! 3. Wait, bounded by `FlowConfig::timeout`, for the browser to hit the
//!    callback path with a `code` and the matching `state`
//! 4. Answer the browser, then close the listener after a short grace delay
//! 5. Exchange the code at the token endpoint
//!
//! The listener task and the waiting caller meet on a oneshot channel. The
//! sender sits in an `Option` so exactly one callback can take it; the first
//! valid code wins and later hits are answered with 410.
//!
//! The runner never touches the credential store. Persisting the token is
//! the caller's job.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info, warn};

use crate::client::OAuthClient;
use crate::constants::{
    DEFAULT_CALLBACK_PATH, DEFAULT_CALLBACK_PORT, DEFAULT_CALLBACK_TIMEOUT, DEFAULT_REDIRECT_HOST,
    DEFAULT_SHUTDOWN_GRACE,
};
use crate::error::{Error, Result};
use crate::pkce::{compute_challenge, generate_state, generate_verifier};
use crate::token::Token;

const AUTHORIZED_MESSAGE: &str = "Authorized! You can close this tab/window now.";

/// Callback listener settings.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    pub listen_addr: SocketAddr,
    pub callback_path: String,
    /// Host used in the redirect URL; the port comes from the bound listener.
    /// Must reach `listen_addr`: a name like `localhost` only works if the
    /// browser resolves it to the same address family the listener binds.
    pub redirect_host: String,
    pub timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_CALLBACK_PORT)),
            callback_path: DEFAULT_CALLBACK_PATH.to_string(),
            redirect_host: DEFAULT_REDIRECT_HOST.to_string(),
            timeout: DEFAULT_CALLBACK_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

/// Receives the authorize URL once the listener is up.
pub type UrlPresenter = Arc<dyn Fn(&str) + Send + Sync>;

/// Default presenter: print the URL to stderr for the operator to open.
pub fn print_authorize_url(url: &str) {
    eprintln!("\n----------------------------------------------------------------");
    eprintln!("Please authenticate by visiting this URL:\n{url}");
    eprintln!("----------------------------------------------------------------");
}

/// What the callback handler hands to the waiting flow.
#[derive(Debug, PartialEq, Eq)]
enum CallbackOutcome {
    Code(String),
    Denied(String),
}

#[derive(Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Clone)]
struct CallbackState {
    expected_state: Arc<str>,
    sender: Arc<Mutex<Option<oneshot::Sender<CallbackOutcome>>>>,
}

fn callback_router(path: &str, state: CallbackState) -> Router {
    Router::new()
        .route(path, get(callback_handler))
        .with_state(state)
}

/// GET {callback_path}: accept the provider's redirect.
///
/// Missing code or a foreign `state` is answered with 400 and the flow keeps
/// waiting. A provider `error` ends the flow.
async fn callback_handler(
    State(state): State<CallbackState>,
    Query(params): Query<CallbackParams>,
) -> (StatusCode, String) {
    let mut sender = state.sender.lock().await;
    if sender.is_none() {
        return (
            StatusCode::GONE,
            "Authorization already completed. You can close this tab/window now.".into(),
        );
    }

    if params.state.as_deref() != Some(&*state.expected_state) {
        warn!("authorization callback with unexpected state, ignoring");
        return (StatusCode::BAD_REQUEST, "State mismatch".into());
    }

    if let Some(error) = params.error {
        let reason = match params.error_description {
            Some(description) => format!("{error}: {description}"),
            None => error,
        };
        if let Some(tx) = sender.take() {
            let _ = tx.send(CallbackOutcome::Denied(reason.clone()));
        }
        return (
            StatusCode::BAD_REQUEST,
            format!("Authorization failed: {reason}"),
        );
    }

    let Some(code) = params.code.filter(|c| !c.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Code not found".into());
    };

    if let Some(tx) = sender.take() {
        let _ = tx.send(CallbackOutcome::Code(code));
    }
    (StatusCode::OK, AUTHORIZED_MESSAGE.into())
}

/// Runs one authorization-code flow per call.
///
/// Two runs must not overlap on the same listen address; the second bind
/// fails with `PortInUse`.
pub struct AuthorizationFlowRunner {
    config: FlowConfig,
    presenter: UrlPresenter,
}

impl AuthorizationFlowRunner {
    pub fn new(config: FlowConfig) -> Self {
        Self {
            config,
            presenter: Arc::new(print_authorize_url),
        }
    }

    /// Replace how the authorize URL reaches the operator (e.g. open a browser).
    pub fn with_presenter(mut self, presenter: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.presenter = Arc::new(presenter);
        self
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// Obtain a fresh token through the browser.
    pub async fn run(&self, client: &OAuthClient) -> Result<Token> {
        if !self.config.callback_path.starts_with('/') {
            return Err(Error::AuthFlow(format!(
                "callback path must start with '/', got: {}",
                self.config.callback_path
            )));
        }

        let state = generate_state();
        let verifier = client.config().pkce.then(generate_verifier);
        let challenge = verifier.as_deref().map(compute_challenge);

        let listener = bind_listener(self.config.listen_addr).await?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::Bind(format!("reading listener address: {e}")))?;
        let redirect_uri = format!(
            "http://{}:{}{}",
            self.config.redirect_host,
            local_addr.port(),
            self.config.callback_path
        );

        let (code_tx, code_rx) = oneshot::channel();
        let router = callback_router(
            &self.config.callback_path,
            CallbackState {
                expected_state: Arc::from(state.as_str()),
                sender: Arc::new(Mutex::new(Some(code_tx))),
            },
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "callback listener failed");
            }
            debug!("callback listener stopped");
        });

        let authorize_url = client.authorize_url(&redirect_uri, &state, challenge.as_deref());
        let authorize_url = match authorize_url {
            Ok(url) => url,
            Err(e) => {
                let _ = shutdown_tx.send(());
                return Err(e);
            }
        };

        info!(addr = %local_addr, redirect_uri, "waiting for authorization callback");
        (self.presenter)(&authorize_url);

        let outcome = tokio::time::timeout(self.config.timeout, code_rx).await;

        let code = match outcome {
            Ok(Ok(CallbackOutcome::Code(code))) => {
                schedule_shutdown(shutdown_tx, self.config.shutdown_grace);
                code
            }
            Ok(Ok(CallbackOutcome::Denied(reason))) => {
                schedule_shutdown(shutdown_tx, self.config.shutdown_grace);
                return Err(Error::AuthDenied(reason));
            }
            Ok(Err(_)) => {
                return Err(Error::AuthFlow(
                    "callback listener stopped before a code arrived".into(),
                ));
            }
            Err(_) => {
                let _ = shutdown_tx.send(());
                return Err(Error::AuthTimeout(self.config.timeout));
            }
        };

        info!("authorization code received, exchanging for token");
        client
            .exchange_code(&code, &redirect_uri, verifier.as_deref())
            .await
    }
}

async fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::AddrInUse {
            Error::PortInUse(addr)
        } else {
            Error::Bind(format!("{addr}: {e}"))
        }
    })
}

/// Close the listener after `grace` without making the caller wait for it.
fn schedule_shutdown(shutdown_tx: oneshot::Sender<()>, grace: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        let _ = shutdown_tx.send(());
    });
}
