//! Stub OAuth provider for tests.
//!
//! Serves `POST /token` on an ephemeral port with canned responses:
//! - `authorization_code` with code `abc123` → `at_exchanged` / `rt_exchanged`
//! - `refresh_token` → `at_refreshed` with no refresh token (callers keep the old one)
//! - `refresh_token` with `rt_revoked` → 400 `invalid_grant`
//!
//! `POST /hang` never answers, for timeout tests.
//!
//! `GET /api/whoami` echoes the `Authorization` header back, standing in for
//! a provider API that collaborators call through an `AuthorizedClient`.
//!
//! Every token request is recorded so tests can assert on what was sent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::Router;
use axum::extract::{Form, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use common::Secret;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use crate::client::{AuthStyle, OAuthConfig};
use crate::flow::{AuthorizationFlowRunner, FlowConfig};

/// Refresh token the stub rejects with `invalid_grant`.
const REVOKED: &str = "rt_revoked";

/// Which client authentication the stub accepts.
#[derive(Debug, Clone, Copy)]
pub(crate) enum AcceptAuth {
    Header,
    Params,
}

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub form: HashMap<String, String>,
    pub authorization: Option<String>,
}

#[derive(Clone)]
struct StubState {
    accept: AcceptAuth,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

pub(crate) struct StubProvider {
    pub auth_url: String,
    pub token_url: String,
    pub api_url: String,
    pub hang_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl StubProvider {
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

pub(crate) async fn start_stub_provider(accept: AcceptAuth) -> StubProvider {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let state = StubState {
        accept,
        requests: requests.clone(),
    };

    let app = Router::new()
        .route("/token", post(token_handler))
        .route("/api/whoami", get(whoami_handler))
        .route("/hang", post(hang_handler))
        .with_state(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    StubProvider {
        auth_url: format!("http://{addr}/authorize"),
        token_url: format!("http://{addr}/token"),
        api_url: format!("http://{addr}/api/whoami"),
        hang_url: format!("http://{addr}/hang"),
        requests,
    }
}

pub(crate) fn test_config(stub: &StubProvider, auth_style: AuthStyle) -> OAuthConfig {
    OAuthConfig {
        client_id: "test-client".into(),
        client_secret: Secret::new("test-secret".into()),
        auth_url: stub.auth_url.clone(),
        token_url: stub.token_url.clone(),
        scopes: vec!["heartrate".into(), "activity".into()],
        auth_style,
        pkce: false,
    }
}

/// Flow settings for tests: ephemeral port, short grace.
pub(crate) fn test_flow_config() -> FlowConfig {
    FlowConfig {
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        callback_path: "/callback".into(),
        redirect_host: "127.0.0.1".into(),
        timeout: std::time::Duration::from_secs(10),
        shutdown_grace: std::time::Duration::from_millis(10),
    }
}

/// Runner whose presenter plays the browser: it follows the redirect with
/// `code` and the state from the authorize URL. Counts how often it ran.
pub(crate) fn auto_approving_runner(
    code: &'static str,
) -> (AuthorizationFlowRunner, Arc<std::sync::atomic::AtomicUsize>) {
    let presented = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = presented.clone();
    let runner = AuthorizationFlowRunner::new(test_flow_config()).with_presenter(move |url| {
        counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let params: HashMap<String, String> = reqwest::Url::parse(url)
            .unwrap()
            .query_pairs()
            .into_owned()
            .collect();
        let callback = format!(
            "{}?code={code}&state={}",
            params["redirect_uri"], params["state"]
        );
        tokio::spawn(async move {
            let _ = reqwest::get(callback).await;
        });
    });
    (runner, presented)
}

async fn hang_handler() -> StatusCode {
    std::future::pending::<()>().await;
    StatusCode::OK
}

async fn whoami_handler(headers: HeaderMap) -> (StatusCode, String) {
    match headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        Some(value) => (StatusCode::OK, value.to_string()),
        None => (StatusCode::UNAUTHORIZED, String::new()),
    }
}

async fn token_handler(
    State(state): State<StubState>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, axum::Json<Value>) {
    let authorization = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.requests.lock().unwrap().push(RecordedRequest {
        form: form.clone(),
        authorization: authorization.clone(),
    });

    let client_ok = match state.accept {
        AcceptAuth::Header => authorization.is_some(),
        AcceptAuth::Params => authorization.is_none() && form.contains_key("client_secret"),
    };
    if !client_ok {
        return (
            StatusCode::UNAUTHORIZED,
            axum::Json(json!({"error": "invalid_client"})),
        );
    }

    match form.get("grant_type").map(String::as_str) {
        Some("authorization_code") if form.get("code").map(String::as_str) == Some("abc123") => (
            StatusCode::OK,
            axum::Json(json!({
                "access_token": "at_exchanged",
                "token_type": "Bearer",
                "refresh_token": "rt_exchanged",
                "expires_in": 3600,
            })),
        ),
        Some("refresh_token") if form.get("refresh_token").map(String::as_str) != Some(REVOKED) => (
            StatusCode::OK,
            axum::Json(json!({
                "access_token": "at_refreshed",
                "token_type": "bearer",
                "expires_in": 3600,
            })),
        ),
        Some("authorization_code") | Some("refresh_token") => (
            StatusCode::BAD_REQUEST,
            axum::Json(json!({
                "error": "invalid_grant",
                "error_description": "grant is invalid or revoked",
            })),
        ),
        _ => (
            StatusCode::BAD_REQUEST,
            axum::Json(json!({"error": "unsupported_grant_type"})),
        ),
    }
}
