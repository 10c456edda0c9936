//! OAuth2 client configuration and token endpoint calls
//!
//! Builds authorize URLs and talks to the provider's token endpoint for the
//! two grants this tool needs:
//! 1. Authorization code exchange (initial flow completion)
//! 2. Refresh token (transparent refresh from the token source)
//!
//! Both are form-encoded POSTs. Providers disagree on how the client
//! authenticates (Fitbit wants HTTP Basic, Strava takes body params), so the
//! style is configurable and can be auto-detected.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use chrono::Utc;
use common::Secret;
use reqwest::Url;
use serde::Deserialize;
use tracing::debug;

use crate::constants::DEFAULT_TOKEN_TIMEOUT;
use crate::error::{Error, Result};
use crate::token::{Token, TokenErrorResponse, TokenResponse};

/// How the client id and secret are sent to the token endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum AuthStyle {
    /// Try HTTP Basic first, fall back to body params on rejection, and
    /// remember whichever worked.
    #[default]
    #[serde(rename = "auto")]
    AutoDetect,
    /// HTTP Basic `Authorization` header.
    #[serde(rename = "header")]
    InHeader,
    /// `client_id` / `client_secret` in the form body.
    #[serde(rename = "params")]
    InParams,
}

/// Per-provider OAuth2 client configuration.
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub auth_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    pub auth_style: AuthStyle,
    /// Send a PKCE S256 challenge with the authorization request.
    pub pkce: bool,
}

const STYLE_UNKNOWN: u8 = 0;
const STYLE_HEADER: u8 = 1;
const STYLE_PARAMS: u8 = 2;

/// Token endpoint client for one provider.
pub struct OAuthClient {
    config: OAuthConfig,
    http: reqwest::Client,
    detected_style: AtomicU8,
    request_timeout: Duration,
}

impl OAuthClient {
    pub fn new(config: OAuthConfig, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            detected_style: AtomicU8::new(STYLE_UNKNOWN),
            request_timeout: DEFAULT_TOKEN_TIMEOUT,
        }
    }

    /// Bound each token endpoint request. A refresh holds the token source
    /// lock while it runs, so this also bounds how long callers queue.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// Build the authorize URL the operator opens in a browser.
    ///
    /// Adds `response_type=code`, the client id, redirect URL, space-joined
    /// scopes, `state`, `access_type=offline`, and the PKCE challenge when
    /// one is given. Existing query parameters on `auth_url` are kept.
    pub fn authorize_url(
        &self,
        redirect_uri: &str,
        state: &str,
        challenge: Option<&str>,
    ) -> Result<String> {
        let mut url = Url::parse(&self.config.auth_url).map_err(|e| {
            Error::AuthFlow(format!("invalid auth_url {}: {e}", self.config.auth_url))
        })?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", redirect_uri);
            if !self.config.scopes.is_empty() {
                query.append_pair("scope", &self.config.scopes.join(" "));
            }
            query
                .append_pair("state", state)
                .append_pair("access_type", "offline");
            if let Some(challenge) = challenge {
                query
                    .append_pair("code_challenge", challenge)
                    .append_pair("code_challenge_method", "S256");
            }
        }
        Ok(url.into())
    }

    /// Exchange an authorization code for a token.
    ///
    /// `redirect_uri` must be the one sent in the authorize URL. `verifier`
    /// is the PKCE code verifier, when the flow used one.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        verifier: Option<&str>,
    ) -> Result<Token> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ];
        if let Some(verifier) = verifier {
            params.push(("code_verifier", verifier));
        }
        self.retrieve_token(&params).await
    }

    /// Obtain a new access token with a refresh token.
    ///
    /// Providers that do not rotate refresh tokens omit one from the
    /// response; the old refresh token is carried over in that case.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Token> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        let mut token = self.retrieve_token(&params).await?;
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }
        Ok(token)
    }

    async fn retrieve_token(&self, params: &[(&str, &str)]) -> Result<Token> {
        let style = match self.config.auth_style {
            AuthStyle::AutoDetect => match self.detected_style.load(Ordering::Relaxed) {
                STYLE_HEADER => AuthStyle::InHeader,
                STYLE_PARAMS => AuthStyle::InParams,
                _ => AuthStyle::AutoDetect,
            },
            configured => configured,
        };

        if style != AuthStyle::AutoDetect {
            return self.post_token(params, style).await;
        }

        match self.post_token(params, AuthStyle::InHeader).await {
            Ok(token) => {
                self.detected_style.store(STYLE_HEADER, Ordering::Relaxed);
                Ok(token)
            }
            Err(Error::TokenExchange(_) | Error::InvalidCredentials(_)) => {
                debug!(
                    token_url = %self.config.token_url,
                    "header client auth rejected, retrying with params"
                );
                let token = self.post_token(params, AuthStyle::InParams).await?;
                self.detected_style.store(STYLE_PARAMS, Ordering::Relaxed);
                Ok(token)
            }
            Err(e) => Err(e),
        }
    }

    async fn post_token(&self, params: &[(&str, &str)], style: AuthStyle) -> Result<Token> {
        let mut form: Vec<(&str, &str)> = params.to_vec();
        if style == AuthStyle::InParams {
            form.push(("client_id", self.config.client_id.as_str()));
            form.push(("client_secret", self.config.client_secret.expose().as_str()));
        }

        let mut request = self
            .http
            .post(&self.config.token_url)
            .timeout(self.request_timeout)
            .form(&form);
        if style == AuthStyle::InHeader {
            request = request.basic_auth(
                &self.config.client_id,
                Some(self.config.client_secret.expose()),
            );
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Http(format!(
                    "token request timed out after {}s",
                    self.request_timeout.as_secs_f64()
                ))
            } else {
                Error::Http(format!("token request failed: {e}"))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            let parsed = serde_json::from_str::<TokenErrorResponse>(&body).ok();
            let detail = parsed
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or(body);

            // 401/403 or invalid_grant: the grant or the client was rejected outright
            let rejected = status.as_u16() == 401
                || status.as_u16() == 403
                || parsed.is_some_and(|p| p.error == "invalid_grant");
            if rejected {
                return Err(Error::InvalidCredentials(format!(
                    "token endpoint rejected request ({status}): {detail}"
                )));
            }
            return Err(Error::TokenExchange(format!(
                "token endpoint returned {status}: {detail}"
            )));
        }

        let token_response = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::TokenExchange(format!("invalid token response: {e}")))?;
        if token_response.access_token.is_empty() {
            return Err(Error::TokenExchange(
                "token response is missing access_token".into(),
            ));
        }
        Ok(token_response.into_token(Utc::now()))
    }
}
