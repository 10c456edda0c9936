//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Client ids and secrets come from `<PROVIDER>_CLIENT_ID` /
//! `<PROVIDER>_CLIENT_SECRET` (a `.env` file is loaded first) or
//! `client_secret_file`, never from the TOML itself.

use common::Secret;
use oauth_session::{
    AuthStyle, DEFAULT_CALLBACK_PATH, DEFAULT_CALLBACK_PORT, DEFAULT_REDIRECT_HOST, FlowConfig,
    OAuthConfig, known_endpoints,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub callback: CallbackConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
}

/// Credential file settings
#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

/// Local redirect listener settings
#[derive(Debug, Deserialize)]
pub struct CallbackConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    #[serde(default = "default_callback_path")]
    pub path: String,
    #[serde(default = "default_redirect_host")]
    pub redirect_host: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,
}

/// Outbound HTTP timeouts
#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Whole-request bound for authenticated API calls
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Bound on each token exchange or refresh
    #[serde(default = "default_token_timeout")]
    pub token_timeout_secs: u64,
}

/// Per-provider OAuth settings
#[derive(Debug, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Defaults to the known endpoint for fitbit and strava
    pub auth_url: Option<String>,
    pub token_url: Option<String>,
    #[serde(default)]
    pub auth_style: AuthStyle,
    #[serde(default)]
    pub pkce: bool,
    /// Path to a file containing the client secret (alternative to the env var)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    #[serde(skip)]
    pub client_id: Option<String>,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("credentials.json")
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_CALLBACK_PORT))
}

fn default_callback_path() -> String {
    DEFAULT_CALLBACK_PATH.to_string()
}

fn default_redirect_host() -> String {
    DEFAULT_REDIRECT_HOST.to_string()
}

fn default_timeout() -> u64 {
    300
}

fn default_shutdown_grace() -> u64 {
    1000
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    60
}

fn default_token_timeout() -> u64 {
    oauth_session::DEFAULT_TOKEN_TIMEOUT.as_secs()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            path: default_callback_path(),
            redirect_host: default_redirect_host(),
            timeout_secs: default_timeout(),
            shutdown_grace_ms: default_shutdown_grace(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            token_timeout_secs: default_token_timeout(),
        }
    }
}

impl ProviderConfig {
    fn with_scopes(scopes: &[&str]) -> Self {
        Self {
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            auth_url: None,
            token_url: None,
            auth_style: AuthStyle::default(),
            pkce: false,
            client_secret_file: None,
            client_id: None,
            client_secret: None,
        }
    }
}

impl Default for Config {
    /// Fitbit and Strava with the scopes the workout importer needs.
    fn default() -> Self {
        let mut providers = BTreeMap::new();
        providers.insert(
            "fitbit".to_string(),
            ProviderConfig::with_scopes(&["heartrate", "activity"]),
        );
        providers.insert(
            "strava".to_string(),
            ProviderConfig::with_scopes(&["activity:write"]),
        );
        Self {
            store: StoreConfig::default(),
            callback: CallbackConfig::default(),
            http: HttpConfig::default(),
            providers,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then resolve client credentials.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.validate()?;
        config.resolve_credentials()?;
        Ok(config)
    }

    /// Built-in provider set, used when no config file exists.
    pub fn builtin() -> common::Result<Self> {
        let mut config = Config::default();
        config.resolve_credentials()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if self.callback.timeout_secs == 0 {
            return Err(common::Error::Config(
                "callback.timeout_secs must be greater than 0".into(),
            ));
        }

        for (field, secs) in [
            ("http.connect_timeout_secs", self.http.connect_timeout_secs),
            ("http.request_timeout_secs", self.http.request_timeout_secs),
            ("http.token_timeout_secs", self.http.token_timeout_secs),
        ] {
            if secs == 0 {
                return Err(common::Error::Config(format!(
                    "{field} must be greater than 0"
                )));
            }
        }

        if !self.callback.path.starts_with('/') {
            return Err(common::Error::Config(format!(
                "callback.path must start with '/', got: {}",
                self.callback.path
            )));
        }

        for (name, provider) in &self.providers {
            let endpoints = [("auth_url", &provider.auth_url), ("token_url", &provider.token_url)];
            for (field, url) in endpoints {
                if let Some(url) = url
                    && !url.starts_with("http://")
                    && !url.starts_with("https://")
                {
                    return Err(common::Error::Config(format!(
                        "providers.{name}.{field} must start with http:// or https://, got: {url}"
                    )));
                }
            }
            if known_endpoints(name).is_none()
                && (provider.auth_url.is_none() || provider.token_url.is_none())
            {
                return Err(common::Error::Config(format!(
                    "providers.{name} needs auth_url and token_url (no built-in endpoints)"
                )));
            }
        }

        Ok(())
    }

    /// Secret resolution order per provider:
    /// 1. `<PROVIDER>_CLIENT_SECRET` env var
    /// 2. `client_secret_file` path from config
    fn resolve_credentials(&mut self) -> common::Result<()> {
        for (name, provider) in self.providers.iter_mut() {
            let prefix = env_prefix(name);

            provider.client_id = std::env::var(format!("{prefix}_CLIENT_ID"))
                .ok()
                .filter(|id| !id.is_empty());

            if let Ok(secret) = std::env::var(format!("{prefix}_CLIENT_SECRET")) {
                provider.client_secret = Some(Secret::new(secret));
            } else if let Some(ref secret_file) = provider.client_secret_file {
                let secret = Secret::from_file(secret_file).map_err(|e| {
                    common::Error::Config(format!(
                        "failed to read client_secret_file {}: {e}",
                        secret_file.display()
                    ))
                })?;
                provider.client_secret = Some(secret);
            }
        }
        Ok(())
    }

    /// Listener settings for the authorization flow.
    pub fn flow_config(&self) -> FlowConfig {
        FlowConfig {
            listen_addr: self.callback.listen_addr,
            callback_path: self.callback.path.clone(),
            redirect_host: self.callback.redirect_host.clone(),
            timeout: Duration::from_secs(self.callback.timeout_secs),
            shutdown_grace: Duration::from_millis(self.callback.shutdown_grace_ms),
        }
    }

    /// Shared HTTP client for token requests and authenticated calls.
    pub fn http_client(&self) -> common::Result<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(self.http.connect_timeout_secs))
            .timeout(Duration::from_secs(self.http.request_timeout_secs))
            .build()
            .map_err(|e| common::Error::Config(format!("building HTTP client: {e}")))
    }

    pub fn token_timeout(&self) -> Duration {
        Duration::from_secs(self.http.token_timeout_secs)
    }

    /// OAuth client settings for `name`. Fails if the provider is not
    /// configured or has no client id.
    pub fn oauth_config(&self, name: &str) -> common::Result<OAuthConfig> {
        let provider = self.providers.get(name).ok_or_else(|| {
            common::Error::Config(format!("provider {name} is not configured"))
        })?;

        let client_id = provider
            .client_id
            .clone()
            .ok_or_else(|| common::Error::MissingEnv(format!("{}_CLIENT_ID", env_prefix(name))))?;

        let known = known_endpoints(name);
        let auth_url = provider
            .auth_url
            .clone()
            .or_else(|| known.map(|(auth, _)| auth.to_string()));
        let token_url = provider
            .token_url
            .clone()
            .or_else(|| known.map(|(_, token)| token.to_string()));
        let (Some(auth_url), Some(token_url)) = (auth_url, token_url) else {
            return Err(common::Error::Config(format!(
                "provider {name} has no auth_url/token_url"
            )));
        };

        Ok(OAuthConfig {
            client_id,
            client_secret: provider
                .client_secret
                .clone()
                .unwrap_or_else(|| Secret::new(String::new())),
            auth_url,
            token_url,
            scopes: provider.scopes.clone(),
            auth_style: provider.auth_style,
            pkce: provider.pkce,
        })
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("oauth-login.toml")
    }
}

/// `my-provider` -> `MY_PROVIDER`
fn env_prefix(provider: &str) -> String {
    provider.to_uppercase().replace('-', "_")
}
