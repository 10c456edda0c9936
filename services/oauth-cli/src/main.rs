//! OAuth login CLI
//!
//! Keeps provider sessions for command-line tools:
//! 1. Loads `.env`, then the TOML config (or the built-in Fitbit/Strava set)
//! 2. Loads the credential file once and shares it across sessions
//! 3. Runs the browser flow for providers without a stored token
//! 4. Performs authenticated requests, persisting refreshed tokens
//!
//! Usage: `oauth-login [--config PATH] <login|status|get|logout> [ARGS]`

mod config;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use oauth_session::{AuthorizationFlowRunner, Authenticator, CredentialStore, Token};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

const USAGE: &str = "usage: oauth-login [--config PATH] <command>

commands:
  login <provider>        authorize in the browser if no token is stored
  status                  list stored providers and token expiry
  get <provider> <url>    authenticated GET, response body to stdout
  logout <provider>       forget the stored token";

/// Parsed subcommand
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Login { provider: String },
    Status,
    Get { provider: String, url: String },
    Logout { provider: String },
}

/// Command line: optional `--config PATH`, then a subcommand.
#[derive(Debug, PartialEq, Eq)]
struct Cli {
    config_path: Option<String>,
    command: Command,
}

impl Cli {
    fn parse(args: &[String]) -> std::result::Result<Self, String> {
        let mut config_path = None;
        let mut positional = Vec::new();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            if arg == "--config" {
                let path = iter.next().ok_or("--config needs a path")?;
                config_path = Some(path.clone());
            } else if arg.starts_with("--") {
                return Err(format!("unknown flag {arg}"));
            } else {
                positional.push(arg.as_str());
            }
        }

        let command = match positional.as_slice() {
            ["login", provider] => Command::Login {
                provider: provider.to_string(),
            },
            ["status"] => Command::Status,
            ["get", provider, url] => Command::Get {
                provider: provider.to_string(),
                url: url.to_string(),
            },
            ["logout", provider] => Command::Logout {
                provider: provider.to_string(),
            },
            [] => return Err("missing command".into()),
            [cmd, ..] => return Err(format!("invalid arguments for {cmd}")),
        };

        Ok(Self {
            config_path,
            command,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = match Cli::parse(&args) {
        Ok(cli) => cli,
        Err(msg) => {
            eprintln!("{msg}\n\n{USAGE}");
            std::process::exit(2);
        }
    };

    // .env is optional; real env vars win over it
    if let Err(e) = dotenvy::dotenv()
        && !e.not_found()
    {
        tracing::warn!(error = %e, "failed to load .env file");
    }

    let config = load_config(cli.config_path.as_deref())?;

    let store_path = config.store.path.clone();
    let store = Arc::new(
        CredentialStore::load(store_path.clone())
            .await
            .with_context(|| format!("failed to load credentials from {}", store_path.display()))?,
    );

    let http = config.http_client()?;

    match cli.command {
        Command::Login { provider } => {
            let client = authenticator(&config, store, http)
                .session(&provider, config.oauth_config(&provider)?)
                .await?;
            let token = client.token().await?;
            println!("{provider}: authorized ({})", describe_expiry(&token, Utc::now()));
        }
        Command::Status => {
            print!("{}", render_status(&store, Utc::now()).await);
        }
        Command::Get { provider, url } => {
            let client = authenticator(&config, store, http)
                .session(&provider, config.oauth_config(&provider)?)
                .await?;
            let response = client.get(url.as_str()).await?;
            let status = response.status();
            let body = response
                .text()
                .await
                .with_context(|| format!("failed to read response from {url}"))?;
            if !status.is_success() {
                bail!("{url} returned {status}: {body}");
            }
            println!("{body}");
        }
        Command::Logout { provider } => {
            match store.remove(&provider).await? {
                Some(_) => println!("{provider}: token removed"),
                None => println!("{provider}: no stored token"),
            }
        }
    }

    Ok(())
}

/// Initialize tracing to stderr with LOG_LEVEL / RUST_LOG support; JSON when
/// LOG_FORMAT=json. Stdout is reserved for command output.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|f| f == "json") {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// An explicitly named config must exist; the default one may be absent.
fn load_config(cli_path: Option<&str>) -> Result<Config> {
    let explicit = cli_path.is_some() || std::env::var_os("CONFIG_PATH").is_some();
    let config_path = Config::resolve_path(cli_path);

    if !explicit && !config_path.exists() {
        info!(path = %config_path.display(), "no config file, using built-in providers");
        return Config::builtin().context("failed to resolve built-in provider config");
    }

    info!(path = %config_path.display(), "loading configuration");
    Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))
}

fn authenticator(
    config: &Config,
    store: Arc<CredentialStore>,
    http: reqwest::Client,
) -> Authenticator {
    Authenticator::new(
        store,
        AuthorizationFlowRunner::new(config.flow_config()),
        http,
    )
    .with_token_timeout(config.token_timeout())
}

fn describe_expiry(token: &Token, now: DateTime<Utc>) -> String {
    match token.expiry {
        None => "no expiry".to_string(),
        Some(expiry) if token.is_expired_at(now) => format!("expired {}", expiry.to_rfc3339()),
        Some(expiry) => format!("expires {}", expiry.to_rfc3339()),
    }
}

/// One line per stored provider. Never prints token material.
async fn render_status(store: &CredentialStore, now: DateTime<Utc>) -> String {
    let providers = store.provider_ids().await;
    if providers.is_empty() {
        return format!("no stored tokens in {}\n", store.path().display());
    }

    let mut out = String::new();
    for provider in providers {
        let Some(token) = store.get(&provider).await else {
            continue;
        };
        let refresh = if token.refresh_token.is_some() {
            "refresh token stored"
        } else {
            "no refresh token"
        };
        out.push_str(&format!(
            "{provider}: {}, {refresh}\n",
            describe_expiry(&token, now)
        ));
    }
    out
}
