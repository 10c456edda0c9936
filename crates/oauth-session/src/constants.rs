//! OAuth endpoint constants and flow defaults
//!
//! Authorization and token endpoints for the providers this tool talks to.
//! These are public URLs, not secrets; client ids and secrets come from the
//! environment at runtime.

use std::time::Duration;

/// Fitbit authorization endpoint
pub const FITBIT_AUTH_URL: &str = "https://www.fitbit.com/oauth2/authorize";

/// Fitbit token endpoint (requires HTTP Basic client authentication)
pub const FITBIT_TOKEN_URL: &str = "https://api.fitbit.com/oauth2/token";

/// Strava authorization endpoint (mobile variant, hands off to the app when installed)
pub const STRAVA_AUTH_URL: &str = "https://www.strava.com/oauth/mobile/authorize";

/// Strava token endpoint
pub const STRAVA_TOKEN_URL: &str = "https://www.strava.com/oauth/token";

/// Default port for the local redirect listener (bound on loopback).
pub const DEFAULT_CALLBACK_PORT: u16 = 8080;

/// Host used in the redirect URL. The default listener only binds IPv4
/// loopback, so the literal address is used: a browser that resolves
/// `localhost` to `::1` would never reach it. Must match what is registered
/// with the provider.
pub const DEFAULT_REDIRECT_HOST: &str = "127.0.0.1";

/// Default path the redirect listener serves.
pub const DEFAULT_CALLBACK_PATH: &str = "/callback";

/// How long the flow waits for the operator to finish in the browser.
pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

/// Delay between answering the browser and closing the listener, so the
/// confirmation page is flushed before the socket goes away.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Upper bound on a single token endpoint request (exchange or refresh),
/// response body included.
pub const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(30);

/// A token is considered expired this long before its actual expiry.
pub const EXPIRY_DELTA: Duration = Duration::from_secs(10);

/// Known `(auth_url, token_url)` pair for a provider id, if any.
pub fn known_endpoints(provider: &str) -> Option<(&'static str, &'static str)> {
    match provider {
        "fitbit" => Some((FITBIT_AUTH_URL, FITBIT_TOKEN_URL)),
        "strava" => Some((STRAVA_AUTH_URL, STRAVA_TOKEN_URL)),
        _ => None,
    }
}
