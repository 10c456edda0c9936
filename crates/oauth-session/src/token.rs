//! OAuth token record and token endpoint response
//!
//! `Token` is the unit the credential store persists and the token sources
//! hand out. Its JSON shape (`access_token`, `token_type`, `refresh_token`,
//! `expiry` as RFC3339) matches the credential files written by earlier
//! versions of this tool, so existing files keep loading.

use std::fmt;

use chrono::{DateTime, Datelike, TimeDelta, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::constants::EXPIRY_DELTA;

/// An access/refresh credential pair plus expiry.
///
/// A token without `expiry` never expires and is never refreshed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_expiry"
    )]
    pub expiry: Option<DateTime<Utc>>,
}

impl Token {
    /// Whether the token carries an access token that is not (nearly) expired.
    pub fn is_valid(&self) -> bool {
        !self.access_token.is_empty() && !self.is_expired_at(Utc::now())
    }

    /// Whether the token is expired, or within `EXPIRY_DELTA` of expiring, at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        let delta = TimeDelta::seconds(EXPIRY_DELTA.as_secs() as i64);
        self.expiry.is_some_and(|expiry| {
            expiry
                .checked_sub_signed(delta)
                .is_none_or(|threshold| threshold < now)
        })
    }

    /// Value for the `Authorization` header.
    ///
    /// Normalizes the casing of well-known token types and defaults to
    /// `Bearer` when the provider did not send one.
    pub fn authorization_value(&self) -> String {
        let token_type = match self.token_type.to_ascii_lowercase().as_str() {
            "" | "bearer" => "Bearer",
            "mac" => "MAC",
            "basic" => "Basic",
            _ => self.token_type.as_str(),
        };
        format!("{token_type} {}", self.access_token)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expiry", &self.expiry)
            .finish()
    }
}

/// Older credential files carry `0001-01-01T00:00:00Z` for tokens without
/// expiry; read it back as `None`.
fn deserialize_expiry<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let expiry = Option::<DateTime<Utc>>::deserialize(deserializer)?;
    Ok(expiry.filter(|t| t.year() > 1))
}

/// Response from the token endpoint for both code exchange and refresh.
///
/// `expires_in` is a delta in seconds from the response time; `into_token`
/// converts it to an absolute expiry.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl TokenResponse {
    /// Convert into a stored token, anchoring `expires_in` at `now`.
    ///
    /// An `expires_in` too large to represent as a timestamp is treated as
    /// no expiry.
    pub fn into_token(self, now: DateTime<Utc>) -> Token {
        Token {
            access_token: self.access_token,
            token_type: self.token_type,
            refresh_token: self.refresh_token.filter(|r| !r.is_empty()),
            expiry: self
                .expires_in
                .filter(|secs| *secs > 0)
                .and_then(TimeDelta::try_seconds)
                .and_then(|delta| now.checked_add_signed(delta)),
        }
    }
}

/// Error body returned by token endpoints (RFC 6749 section 5.2).
#[derive(Debug, Deserialize)]
pub(crate) struct TokenErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl fmt::Display for TokenErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_description {
            Some(description) => write!(f, "{}: {description}", self.error),
            None => write!(f, "{}", self.error),
        }
    }
}
