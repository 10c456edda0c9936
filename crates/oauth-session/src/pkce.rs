//! Random per-flow values: anti-forgery state and PKCE (RFC 7636)
//!
//! Every authorization attempt gets a fresh `state` that the callback must
//! echo back. Providers configured with `pkce = true` additionally get a
//! code verifier whose S256 challenge goes into the authorize URL.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};

/// Generate a random anti-forgery `state` value (128 bits, base64url).
pub fn generate_state() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a cryptographically random PKCE code verifier.
///
/// 32 random bytes encoded as URL-safe base64 without padding: 43
/// characters, the minimum length RFC 7636 allows.
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compute the S256 code challenge from a verifier.
///
/// `challenge = BASE64URL(SHA256(verifier))`
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}
