//! OAuth2 provider sessions for command-line tools
//!
//! Obtains tokens through the authorization-code flow with a local redirect
//! listener, keeps them in a JSON credential file, and hands collaborators
//! an HTTP client that refreshes tokens transparently and writes every token
//! it uses back to the file. This crate has no dependency on the binary and
//! can be tested on its own.
//!
//! Session flow:
//! 1. `CredentialStore::load()` reads the credential file once at startup
//! 2. `Authenticator::session()` looks the provider up in the store
//! 3. If nothing is stored, `AuthorizationFlowRunner::run()` drives the
//!    browser flow and the new token is stored
//! 4. `RefreshingTokenSource` refreshes through `OAuthClient` on expiry
//! 5. `PersistingTokenSource` writes each token through to the store
//! 6. `AuthorizedClient` attaches the token to outbound requests

pub mod client;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod flow;
pub mod pkce;
pub mod session;
pub mod source;
pub mod token;

#[cfg(test)]
mod test_support;

pub use client::{AuthStyle, OAuthClient, OAuthConfig};
pub use constants::*;
pub use credentials::CredentialStore;
pub use error::{Error, Result};
pub use flow::{AuthorizationFlowRunner, FlowConfig, UrlPresenter, print_authorize_url};
pub use session::{AuthorizedClient, Authenticator};
pub use source::{PersistingTokenSource, RefreshingTokenSource, TokenFuture, TokenSource};
pub use token::{Token, TokenResponse};
