//! Shared types for the OAuth login workspace
//!
//! `Secret` wraps client secrets so they never reach logs; `Error` covers
//! configuration loading for the binary.

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
