#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared plumbing for the external data providers.
//!
//! - [`retry`]: retrying `reqwest` helpers every provider sends through.
//! - [`service_registry`]: compile-time embedded TOML configuration for
//!   the Census geocoder, ACS, and `TIGERweb` endpoints.
//! - [`progress`]: backend-agnostic progress reporting.

pub mod progress;
pub mod retry;
pub mod service_registry;

use std::time::Duration;

/// User-Agent sent with every provider request.
pub const USER_AGENT: &str = concat!("canvass/", env!("CARGO_PKG_VERSION"));

/// Errors from the shared HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The request could not be sent or the body could not be read.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("HTTP {status}")]
    Status {
        /// Status code returned by the server.
        status: u16,
    },

    /// The body arrived but could not be decoded.
    #[error("Decode error: {message}")]
    Decode {
        /// Description of what went wrong.
        message: String,
    },
}

impl SourceError {
    /// Returns `true` for failures that mean the provider could not be
    /// reached at all (as opposed to answering with something unusable).
    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        match self {
            Self::Http(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            Self::Status { status } => *status == 429 || *status >= 500,
            Self::Decode { .. } => false,
        }
    }
}

/// Builds a `reqwest::Client` with the canvass User-Agent and a
/// per-request timeout.
///
/// # Errors
///
/// Returns [`SourceError`] if the TLS backend cannot be initialized.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, SourceError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(Into::into)
}

/// Truncates a string for logging, appending "..." if it exceeds `max_len`.
#[must_use]
pub fn truncate_for_log(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
