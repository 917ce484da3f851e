//! Auth Gateway Library
//!
//! An HTTP gateway that puts an OAuth2 authorization-code login in front of
//! an upstream service.
//!
//! # Features
//!
//! - **Login redirect**: anonymous requests are parked under a random state
//!   token and the browser is sent to the IdP's `/authorize` endpoint
//! - **Code exchange**: the callback's code is verified server-to-server at
//!   the IdP's `/oauth/token` endpoint
//! - **Signed sessions**: HMAC-SHA256 cookies, no server-side session state
//! - **Resume**: the parked request is replayed (or re-requested by redirect)
//!   once the login completes
//! - **Production Ready**: bounded pending cache, timeouts, graceful shutdown

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod oauth;
pub mod pending;
pub mod secrets;
pub mod session;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let result = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    result.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
