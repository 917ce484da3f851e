//! Error types for the auth gateway

use std::io;

use axum::http::StatusCode;
use thiserror::Error;

/// Result type alias for process-level operations
pub type Result<T> = std::result::Result<T, Error>;

/// Process-level errors (startup, configuration, I/O).
///
/// Per-request failures never surface as `Error`; they are mapped to an
/// HTTP response through [`AuthError`] or [`UpstreamError`].
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures of the login protocol, each mapped to a client-visible status.
#[derive(Error, Debug)]
pub enum AuthError {
    /// The session cookie was present but failed verification or expired.
    /// Recoverable: the request is handled as anonymous.
    #[error("Session cookie is invalid or expired")]
    SessionInvalid,

    /// The IdP token endpoint answered with a non-200 status.
    #[error("Identity provider rejected the authorization code (HTTP {status})")]
    ProviderRejected {
        /// Status returned by the token endpoint
        status: u16,
    },

    /// The IdP could not be reached (DNS, connect, reset, timeout).
    #[error("Identity provider unreachable: {reason}")]
    ProviderUnreachable {
        /// Human-readable transport failure
        reason: String,
        /// Whether the failure was the request timeout
        timed_out: bool,
    },

    /// No pending request matched the callback state. Not a failure: the
    /// callback request itself is forwarded.
    #[error("No pending request for state token")]
    PendingEntryMissing,

    /// The IdP redirected back with an `error` parameter instead of a code.
    #[error("Login failed at identity provider: {error}")]
    LoginDenied {
        /// OAuth error code (e.g. `access_denied`)
        error: String,
        /// Optional `error_description`
        description: Option<String>,
    },
}

impl AuthError {
    /// HTTP status returned to the client for this failure.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::SessionInvalid | Self::ProviderRejected { .. } | Self::LoginDenied { .. } => {
                StatusCode::UNAUTHORIZED
            }
            Self::ProviderUnreachable {
                timed_out: true, ..
            } => StatusCode::GATEWAY_TIMEOUT,
            Self::ProviderUnreachable { .. } => StatusCode::BAD_GATEWAY,
            Self::PendingEntryMissing => StatusCode::NOT_FOUND,
        }
    }

    /// Short machine-readable code shown on the error page.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionInvalid => "session_invalid",
            Self::ProviderRejected { .. } => "provider_rejected",
            Self::ProviderUnreachable { .. } => "provider_unreachable",
            Self::PendingEntryMissing => "pending_entry_missing",
            Self::LoginDenied { .. } => "login_denied",
        }
    }
}

/// Failures forwarding a request to the upstream service.
#[derive(Error, Debug)]
pub enum UpstreamError {
    /// Upstream did not answer within the configured timeout
    #[error("Upstream timed out")]
    Timeout,

    /// Connection or protocol failure talking to the upstream
    #[error("Upstream unavailable: {0}")]
    Unavailable(String),

    /// Inbound body exceeded `server.max_body_size`
    #[error("Request body too large")]
    BodyTooLarge,
}

impl UpstreamError {
    /// HTTP status returned to the client for this failure.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::Unavailable(_) => StatusCode::BAD_GATEWAY,
            Self::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    /// Short machine-readable code shown on the error page.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout => "upstream_timeout",
            Self::Unavailable(_) => "upstream_unavailable",
            Self::BodyTooLarge => "body_too_large",
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Unavailable(e.to_string())
        }
    }
}
