//! Signed session cookies
//!
//! A session is a self-contained token in a cookie; the gateway keeps no
//! per-session state. The token is
//!
//! ```text
//! base64url("{issued_at}.{expires_at}.{nonce}") "." base64url(HMAC-SHA256(payload))
//! ```
//!
//! with unix-second timestamps and a 128-bit random nonce. Verification
//! recomputes the MAC with the configured secret and compares in constant
//! time, then checks `expires_at`. Anything that fails to parse or verify is
//! [`SessionState::Invalid`], which callers treat as "not logged in".

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::{
    HeaderMap, HeaderValue,
    header::{COOKIE, SET_COOKIE},
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, KeyInit, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::config::SessionConfig;
use crate::secrets::SecretString;
use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// A verified session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Issued-at (Unix epoch seconds)
    pub issued_at: u64,
    /// Expires-at (Unix epoch seconds)
    pub expires_at: u64,
}

impl Session {
    /// Returns `true` once `expires_at` has been reached
    #[must_use]
    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

/// Outcome of reading the session cookie
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No session cookie on the request
    Absent,
    /// Signature verifies and the session has not expired
    Valid(Session),
    /// Cookie present but malformed, forged or expired
    Invalid,
}

impl SessionState {
    /// Whether the request is authenticated
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }
}

/// Issues and validates session cookies
pub struct SessionStore {
    secret: SecretString,
    timeout: Duration,
    cookie_name: String,
    secure: bool,
}

impl SessionStore {
    /// Create a store from session configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the secret is empty.
    pub fn new(config: &SessionConfig) -> Result<Self> {
        if config.secret.is_empty() {
            return Err(Error::Config("session.secret must be set".to_string()));
        }
        Ok(Self {
            secret: config.secret.clone(),
            timeout: config.timeout,
            cookie_name: config.cookie_name.clone(),
            secure: config.secure,
        })
    }

    /// Read and verify the session cookie on a request
    #[must_use]
    pub fn validate(&self, headers: &HeaderMap) -> SessionState {
        self.validate_at(headers, unix_now())
    }

    fn validate_at(&self, headers: &HeaderMap, now: u64) -> SessionState {
        let Some(token) = find_cookie(headers, &self.cookie_name) else {
            return SessionState::Absent;
        };

        match self.verify(token) {
            Some(session) if !session.is_expired_at(now) => SessionState::Valid(session),
            Some(session) => {
                debug!(expired_at = session.expires_at, "Session cookie expired");
                SessionState::Invalid
            }
            None => {
                debug!("Session cookie failed verification");
                SessionState::Invalid
            }
        }
    }

    /// Issue a new session and append its `Set-Cookie` header.
    ///
    /// # Errors
    ///
    /// Returns an error if the MAC cannot be keyed or the cookie is not a
    /// valid header value.
    pub fn establish(&self, headers: &mut HeaderMap) -> Result<Session> {
        self.establish_at(headers, unix_now())
    }

    fn establish_at(&self, headers: &mut HeaderMap, now: u64) -> Result<Session> {
        let session = Session {
            issued_at: now,
            expires_at: now.saturating_add(self.timeout.as_secs()),
        };
        let nonce: [u8; 16] = rand::random();
        let payload = format!(
            "{}.{}.{}",
            session.issued_at,
            session.expires_at,
            URL_SAFE_NO_PAD.encode(nonce)
        );
        let signature = self.sign(payload.as_bytes())?;
        let token = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(payload.as_bytes()),
            URL_SAFE_NO_PAD.encode(signature)
        );

        let cookie = self.cookie_header(&token);
        let value = HeaderValue::from_str(&cookie)
            .map_err(|e| Error::Internal(format!("Invalid session cookie header: {e}")))?;
        headers.append(SET_COOKIE, value);

        Ok(session)
    }

    fn cookie_header(&self, token: &str) -> String {
        let secure_flag = if self.secure { "; Secure" } else { "" };
        format!(
            "{}={token}; Path=/; Max-Age={}; HttpOnly{secure_flag}; SameSite=Lax",
            self.cookie_name,
            self.timeout.as_secs()
        )
    }

    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut mac = <HmacSha256 as KeyInit>::new_from_slice(self.secret.expose().as_bytes())
            .map_err(|e| Error::Internal(format!("Invalid session secret: {e}")))?;
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Verify the token signature and decode its timestamps
    fn verify(&self, token: &str) -> Option<Session> {
        let (payload_b64, signature_b64) = token.split_once('.')?;
        let payload = URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
        let signature = URL_SAFE_NO_PAD.decode(signature_b64).ok()?;

        let expected = self.sign(&payload).ok()?;
        if !bool::from(expected.ct_eq(&signature)) {
            return None;
        }

        let payload = std::str::from_utf8(&payload).ok()?;
        let mut parts = payload.splitn(3, '.');
        let issued_at = parts.next()?.parse().ok()?;
        let expires_at = parts.next()?.parse().ok()?;
        parts.next()?;

        Some(Session {
            issued_at,
            expires_at,
        })
    }
}

/// Find a cookie value in the request's `Cookie` headers
fn find_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}
