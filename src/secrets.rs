//! Secret values and their resolution
//!
//! Secrets in the configuration (`idp.client_secret`, `session.secret`) may be
//! given as a literal, as `env:VAR`, or with `{env.VAR}` placeholders. The
//! resolved value is wrapped in [`SecretString`], which never prints itself.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Error, Result};

const REDACTED: &str = "[REDACTED]";

#[allow(clippy::unwrap_used)]
static ENV_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{env\.([^}]+)\}").unwrap());

/// A string that must never be logged or echoed.
///
/// `Debug`, `Display` and `Serialize` all emit a redaction marker; the value
/// is only reachable through [`SecretString::expose`].
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    /// Wrap a value
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the secret value
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the secret is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Resolve `env:VAR` and `{env.VAR}` references in place.
    ///
    /// # Errors
    ///
    /// Returns an error if a referenced environment variable is unset.
    pub fn resolve(&self) -> Result<Self> {
        resolve(&self.0).map(Self)
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl Serialize for SecretString {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED)
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self)
    }
}

/// Resolve a secret reference.
///
/// Supports:
/// - `env:VAR` - the whole value is read from an environment variable
/// - `{env.VAR}` - placeholders replaced inside a larger string
///
/// # Errors
///
/// Returns [`Error::Config`] if a referenced variable is not set. Secrets
/// silently resolving to an empty string would weaken session signing.
pub fn resolve(value: &str) -> Result<String> {
    if let Some(var_name) = value.strip_prefix("env:") {
        return std::env::var(var_name)
            .map_err(|_| Error::Config(format!("Secret environment variable not set: {var_name}")));
    }

    let mut result = value.to_string();
    for caps in ENV_PLACEHOLDER.captures_iter(value) {
        let var_name = &caps[1];
        let resolved = std::env::var(var_name).map_err(|_| {
            Error::Config(format!("Secret environment variable not set: {var_name}"))
        })?;
        result = result.replace(&caps[0], &resolved);
    }

    Ok(result)
}
