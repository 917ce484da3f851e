//! Configuration management

use std::{env, path::Path, sync::LazyLock, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::secrets::SecretString;
use crate::{Error, Result};

/// Minimum accepted length of the session signing secret, in bytes
pub const MIN_SESSION_SECRET_LEN: usize = 32;

/// Longest accepted session lifetime (browsers cap cookie `Max-Age` at 400 days)
pub const MAX_SESSION_TIMEOUT: Duration = Duration::from_secs(400 * 24 * 60 * 60);

/// Default session cookie name
pub const DEFAULT_COOKIE_NAME: &str = "gateway-session";

#[allow(clippy::unwrap_used)]
static ENV_VAR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap());

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before resolving secrets.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Listener configuration
    pub server: ServerConfig,
    /// Upstream service the gateway protects
    pub upstream: UpstreamConfig,
    /// Identity provider (OAuth2 authorization server)
    pub idp: IdpConfig,
    /// Session cookie configuration
    pub session: SessionConfig,
    /// Pending login bookkeeping
    pub pending: PendingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Maximum request body size forwarded upstream (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 80,
            shutdown_timeout: Duration::from_secs(30),
            max_body_size: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Upstream service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Full base URL; takes precedence over `host`/`port` when set
    pub url: Option<String>,
    /// Upstream host (plain HTTP)
    pub host: String,
    /// Upstream port
    pub port: u16,
    /// Per-request timeout for forwarded requests
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "127.0.0.1".to_string(),
            port: 80,
            timeout: Duration::from_secs(30),
        }
    }
}

impl UpstreamConfig {
    /// Base URL requests are forwarded to
    ///
    /// # Errors
    ///
    /// Returns an error if the URL (or host/port pair) does not parse.
    pub fn base_url(&self) -> Result<Url> {
        let raw = match &self.url {
            Some(url) => url.clone(),
            None => format!("http://{}:{}", self.host, self.port),
        };
        Url::parse(&raw).map_err(|e| Error::Config(format!("Invalid upstream URL '{raw}': {e}")))
    }
}

/// Identity provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdpConfig {
    /// IdP domain, e.g. `example.eu.auth0.com`. A value with a scheme
    /// (`http://127.0.0.1:9000`) is used verbatim instead of `https://{domain}`.
    pub domain: String,
    /// OAuth client ID
    pub client_id: String,
    /// OAuth client secret (literal, `env:VAR` or `{env.VAR}`)
    pub client_secret: SecretString,
    /// Redirect URI registered with the IdP; the IdP sends the browser back
    /// here with `code` and `state`
    pub redirect_uri: String,
    /// Scopes to request (omitted from the authorize URL when empty)
    pub scopes: Vec<String>,
    /// Timeout for the token exchange call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for IdpConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            client_id: String::new(),
            client_secret: SecretString::default(),
            redirect_uri: String::new(),
            scopes: Vec::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl IdpConfig {
    /// Base URL of the IdP without a trailing slash
    #[must_use]
    pub fn base_url(&self) -> String {
        let domain = self.domain.trim_end_matches('/');
        if domain.contains("://") {
            domain.to_string()
        } else {
            format!("https://{domain}")
        }
    }

    /// Whether the client secret travels over TLS
    #[must_use]
    pub fn uses_https(&self) -> bool {
        self.base_url().starts_with("https://")
    }

    /// Authorization endpoint
    #[must_use]
    pub fn authorize_endpoint(&self) -> String {
        format!("{}/authorize", self.base_url())
    }

    /// Token endpoint
    #[must_use]
    pub fn token_endpoint(&self) -> String {
        format!("{}/oauth/token", self.base_url())
    }
}

/// Session cookie configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// HMAC signing secret (literal, `env:VAR` or `{env.VAR}`)
    pub secret: SecretString,
    /// Session lifetime; also the cookie `Max-Age`
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Cookie name
    pub cookie_name: String,
    /// Add the `Secure` attribute (disable only for plain-HTTP development)
    pub secure: bool,
    /// Path prefixes forwarded without a session (default: none)
    pub public_paths: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret: SecretString::default(),
            timeout: Duration::from_secs(60 * 60),
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            secure: true,
            public_paths: Vec::new(),
        }
    }
}

/// How a stashed request is resumed after a successful login
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResumeMode {
    /// Rebuild the original request and forward it upstream directly
    #[default]
    Forward,
    /// Answer 303 so the browser re-requests the original URL
    Redirect,
}

/// Pending login bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PendingConfig {
    /// How long a stashed request waits for its login to complete
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Interval of the background sweep that purges expired entries
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    /// Upper bound on stashed requests; the oldest is dropped when full
    pub max_entries: usize,
    /// Resume strategy once the login completes
    pub resume: ResumeMode,
}

impl Default for PendingConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(10 * 60),
            sweep_interval: Duration::from_secs(60),
            max_entries: 10_000,
            resume: ResumeMode::Forward,
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed,
    /// or a secret references an unset environment variable.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // AUTH_GATEWAY_IDP__CLIENT_ID -> idp.client_id
        figment = figment.merge(Env::prefixed("AUTH_GATEWAY_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.expand_env_vars();
        config.resolve_secrets()?;

        Ok(config)
    }

    /// Check the invariants the gateway relies on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first offending setting.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("idp.domain", self.idp.domain.is_empty()),
            ("idp.client_id", self.idp.client_id.is_empty()),
            ("idp.client_secret", self.idp.client_secret.is_empty()),
            ("idp.redirect_uri", self.idp.redirect_uri.is_empty()),
            ("session.secret", self.session.secret.is_empty()),
            ("session.cookie_name", self.session.cookie_name.is_empty()),
        ];
        if let Some((name, _)) = required.iter().find(|(_, missing)| *missing) {
            return Err(Error::Config(format!("{name} must be set")));
        }

        if self.session.secret.len() < MIN_SESSION_SECRET_LEN {
            return Err(Error::Config(format!(
                "session.secret must be at least {MIN_SESSION_SECRET_LEN} bytes"
            )));
        }
        if self.session.timeout.as_secs() == 0 {
            return Err(Error::Config(
                "session.timeout must be at least one second".to_string(),
            ));
        }
        if self.session.timeout > MAX_SESSION_TIMEOUT {
            return Err(Error::Config(format!(
                "session.timeout must not exceed {}h",
                MAX_SESSION_TIMEOUT.as_secs() / 3600
            )));
        }
        if self.pending.ttl.is_zero() || self.pending.sweep_interval.is_zero() {
            return Err(Error::Config(
                "pending.ttl and pending.sweep_interval must be non-zero".to_string(),
            ));
        }
        if self.pending.max_entries == 0 {
            return Err(Error::Config("pending.max_entries must be non-zero".to_string()));
        }

        Url::parse(&self.idp.redirect_uri).map_err(|e| {
            Error::Config(format!("Invalid idp.redirect_uri '{}': {e}", self.idp.redirect_uri))
        })?;
        Url::parse(&self.idp.base_url())
            .map_err(|e| Error::Config(format!("Invalid idp.domain '{}': {e}", self.idp.domain)))?;
        self.upstream.base_url()?;

        Ok(())
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in plain string settings
    fn expand_env_vars(&mut self) {
        let re = &*ENV_VAR_PATTERN;
        for value in [
            &mut self.idp.domain,
            &mut self.idp.client_id,
            &mut self.idp.redirect_uri,
            &mut self.upstream.host,
        ] {
            *value = Self::expand_string(re, value);
        }
        if let Some(url) = self.upstream.url.as_mut() {
            *url = Self::expand_string(re, url);
        }
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }

    fn resolve_secrets(&mut self) -> Result<()> {
        self.idp.client_secret = self.idp.client_secret.resolve()?;
        self.session.secret = self.session.secret.resolve()?;
        Ok(())
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s", "250ms")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "1h", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

/// Parse "30s", "5m", "1h", "100ms" or a bare number of seconds
///
/// # Errors
///
/// Returns a message describing the malformed value.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    let parse = |n: &str| {
        n.trim()
            .parse::<u64>()
            .map_err(|e| format!("invalid duration '{s}': {e}"))
    };

    // "ms" before "s", otherwise "100ms" is taken for seconds
    if let Some(ms) = s.strip_suffix("ms") {
        parse(ms).map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        parse(secs).map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        scaled(parse(mins)?, 60, s)
    } else if let Some(hours) = s.strip_suffix('h') {
        scaled(parse(hours)?, 60 * 60, s)
    } else {
        parse(s).map(Duration::from_secs)
    }
}

fn scaled(n: u64, unit_secs: u64, s: &str) -> std::result::Result<Duration, String> {
    n.checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{s}' is out of range"))
}
