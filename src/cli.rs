//! Command-line interface

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::config::{Config, parse_duration};
use crate::secrets::SecretString;

/// OAuth2 authentication gateway - puts an IdP login in front of an HTTP service
#[derive(Parser, Debug)]
#[command(name = "auth-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "AUTH_GATEWAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "AUTH_GATEWAY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "AUTH_GATEWAY_HOST")]
    pub host: Option<String>,

    /// Upstream host to forward authenticated requests to
    #[arg(long, env = "AUTH_GATEWAY_UPSTREAM_HOST")]
    pub upstream_host: Option<String>,

    /// Upstream port
    #[arg(long, env = "AUTH_GATEWAY_UPSTREAM_PORT")]
    pub upstream_port: Option<u16>,

    /// Identity provider domain (e.g. tenant.auth.example.com)
    #[arg(long, env = "AUTH_GATEWAY_IDP_DOMAIN")]
    pub idp_domain: Option<String>,

    /// OAuth client id registered at the IdP
    #[arg(long, env = "AUTH_GATEWAY_CLIENT_ID")]
    pub client_id: Option<String>,

    /// OAuth client secret (literal or `env:VAR`)
    #[arg(long, env = "AUTH_GATEWAY_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Callback URL registered at the IdP
    #[arg(long, env = "AUTH_GATEWAY_REDIRECT_URI")]
    pub redirect_uri: Option<String>,

    /// Session cookie signing secret (at least 32 bytes)
    #[arg(long, env = "AUTH_GATEWAY_SESSION_SECRET", hide_env_values = true)]
    pub session_secret: Option<String>,

    /// Session lifetime (e.g. 30m, 8h)
    #[arg(long, env = "AUTH_GATEWAY_SESSION_TIMEOUT", value_parser = parse_duration)]
    pub session_timeout: Option<Duration>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "AUTH_GATEWAY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "AUTH_GATEWAY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway server (default)
    Serve,

    /// Load and validate the configuration, then print it with secrets redacted
    CheckConfig,
}

impl Cli {
    /// Apply command-line overrides on top of file and environment settings
    ///
    /// # Errors
    ///
    /// Returns an error if a secret flag references an unset variable.
    pub fn apply_overrides(&self, config: &mut Config) -> crate::Result<()> {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(ref host) = self.host {
            config.server.host = host.clone();
        }
        if let Some(ref host) = self.upstream_host {
            config.upstream.host = host.clone();
        }
        if let Some(port) = self.upstream_port {
            config.upstream.port = port;
        }
        if let Some(ref domain) = self.idp_domain {
            config.idp.domain = domain.clone();
        }
        if let Some(ref client_id) = self.client_id {
            config.idp.client_id = client_id.clone();
        }
        if let Some(ref secret) = self.client_secret {
            config.idp.client_secret = SecretString::new(secret.as_str()).resolve()?;
        }
        if let Some(ref redirect_uri) = self.redirect_uri {
            config.idp.redirect_uri = redirect_uri.clone();
        }
        if let Some(ref secret) = self.session_secret {
            config.session.secret = SecretString::new(secret.as_str()).resolve()?;
        }
        if let Some(timeout) = self.session_timeout {
            config.session.timeout = timeout;
        }
        Ok(())
    }
}
