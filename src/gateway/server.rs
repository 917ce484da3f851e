//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use super::handler::AuthGateway;
use super::router::create_router;
use crate::config::{Config, ResumeMode};
use crate::pending::spawn_sweeper;
use crate::{Error, Result};

/// Authentication gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Request handler shared by all connections
    gateway: Arc<AuthGateway>,
}

impl Gateway {
    /// Create a new gateway
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let gateway = Arc::new(AuthGateway::from_config(&config)?);
        Ok(Self { config, gateway })
    }

    /// Run the gateway until SIGINT/SIGTERM
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        // Create shutdown channel
        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);

        let sweeper = spawn_sweeper(
            Arc::clone(self.gateway.pending()),
            self.config.pending.sweep_interval,
            shutdown_tx.subscribe(),
        );

        let app = create_router(Arc::clone(&self.gateway));

        let upstream_url = self.config.upstream.base_url()?;

        // Bind listener
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("AUTH GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(upstream = %upstream_url, "Upstream");
        info!(
            idp = %self.config.idp.base_url(),
            client_id = %self.config.idp.client_id,
            "Identity provider"
        );
        info!(
            timeout = ?self.config.session.timeout,
            cookie = %self.config.session.cookie_name,
            "Sessions"
        );
        if !self.config.session.public_paths.is_empty() {
            info!(paths = ?self.config.session.public_paths, "Public paths (no login)");
        }
        if self.config.pending.resume == ResumeMode::Redirect {
            info!("Resuming logins by redirect");
        }
        if !self.config.idp.uses_https() {
            warn!(
                idp = %self.config.idp.base_url(),
                "Identity provider is not HTTPS - client_secret will be sent in plain text"
            );
        }
        if !self.config.session.secure {
            warn!("Session cookie Secure flag disabled - cookies will be sent over plain HTTP");
        }
        info!("============================================================");

        let mut shutdown_rx = shutdown_tx.subscribe();
        let shutdown_timeout = self.config.server.shutdown_timeout;

        // Run server with graceful shutdown
        let serve = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .into_future();
        tokio::pin!(serve);

        tokio::select! {
            result = &mut serve => {
                result.map_err(|e| Error::Internal(e.to_string()))?;
            }
            () = async {
                let _ = shutdown_rx.recv().await;
                tokio::time::sleep(shutdown_timeout).await;
            } => {
                warn!(timeout = ?shutdown_timeout, "Graceful shutdown timed out, dropping open connections");
            }
        }

        sweeper.abort();
        info!("Gateway stopped");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
