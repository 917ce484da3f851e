//! Per-request login orchestration
//!
//! Every inbound request goes through [`AuthGateway::handle`]:
//!
//! 1. Public path → forward untouched
//! 2. Valid session cookie → forward
//! 3. `code` in the query → exchange it, set the session cookie, resume the
//!    parked request (or forward the callback if nothing is parked)
//! 4. `error` + a `state` we issued → drop the parked request, 401 page
//! 5. Anything else → park the request and redirect to the IdP

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{HeaderValue, Request, StatusCode, header};
use axum::response::{IntoResponse, Response};
use tracing::{debug, error, info, warn};

use super::upstream::{HttpUpstream, Upstream};
use crate::Result;
use crate::config::{Config, ResumeMode};
use crate::error::{AuthError, UpstreamError};
use crate::oauth::{AuthorizationRedirector, Callback, CallbackParams, CodeExchanger, error_response};
use crate::pending::{PendingRequest, PendingRequestCache};
use crate::session::{SessionState, SessionStore};

/// The authentication gateway: session check, login flow and forwarding
pub struct AuthGateway {
    sessions: SessionStore,
    pending: Arc<PendingRequestCache>,
    redirector: AuthorizationRedirector,
    exchanger: CodeExchanger,
    upstream: Arc<dyn Upstream>,
    public_paths: Vec<String>,
    resume: ResumeMode,
}

impl AuthGateway {
    /// Build a gateway forwarding to the configured HTTP upstream
    ///
    /// # Errors
    ///
    /// Returns an error if any component rejects the configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let upstream = HttpUpstream::new(&config.upstream, config.server.max_body_size)?;
        let pending = Arc::new(PendingRequestCache::new(&config.pending));
        Self::new(config, pending, Arc::new(upstream))
    }

    /// Build a gateway around an explicit cache and upstream
    ///
    /// # Errors
    ///
    /// Returns an error if any component rejects the configuration.
    pub fn new(
        config: &Config,
        pending: Arc<PendingRequestCache>,
        upstream: Arc<dyn Upstream>,
    ) -> Result<Self> {
        Ok(Self {
            sessions: SessionStore::new(&config.session)?,
            redirector: AuthorizationRedirector::new(&config.idp, Arc::clone(&pending))?,
            exchanger: CodeExchanger::new(&config.idp)?,
            pending,
            upstream,
            public_paths: config.session.public_paths.clone(),
            resume: config.pending.resume,
        })
    }

    /// Shared pending-request cache
    #[must_use]
    pub fn pending(&self) -> &Arc<PendingRequestCache> {
        &self.pending
    }

    /// Check if a path bypasses authentication
    #[must_use]
    pub fn is_public_path(&self, path: &str) -> bool {
        self.public_paths.iter().any(|p| path.starts_with(p))
    }

    /// Handle one inbound request
    pub async fn handle(&self, request: Request<Body>) -> Response {
        if self.is_public_path(request.uri().path()) {
            return self.forward(request).await;
        }

        match self.sessions.validate(request.headers()) {
            SessionState::Valid(_) => return self.forward(request).await,
            SessionState::Invalid => {
                debug!(reason = %AuthError::SessionInvalid, "Treating request as anonymous");
            }
            SessionState::Absent => {}
        }

        match CallbackParams::from_uri(request.uri()).into_callback() {
            Callback::Code { code, state } => self.complete_login(request, &code, state).await,
            Callback::Denied {
                error,
                description,
                state,
            } => {
                // Only a state this gateway issued makes it a login result
                if self.pending.take(&state).is_none() {
                    return self.redirect(request);
                }
                let err = AuthError::LoginDenied { error, description };
                warn!(error = %err, "Identity provider reported a failed login");
                auth_error_response(&err)
            }
            Callback::None => self.redirect(request),
        }
    }

    fn redirect(&self, request: Request<Body>) -> Response {
        let (parts, _body) = request.into_parts();
        self.redirector.redirect(&parts)
    }

    async fn complete_login(
        &self,
        callback: Request<Body>,
        code: &str,
        state: Option<String>,
    ) -> Response {
        // Exchange before lookup: a rejected code leaves the parked request
        // in place.
        if let Err(e) = self.exchanger.exchange(code).await {
            return auth_error_response(&e);
        }

        let parked = state.as_deref().and_then(|s| self.pending.take(s));

        let mut response = match parked {
            Some(entry) => {
                info!(method = %entry.method, uri = %entry.uri, "Login complete, resuming request");
                self.resume(entry, callback).await
            }
            None => {
                debug!(reason = %AuthError::PendingEntryMissing, "Login complete, forwarding callback");
                self.forward(callback).await
            }
        };

        if let Err(e) = self.sessions.establish(response.headers_mut()) {
            error!(error = %e, "Failed to issue session cookie");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "session_error",
                "Could not establish a session",
            );
        }

        response
    }

    async fn resume(&self, entry: PendingRequest, callback: Request<Body>) -> Response {
        match self.resume {
            ResumeMode::Forward => {
                let connect_info = callback
                    .extensions()
                    .get::<ConnectInfo<SocketAddr>>()
                    .cloned();
                let mut replay = entry.into_request(callback.headers());
                if let Some(info) = connect_info {
                    replay.extensions_mut().insert(info);
                }
                self.forward(replay).await
            }
            ResumeMode::Redirect => match HeaderValue::from_str(&entry.uri) {
                Ok(location) => (
                    StatusCode::SEE_OTHER,
                    [(header::LOCATION, location)],
                    [(header::CACHE_CONTROL, "no-store")],
                )
                    .into_response(),
                Err(_) => (StatusCode::SEE_OTHER, [(header::LOCATION, "/")]).into_response(),
            },
        }
    }

    async fn forward(&self, request: Request<Body>) -> Response {
        match self.upstream.forward(request).await {
            Ok(response) => response,
            Err(e) => upstream_error_response(&e),
        }
    }
}

fn auth_error_response(err: &AuthError) -> Response {
    let description = match err {
        AuthError::LoginDenied {
            description: Some(d),
            ..
        } => d.clone(),
        AuthError::ProviderRejected { .. } | AuthError::LoginDenied { .. } => {
            "The identity provider did not accept this login. Please try again.".to_string()
        }
        AuthError::ProviderUnreachable { .. } => {
            "The identity provider could not be reached. Please try again later.".to_string()
        }
        AuthError::SessionInvalid | AuthError::PendingEntryMissing => err.to_string(),
    };
    error_response(err.status_code(), err.code(), &description)
}

fn upstream_error_response(err: &UpstreamError) -> Response {
    error_response(err.status_code(), err.code(), &err.to_string())
}
