//! Authorization redirect
//!
//! Sends an unauthenticated browser to the IdP's `/authorize` endpoint,
//! parking the original request in the [`PendingRequestCache`] under the
//! state token carried by the redirect.

use std::sync::Arc;

use axum::http::{HeaderValue, StatusCode, header, request::Parts};
use axum::response::{IntoResponse, Response};
use tracing::{debug, error};
use url::Url;

use crate::config::IdpConfig;
use crate::oauth::callback::error_response;
use crate::pending::{PendingRequest, PendingRequestCache};
use crate::{Error, Result};

/// Builds IdP authorization redirects
pub struct AuthorizationRedirector {
    authorize_endpoint: Url,
    client_id: String,
    redirect_uri: String,
    scope: Option<String>,
    pending: Arc<PendingRequestCache>,
}

impl AuthorizationRedirector {
    /// Create a redirector for the configured IdP
    ///
    /// # Errors
    ///
    /// Returns an error if the authorization endpoint is not a valid URL.
    pub fn new(config: &IdpConfig, pending: Arc<PendingRequestCache>) -> Result<Self> {
        let endpoint = config.authorize_endpoint();
        let authorize_endpoint = Url::parse(&endpoint)
            .map_err(|e| Error::Config(format!("Invalid authorize endpoint '{endpoint}': {e}")))?;

        let scope = (!config.scopes.is_empty()).then(|| config.scopes.join(" "));

        Ok(Self {
            authorize_endpoint,
            client_id: config.client_id.clone(),
            redirect_uri: config.redirect_uri.clone(),
            scope,
            pending,
        })
    }

    /// Park the request and answer with a 303 to the IdP
    pub fn redirect(&self, parts: &Parts) -> Response {
        let entry = PendingRequest::capture(parts);
        let method = entry.method.clone();
        let uri = entry.uri.clone();
        let state = self.pending.put(entry);

        let location = self.authorization_url(&state);
        debug!(%method, %uri, pending = self.pending.len(), "Redirecting to identity provider");

        match HeaderValue::from_str(location.as_str()) {
            Ok(value) => (
                StatusCode::SEE_OTHER,
                [(header::LOCATION, value)],
                [(header::CACHE_CONTROL, "no-store")],
            )
                .into_response(),
            Err(e) => {
                error!(error = %e, "Authorization URL is not a valid header value");
                error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "redirect_failed",
                    "Could not start login",
                )
            }
        }
    }

    /// Authorization URL for `state`
    #[must_use]
    pub fn authorization_url(&self, state: &str) -> Url {
        let mut url = self.authorize_endpoint.clone();
        {
            let mut params = url.query_pairs_mut();
            params.append_pair("response_type", "code");
            params.append_pair("client_id", &self.client_id);
            params.append_pair("redirect_uri", &self.redirect_uri);
            params.append_pair("state", state);

            if let Some(scope) = &self.scope {
                params.append_pair("scope", scope);
            }
        }
        url
    }
}
