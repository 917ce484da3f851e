//! Authorization code exchange
//!
//! The only proof of login the gateway accepts is a 200 from the IdP's token
//! endpoint for the code the browser brought back. The token payload itself
//! is not parsed or kept.

use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::IdpConfig;
use crate::error::AuthError;
use crate::secrets::SecretString;
use crate::Result;

/// Token request body
#[derive(Serialize)]
struct TokenRequest<'a> {
    grant_type: &'static str,
    client_id: &'a str,
    client_secret: &'a str,
    code: &'a str,
    redirect_uri: &'a str,
}

/// Exchanges authorization codes at the IdP token endpoint
pub struct CodeExchanger {
    http_client: Client,
    token_endpoint: String,
    client_id: String,
    client_secret: SecretString,
    redirect_uri: String,
}

impl CodeExchanger {
    /// Create an exchanger with its own HTTP client bounded by `idp.timeout`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &IdpConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            http_client,
            token_endpoint: config.token_endpoint(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
        })
    }

    /// Token endpoint this exchanger posts to
    #[must_use]
    pub fn token_endpoint(&self) -> &str {
        &self.token_endpoint
    }

    /// Exchange `code`; `Ok(())` means the IdP answered 200
    ///
    /// # Errors
    ///
    /// - [`AuthError::ProviderRejected`] for any non-200 answer
    /// - [`AuthError::ProviderUnreachable`] on a transport failure or timeout
    pub async fn exchange(&self, code: &str) -> std::result::Result<(), AuthError> {
        let body = TokenRequest {
            grant_type: "authorization_code",
            client_id: &self.client_id,
            client_secret: self.client_secret.expose(),
            code,
            redirect_uri: &self.redirect_uri,
        };

        let response = self
            .http_client
            .post(&self.token_endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(endpoint = %self.token_endpoint, error = %e, "Token request failed");
                AuthError::ProviderUnreachable {
                    reason: e.to_string(),
                    timed_out: e.is_timeout(),
                }
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            warn!(status = status.as_u16(), "Identity provider rejected authorization code");
            return Err(AuthError::ProviderRejected {
                status: status.as_u16(),
            });
        }

        debug!("Authorization code accepted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> IdpConfig {
        IdpConfig {
            domain: server.uri(),
            client_id: "client-123".to_string(),
            client_secret: SecretString::new("shh"),
            redirect_uri: "https://app.example.com/callback".to_string(),
            timeout: Duration::from_secs(2),
            ..IdpConfig::default()
        }
    }

    #[tokio::test]
    async fn exchange_posts_json_and_accepts_200() {
        // GIVEN: an IdP that accepts exactly this token request
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({
                "grant_type": "authorization_code",
                "client_id": "client-123",
                "client_secret": "shh",
                "code": "XYZ",
                "redirect_uri": "https://app.example.com/callback",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "ignored",
                "token_type": "Bearer",
            })))
            .expect(1)
            .mount(&server)
            .await;

        // WHEN / THEN
        let exchanger = CodeExchanger::new(&config_for(&server)).unwrap();
        exchanger.exchange("XYZ").await.unwrap();
    }

    #[tokio::test]
    async fn non_200_statuses_are_rejections() {
        for status in [201u16, 401, 403, 500] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/oauth/token"))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;

            let exchanger = CodeExchanger::new(&config_for(&server)).unwrap();
            let err = exchanger.exchange("bad").await.unwrap_err();
            assert!(
                matches!(err, AuthError::ProviderRejected { status: s } if s == status),
                "status {status} gave {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let config = IdpConfig {
            timeout: Duration::from_millis(100),
            ..config_for(&server)
        };
        let exchanger = CodeExchanger::new(&config).unwrap();
        let err = exchanger.exchange("XYZ").await.unwrap_err();
        assert!(matches!(
            err,
            AuthError::ProviderUnreachable {
                timed_out: true,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn unreachable_provider_is_reported() {
        let config = IdpConfig {
            // Port 9 (discard) on localhost is closed in test environments
            domain: "http://127.0.0.1:9".to_string(),
            ..IdpConfig::default()
        };
        let exchanger = CodeExchanger::new(&config).unwrap();
        let err = exchanger.exchange("XYZ").await.unwrap_err();
        assert!(matches!(err, AuthError::ProviderUnreachable { .. }));
    }

    #[test]
    fn token_endpoint_follows_domain() {
        let config = IdpConfig {
            domain: "tenant.auth.example.com".to_string(),
            ..IdpConfig::default()
        };
        let exchanger = CodeExchanger::new(&config).unwrap();
        assert_eq!(
            exchanger.token_endpoint(),
            "https://tenant.auth.example.com/oauth/token"
        );
    }
}
