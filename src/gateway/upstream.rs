//! Upstream forwarding
//!
//! Authenticated requests are relayed to the protected service. The request
//! body is buffered (bounded by `server.max_body_size`); the response body is
//! streamed back as it arrives.

use std::net::SocketAddr;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Request, Uri, header};
use axum::response::Response;
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use crate::config::UpstreamConfig;
use crate::error::UpstreamError;
use crate::Result;

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Where authenticated traffic goes
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Forward `request` and return the upstream's response
    async fn forward(&self, request: Request<Body>)
    -> std::result::Result<Response, UpstreamError>;
}

/// Reverse proxy to a single HTTP origin
pub struct HttpUpstream {
    client: Client,
    base_url: Url,
    max_body_size: usize,
}

impl HttpUpstream {
    /// Create a forwarder for the configured origin
    ///
    /// # Errors
    ///
    /// Returns an error if the upstream URL is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: &UpstreamConfig, max_body_size: usize) -> Result<Self> {
        let base_url = config.base_url()?;
        let client = Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            base_url,
            max_body_size,
        })
    }

    /// Map an inbound URI onto the upstream origin, keeping any base path
    fn target_url(&self, uri: &Uri) -> Url {
        let mut url = self.base_url.clone();
        let base_path = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{base_path}{}", uri.path()));
        url.set_query(uri.query());
        url
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn forward(
        &self,
        request: Request<Body>,
    ) -> std::result::Result<Response, UpstreamError> {
        let (parts, body) = request.into_parts();

        let declared_len = parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared_len.is_some_and(|len| len > self.max_body_size) {
            return Err(UpstreamError::BodyTooLarge);
        }

        let body = axum::body::to_bytes(body, self.max_body_size)
            .await
            .map_err(|_| UpstreamError::BodyTooLarge)?;

        let client_addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let headers = forward_headers(&parts.headers, client_addr);
        let url = self.target_url(&parts.uri);

        debug!(method = %parts.method, url = %url, "Forwarding to upstream");

        let upstream_response = self
            .client
            .request(parts.method, url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Upstream request failed");
                UpstreamError::from(e)
            })?;

        let status = upstream_response.status();
        let mut response_headers = upstream_response.headers().clone();
        strip_hop_by_hop(&mut response_headers);

        let mut response = Response::new(Body::from_stream(upstream_response.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

/// Request headers as sent upstream: hop-by-hop and `Host` removed,
/// `X-Forwarded-*` added
fn forward_headers(inbound: &HeaderMap, client_addr: Option<SocketAddr>) -> HeaderMap {
    let mut headers = inbound.clone();
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);

    if let Some(addr) = client_addr {
        let ip = addr.ip().to_string();
        let chain = match inbound.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(prior) => format!("{prior}, {ip}"),
            None => ip,
        };
        if let Ok(value) = HeaderValue::from_str(&chain) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }

    if let Some(host) = inbound.get(header::HOST) {
        headers.insert(X_FORWARDED_HOST, host.clone());
    }

    if !headers.contains_key(&X_FORWARDED_PROTO) {
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
    }

    headers
}

/// Remove RFC 9110 §7.6.1 connection-specific headers, including any listed
/// in `Connection`
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }

    for name in [
        header::CONNECTION,
        HeaderName::from_static("keep-alive"),
        HeaderName::from_static("proxy-connection"),
        header::PROXY_AUTHENTICATE,
        header::PROXY_AUTHORIZATION,
        header::TE,
        header::TRAILER,
        header::TRANSFER_ENCODING,
        header::UPGRADE,
    ] {
        headers.remove(name);
    }
}
