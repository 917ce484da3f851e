//! Pending login requests
//!
//! When an unauthenticated request is redirected to the IdP, the parts
//! needed to replay it (method, path+query, a few headers) are stashed under
//! a random state token. The IdP echoes the token back on the callback, and
//! the gateway resumes the original request.
//!
//! # Lifecycle
//!
//! 1. [`PendingRequestCache::put`] stores the entry under a fresh 256-bit token.
//! 2. [`PendingRequestCache::take`] removes it on the first lookup; a second
//!    lookup with the same token finds nothing.
//! 3. Entries never claimed are purged after the TTL by
//!    [`PendingRequestCache::evict_expired`], run from [`spawn_sweeper`].
//! 4. At capacity, the oldest entry is dropped to make room.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, Method, Request, header, request::Parts};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use dashmap::{DashMap, mapref::entry::Entry};
use tracing::{debug, warn};

use crate::config::PendingConfig;

/// Headers captured from the original request and restored on replay.
///
/// Everything else on the replayed request comes from the callback request,
/// which the same browser sent moments later.
const REPLAY_HEADERS: [HeaderName; 5] = [
    header::ACCEPT,
    header::ACCEPT_LANGUAGE,
    header::USER_AGENT,
    header::REFERER,
    header::CACHE_CONTROL,
];

/// Headers of the callback request that must not leak into the replay
const CALLBACK_ONLY_HEADERS: [HeaderName; 3] = [
    header::CONTENT_LENGTH,
    header::CONTENT_TYPE,
    header::TRANSFER_ENCODING,
];

/// Snapshot of an unauthenticated request, held until its login completes
#[derive(Debug, Clone)]
pub struct PendingRequest {
    /// Original method
    pub method: Method,
    /// Original path and query (`/dashboard?tab=1`)
    pub uri: String,
    /// Subset of the original headers needed to replay it
    pub headers: HeaderMap,
    /// When the gateway received the original request
    pub received_at: Instant,
}

impl PendingRequest {
    /// Capture the replayable parts of an inbound request
    #[must_use]
    pub fn capture(parts: &Parts) -> Self {
        let uri = parts
            .uri
            .path_and_query()
            .map_or_else(|| "/".to_string(), ToString::to_string);

        let mut headers = HeaderMap::new();
        for name in &REPLAY_HEADERS {
            for value in parts.headers.get_all(name) {
                headers.append(name.clone(), value.clone());
            }
        }

        Self {
            method: parts.method.clone(),
            uri,
            headers,
            received_at: Instant::now(),
        }
    }

    /// Whether this entry has outlived `ttl`
    #[must_use]
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.received_at.elapsed() > ttl
    }

    /// Rebuild a forwardable request from this snapshot.
    ///
    /// Starts from the callback request's headers (cookies, host, client
    /// hints of the same browser), drops body framing headers, then restores
    /// the captured headers. The original body is not retained, so the
    /// replayed request has an empty body.
    #[must_use]
    pub fn into_request(self, callback_headers: &HeaderMap) -> Request<Body> {
        let mut headers = callback_headers.clone();
        for name in &CALLBACK_ONLY_HEADERS {
            headers.remove(name);
        }
        for name in &REPLAY_HEADERS {
            headers.remove(name);
        }
        for (name, value) in &self.headers {
            headers.append(name.clone(), value.clone());
        }

        let mut request = Request::new(Body::empty());
        *request.method_mut() = self.method;
        *request.uri_mut() = self.uri.parse().unwrap_or_else(|e| {
            warn!(uri = %self.uri, error = %e, "Stored URI failed to parse, replaying /");
            axum::http::Uri::from_static("/")
        });
        *request.headers_mut() = headers;
        request
    }
}

/// Concurrent map of state token → pending request
pub struct PendingRequestCache {
    entries: DashMap<String, PendingRequest>,
    ttl: Duration,
    max_entries: usize,
}

impl PendingRequestCache {
    /// Create an empty cache
    #[must_use]
    pub fn new(config: &PendingConfig) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: config.ttl,
            max_entries: config.max_entries.max(1),
        }
    }

    /// Store an entry and return the state token that keys it.
    ///
    /// Capacity is enforced after the insert, so the cache settles back to
    /// `max_entries` even when several `put`s race. Once the cache is full
    /// every `put` scans all entries for the oldest one.
    pub fn put(&self, entry: PendingRequest) -> String {
        let token = loop {
            let token = generate_state_token();
            if let Entry::Vacant(slot) = self.entries.entry(token.clone()) {
                slot.insert(entry);
                break token;
            }
            // 256-bit collision: draw again rather than overwrite
            warn!("State token collision, regenerating");
        };

        if self.entries.len() > self.max_entries {
            self.make_room(&token);
        }
        token
    }

    /// Remove and return the entry for `state`, if present and not expired
    pub fn take(&self, state: &str) -> Option<PendingRequest> {
        let (_, entry) = self.entries.remove(state)?;
        if entry.is_expired(self.ttl) {
            debug!("Pending request expired before callback");
            return None;
        }
        Some(entry)
    }

    /// Purge entries older than the TTL. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, entry| !entry.is_expired(ttl));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!(count = removed, "Evicted expired pending requests");
        }
        removed
    }

    /// Current number of pending entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Return `true` when nothing is pending
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `state` is currently pending (does not consume it)
    #[must_use]
    pub fn contains(&self, state: &str) -> bool {
        self.entries.contains_key(state)
    }

    /// Shrink back to `max_entries`: expired entries first, then the oldest
    /// attempts other than `keep`
    fn make_room(&self, keep: &str) {
        self.evict_expired();

        while self.entries.len() > self.max_entries {
            let oldest = self
                .entries
                .iter()
                .filter(|e| e.key() != keep)
                .min_by_key(|e| e.value().received_at)
                .map(|e| e.key().clone());

            let Some(key) = oldest else { break };
            if self.entries.remove(&key).is_some() {
                warn!(
                    max_entries = self.max_entries,
                    "Pending request cache full, dropped oldest login attempt"
                );
            }
        }
    }
}

/// Generate an unguessable state token (32 CSPRNG bytes, base64url)
#[must_use]
pub fn generate_state_token() -> String {
    let bytes: [u8; 32] = rand::random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Spawn a background task that purges expired entries every `interval`.
///
/// The task exits when the `shutdown` receiver fires.
pub fn spawn_sweeper(
    cache: Arc<PendingRequestCache>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    cache.evict_expired();
                }
                _ = shutdown.recv() => {
                    debug!("Pending request sweeper shutting down");
                    break;
                }
            }
        }
    })
}
