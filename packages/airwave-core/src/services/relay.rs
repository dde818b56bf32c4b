//! The streaming relay engine.
//!
//! [`RelayEngine::handle`] gates a request (validation, then rate limiting),
//! picks how to serve it, and returns a [`RelayResponse`] the HTTP layer
//! writes out. Live audio is never buffered: each upstream chunk goes
//! through the ICY framer and out to the client as it arrives.

use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use async_stream::stream;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::{redirect, Client};
use tokio_util::sync::CancellationToken;

use crate::error::{RelayError, RelayResult};
use crate::hls::{is_manifest_url, Fetcher, HlsProxyLoader, PlaybackPlan, ProxyEndpoint};
use crate::protocol_constants::{
    FLUSH_THRESHOLD, ICY_METADATA_REQUEST_HEADER, MAX_PLAYLIST_BYTES, METADATA_CONNECT_TIMEOUT,
    METADATA_FETCH_TIMEOUT, METADATA_MAX_REDIRECTS, PLAYLIST_FETCH_TIMEOUT,
    UPSTREAM_CONNECT_TIMEOUT, USER_AGENT,
};
use crate::security::{is_rate_limit_exempt, RateLimiter, RateScope, StreamTarget, UrlValidator};
use crate::services::metadata::{MetadataCache, MetadataRecord};
use crate::services::resolver::{
    is_playlist_path, select_playlist_entry, should_resolve, ShoutcastResolver,
};
use crate::state::{AccessDeniedPolicy, RelayConfig};
use crate::stream::{
    live_audio_headers, parse_metaint, playlist_headers, read_capped, segment_headers,
    IcyFrameState, RelayStreamGuard,
};

/// Body stream handed to axum.
pub type AudioStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

// ─────────────────────────────────────────────────────────────────────────────
// Upstream clients
// ─────────────────────────────────────────────────────────────────────────────

/// Timeout profile of an upstream HTTP client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientProfile {
    /// Live relays: bounded connect, unbounded body.
    Relay,
    /// Metadata-only fetches: bounded connect and total time.
    MetadataFetch,
}

/// Builds an upstream client that cannot be steered at private addresses.
///
/// Each redirect hop gets the static checks (scheme, blocked host, literal
/// IP, port) in the redirect policy. Every name the client connects to,
/// first request or redirect hop, is resolved through the validator's
/// [`GuardedResolver`](crate::security::GuardedResolver), so a hop to a name
/// that resolves privately, or a name re-pointed after validation, fails at
/// connect. System proxies are ignored since they would resolve for us.
pub fn build_upstream_client(
    validator: &UrlValidator,
    profile: ClientProfile,
) -> RelayResult<Client> {
    let hop_validator = validator.clone();
    let policy = redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= METADATA_MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }
        match hop_validator.check_static(attempt.url()) {
            Ok(()) => attempt.follow(),
            Err(e) => {
                log::warn!("[Relay] Refusing redirect to {}: {}", attempt.url(), e);
                attempt.error(e)
            }
        }
    });

    let builder = Client::builder()
        .user_agent(USER_AGENT)
        .redirect(policy)
        .dns_resolver(validator.dns_resolver())
        .no_proxy()
        .http1_only();
    let builder = match profile {
        ClientProfile::Relay => builder.connect_timeout(UPSTREAM_CONNECT_TIMEOUT),
        ClientProfile::MetadataFetch => builder
            .connect_timeout(METADATA_CONNECT_TIMEOUT)
            .timeout(METADATA_FETCH_TIMEOUT),
    };
    builder
        .build()
        .map_err(|e| RelayError::Internal(format!("Failed to create upstream client: {}", e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Request / Response
// ─────────────────────────────────────────────────────────────────────────────

/// A stream-endpoint request after transport parsing.
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub url: String,
    /// Return the body as playlist text instead of relaying audio.
    pub playlist: bool,
    pub client_ip: IpAddr,
}

/// What the HTTP layer sends back.
pub enum RelayResponse {
    /// Streamed body (live audio or a proxied segment).
    Stream {
        status: StatusCode,
        headers: HeaderMap,
        body: AudioStream,
    },
    /// Complete text body (playlist or rewritten manifest).
    Text { headers: HeaderMap, body: String },
    /// 302 to the given URL.
    Redirect(String),
}

impl std::fmt::Debug for RelayResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stream { status, .. } => write!(f, "Stream({})", status),
            Self::Text { body, .. } => write!(f, "Text({} bytes)", body.len()),
            Self::Redirect(url) => write!(f, "Redirect({})", url),
        }
    }
}

impl IntoResponse for RelayResponse {
    fn into_response(self) -> Response {
        match self {
            Self::Stream {
                status,
                headers,
                body,
            } => (status, headers, Body::from_stream(body)).into_response(),
            Self::Text { headers, body } => (StatusCode::OK, headers, body).into_response(),
            Self::Redirect(location) => (
                StatusCode::FOUND,
                [
                    (header::LOCATION, location),
                    (header::CACHE_CONTROL, "no-cache".to_string()),
                ],
            )
                .into_response(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Collaborators of a [`RelayEngine`].
pub struct RelayParts {
    pub config: RelayConfig,
    pub client: Client,
    pub validator: UrlValidator,
    pub limiter: Arc<RateLimiter>,
    pub cache: Arc<MetadataCache>,
    pub resolver: ShoutcastResolver,
    /// Fetches manifests and playlists for planning and rewriting.
    pub fetcher: Arc<dyn Fetcher>,
    pub endpoint: ProxyEndpoint,
    pub cancel: CancellationToken,
}

/// Relays upstream audio, playlists and HLS resources to clients.
pub struct RelayEngine {
    config: RelayConfig,
    client: Client,
    validator: UrlValidator,
    limiter: Arc<RateLimiter>,
    cache: Arc<MetadataCache>,
    resolver: ShoutcastResolver,
    fetcher: Arc<dyn Fetcher>,
    endpoint: ProxyEndpoint,
    cancel: CancellationToken,
}

impl RelayEngine {
    pub fn new(parts: RelayParts) -> Self {
        Self {
            config: parts.config,
            client: parts.client,
            validator: parts.validator,
            limiter: parts.limiter,
            cache: parts.cache,
            resolver: parts.resolver,
            fetcher: parts.fetcher,
            endpoint: parts.endpoint,
            cancel: parts.cancel,
        }
    }

    /// Serves one stream-endpoint request.
    ///
    /// The URL is validated and the client rate limited before any upstream
    /// I/O. Manifest and `.m3u` requests do not count against the limit.
    pub async fn handle(&self, request: RelayRequest) -> RelayResult<RelayResponse> {
        let target = self.validator.validate(&request.url).await?;

        if !is_rate_limit_exempt(target.path()) {
            let identifier = RateScope::Stream.identifier(request.client_ip);
            if let Err(e) = self.limiter.check(&identifier) {
                log::warn!(
                    "[Relay] Rate limited {} requesting {}",
                    identifier,
                    target.as_str()
                );
                return Err(e);
            }
        }

        let path = target.path().to_ascii_lowercase();
        if request.playlist || is_playlist_path(&path) {
            return self.fetch_playlist(&target).await;
        }
        if is_manifest_url(&path) {
            return self.proxy_manifest(&target).await;
        }
        if path.ends_with(".ts") {
            return self.proxy_segment(&target).await;
        }

        let source = target.clone();
        let target = if should_resolve(&target) {
            self.resolver.resolve(target).await
        } else {
            target
        };

        if target.is_https() && self.config.redirect_https_upstreams {
            log::debug!(
                "[Relay] Redirecting client to HTTPS upstream {}",
                target.as_str()
            );
            return Ok(RelayResponse::Redirect(target.as_str().to_string()));
        }

        self.open_live(&source, &target, request.client_ip).await
    }

    /// Opens a live relay of `target`.
    ///
    /// Metadata found in the stream is cached under `source`, the URL the
    /// client asked for and will poll with.
    pub async fn open_live(
        &self,
        source: &StreamTarget,
        target: &StreamTarget,
        client_ip: IpAddr,
    ) -> RelayResult<RelayResponse> {
        let response = self
            .client
            .get(target.url().clone())
            .header(ICY_METADATA_REQUEST_HEADER, "1")
            .send()
            .await
            .map_err(|e| {
                log::warn!("[Relay] Upstream {} unreachable: {}", target.as_str(), e);
                RelayError::UpstreamUnreachable(e.to_string())
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            log::info!(
                "[Relay] Upstream {} answered {}, policy {:?}",
                target.as_str(),
                status,
                self.config.access_denied
            );
            return match self.config.access_denied {
                AccessDeniedPolicy::RedirectToSource => {
                    Ok(RelayResponse::Redirect(target.as_str().to_string()))
                }
                AccessDeniedPolicy::Reject => Err(RelayError::UpstreamRejected {
                    status: status.as_u16(),
                }),
            };
        }
        if !status.is_success() {
            log::warn!("[Relay] Upstream {} answered {}", target.as_str(), status);
            return Err(RelayError::UpstreamRejected {
                status: status.as_u16(),
            });
        }

        let metaint = parse_metaint(response.headers());
        let headers = live_audio_headers(response.headers());
        let guard = Arc::new(RelayStreamGuard::new(target.as_str(), client_ip, metaint));

        let body = relay_body(
            response,
            IcyFrameState::new(metaint),
            Arc::clone(&self.cache),
            source.as_str().to_string(),
            guard,
            self.cancel.clone(),
        );

        Ok(RelayResponse::Stream {
            status: StatusCode::OK,
            headers,
            body,
        })
    }

    /// Fetches a playlist and returns its text.
    pub async fn fetch_playlist(&self, target: &StreamTarget) -> RelayResult<RelayResponse> {
        let response = self
            .client
            .get(target.url().clone())
            .timeout(PLAYLIST_FETCH_TIMEOUT)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::UpstreamRejected {
                status: status.as_u16(),
            });
        }

        let body = read_capped(response, MAX_PLAYLIST_BYTES).await?;
        let body = String::from_utf8_lossy(&body).into_owned();
        if body.trim().is_empty() {
            log::warn!("[Relay] Empty playlist from {}", target.as_str());
            return Err(RelayError::EmptyPlaylist);
        }
        Ok(RelayResponse::Text {
            headers: playlist_headers(),
            body,
        })
    }

    /// Streams an HLS segment through.
    pub async fn proxy_segment(&self, target: &StreamTarget) -> RelayResult<RelayResponse> {
        let response = self.client.get(target.url().clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::UpstreamRejected {
                status: status.as_u16(),
            });
        }

        let headers = segment_headers(response.headers(), target.path());
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other));
        Ok(RelayResponse::Stream {
            status,
            headers,
            body: Box::pin(body),
        })
    }

    /// Fetches a manifest and rewrites its segment lines to go through the
    /// relay.
    pub async fn proxy_manifest(&self, target: &StreamTarget) -> RelayResult<RelayResponse> {
        let loader = HlsProxyLoader::for_source(
            target.as_str(),
            self.endpoint.clone(),
            true,
            Arc::clone(&self.fetcher),
        );
        let loaded = loader.load(target.as_str()).await?;
        Ok(RelayResponse::Text {
            headers: segment_headers(&HeaderMap::new(), target.path()),
            body: String::from_utf8_lossy(&loaded.body).into_owned(),
        })
    }
    /// Plans playback of a station source.
    ///
    /// Playlist sources are fetched and an entry picked by the configured
    /// [`PlaylistEntryPolicy`](crate::state::PlaylistEntryPolicy), giving a
    /// direct plan for that entry. If the playlist cannot be fetched the
    /// playlist plan is returned so the player can try itself; a playlist
    /// with no usable entry is an error.
    pub async fn plan(&self, source_url: &str, page_is_https: bool) -> RelayResult<PlaybackPlan> {
        let plan = PlaybackPlan::for_source(source_url, page_is_https, &self.endpoint);
        let playlist_url = match &plan {
            PlaybackPlan::Playlist { playlist_url, .. } => playlist_url.clone(),
            _ => return Ok(plan),
        };

        let body = match self.fetcher.fetch(&playlist_url).await {
            Ok(body) => body,
            Err(e) => {
                log::warn!(
                    "[Relay] Could not fetch playlist {} for planning: {}",
                    playlist_url,
                    e
                );
                return Ok(plan);
            }
        };
        let text = String::from_utf8_lossy(&body);
        let entry = select_playlist_entry(&text, self.config.playlist_entry)
            .ok_or(RelayError::EmptyPlaylist)?;
        let entry = self.validator.validate(&entry).await?;
        log::debug!(
            "[Relay] Playlist {} planned as {}",
            playlist_url,
            entry.as_str()
        );
        Ok(PlaybackPlan::direct(entry.as_str(), page_is_https, &self.endpoint))
    }
}

/// Builds the client body for a live relay.
///
/// Ends cleanly on upstream EOF, upstream error, or shutdown, recording which
/// on the guard. Dropping the stream (client disconnect) drops the upstream
/// response with it.
fn relay_body(
    mut response: reqwest::Response,
    mut framer: IcyFrameState,
    cache: Arc<MetadataCache>,
    cache_url: String,
    guard: Arc<RelayStreamGuard>,
    cancel: CancellationToken,
) -> AudioStream {
    Box::pin(stream! {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::debug!("[Relay] Shutdown, closing relay of {}", cache_url);
                    guard.mark_shutdown();
                    break;
                }
                next = response.chunk() => next,
            };

            let chunk = match next {
                Ok(Some(chunk)) => chunk,
                Ok(None) => {
                    guard.mark_completed();
                    break;
                }
                Err(e) => {
                    guard.record_error(&e.to_string());
                    break;
                }
            };

            let framed = framer.push(&chunk);
            for meta in framed.events {
                guard.record_metadata();
                let record = MetadataRecord::from_icy(&meta);
                if record.has_title() {
                    tracing::debug!(stream = %cache_url, title = %record.title, "icy_metadata");
                    cache.put(&cache_url, record);
                }
            }

            let mut audio = framed.audio;
            while !audio.is_empty() {
                let piece = audio.split_to(audio.len().min(FLUSH_THRESHOLD));
                guard.record_chunk(piece.len());
                yield Ok::<Bytes, std::io::Error>(piece);
            }
        }

        if framer.desyncs() > 0 {
            log::info!(
                "[ICY] {} resynchronized {} time(s)",
                cache_url,
                framer.desyncs()
            );
        }
    })
}
