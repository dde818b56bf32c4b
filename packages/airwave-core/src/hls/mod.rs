//! HLS manifest rewriting and the proxy loader.
//!
//! A manifest served through the relay must point its segments back at the
//! relay, or an HTTPS page would try to load plain-HTTP segments directly.
//! [`rewrite_manifest`] does that rewrite and [`HlsProxyLoader`] wraps it in
//! the per-request fetch flow used for both first load and station switches.

pub mod plan;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::{Client, Url};

use crate::error::{RelayError, RelayResult};
use crate::protocol_constants::{MAX_MANIFEST_BYTES, PLAYLIST_FETCH_TIMEOUT};
use crate::security::UrlValidator;
use crate::stream::read_capped;
use crate::utils::encode_query_value;

pub use plan::{fix_shoutcast_root, PlaybackPlan};

/// Path of the relay's stream endpoint.
pub const PROXY_STREAM_PATH: &str = "/proxy/stream";

// ─────────────────────────────────────────────────────────────────────────────
// Proxy endpoint
// ─────────────────────────────────────────────────────────────────────────────

/// Builds relay URLs for upstream references.
///
/// The prefix ends in `&` so the upstream is appended as the last query
/// parameter: `<base>/proxy/stream?token=<t>&url=<encoded>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    prefix: String,
}

impl ProxyEndpoint {
    /// Creates an endpoint under `base_url`. An empty base gives root-relative
    /// URLs, which resolve against the manifest the player fetched from us.
    #[must_use]
    pub fn new(base_url: &str, token: &str) -> Self {
        Self {
            prefix: format!(
                "{}{}?token={}&",
                base_url.trim_end_matches('/'),
                PROXY_STREAM_PATH,
                encode_query_value(token)
            ),
        }
    }

    /// Wraps an absolute upstream URL.
    #[must_use]
    pub fn wrap(&self, upstream: &str) -> String {
        format!("{}url={}", self.prefix, encode_query_value(upstream))
    }

    /// Wraps a playlist URL so the relay returns its text instead of audio.
    #[must_use]
    pub fn wrap_playlist(&self, upstream: &str) -> String {
        format!(
            "{}playlist=1&url={}",
            self.prefix,
            encode_query_value(upstream)
        )
    }

    /// Whether `url` already points at a relay.
    #[must_use]
    pub fn is_proxied(&self, url: &str) -> bool {
        url.starts_with(&self.prefix) || url.contains(&format!("{}?", PROXY_STREAM_PATH))
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// URL helpers
// ─────────────────────────────────────────────────────────────────────────────

fn is_absolute(reference: &str) -> bool {
    let lower = reference.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Everything up to and including the last `/` of the URL path.
#[must_use]
pub fn base_dir(manifest_url: &str) -> String {
    match Url::parse(manifest_url) {
        Ok(mut url) => {
            let dir_len = url.path().rfind('/').map_or(0, |i| i + 1);
            let dir = url.path()[..dir_len].to_string();
            url.set_path(&dir);
            url.set_query(None);
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => manifest_url
            .rfind('/')
            .map_or_else(String::new, |i| manifest_url[..=i].to_string()),
    }
}

/// Makes `reference` absolute against the manifest at `manifest_url`.
///
/// Absolute references are returned unchanged; root-relative and `../`
/// references follow normal URL resolution.
#[must_use]
pub fn resolve_relative(manifest_url: &str, reference: &str) -> String {
    if is_absolute(reference) {
        return reference.to_string();
    }
    Url::parse(manifest_url)
        .and_then(|base| base.join(reference))
        .map(|url| url.to_string())
        .unwrap_or_else(|_| format!("{}{}", base_dir(manifest_url), reference))
}

/// Only plain-HTTP resources on an HTTPS page need the relay.
#[must_use]
pub fn needs_proxy(url: &str, page_is_https: bool) -> bool {
    page_is_https && url.to_ascii_lowercase().starts_with("http://")
}

/// Whether a URL names an HLS manifest.
#[must_use]
pub fn is_manifest_url(url: &str) -> bool {
    url.to_ascii_lowercase().contains(".m3u8")
}

fn is_media_reference(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower.contains(".ts") || lower.contains(".m3u8")
}

/// Rewrites segment and variant lines of a manifest to absolute relay URLs.
///
/// Comment lines, blank lines and lines already pointing at the relay pass
/// through unchanged, so rewriting twice gives the same text. Absolute
/// HTTPS references stay direct.
#[must_use]
pub fn rewrite_manifest(
    body: &str,
    manifest_url: &str,
    endpoint: &ProxyEndpoint,
    page_is_https: bool,
) -> String {
    body.split('\n')
        .map(|line| {
            let uri = line.trim();
            if uri.is_empty()
                || uri.starts_with('#')
                || !is_media_reference(uri)
                || endpoint.is_proxied(uri)
            {
                return line.to_string();
            }
            let absolute = resolve_relative(manifest_url, uri);
            if needs_proxy(&absolute, page_is_https) {
                endpoint.wrap(&absolute)
            } else {
                absolute
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ─────────────────────────────────────────────────────────────────────────────
// Loader
// ─────────────────────────────────────────────────────────────────────────────

/// Progress of the most recent [`HlsProxyLoader::load`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    ResolvingRelative,
    ProxyDecision,
    ManifestRewrite,
    Passthrough,
    Delivered,
    Errored,
}

/// Fetches a resource body for the loader.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> RelayResult<Bytes>;
}

/// Fetcher that validates every URL before requesting it.
///
/// Bodies are read into memory, so each is capped at `max_body` bytes.
pub struct HttpFetcher {
    client: Client,
    validator: UrlValidator,
    max_body: usize,
}

impl HttpFetcher {
    pub fn new(client: Client, validator: UrlValidator) -> Self {
        Self {
            client,
            validator,
            max_body: MAX_MANIFEST_BYTES,
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> RelayResult<Bytes> {
        let target = self.validator.validate(url).await?;
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
        read_capped(response, self.max_body).await
    }
}

/// A fetched manifest or segment.
#[derive(Debug, Clone)]
pub struct LoadedResource {
    /// Absolute upstream URL that was fetched.
    pub upstream_url: String,
    /// URL a player should use for this resource (relay-wrapped when needed).
    pub request_url: String,
    pub body: Bytes,
    pub is_manifest: bool,
}

/// Fetch interceptor for one HLS source.
///
/// Holds no per-request state besides [`LoadState`] for diagnostics; every
/// call resolves, decides and rewrites from scratch and errors are not
/// retried.
pub struct HlsProxyLoader {
    source_url: String,
    endpoint: ProxyEndpoint,
    page_is_https: bool,
    fetcher: Arc<dyn Fetcher>,
    state: Mutex<LoadState>,
}

impl HlsProxyLoader {
    /// Creates the loader for `source_url`. Used for the first load and again
    /// for each station switch.
    pub fn for_source(
        source_url: impl Into<String>,
        endpoint: ProxyEndpoint,
        page_is_https: bool,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            source_url: source_url.into(),
            endpoint,
            page_is_https,
            fetcher,
            state: Mutex::new(LoadState::Idle),
        }
    }

    #[must_use]
    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    #[must_use]
    pub fn state(&self) -> LoadState {
        *self.state.lock()
    }

    fn enter(&self, next: LoadState) {
        log::trace!("[HLS] {} -> {:?}", self.source_url, next);
        *self.state.lock() = next;
    }

    /// Absolute upstream URL and player-facing URL for `reference`.
    #[must_use]
    pub fn request_urls(&self, reference: &str) -> (String, String) {
        let upstream = resolve_relative(&self.source_url, reference);
        let request = if needs_proxy(&upstream, self.page_is_https)
            && !self.endpoint.is_proxied(&upstream)
        {
            self.endpoint.wrap(&upstream)
        } else {
            upstream.clone()
        };
        (upstream, request)
    }

    /// Fetches `reference` (relative to the source manifest) and rewrites it
    /// if it is a manifest.
    pub async fn load(&self, reference: &str) -> RelayResult<LoadedResource> {
        self.enter(LoadState::ResolvingRelative);
        let (upstream_url, request_url) = self.request_urls(reference);

        self.enter(LoadState::ProxyDecision);
        let body = match self.fetcher.fetch(&upstream_url).await {
            Ok(body) => body,
            Err(e) => {
                self.enter(LoadState::Errored);
                log::warn!("[HLS] Failed to load {}: {}", upstream_url, e);
                return Err(e);
            }
        };

        let is_manifest = is_manifest_url(&upstream_url) || self.endpoint.is_proxied(reference);
        let body = if is_manifest {
            self.enter(LoadState::ManifestRewrite);
            let text = String::from_utf8_lossy(&body);
            Bytes::from(rewrite_manifest(
                &text,
                &upstream_url,
                &self.endpoint,
                self.page_is_https,
            ))
        } else {
            self.enter(LoadState::Passthrough);
            body
        };

        self.enter(LoadState::Delivered);
        Ok(LoadedResource {
            upstream_url,
            request_url,
            body,
            is_manifest,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Serves bodies from a fixed table.
    pub(crate) struct TableFetcher(pub HashMap<String, &'static str>);

    #[async_trait]
    impl Fetcher for TableFetcher {
        async fn fetch(&self, url: &str) -> RelayResult<Bytes> {
            self.0
                .get(url)
                .map(|body| Bytes::from_static(body.as_bytes()))
                .ok_or(RelayError::UpstreamRejected { status: 404 })
        }
    }

    fn endpoint() -> ProxyEndpoint {
        ProxyEndpoint::new("https://relay.example", "secret")
    }

    const MANIFEST: &str = "#EXTM3U\n#EXT-X-TARGETDURATION:6\n#EXTINF:6.0,\nseg001.ts\n#EXTINF:6.0,\n/abs/seg002.ts\n#EXTINF:6.0,\nhttps://cdn.example/seg003.ts\n#EXTINF:6.0,\nhttp://other.example/seg004.ts\n";

    #[test]
    fn endpoint_wraps_with_encoded_url() {
        let wrapped = endpoint().wrap("http://a.example/live/seg.ts?x=1");
        assert_eq!(
            wrapped,
            "https://relay.example/proxy/stream?token=secret&url=http%3A%2F%2Fa.example%2Flive%2Fseg.ts%3Fx%3D1"
        );
        assert!(endpoint().is_proxied(&wrapped));
        assert!(!endpoint().is_proxied("http://a.example/live/seg.ts"));
    }

    #[test]
    fn base_dir_drops_file_and_query() {
        assert_eq!(
            base_dir("http://a.example/live/index.m3u8?token=1"),
            "http://a.example/live/"
        );
        assert_eq!(base_dir("http://a.example"), "http://a.example/");
    }

    #[test]
    fn relative_references_resolve_against_manifest_dir() {
        let manifest = "http://a.example/live/index.m3u8";
        assert_eq!(
            resolve_relative(manifest, "seg1.ts"),
            "http://a.example/live/seg1.ts"
        );
        assert_eq!(
            resolve_relative(manifest, "/root/seg1.ts"),
            "http://a.example/root/seg1.ts"
        );
        assert_eq!(
            resolve_relative(manifest, "https://cdn.example/seg1.ts"),
            "https://cdn.example/seg1.ts"
        );
    }

    #[test]
    fn proxy_only_plain_http_on_https_page() {
        assert!(needs_proxy("http://a.example/s.ts", true));
        assert!(!needs_proxy("https://a.example/s.ts", true));
        assert!(!needs_proxy("http://a.example/s.ts", false));
    }

    #[test]
    fn manifest_segments_are_rewritten() {
        let out = rewrite_manifest(
            MANIFEST,
            "http://a.example/live/index.m3u8",
            &endpoint(),
            true,
        );
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "#EXTM3U");
        assert_eq!(
            lines[3],
            endpoint().wrap("http://a.example/live/seg001.ts")
        );
        assert_eq!(lines[5], endpoint().wrap("http://a.example/abs/seg002.ts"));
        assert_eq!(lines[7], "https://cdn.example/seg003.ts");
        assert_eq!(lines[9], endpoint().wrap("http://other.example/seg004.ts"));
        assert!(out.ends_with('\n'));
    }

    #[test]
    fn rewrite_is_idempotent() {
        let once = rewrite_manifest(MANIFEST, "http://a.example/live/index.m3u8", &endpoint(), true);
        let twice = rewrite_manifest(&once, "http://a.example/live/index.m3u8", &endpoint(), true);
        assert_eq!(once, twice);
    }

    #[test]
    fn http_page_gets_absolute_but_unwrapped_segments() {
        let out = rewrite_manifest("seg1.ts", "http://a.example/live/index.m3u8", &endpoint(), false);
        assert_eq!(out, "http://a.example/live/seg1.ts");
    }

    #[test]
    fn variant_playlists_are_rewritten_too() {
        let master = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=128000\nlow/index.m3u8\n";
        let out = rewrite_manifest(master, "http://a.example/master.m3u8", &endpoint(), true);
        assert!(out.ends_with(&format!("{}\n", endpoint().wrap("http://a.example/low/index.m3u8"))));
    }

    fn loader(table: &[(&str, &'static str)]) -> HlsProxyLoader {
        let table = table.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        HlsProxyLoader::for_source(
            "http://a.example/live/index.m3u8",
            endpoint(),
            true,
            Arc::new(TableFetcher(table)),
        )
    }

    #[tokio::test]
    async fn loader_rewrites_manifests_and_passes_segments() {
        let loader = loader(&[
            ("http://a.example/live/index.m3u8", "#EXTM3U\nseg1.ts\n"),
            ("http://a.example/live/seg1.ts", "TSDATA"),
        ]);
        assert_eq!(loader.state(), LoadState::Idle);

        let manifest = loader.load("http://a.example/live/index.m3u8").await.unwrap();
        assert!(manifest.is_manifest);
        assert_eq!(
            std::str::from_utf8(&manifest.body).unwrap(),
            format!("#EXTM3U\n{}\n", endpoint().wrap("http://a.example/live/seg1.ts"))
        );
        assert_eq!(loader.state(), LoadState::Delivered);

        let segment = loader.load("seg1.ts").await.unwrap();
        assert!(!segment.is_manifest);
        assert_eq!(&segment.body[..], b"TSDATA");
        assert_eq!(segment.request_url, endpoint().wrap("http://a.example/live/seg1.ts"));
    }

    #[tokio::test]
    async fn loader_records_errors() {
        let loader = loader(&[]);
        assert!(loader.load("missing.ts").await.is_err());
        assert_eq!(loader.state(), LoadState::Errored);
    }
}
