//! Shoutcast root resolution and playlist parsing.
//!
//! Shoutcast servers answer their bare root (`http://host:8000/`) with an
//! HTML status page; the audio lives at one of a handful of well-known paths.
//! [`ShoutcastResolver`] probes those paths and returns the first that looks
//! like audio.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::header;
use reqwest::{redirect, Client, Url};

use crate::error::{RelayError, RelayResult};
use crate::protocol_constants::{
    ICY_METADATA_REQUEST_HEADER, SHOUTCAST_CANDIDATE_PATHS, SHOUTCAST_PROBE_TIMEOUT, USER_AGENT,
};
use crate::security::{StreamTarget, UrlValidator};
use crate::state::PlaylistEntryPolicy;

// ─────────────────────────────────────────────────────────────────────────────
// Probing
// ─────────────────────────────────────────────────────────────────────────────

/// Checks whether a URL serves audio.
#[async_trait]
pub trait StreamProber: Send + Sync {
    /// Returns true if `url` answers like an audio stream. Errors count as false.
    async fn probe(&self, url: &Url) -> bool;
}

/// HEAD-request prober. Redirects are not followed.
pub struct HttpProber {
    client: Client,
}

impl HttpProber {
    /// Creates a prober with its own non-redirecting client. Connections go
    /// through the validator's address checks.
    pub fn new(validator: &UrlValidator) -> RelayResult<Self> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(SHOUTCAST_PROBE_TIMEOUT)
            .user_agent(USER_AGENT)
            .dns_resolver(validator.dns_resolver())
            .no_proxy()
            .build()
            .map_err(|e| RelayError::Internal(format!("Failed to create probe client: {}", e)))?;
        Ok(Self { client })
    }
}

/// Content types and ICY headers that identify an audio endpoint.
///
/// Any non-empty `icy-*` header counts; some servers send `icy-br` or
/// `icy-metaint` without a name.
fn looks_like_audio(headers: &header::HeaderMap) -> bool {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();
    ["audio", "mpeg", "ogg"]
        .iter()
        .any(|needle| content_type.contains(needle))
        || headers
            .iter()
            .any(|(name, value)| name.as_str().starts_with("icy-") && !value.is_empty())
}

#[async_trait]
impl StreamProber for HttpProber {
    async fn probe(&self, url: &Url) -> bool {
        match self
            .client
            .head(url.clone())
            .header(ICY_METADATA_REQUEST_HEADER, "1")
            .send()
            .await
        {
            Ok(response) => looks_like_audio(response.headers()),
            Err(e) => {
                log::debug!("[Resolver] Probe of {} failed: {}", url, e);
                false
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolver
// ─────────────────────────────────────────────────────────────────────────────

/// Whether a target looks like a Shoutcast server that needs path discovery.
///
/// True for explicit-port roots (`:8000/`), `/;` suffixes, and `:8000` URLs
/// that name neither `/stream` nor an `.mp3`.
#[must_use]
pub fn should_resolve(target: &StreamTarget) -> bool {
    let path = target.path();
    let raw = target.as_str().to_ascii_lowercase();
    path.ends_with("/;")
        || (target.has_explicit_port() && (path.is_empty() || path == "/"))
        || (raw.contains(":8000") && !raw.contains("/stream") && !raw.contains(".mp3"))
}

/// Finds the audio endpoint of a Shoutcast server.
pub struct ShoutcastResolver {
    prober: Arc<dyn StreamProber>,
}

impl ShoutcastResolver {
    pub fn new(prober: Arc<dyn StreamProber>) -> Self {
        Self { prober }
    }

    /// Resolves `target` to a playable endpoint, falling back to the input.
    ///
    /// A trailing `/;` is stripped first. Only explicit-port roots are probed;
    /// any other path is returned unchanged.
    pub async fn resolve(&self, target: StreamTarget) -> StreamTarget {
        let base = match target.path().strip_suffix(';') {
            Some(stripped) if target.path().ends_with("/;") => {
                let stripped = stripped.trim_end_matches('/');
                target.with_path(if stripped.is_empty() { "/" } else { stripped })
            }
            _ => target,
        };

        let is_root = base.path().is_empty() || base.path() == "/";
        if !base.has_explicit_port() || !is_root {
            return base;
        }

        for path in SHOUTCAST_CANDIDATE_PATHS {
            let candidate = base.with_path(path);
            if self.prober.probe(candidate.url()).await {
                log::info!(
                    "[Resolver] Resolved Shoutcast root {} to {}",
                    base.as_str(),
                    candidate.as_str()
                );
                return candidate;
            }
        }

        log::info!(
            "[Resolver] No working stream path for {}, using it as-is",
            base.as_str()
        );
        base
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Playlists
// ─────────────────────────────────────────────────────────────────────────────

/// Returns true for playlist files the relay returns as text.
#[must_use]
pub fn is_playlist_path(path: &str) -> bool {
    let path = path.to_ascii_lowercase();
    path.ends_with(".m3u") || path.ends_with(".pls")
}

fn is_pls(body: &str) -> bool {
    body.lines().any(|line| {
        let line = line.trim().to_ascii_lowercase();
        line == "[playlist]" || (line.starts_with("file") && line.contains('='))
    })
}

/// `FileN=` values of a PLS body, in file order.
fn parse_pls(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| {
            let (key, value) = line.trim().split_once('=')?;
            let key = key.trim().to_ascii_lowercase();
            let is_file_key =
                key.len() > 4 && key.starts_with("file") && key[4..].chars().all(|c| c.is_ascii_digit());
            let value = value.trim();
            (is_file_key && !value.is_empty()).then(|| value.to_string())
        })
        .collect()
}

/// Non-blank, non-comment lines of an M3U body.
fn parse_m3u(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Parses an `.m3u` or `.pls` body into ordered candidate URLs.
#[must_use]
pub fn parse_playlist(body: &str) -> Vec<String> {
    if is_pls(body) {
        parse_pls(body)
    } else {
        parse_m3u(body)
    }
}

/// Picks the entry to play from a playlist body under `policy`.
#[must_use]
pub fn select_playlist_entry(body: &str, policy: PlaylistEntryPolicy) -> Option<String> {
    let entries = parse_playlist(body);
    if entries.len() > 1 {
        log::debug!(
            "[Resolver] Playlist has {} entries, policy {:?}",
            entries.len(),
            policy
        );
    }
    policy.pick(&entries).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Accepts URLs whose path is in `accept`, recording every probe.
    struct ScriptedProber {
        accept: Vec<&'static str>,
        probed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StreamProber for ScriptedProber {
        async fn probe(&self, url: &Url) -> bool {
            self.probed.lock().push(url.path().to_string());
            self.accept.contains(&url.path())
        }
    }

    fn resolver(accept: Vec<&'static str>) -> (ShoutcastResolver, Arc<ScriptedProber>) {
        let prober = Arc::new(ScriptedProber {
            accept,
            probed: Mutex::new(Vec::new()),
        });
        (
            ShoutcastResolver::new(Arc::clone(&prober) as Arc<dyn StreamProber>),
            prober,
        )
    }

    #[test]
    fn playlist_prefers_second_entry() {
        let body = "#comment\nhttp://a.example/stream1\nhttp://a.example/stream2\n";
        assert_eq!(
            select_playlist_entry(body, PlaylistEntryPolicy::PreferSecond).as_deref(),
            Some("http://a.example/stream2")
        );
        assert_eq!(
            select_playlist_entry(body, PlaylistEntryPolicy::First).as_deref(),
            Some("http://a.example/stream1")
        );
    }

    #[test]
    fn playlist_with_only_comments_has_no_entry() {
        assert!(select_playlist_entry("#EXTM3U\n\n  \n", PlaylistEntryPolicy::PreferSecond).is_none());
    }

    #[test]
    fn pls_file_keys_are_collected_in_order() {
        let body = "[playlist]\nNumberOfEntries=2\nFile1=http://a.example:8000/live\nTitle1=A\nFile2=http://b.example/live\nLength1=-1\n";
        assert_eq!(
            parse_playlist(body),
            vec!["http://a.example:8000/live", "http://b.example/live"]
        );
    }

    #[test]
    fn crlf_m3u_is_trimmed() {
        assert_eq!(
            parse_playlist("#EXTM3U\r\n#EXTINF:-1,Radio\r\nhttp://a.example/live\r\n"),
            vec!["http://a.example/live"]
        );
    }

    #[test]
    fn playlist_paths_are_detected() {
        assert!(is_playlist_path("/listen.pls"));
        assert!(is_playlist_path("/LISTEN.M3U"));
        assert!(!is_playlist_path("/live.m3u8"));
    }

    #[tokio::test]
    async fn bare_root_probes_candidates_in_order() {
        let (resolver, prober) = resolver(vec!["/;stream.mp3"]);
        let target = StreamTarget::unchecked("http://radio.example:8000/");

        let resolved = resolver.resolve(target).await;
        assert_eq!(resolved.as_str(), "http://radio.example:8000/;stream.mp3");
        assert_eq!(*prober.probed.lock(), vec!["/;", "/stream", "/;stream.mp3"]);
    }

    #[tokio::test]
    async fn falls_back_to_input_when_nothing_answers() {
        let (resolver, prober) = resolver(vec![]);
        let resolved = resolver
            .resolve(StreamTarget::unchecked("http://radio.example:8000"))
            .await;
        assert_eq!(resolved.as_str(), "http://radio.example:8000/");
        assert_eq!(prober.probed.lock().len(), 4);
    }

    #[tokio::test]
    async fn semicolon_suffix_is_stripped_before_probing() {
        let (resolver, _) = resolver(vec!["/stream"]);
        let resolved = resolver
            .resolve(StreamTarget::unchecked("http://radio.example:8000/;"))
            .await;
        assert_eq!(resolved.as_str(), "http://radio.example:8000/stream");
    }

    #[tokio::test]
    async fn non_root_paths_are_untouched() {
        let (resolver, prober) = resolver(vec!["/;"]);
        let resolved = resolver
            .resolve(StreamTarget::unchecked("http://radio.example:8000/live.mp3"))
            .await;
        assert_eq!(resolved.as_str(), "http://radio.example:8000/live.mp3");
        assert!(prober.probed.lock().is_empty());

        let no_port = resolver
            .resolve(StreamTarget::unchecked("http://radio.example/"))
            .await;
        assert_eq!(no_port.as_str(), "http://radio.example/");
    }

    #[test]
    fn resolution_triggers() {
        assert!(should_resolve(&StreamTarget::unchecked("http://a.example:8000/")));
        assert!(should_resolve(&StreamTarget::unchecked("http://a.example:9000/;")));
        assert!(should_resolve(&StreamTarget::unchecked("http://a.example:8000/live")));
        assert!(!should_resolve(&StreamTarget::unchecked("http://a.example:8000/stream")));
        assert!(!should_resolve(&StreamTarget::unchecked("http://a.example/live.mp3")));
    }

    #[test]
    fn audio_detection_uses_content_type_or_icy_name() {
        let mut headers = header::HeaderMap::new();
        assert!(!looks_like_audio(&headers));
        headers.insert(header::CONTENT_TYPE, "text/html".parse().unwrap());
        assert!(!looks_like_audio(&headers));
        headers.insert("icy-name", "Station".parse().unwrap());
        assert!(looks_like_audio(&headers));
        headers.remove("icy-name");
        headers.insert(header::CONTENT_TYPE, "application/ogg".parse().unwrap());
        assert!(looks_like_audio(&headers));
    }

    #[test]
    fn any_icy_header_marks_audio() {
        for name in ["icy-br", "icy-metaint", "icy-genre", "icy-pub"] {
            let mut headers = header::HeaderMap::new();
            headers.insert(header::CONTENT_TYPE, "text/html".parse().unwrap());
            headers.insert(name, "128".parse().unwrap());
            assert!(looks_like_audio(&headers), "{} should identify audio", name);
        }

        let mut empty = header::HeaderMap::new();
        empty.insert("icy-br", "".parse().unwrap());
        assert!(!looks_like_audio(&empty));
    }

    #[tokio::test]
    async fn http_prober_refuses_names_resolving_to_private_addresses() {
        use crate::security::validator::tests::validator_with;
        use crate::test_fixtures::spawn_upstream;
        use axum::routing::get;
        use axum::Router;
        use std::sync::atomic::{AtomicBool, Ordering};

        let hit = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&hit);
        let router = Router::new().route(
            "/stream",
            get(move || {
                seen.store(true, Ordering::SeqCst);
                async { ([(header::CONTENT_TYPE, "audio/mpeg")], "") }
            }),
        );
        let base = spawn_upstream(router).await;
        let port = Url::parse(&base).unwrap().port().unwrap();

        let prober = HttpProber::new(&validator_with(&[("vm", "127.0.0.1")])).unwrap();
        let url = Url::parse(&format!("http://vm:{}/stream", port)).unwrap();
        assert!(!prober.probe(&url).await);
        assert!(!hit.load(Ordering::SeqCst));
    }
}
