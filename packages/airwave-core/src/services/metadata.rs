//! Now-playing metadata: cache, providers and metadata-only fetches.
//!
//! Records enter the cache from three places, in order of preference when a
//! client polls:
//!
//! 1. An out-of-band [`MetadataProvider`] (SomaFM's song list API)
//! 2. The in-band ICY blocks a live relay is already reading
//! 3. A metadata-only fetch that reads the stream until its first block

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::header;
use dashmap::DashMap;
use regex_lite::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{RelayError, RelayResult};
use crate::protocol_constants::{
    ICY_METADATA_REQUEST_HEADER, MAX_METADATA_PROBE_BYTES, PROVIDER_TIMEOUT,
};
use crate::security::{StreamTarget, UrlValidator};
use crate::stream::{parse_metaint, IcyFrameState, StreamMetadata};
use crate::utils::{cache_key, now_secs};

// ─────────────────────────────────────────────────────────────────────────────
// Record
// ─────────────────────────────────────────────────────────────────────────────

/// Last-known track information for one stream.
///
/// Serializes as the `{title, url, timestamp}` object polling clients expect.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub title: String,
    #[serde(rename = "url")]
    pub artwork_url: String,
    /// Unix seconds when the record was observed (0 = nothing known).
    #[serde(rename = "timestamp")]
    pub observed_at: u64,
}

impl MetadataRecord {
    /// Builds a record from a decoded ICY block, observed now.
    #[must_use]
    pub fn from_icy(meta: &StreamMetadata) -> Self {
        Self {
            title: sanitize_title(&meta.title),
            artwork_url: sanitize_url(&meta.url),
            observed_at: now_secs(),
        }
    }

    #[must_use]
    pub fn has_title(&self) -> bool {
        !self.title.is_empty()
    }
}

/// Strips control characters and surrounding whitespace.
fn sanitize_title(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Keeps only absolute http(s) URLs.
fn sanitize_url(raw: &str) -> String {
    let raw = raw.trim();
    let lower = raw.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        raw.to_string()
    } else {
        String::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cache
// ─────────────────────────────────────────────────────────────────────────────

struct CacheEntry {
    record: MetadataRecord,
    stored_at: Instant,
}

/// Short-TTL cache keyed by the MD5 of the stream URL.
pub struct MetadataCache {
    ttl: Duration,
    entries: DashMap<String, CacheEntry>,
}

impl MetadataCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Returns the record for `stream_url` if it has not expired.
    #[must_use]
    pub fn get(&self, stream_url: &str) -> Option<MetadataRecord> {
        let key = cache_key(stream_url);
        let entry = self.entries.get(&key)?;
        if entry.stored_at.elapsed() < self.ttl {
            Some(entry.record.clone())
        } else {
            None
        }
    }

    /// Stores a record unless a newer one is already cached.
    pub fn put(&self, stream_url: &str, record: MetadataRecord) {
        let key = cache_key(stream_url);
        let now = Instant::now();
        self.entries
            .entry(key)
            .and_modify(|entry| {
                if record.observed_at >= entry.record.observed_at {
                    entry.record = record.clone();
                    entry.stored_at = now;
                }
            })
            .or_insert_with(|| CacheEntry {
                record: record.clone(),
                stored_at: now,
            });
    }

    /// Removes expired records, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
        before.saturating_sub(self.entries.len())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Providers
// ─────────────────────────────────────────────────────────────────────────────

/// Out-of-band source of now-playing data for specific hosts.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Whether this provider knows about `stream_url`.
    fn supports(&self, stream_url: &str) -> bool;

    /// Looks up the current track. `Ok(None)` means nothing usable.
    async fn fetch(&self, stream_url: &str) -> RelayResult<Option<MetadataRecord>>;
}

fn somafm_station_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)somafm\.com/([a-z0-9]+)-").expect("valid SomaFM pattern"))
}

/// Extracts the station slug from a SomaFM stream URL
/// (`http://ice1.somafm.com/groovesalad-128-mp3` → `groovesalad`).
#[must_use]
pub fn somafm_station(stream_url: &str) -> Option<String> {
    somafm_station_regex()
        .captures(stream_url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
}

#[derive(Deserialize)]
struct SomaSongs {
    #[serde(default)]
    songs: Vec<SomaSong>,
}

#[derive(Deserialize)]
struct SomaSong {
    #[serde(default)]
    artist: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    albumart: String,
}

/// SomaFM's public song-history API.
pub struct SomaFmProvider {
    client: Client,
    api_base: String,
}

impl SomaFmProvider {
    pub fn new(client: Client) -> Self {
        Self::with_api_base(client, "https://somafm.com")
    }

    /// Points the provider at another host serving `/songs/<station>.json`.
    pub fn with_api_base(client: Client, api_base: impl Into<String>) -> Self {
        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl MetadataProvider for SomaFmProvider {
    fn name(&self) -> &'static str {
        "somafm"
    }

    fn supports(&self, stream_url: &str) -> bool {
        stream_url.to_ascii_lowercase().contains("somafm.com")
    }

    async fn fetch(&self, stream_url: &str) -> RelayResult<Option<MetadataRecord>> {
        let Some(station) = somafm_station(stream_url) else {
            return Ok(None);
        };
        let api_url = format!("{}/songs/{}.json", self.api_base, station);

        let data: SomaSongs = self
            .client
            .get(&api_url)
            .timeout(PROVIDER_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let Some(song) = data.songs.into_iter().next() else {
            return Ok(None);
        };

        let title = [song.artist.trim(), song.title.trim()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" - ");

        Ok(Some(MetadataRecord {
            title: sanitize_title(&title),
            artwork_url: sanitize_url(&song.albumart),
            observed_at: now_secs(),
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Metadata-only fetch
// ─────────────────────────────────────────────────────────────────────────────

/// Opens `target` with ICY metadata requested and reads until the first
/// non-empty metadata block.
///
/// Gives up after [`MAX_METADATA_PROBE_BYTES`] or when the stream has no
/// `icy-metaint`. The client's own timeouts bound the wall-clock time.
pub async fn fetch_inband_metadata(
    client: &Client,
    target: &StreamTarget,
) -> RelayResult<Option<StreamMetadata>> {
    let mut response = client
        .get(target.url().clone())
        .header(ICY_METADATA_REQUEST_HEADER, "1")
        .header(header::CONNECTION, "close")
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(RelayError::UpstreamRejected {
            status: status.as_u16(),
        });
    }

    let metaint = parse_metaint(response.headers());
    if metaint == 0 {
        log::debug!("[Metadata] {} has no icy-metaint", target.as_str());
        return Ok(None);
    }

    let mut framer = IcyFrameState::new(metaint);
    let mut received = 0usize;
    while let Some(chunk) = response.chunk().await? {
        received += chunk.len();
        if let Some(meta) = framer.push(&chunk).events.into_iter().next() {
            return Ok(Some(meta));
        }
        if received > MAX_METADATA_PROBE_BYTES {
            log::debug!(
                "[Metadata] No metadata block in first {} bytes of {}",
                received,
                target.as_str()
            );
            break;
        }
    }
    Ok(None)
}

// ─────────────────────────────────────────────────────────────────────────────
// Service
// ─────────────────────────────────────────────────────────────────────────────

/// Answers now-playing polls.
pub struct MetadataService {
    cache: Arc<MetadataCache>,
    validator: UrlValidator,
    providers: Vec<Arc<dyn MetadataProvider>>,
    fetch_client: Client,
}

impl MetadataService {
    pub fn new(
        cache: Arc<MetadataCache>,
        validator: UrlValidator,
        providers: Vec<Arc<dyn MetadataProvider>>,
        fetch_client: Client,
    ) -> Self {
        Self {
            cache,
            validator,
            providers,
            fetch_client,
        }
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    /// Returns the best known record for `stream_url`.
    ///
    /// The URL is validated before any provider or stream request. When
    /// nothing is known the record is empty with `observed_at == 0`.
    pub async fn now_playing(&self, stream_url: &str) -> RelayResult<MetadataRecord> {
        let target = self.validator.validate(stream_url).await?;
        let key_url = target.as_str();

        for provider in self.providers.iter().filter(|p| p.supports(key_url)) {
            match provider.fetch(key_url).await {
                Ok(Some(record)) if record.has_title() => {
                    self.cache.put(key_url, record.clone());
                    return Ok(record);
                }
                Ok(_) => {}
                Err(e) => {
                    log::debug!("[Metadata] Provider {} failed: {}", provider.name(), e);
                }
            }
        }

        if let Some(record) = self.cache.get(key_url).filter(MetadataRecord::has_title) {
            return Ok(record);
        }

        match fetch_inband_metadata(&self.fetch_client, &target).await {
            Ok(Some(meta)) => {
                let record = MetadataRecord::from_icy(&meta);
                if record.has_title() {
                    self.cache.put(key_url, record.clone());
                    return Ok(record);
                }
            }
            Ok(None) => {}
            Err(e) => {
                log::info!("[Metadata] Fetch failed for {}: {}", key_url, e);
            }
        }

        Ok(MetadataRecord::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::validator::tests::validator_with;
    use crate::test_fixtures::{client, icy_body, spawn_upstream};
    use axum::routing::get;
    use axum::Router;

    fn record(title: &str, at: u64) -> MetadataRecord {
        MetadataRecord {
            title: title.into(),
            artwork_url: String::new(),
            observed_at: at,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cache_expires_after_ttl() {
        let cache = MetadataCache::new(Duration::from_secs(30));
        cache.put("http://a.example/s", record("Song", 1));
        assert_eq!(cache.get("http://a.example/s").unwrap().title, "Song");

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cache.get("http://a.example/s").is_none());
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn cache_keeps_newer_record() {
        let cache = MetadataCache::new(Duration::from_secs(30));
        cache.put("http://a.example/s", record("New", 20));
        cache.put("http://a.example/s", record("Old", 10));
        assert_eq!(cache.get("http://a.example/s").unwrap().title, "New");
        cache.put("http://a.example/s", record("Newer", 30));
        assert_eq!(cache.get("http://a.example/s").unwrap().title, "Newer");
    }

    #[test]
    fn record_serializes_as_poll_shape() {
        let json = serde_json::to_value(MetadataRecord {
            title: "A - B".into(),
            artwork_url: "https://a.example/c.jpg".into(),
            observed_at: 42,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"title": "A - B", "url": "https://a.example/c.jpg", "timestamp": 42})
        );
    }

    #[test]
    fn icy_record_drops_non_http_urls() {
        let rec = MetadataRecord::from_icy(&StreamMetadata {
            title: " Artist - Song\u{7} ".into(),
            url: "javascript:alert(1)".into(),
        });
        assert_eq!(rec.title, "Artist - Song");
        assert!(rec.artwork_url.is_empty());
    }

    #[test]
    fn somafm_station_is_extracted() {
        assert_eq!(
            somafm_station("http://ice1.somafm.com/groovesalad-128-mp3").as_deref(),
            Some("groovesalad")
        );
        assert_eq!(
            somafm_station("https://ice2.somafm.com/SecretAgent-128-aac").as_deref(),
            Some("secretagent")
        );
        assert!(somafm_station("https://ice2.somafm.com/stream").is_none());
    }

    #[tokio::test]
    async fn somafm_provider_formats_first_song() {
        let router = Router::new().route(
            "/songs/groovesalad.json",
            get(|| async {
                axum::Json(serde_json::json!({
                    "songs": [
                        {"artist": "Bonobo", "title": "Kerala", "albumart": "https://somafm.example/art.jpg"},
                        {"artist": "Old", "title": "Track"}
                    ]
                }))
            }),
        );
        let base = spawn_upstream(router).await;
        let provider = SomaFmProvider::with_api_base(client(), base);

        let rec = provider
            .fetch("http://ice1.somafm.com/groovesalad-128-mp3")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rec.title, "Bonobo - Kerala");
        assert_eq!(rec.artwork_url, "https://somafm.example/art.jpg");
    }

    #[tokio::test]
    async fn inband_fetch_stops_at_first_titled_block() {
        let (wire, _) = icy_body(512, &["", "Artist - Song", "Later"]);
        let router = Router::new().route(
            "/live",
            get(move || {
                let wire = wire.clone();
                async move { ([("icy-metaint", "512")], wire) }
            }),
        );
        let base = spawn_upstream(router).await;
        let target = StreamTarget::unchecked(&format!("{}/live", base));

        let meta = fetch_inband_metadata(&client(), &target).await.unwrap().unwrap();
        assert_eq!(meta.title, "Artist - Song");
    }

    #[tokio::test]
    async fn inband_fetch_without_metaint_yields_nothing() {
        let router = Router::new().route("/live", get(|| async { vec![0u8; 2048] }));
        let base = spawn_upstream(router).await;
        let target = StreamTarget::unchecked(&format!("{}/live", base));
        assert!(fetch_inband_metadata(&client(), &target).await.unwrap().is_none());
    }

    struct FixedProvider(Option<MetadataRecord>);

    #[async_trait]
    impl MetadataProvider for FixedProvider {
        fn name(&self) -> &'static str {
            "fixed"
        }
        fn supports(&self, url: &str) -> bool {
            url.contains("radio.example")
        }
        async fn fetch(&self, _url: &str) -> RelayResult<Option<MetadataRecord>> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn provider_wins_over_cache_and_is_cached() {
        let cache = Arc::new(MetadataCache::new(Duration::from_secs(30)));
        cache.put("http://radio.example/live", record("Cached", 1));
        let service = MetadataService::new(
            Arc::clone(&cache),
            validator_with(&[("radio.example", "93.184.216.34")]),
            vec![Arc::new(FixedProvider(Some(record("Provided", 2))))],
            client(),
        );

        let rec = service.now_playing("http://radio.example/live").await.unwrap();
        assert_eq!(rec.title, "Provided");
        assert_eq!(cache.get("http://radio.example/live").unwrap().title, "Provided");
    }

    #[tokio::test]
    async fn cache_answers_when_provider_has_nothing() {
        let cache = Arc::new(MetadataCache::new(Duration::from_secs(30)));
        cache.put("http://radio.example/live", record("Cached", 1));
        let service = MetadataService::new(
            Arc::clone(&cache),
            validator_with(&[("radio.example", "93.184.216.34")]),
            vec![Arc::new(FixedProvider(None))],
            client(),
        );

        let rec = service.now_playing("http://radio.example/live").await.unwrap();
        assert_eq!(rec.title, "Cached");
    }

    #[tokio::test]
    async fn unsafe_url_is_rejected_before_lookup() {
        let service = MetadataService::new(
            Arc::new(MetadataCache::new(Duration::from_secs(30))),
            validator_with(&[]),
            Vec::new(),
            client(),
        );
        let err = service.now_playing("http://169.254.169.254/").await.unwrap_err();
        assert!(matches!(err, RelayError::UnsafeUrl(_)));
    }
}
