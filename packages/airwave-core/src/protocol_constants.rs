//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by the ICY/Shoutcast conventions, by the HTTP
//! headers players expect from live radio, and by the relay's timeout model.
//! Tunable values live in [`crate::state::Config`] instead.

use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// ICY Protocol (Shoutcast/Icecast metadata)
// ─────────────────────────────────────────────────────────────────────────────

/// Request header asking the upstream to interleave metadata blocks.
pub const ICY_METADATA_REQUEST_HEADER: &str = "Icy-MetaData";

/// Response header carrying the audio byte count between metadata blocks.
pub const ICY_METAINT_HEADER: &str = "icy-metaint";

/// ICY headers forwarded verbatim to the client.
pub const FORWARDED_ICY_HEADERS: [&str; 4] = ["icy-name", "icy-genre", "icy-url", "icy-br"];

/// A metadata length byte counts 16-byte units.
pub const ICY_BLOCK_UNIT: usize = 16;

// ─────────────────────────────────────────────────────────────────────────────
// Relay
// ─────────────────────────────────────────────────────────────────────────────

/// Largest chunk handed to the client in one write.
///
/// 16 KiB keeps latency low for live audio while avoiding per-packet
/// overhead on fast upstreams.
pub const FLUSH_THRESHOLD: usize = 16 * 1024;

/// Content type used when the upstream does not send one.
pub const DEFAULT_AUDIO_CONTENT_TYPE: &str = "audio/mpeg";

/// User-Agent sent upstream. Some Shoutcast servers reject unknown agents.
pub const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Connect timeout for live relays. The body itself has no timeout.
pub const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Total timeout for playlist body fetches.
pub const PLAYLIST_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest playlist body (`.m3u`/`.pls`) read into memory.
pub const MAX_PLAYLIST_BYTES: usize = 256 * 1024;

/// Largest HLS manifest body read into memory before rewriting.
pub const MAX_MANIFEST_BYTES: usize = 2 * 1024 * 1024;

/// Cache lifetime advertised for proxied HLS manifests and segments.
pub const SEGMENT_CACHE_CONTROL: &str = "public, max-age=60";

/// Cache headers forced on live audio responses.
pub const LIVE_CACHE_CONTROL: &str = "no-cache, no-store, must-revalidate";

// ─────────────────────────────────────────────────────────────────────────────
// Metadata
// ─────────────────────────────────────────────────────────────────────────────

/// Total timeout for a metadata-only fetch.
pub const METADATA_FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Connect timeout for a metadata-only fetch.
pub const METADATA_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bytes read before giving up on finding a metadata block.
pub const MAX_METADATA_PROBE_BYTES: usize = 100 * 1024;

/// Redirects followed by the metadata-only fetch.
pub const METADATA_MAX_REDIRECTS: usize = 5;

/// Timeout for out-of-band provider lookups (e.g. SomaFM song lists).
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────────────────────────────────────
// Shoutcast resolution
// ─────────────────────────────────────────────────────────────────────────────

/// Paths probed on a bare Shoutcast root, in order.
pub const SHOUTCAST_CANDIDATE_PATHS: [&str; 4] = ["/;", "/stream", "/;stream.mp3", "/;stream.nsv"];

/// Timeout for each Shoutcast probe.
pub const SHOUTCAST_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Service identifier returned by the health endpoint.
pub const SERVICE_ID: &str = "airwave";

/// Interval between sweeps of expired cache and limiter entries.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
