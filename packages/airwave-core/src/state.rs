//! Relay configuration types.
//!
//! [`Config`] groups everything the relay can be tuned with. All fields have
//! defaults matching public radio deployments, so an empty YAML file is a
//! working configuration.

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Named Policies
// ─────────────────────────────────────────────────────────────────────────────

/// Which entry of a multi-entry `.m3u`/`.pls` playlist to play.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaylistEntryPolicy {
    /// Always the first entry.
    First,
    /// The second entry when more than one exists.
    ///
    /// Many station playlists list a low-bitrate or ad-inserting mount first.
    #[default]
    PreferSecond,
}

impl PlaylistEntryPolicy {
    /// Picks an entry from an ordered candidate list.
    #[must_use]
    pub fn pick<'a>(&self, entries: &'a [String]) -> Option<&'a String> {
        match self {
            Self::First => entries.first(),
            Self::PreferSecond => entries.get(1).or_else(|| entries.first()),
        }
    }
}

/// What to do when the upstream answers 401 or 403.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessDeniedPolicy {
    /// Send the client a 302 to the raw upstream URL so it can try directly.
    #[default]
    RedirectToSource,
    /// Fail with a 502.
    Reject,
}

// ─────────────────────────────────────────────────────────────────────────────
// Sections
// ─────────────────────────────────────────────────────────────────────────────

/// URL safety rules applied before any upstream request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Domains whose subdomains skip DNS checks (`somafm.com` matches
    /// `ice1.somafm.com`).
    pub trusted_domains: Vec<String>,
    /// Ports an explicit `host:port` may use.
    pub allowed_ports: Vec<u16>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            trusted_domains: [
                "shoutcast.com",
                "icecast.org",
                "somafm.com",
                "streamon.fm",
                "radio.net",
                "radiojar.com",
                "listen2myradio.com",
                "streaminghub.com",
                "radionomy.com",
                "streamguys.com",
            ]
            .iter()
            .map(|d| d.to_string())
            .collect(),
            allowed_ports: vec![
                80, 443, 8000, 8080, 8443, 8888, 9000, 1935, 4190, 4191, 9001, 9002, 7000, 7001,
            ],
        }
    }
}

/// Fixed-window rate limit ceilings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests allowed per short window.
    pub short_limit: u32,
    /// Length of the short window (seconds).
    pub short_window_secs: u64,
    /// Requests allowed per long window before blocking.
    pub long_limit: u32,
    /// Length of the long window (seconds).
    pub long_window_secs: u64,
    /// How long an identifier stays blocked after exceeding the long limit (seconds).
    pub block_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            short_limit: 30,
            short_window_secs: 60,
            long_limit: 500,
            long_window_secs: 3600,
            block_secs: 3600,
        }
    }
}

/// Relay behaviour toggles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Shared secret the stream endpoint requires. Empty means "generate one".
    pub proxy_token: String,
    /// Handling of upstream 401/403.
    pub access_denied: AccessDeniedPolicy,
    /// Which playlist entry to play.
    pub playlist_entry: PlaylistEntryPolicy,
    /// Redirect HTTPS upstreams to the client instead of relaying them.
    pub redirect_https_upstreams: bool,
}

/// Metadata cache tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Lifetime of a cached record (seconds).
    pub ttl_secs: u64,
    /// Consult out-of-band providers (SomaFM) before in-band extraction.
    pub providers_enabled: bool,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 30,
            providers_enabled: true,
        }
    }
}

/// Configuration for the Airwave relay.
///
/// All fields have sensible defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Preferred port for the HTTP server (0 = auto-allocate).
    pub preferred_port: u16,
    /// Externally visible base URL of this relay (e.g. `https://radio.example.com`),
    /// used when rewriting manifests. Empty means derive from the bind address.
    pub public_base_url: String,
    /// URL safety rules.
    pub validator: ValidatorConfig,
    /// Rate limit ceilings.
    pub rate_limit: RateLimitConfig,
    /// Relay toggles and policies.
    pub relay: RelayConfig,
    /// Metadata cache tuning.
    pub metadata: MetadataConfig,
}

impl Config {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        let rl = &self.rate_limit;
        if rl.short_limit == 0 || rl.long_limit == 0 {
            return Err("rate limit ceilings must be >= 1".to_string());
        }
        if rl.short_window_secs == 0 || rl.long_window_secs == 0 {
            return Err("rate limit windows must be >= 1 second".to_string());
        }
        if self.metadata.ttl_secs == 0 {
            return Err("metadata.ttl_secs must be >= 1".to_string());
        }
        if self.validator.allowed_ports.is_empty() {
            return Err("validator.allowed_ports must not be empty".to_string());
        }
        Ok(())
    }
}
