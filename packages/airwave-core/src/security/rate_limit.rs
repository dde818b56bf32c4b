//! Per-client fixed-window rate limiting with temporary blocks.
//!
//! Each identifier carries two independent windows. Exceeding the short
//! window denies the request; exceeding the long window also blocks the
//! identifier outright for [`RateLimitConfig::block_secs`].

use std::net::IpAddr;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::error::{RelayError, RelayResult};
use crate::state::RateLimitConfig;

/// Purpose an identifier is namespaced by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateScope {
    /// Audio relays, playlists and segments.
    Stream,
    /// Now-playing lookups.
    Metadata,
}

impl RateScope {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::Metadata => "metadata",
        }
    }

    /// Builds the limiter key for a client, e.g. `203.0.113.9_stream`.
    #[must_use]
    pub fn identifier(&self, client: IpAddr) -> String {
        format!("{}_{}", client, self.as_str())
    }
}

/// Counter state for one identifier.
#[derive(Debug, Clone)]
pub struct RateState {
    short_count: u32,
    short_started_at: Instant,
    long_count: u32,
    long_started_at: Instant,
    blocked_until: Option<Instant>,
}

impl RateState {
    fn new(now: Instant) -> Self {
        Self {
            short_count: 0,
            short_started_at: now,
            long_count: 0,
            long_started_at: now,
            blocked_until: None,
        }
    }

    fn is_blocked(&self, now: Instant) -> bool {
        self.blocked_until.is_some_and(|until| now < until)
    }
}

/// Shared limiter. Entries are independent; no lock is held across calls.
pub struct RateLimiter {
    config: RateLimitConfig,
    states: DashMap<String, RateState>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            states: DashMap::new(),
        }
    }

    fn short_window(&self) -> Duration {
        Duration::from_secs(self.config.short_window_secs)
    }

    fn long_window(&self) -> Duration {
        Duration::from_secs(self.config.long_window_secs)
    }

    /// Counts a request and reports whether it may proceed.
    ///
    /// A blocked identifier is denied without touching its counters.
    pub fn allow(&self, identifier: &str) -> bool {
        let now = Instant::now();
        let short_window = self.short_window();
        let long_window = self.long_window();

        let mut state = self
            .states
            .entry(identifier.to_string())
            .or_insert_with(|| RateState::new(now));

        if state.is_blocked(now) {
            log::debug!("[RateLimit] {} is blocked", identifier);
            return false;
        }
        state.blocked_until = None;

        if now.duration_since(state.short_started_at) >= short_window {
            state.short_count = 0;
            state.short_started_at = now;
        }
        state.short_count += 1;
        if state.short_count > self.config.short_limit {
            log::warn!(
                "[RateLimit] {} exceeded {} requests per {}s",
                identifier,
                self.config.short_limit,
                self.config.short_window_secs
            );
            return false;
        }

        if now.duration_since(state.long_started_at) >= long_window {
            state.long_count = 0;
            state.long_started_at = now;
        }
        state.long_count += 1;
        if state.long_count > self.config.long_limit {
            state.blocked_until = Some(now + Duration::from_secs(self.config.block_secs));
            log::warn!(
                "[RateLimit] {} exceeded {} requests per {}s, blocked for {}s",
                identifier,
                self.config.long_limit,
                self.config.long_window_secs,
                self.config.block_secs
            );
            return false;
        }

        true
    }

    /// [`allow`](Self::allow) as a `Result` for handler use.
    pub fn check(&self, identifier: &str) -> RelayResult<()> {
        if self.allow(identifier) {
            Ok(())
        } else {
            Err(RelayError::RateLimited(identifier.to_string()))
        }
    }

    /// Whether an identifier is currently blocked.
    #[must_use]
    pub fn is_blocked(&self, identifier: &str) -> bool {
        self.states
            .get(identifier)
            .is_some_and(|s| s.is_blocked(Instant::now()))
    }

    /// Drops identifiers whose windows and block have all lapsed.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let long_window = self.long_window();
        let short_window = self.short_window();
        let before = self.states.len();
        self.states.retain(|_, state| {
            state.is_blocked(now)
                || now.duration_since(state.long_started_at) < long_window
                || now.duration_since(state.short_started_at) < short_window
        });
        before.saturating_sub(self.states.len())
    }

    /// Number of tracked identifiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

/// HLS manifests are refreshed every few seconds by players and are not
/// counted against the stream budget.
#[must_use]
pub fn is_rate_limit_exempt(path: &str) -> bool {
    let path = path.to_ascii_lowercase();
    path.ends_with(".m3u8") || path.ends_with(".m3u")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(short: u32, long: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            short_limit: short,
            short_window_secs: 60,
            long_limit: long,
            long_window_secs: 3600,
            block_secs: 3600,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn denies_request_over_short_ceiling_then_recovers() {
        let limiter = limiter(30, 500);
        for _ in 0..30 {
            assert!(limiter.allow("203.0.113.9_stream"));
        }
        assert!(!limiter.allow("203.0.113.9_stream"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.allow("203.0.113.9_stream"));
    }

    #[tokio::test(start_paused = true)]
    async fn long_ceiling_blocks_for_an_hour() {
        let limiter = limiter(100, 5);
        for _ in 0..5 {
            assert!(limiter.allow("a_stream"));
        }
        assert!(!limiter.allow("a_stream"));
        assert!(limiter.is_blocked("a_stream"));

        // Long window has not reset, but block is what keeps denying.
        tokio::time::advance(Duration::from_secs(1800)).await;
        assert!(!limiter.allow("a_stream"));

        tokio::time::advance(Duration::from_secs(1801)).await;
        assert!(!limiter.is_blocked("a_stream"));
        assert!(limiter.allow("a_stream"));
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_requests_do_not_increment_counters() {
        let limiter = limiter(100, 1);
        assert!(limiter.allow("b"));
        assert!(!limiter.allow("b"));
        for _ in 0..50 {
            assert!(!limiter.allow("b"));
        }
        let short = limiter.states.get("b").map(|s| s.short_count).unwrap();
        assert_eq!(short, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn identifiers_are_independent() {
        let limiter = limiter(1, 10);
        let ip: IpAddr = "198.51.100.7".parse().unwrap();
        let stream = RateScope::Stream.identifier(ip);
        let metadata = RateScope::Metadata.identifier(ip);
        assert_eq!(stream, "198.51.100.7_stream");

        assert!(limiter.allow(&stream));
        assert!(!limiter.allow(&stream));
        assert!(limiter.allow(&metadata));
        assert!(matches!(
            limiter.check(&stream),
            Err(RelayError::RateLimited(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn purge_keeps_blocked_and_active_entries() {
        let limiter = limiter(100, 1);
        limiter.allow("idle");
        limiter.allow("blocked");
        limiter.allow("blocked");

        tokio::time::advance(Duration::from_secs(3601)).await;
        limiter.allow("fresh");

        // `blocked` started its block 3601s ago with a 3600s block, so it lapsed too.
        assert_eq!(limiter.purge_expired(), 2);
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn manifests_are_exempt() {
        assert!(is_rate_limit_exempt("/live/index.m3u8"));
        assert!(is_rate_limit_exempt("/LISTEN.M3U"));
        assert!(!is_rate_limit_exempt("/live/segment42.ts"));
        assert!(!is_rate_limit_exempt("/stream"));
    }
}
