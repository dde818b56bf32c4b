//! Relay lifecycle logging.

use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Why a relay stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// The upstream body ended on its own.
    UpstreamClosed,
    /// Reading the upstream failed.
    UpstreamError(String),
    /// The server is shutting down.
    Shutdown,
    /// The client went away before anything else ended the relay.
    ClientDisconnected,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpstreamClosed => f.write_str("upstream closed"),
            Self::UpstreamError(err) => write!(f, "upstream error: {}", err),
            Self::Shutdown => f.write_str("server shutdown"),
            Self::ClientDisconnected => f.write_str("client disconnected"),
        }
    }
}

/// Logs a relay's start on creation and a delivery summary on drop.
///
/// The relay body stream owns the guard, so the summary is written whether
/// the upstream ended, failed, the server shut down, or the client went
/// away. Counters are lock-free on the hot path; the first recorded end
/// reason wins.
pub struct RelayStreamGuard {
    upstream: String,
    client_ip: IpAddr,
    started_at: Instant,
    bytes_sent: AtomicU64,
    chunks_sent: AtomicU64,
    metadata_events: AtomicU64,
    end: parking_lot::Mutex<Option<EndReason>>,
}

impl RelayStreamGuard {
    /// Creates a new guard that logs relay lifecycle events.
    pub fn new(upstream: impl Into<String>, client_ip: IpAddr, metaint: usize) -> Self {
        let upstream = upstream.into();
        log::info!(
            "[Relay] Stream started: upstream={}, client={}, metaint={}",
            upstream,
            client_ip,
            metaint
        );
        Self {
            upstream,
            client_ip,
            started_at: Instant::now(),
            bytes_sent: AtomicU64::new(0),
            chunks_sent: AtomicU64::new(0),
            metadata_events: AtomicU64::new(0),
            end: parking_lot::Mutex::new(None),
        }
    }

    /// Records a chunk handed to the client.
    pub fn record_chunk(&self, len: usize) {
        self.chunks_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
    }

    /// Records a decoded metadata block.
    pub fn record_metadata(&self) {
        self.metadata_events.fetch_add(1, Ordering::Relaxed);
    }

    fn end_with(&self, reason: EndReason) {
        let mut end = self.end.lock();
        if end.is_none() {
            *end = Some(reason);
        }
    }

    /// Records an upstream read failure.
    pub fn record_error(&self, err: &str) {
        self.end_with(EndReason::UpstreamError(err.to_string()));
    }

    /// Marks that the upstream body ended on its own.
    pub fn mark_completed(&self) {
        self.end_with(EndReason::UpstreamClosed);
    }

    /// Marks that server shutdown ended the relay.
    pub fn mark_shutdown(&self) {
        self.end_with(EndReason::Shutdown);
    }

    /// Reason the summary will report. A relay nothing else ended was
    /// dropped by its client.
    #[must_use]
    pub fn end_reason(&self) -> EndReason {
        self.end
            .lock()
            .clone()
            .unwrap_or(EndReason::ClientDisconnected)
    }

    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }
}

impl Drop for RelayStreamGuard {
    fn drop(&mut self) {
        log::info!(
            "[Relay] Stream ended: upstream={}, client={}, bytes={}, chunks={}, metadata={}, duration={:.1}s, reason={}",
            self.upstream,
            self.client_ip,
            self.bytes_sent.load(Ordering::Relaxed),
            self.chunks_sent.load(Ordering::Relaxed),
            self.metadata_events.load(Ordering::Relaxed),
            self.started_at.elapsed().as_secs_f64(),
            self.end_reason()
        );
    }
}
