//! Airwave Core - streaming radio relay.
//!
//! This crate lets a browser page served over HTTPS play plain-HTTP internet
//! radio. It relays Icecast/Shoutcast streams, playlists and HLS resources
//! through one origin, strips interleaved ICY metadata out of the audio and
//! answers now-playing polls from what it saw.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`security`]: SSRF validation of upstream URLs and per-client rate limits
//! - [`stream`]: ICY demultiplexing, header translation, relay lifecycle
//! - [`hls`]: manifest rewriting, the HLS proxy loader and playback plans
//! - [`services`]: relay engine, metadata service, Shoutcast resolver, stations
//! - [`api`]: thin Axum handlers over the services
//! - [`context`]: public base URL, proxy token and bound port
//! - [`state`]: configuration
//! - [`error`]: centralized error type
//!
//! # Abstraction Traits
//!
//! Seams that tests and embedders can replace:
//!
//! - [`TaskSpawner`](runtime::TaskSpawner): spawning background tasks
//! - [`HostResolver`](security::HostResolver): DNS lookups for validation
//! - [`StreamProber`](services::StreamProber): Shoutcast path probing
//! - [`Fetcher`](hls::Fetcher): manifest and playlist fetches
//! - [`MetadataProvider`](services::MetadataProvider): out-of-band now-playing sources
//! - [`StationStore`](services::StationStore): station lookup

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod context;
pub mod error;
pub mod hls;
pub mod protocol_constants;
pub mod runtime;
pub mod security;
pub mod services;
pub mod state;
pub mod stream;
pub mod utils;

#[cfg(test)]
mod test_fixtures;

// Re-export commonly used types at the crate root
pub use context::{ProxyContext, UrlBuilder};
pub use error::{RelayError, RelayResult};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use state::{
    AccessDeniedPolicy, Config, MetadataConfig, PlaylistEntryPolicy, RateLimitConfig,
    RelayConfig, ValidatorConfig,
};
pub use utils::{constant_time_eq, generate_token, now_secs};

// Re-export security types
pub use security::{RateLimiter, RateScope, StreamTarget, UrlValidator, ValidationError};

// Re-export service types
pub use services::{
    InMemoryStationStore, MetadataRecord, MetadataService, RelayEngine, StationConfig,
    StationMode, StationStore,
};

// Re-export stream types
pub use stream::StreamMetadata;

// Re-export HLS types
pub use hls::{HlsProxyLoader, PlaybackPlan, ProxyEndpoint};

// Re-export bootstrap types
pub use bootstrap::{bootstrap_services, BootstrappedServices};

// Re-export API types
pub use api::{start_server, AppState, AppStateBuilder, ServerError};
