//! Application services layer.
//!
//! This module contains the services that sit between the API layer and
//! the byte-level stream handling (stream/) and request gating (security/).

pub mod metadata;
pub mod relay;
pub mod resolver;
pub mod stations;

pub use metadata::{
    fetch_inband_metadata, MetadataCache, MetadataProvider, MetadataRecord, MetadataService,
    SomaFmProvider,
};
pub use relay::{
    build_upstream_client, AudioStream, ClientProfile, RelayEngine, RelayParts, RelayRequest,
    RelayResponse,
};
pub use resolver::{
    parse_playlist, select_playlist_entry, HttpProber, ShoutcastResolver, StreamProber,
};
pub use stations::{InMemoryStationStore, StationConfig, StationMode, StationStore};
