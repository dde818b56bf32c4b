//! Station lookup.
//!
//! Station records are owned by whatever embeds the relay; the relay only
//! reads them through [`StationStore`].

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Whether a station's player may go through the relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StationMode {
    /// Relay plain-HTTP streams when the page is HTTPS.
    #[default]
    Auto,
    /// Never relay; the player always opens the upstream directly.
    Direct,
}

impl StationMode {
    #[must_use]
    pub fn allows_proxy(&self) -> bool {
        matches!(self, Self::Auto)
    }
}

/// Stream settings of one station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationConfig {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artwork: String,
    #[serde(default)]
    pub mode: StationMode,
}

/// Read access to configured stations.
pub trait StationStore: Send + Sync {
    /// Returns the stream settings for `station_id`, if it exists.
    fn get_stream_config(&self, station_id: &str) -> Option<StationConfig>;
}

/// Station store held in memory, seeded at startup.
#[derive(Default)]
pub struct InMemoryStationStore {
    stations: DashMap<String, StationConfig>,
}

impl InMemoryStationStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a station, returning the previous record.
    pub fn insert(&self, id: impl Into<String>, station: StationConfig) -> Option<StationConfig> {
        self.stations.insert(id.into(), station)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }
}

impl<I, S> From<I> for InMemoryStationStore
where
    I: IntoIterator<Item = (S, StationConfig)>,
    S: Into<String>,
{
    fn from(entries: I) -> Self {
        let store = Self::new();
        for (id, station) in entries {
            store.insert(id, station);
        }
        store
    }
}

impl StationStore for InMemoryStationStore {
    fn get_stream_config(&self, station_id: &str) -> Option<StationConfig> {
        self.stations.get(station_id).map(|s| s.clone())
    }
}
