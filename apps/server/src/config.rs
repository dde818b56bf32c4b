//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::collections::BTreeMap;
use std::path::Path;

use airwave_core::{
    InMemoryStationStore, MetadataConfig, RateLimitConfig, RelayConfig, StationConfig,
    ValidatorConfig,
};
use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP server to (0 = OS-assigned).
    /// Override: `AIRWAVE_BIND_PORT`
    pub bind_port: u16,

    /// Base URL browsers reach this relay at. Empty gives root-relative
    /// proxy URLs.
    /// Override: `AIRWAVE_PUBLIC_BASE_URL`
    pub public_base_url: String,

    /// URL safety rules.
    pub validator: ValidatorConfig,

    /// Rate limit ceilings.
    pub rate_limit: RateLimitConfig,

    /// Relay toggles. `relay.proxy_token` is overridden by `AIRWAVE_PROXY_TOKEN`.
    pub relay: RelayConfig,

    /// Metadata cache tuning.
    pub metadata: MetadataConfig,

    /// Stations served by `/api/stations/{id}/plan`, keyed by id.
    pub stations: BTreeMap<String, StationConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_port: 8787,
            public_base_url: String::new(),
            validator: ValidatorConfig::default(),
            rate_limit: RateLimitConfig::default(),
            relay: RelayConfig::default(),
            metadata: MetadataConfig::default(),
            stations: BTreeMap::new(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Applies `AIRWAVE_*` overrides read through `lookup`.
    ///
    /// Unparseable values are ignored with a warning.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("AIRWAVE_BIND_PORT") {
            match val.parse() {
                Ok(port) => self.bind_port = port,
                Err(_) => log::warn!("Ignoring invalid AIRWAVE_BIND_PORT: {}", val),
            }
        }

        if let Some(val) = lookup("AIRWAVE_PUBLIC_BASE_URL") {
            self.public_base_url = val;
        }

        if let Some(val) = lookup("AIRWAVE_PROXY_TOKEN") {
            self.relay.proxy_token = val;
        }
    }

    /// Converts to airwave-core's Config type.
    pub fn to_core_config(&self) -> airwave_core::Config {
        airwave_core::Config {
            preferred_port: self.bind_port,
            public_base_url: self.public_base_url.clone(),
            validator: self.validator.clone(),
            rate_limit: self.rate_limit.clone(),
            relay: self.relay.clone(),
            metadata: self.metadata.clone(),
        }
    }

    /// Seeds an in-memory store with the configured stations.
    pub fn station_store(&self) -> InMemoryStationStore {
        InMemoryStationStore::from(self.stations.clone())
    }
}
