//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::context::ProxyContext;
use crate::error::{RelayError, RelayResult};
use crate::hls::HttpFetcher;
use crate::protocol_constants::{PROVIDER_TIMEOUT, SWEEP_INTERVAL, USER_AGENT};
use crate::runtime::{spawn_periodic, TokioSpawner};
use crate::security::{RateLimiter, UrlValidator};
use crate::services::{
    build_upstream_client, ClientProfile, HttpProber, MetadataCache, MetadataProvider,
    MetadataService, RelayEngine, RelayParts, ShoutcastResolver, SomaFmProvider, StationStore,
};
use crate::state::Config;

/// Container for all bootstrapped services.
///
/// Consumed by `AppState` to build the final application state.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// Relay configuration the services were built from.
    pub config: Config,
    /// Public addressing (base URL and token).
    pub context: ProxyContext,
    /// Shared per-client request limiter.
    pub limiter: Arc<RateLimiter>,
    /// Shared now-playing cache.
    pub metadata_cache: Arc<MetadataCache>,
    /// Serves the stream endpoint.
    pub relay: Arc<RelayEngine>,
    /// Serves the metadata endpoint.
    pub metadata: Arc<MetadataService>,
    /// Station lookup for playback plans.
    pub stations: Arc<dyn StationStore>,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
}

impl BootstrappedServices {
    /// Initiates graceful shutdown.
    ///
    /// Cancelling the token stops the sweeper and ends every live relay body.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");
        self.cancel_token.cancel();
        log::info!(
            "[Bootstrap] Shutdown complete ({} cached record(s), {} limiter entr(ies) dropped)",
            self.metadata_cache.len(),
            self.limiter.len()
        );
    }
}

fn sweep(cache: &MetadataCache, limiter: &RateLimiter) {
    let records = cache.purge_expired();
    let limits = limiter.purge_expired();
    if records > 0 || limits > 0 {
        log::debug!(
            "[Bootstrap] Swept {} metadata record(s), {} rate limit entr(ies)",
            records,
            limits
        );
    }
}

/// Client for out-of-band metadata providers.
fn create_provider_client() -> RelayResult<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(PROVIDER_TIMEOUT)
        .build()
        .map_err(|e| RelayError::Internal(format!("Failed to create provider client: {}", e)))
}

/// Bootstraps all services with their dependencies.
///
/// Services are created in dependency order:
///
/// 1. Shared infrastructure (validator, upstream clients, cancellation token)
/// 2. Shared state (rate limiter, metadata cache)
/// 3. Metadata service (depends on cache, validator, providers)
/// 4. Relay engine (depends on all of the above plus the resolver)
/// 5. Background sweeper
///
/// Must be called inside a Tokio runtime.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or an HTTP client
/// cannot be built.
pub fn bootstrap_services(
    config: &Config,
    context: ProxyContext,
    stations: Arc<dyn StationStore>,
) -> RelayResult<BootstrappedServices> {
    config.validate().map_err(RelayError::Configuration)?;

    let spawner = TokioSpawner::current();
    let cancel_token = CancellationToken::new();

    let validator = UrlValidator::with_system_resolver(config.validator.clone());
    let relay_client = build_upstream_client(&validator, ClientProfile::Relay)?;
    let metadata_client = build_upstream_client(&validator, ClientProfile::MetadataFetch)?;

    let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
    let metadata_cache = Arc::new(MetadataCache::new(Duration::from_secs(
        config.metadata.ttl_secs,
    )));

    let providers: Vec<Arc<dyn MetadataProvider>> = if config.metadata.providers_enabled {
        vec![Arc::new(SomaFmProvider::new(create_provider_client()?))]
    } else {
        Vec::new()
    };
    let metadata = Arc::new(MetadataService::new(
        Arc::clone(&metadata_cache),
        validator.clone(),
        providers,
        metadata_client,
    ));

    let relay = Arc::new(RelayEngine::new(RelayParts {
        config: config.relay.clone(),
        client: relay_client.clone(),
        validator: validator.clone(),
        limiter: Arc::clone(&limiter),
        cache: Arc::clone(&metadata_cache),
        resolver: ShoutcastResolver::new(Arc::new(HttpProber::new(&validator)?)),
        fetcher: Arc::new(HttpFetcher::new(relay_client, validator)),
        endpoint: context.endpoint(),
        cancel: cancel_token.clone(),
    }));

    {
        let cache = Arc::clone(&metadata_cache);
        let limiter = Arc::clone(&limiter);
        spawn_periodic(
            &spawner,
            "sweeper",
            SWEEP_INTERVAL,
            cancel_token.clone(),
            move || sweep(&cache, &limiter),
        );
    }

    log::info!(
        "[Bootstrap] Services ready (metadata ttl {}s, providers {})",
        config.metadata.ttl_secs,
        if config.metadata.providers_enabled {
            "on"
        } else {
            "off"
        }
    );

    Ok(BootstrappedServices {
        config: config.clone(),
        context,
        limiter,
        metadata_cache,
        relay,
        metadata,
        stations,
        cancel_token,
    })
}
