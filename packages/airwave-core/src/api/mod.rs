//! HTTP API layer.
//!
//! This module contains thin handlers that delegate to services.
//! It provides the router construction and server startup functionality.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::bootstrap::BootstrappedServices;
use crate::context::ProxyContext;
use crate::security::RateLimiter;
use crate::services::{MetadataService, RelayEngine, StationStore};
use crate::state::Config;

pub mod http;
pub mod response;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state for the API layer.
///
/// This is a thin wrapper that holds references to services.
/// All business logic lives in the services themselves.
#[derive(Clone)]
pub struct AppState {
    /// Serves the stream endpoint.
    pub relay: Arc<RelayEngine>,
    /// Serves the metadata endpoint.
    pub metadata: Arc<MetadataService>,
    /// Shared per-client request limiter.
    pub limiter: Arc<RateLimiter>,
    /// Station lookup for playback plans.
    pub stations: Arc<dyn StationStore>,
    /// Public addressing (base URL and token).
    pub context: ProxyContext,
    /// Relay configuration.
    pub config: Arc<Config>,
}

/// Builder for constructing an `AppState`.
#[derive(Default)]
pub struct AppStateBuilder {
    relay: Option<Arc<RelayEngine>>,
    metadata: Option<Arc<MetadataService>>,
    limiter: Option<Arc<RateLimiter>>,
    stations: Option<Arc<dyn StationStore>>,
    context: Option<ProxyContext>,
    config: Option<Arc<Config>>,
}

impl AppStateBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes every service from a bootstrap result.
    pub fn services(self, services: &BootstrappedServices) -> Self {
        self.relay(Arc::clone(&services.relay))
            .metadata(Arc::clone(&services.metadata))
            .limiter(Arc::clone(&services.limiter))
            .stations(Arc::clone(&services.stations))
            .context(services.context.clone())
            .config(Arc::new(services.config.clone()))
    }

    /// Sets the relay engine.
    pub fn relay(mut self, relay: Arc<RelayEngine>) -> Self {
        self.relay = Some(relay);
        self
    }

    /// Sets the metadata service.
    pub fn metadata(mut self, metadata: Arc<MetadataService>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Sets the rate limiter.
    pub fn limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Sets the station store.
    pub fn stations(mut self, stations: Arc<dyn StationStore>) -> Self {
        self.stations = Some(stations);
        self
    }

    /// Sets the proxy context.
    pub fn context(mut self, context: ProxyContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Sets the configuration.
    pub fn config(mut self, config: Arc<Config>) -> Self {
        self.config = Some(config);
        self
    }

    /// Builds the `AppState`, panicking if required fields are missing.
    pub fn build(self) -> AppState {
        AppState {
            relay: self.relay.expect("relay is required"),
            metadata: self.metadata.expect("metadata is required"),
            limiter: self.limiter.expect("limiter is required"),
            stations: self.stations.expect("stations is required"),
            context: self.context.expect("context is required"),
            config: self.config.expect("config is required"),
        }
    }
}

impl AppState {
    /// Creates a new builder for constructing an `AppState`.
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::new()
    }
}

/// Starts the HTTP server and serves until `shutdown` is cancelled.
///
/// Port 0 lets the OS pick; the bound port is logged.
pub async fn start_server(state: AppState, shutdown: CancellationToken) -> Result<(), ServerError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.preferred_port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let port = listener.local_addr()?.port();

    log::info!("[Server] Listening on http://0.0.0.0:{}", port);
    let app = http::create_router(state);

    // Use into_make_service_with_connect_info to enable ConnectInfo<SocketAddr> extraction
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await?;

    log::info!("[Server] Stopped");
    Ok(())
}
