//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to services for business logic.

use std::net::SocketAddr;

use axum::{
    extract::{connect_info::ConnectInfo, Path, Query, State},
    http::Method,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::response::{api_data, api_success};
use crate::api::AppState;
use crate::error::{RelayError, RelayResult};
use crate::protocol_constants::SERVICE_ID;
use crate::security::RateScope;
use crate::services::RelayRequest;
use crate::utils::constant_time_eq;

// ─────────────────────────────────────────────────────────────────────────────
// Query Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StreamQuery {
    url: Option<String>,
    token: Option<String>,
    playlist: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetadataQuery {
    stream_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlanQuery {
    page_https: Option<String>,
}

fn is_flag_set(value: Option<&str>) -> bool {
    matches!(value.map(str::trim), Some("1" | "true"))
}

fn required(value: Option<String>, name: &str) -> RelayResult<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| RelayError::InvalidRequest(format!("missing {}", name)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS]);

    Router::new()
        .route("/health", get(health_check))
        .route("/proxy/stream", get(proxy_stream))
        .route("/proxy/metadata", get(proxy_metadata))
        .route("/api/stations/{id}/plan", get(station_plan))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness check.
async fn health_check() -> impl IntoResponse {
    api_success(json!({
        "status": "ok",
        "service": SERVICE_ID,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Relays an upstream stream, playlist, manifest or segment.
async fn proxy_stream(
    State(state): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    Query(query): Query<StreamQuery>,
) -> RelayResult<Response> {
    let token = query.token.as_deref().unwrap_or_default();
    if !constant_time_eq(token, state.context.token()) {
        log::warn!("[Server] Rejected stream request from {}: bad token", remote_addr.ip());
        return Err(RelayError::Unauthorized);
    }

    let url = required(query.url, "url")?;
    let response = state
        .relay
        .handle(RelayRequest {
            url,
            playlist: is_flag_set(query.playlist.as_deref()),
            client_ip: remote_addr.ip(),
        })
        .await?;
    Ok(response.into_response())
}

/// Returns now-playing metadata for a stream.
async fn proxy_metadata(
    State(state): State<AppState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    Query(query): Query<MetadataQuery>,
) -> RelayResult<Response> {
    let stream_url = required(query.stream_url, "stream_url")?;
    state
        .limiter
        .check(&RateScope::Metadata.identifier(remote_addr.ip()))?;

    let record = state.metadata.now_playing(&stream_url).await?;
    Ok(api_data(record).into_response())
}

/// Returns how a player should open a configured station.
///
/// `metadata_url` polls the stream the plan plays, which is where the relay
/// caches in-band titles.
async fn station_plan(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PlanQuery>,
) -> RelayResult<Response> {
    let station = state
        .stations
        .get_stream_config(&id)
        .ok_or_else(|| RelayError::StationNotFound(id.clone()))?;

    let page_is_https = station.mode.allows_proxy() && is_flag_set(query.page_https.as_deref());
    let plan = state.relay.plan(&station.url, page_is_https).await?;
    let metadata_url = state
        .context
        .url_builder()
        .metadata_url(plan.metadata_source());

    Ok(api_data(json!({
        "station": {
            "id": id,
            "title": station.title,
            "artwork": station.artwork,
        },
        "plan": plan,
        "metadata_url": metadata_url,
    }))
    .into_response())
}
