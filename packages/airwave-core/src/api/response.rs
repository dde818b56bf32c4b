//! HTTP response helper functions for consistent API responses.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use serde_json::json;

/// Standard API success response with JSON data.
pub fn api_success<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::OK, Json(data))
}

/// Success envelope `{ "success": true, "data": ... }` used by polling clients.
pub fn api_data<T: Serialize>(data: T) -> impl IntoResponse {
    api_success(json!({ "success": true, "data": data }))
}
