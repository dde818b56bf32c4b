//! Centralized error types for the Airwave core library.
//!
//! This module provides a unified error handling system that:
//! - Defines structured error types using `thiserror`
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::security::ValidationError;

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

impl ErrorCode for ValidationError {
    fn code(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed_url",
            Self::UnsupportedScheme(_) => "unsupported_scheme",
            Self::BlockedHost(_) => "blocked_host",
            Self::PrivateAddress(_) => "private_address",
            Self::ResolutionFailed(_) => "dns_resolution_failed",
            Self::PortNotAllowed(_) => "port_not_allowed",
        }
    }
}

/// Application-wide error type for the relay.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or wrong proxy token.
    #[error("Unauthorized")]
    Unauthorized,

    /// Target failed URL safety validation.
    #[error("Unsafe URL: {0}")]
    UnsafeUrl(#[from] ValidationError),

    /// Client exceeded its request budget.
    #[error("Rate limit exceeded for {0}")]
    RateLimited(String),

    /// Upstream could not be reached (DNS, connect, TLS, timeout).
    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    /// Upstream answered with a non-success status.
    #[error("Upstream rejected request with status {status}")]
    UpstreamRejected {
        /// Status returned by the upstream.
        status: u16,
    },

    /// Upstream playlist had no body.
    #[error("Upstream playlist was empty")]
    EmptyPlaylist,

    /// Upstream text body exceeded the in-memory limit.
    #[error("Upstream body exceeds {limit} bytes")]
    UpstreamTooLarge {
        /// Byte limit that was exceeded.
        limit: usize,
    },

    /// Requested station is not configured.
    #[error("Station not found: {0}")]
    StationNotFound(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Server configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RelayError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::Unauthorized => "unauthorized",
            Self::UnsafeUrl(_) => "unsafe_url",
            Self::RateLimited(_) => "rate_limited",
            Self::UpstreamUnreachable(_) => "upstream_unreachable",
            Self::UpstreamRejected { .. } => "upstream_rejected",
            Self::EmptyPlaylist => "empty_playlist",
            Self::UpstreamTooLarge { .. } => "upstream_too_large",
            Self::StationNotFound(_) => "station_not_found",
            Self::Internal(_) => "internal_error",
            Self::Configuration(_) => "configuration_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized | Self::UnsafeUrl(_) => StatusCode::FORBIDDEN,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::StationNotFound(_) => StatusCode::NOT_FOUND,
            Self::UpstreamUnreachable(_)
            | Self::UpstreamRejected { .. }
            | Self::UpstreamTooLarge { .. }
            | Self::EmptyPlaylist => StatusCode::BAD_GATEWAY,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to clients.
    ///
    /// Unsafe-target and upstream failures never echo hosts, paths or
    /// resolver output.
    pub fn public_message(&self) -> String {
        match self {
            Self::UnsafeUrl(_) => "Invalid or unsafe URL".to_string(),
            Self::RateLimited(_) => "Rate limit exceeded".to_string(),
            Self::UpstreamUnreachable(_) => "Upstream unreachable".to_string(),
            Self::Internal(_) => "Internal error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::UpstreamRejected {
                status: status.as_u16(),
            },
            None => Self::UpstreamUnreachable(err.to_string()),
        }
    }
}

/// Convenient Result alias for relay operations.
pub type RelayResult<T> = Result<T, RelayError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.public_message(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}
