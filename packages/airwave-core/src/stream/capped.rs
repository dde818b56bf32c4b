//! Bounded reads of upstream text bodies.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;

use crate::error::{RelayError, RelayResult};

/// Reads a whole response body, failing once it passes `limit` bytes.
///
/// A declared `Content-Length` over the limit fails before any body is read;
/// otherwise the body is accumulated chunk by chunk so a missing or lying
/// length cannot grow the buffer past `limit`.
pub async fn read_capped(response: reqwest::Response, limit: usize) -> RelayResult<Bytes> {
    if let Some(declared) = response.content_length() {
        if declared > limit as u64 {
            log::warn!(
                "[Relay] {} declares {} bytes, limit {}",
                response.url(),
                declared,
                limit
            );
            return Err(RelayError::UpstreamTooLarge { limit });
        }
    }

    let url = response.url().clone();
    let mut body = BytesMut::new();
    let mut chunks = response.bytes_stream();
    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        if body.len() + chunk.len() > limit {
            log::warn!("[Relay] {} exceeded {} bytes, aborting read", url, limit);
            return Err(RelayError::UpstreamTooLarge { limit });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}
