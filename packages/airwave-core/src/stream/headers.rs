//! Upstream → client header translation.
//!
//! Only an explicit allow-list of upstream headers is copied, so hop-by-hop
//! and connection-control headers (`Connection`, `Transfer-Encoding`,
//! `Content-Length`, `Keep-Alive`, ...) never reach the client.

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

use crate::protocol_constants::{
    DEFAULT_AUDIO_CONTENT_TYPE, FORWARDED_ICY_HEADERS, ICY_METAINT_HEADER, LIVE_CACHE_CONTROL,
    SEGMENT_CACHE_CONTROL,
};

/// Reads `icy-metaint`, treating absent or malformed values as 0 (no framing).
#[must_use]
pub fn parse_metaint(headers: &HeaderMap) -> usize {
    headers
        .get(ICY_METAINT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

/// Maps an upstream content type to what browsers can play.
///
/// AAC+ variants (`audio/aacp`, `audio/aac+`) are not recognised by most
/// browsers and are rewritten to `audio/aac`.
#[must_use]
pub fn normalize_content_type(raw: Option<&str>) -> String {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty());
    match raw {
        None => DEFAULT_AUDIO_CONTENT_TYPE.to_string(),
        Some(ct) => {
            let lower = ct.to_ascii_lowercase();
            if lower.contains("aacp") || lower.contains("aac+") {
                "audio/aac".to_string()
            } else {
                ct.to_string()
            }
        }
    }
}

/// Guesses a content type for proxied files from the URL path.
#[must_use]
pub fn file_content_type(path: &str) -> &'static str {
    let path = path.to_ascii_lowercase();
    if path.ends_with(".ts") {
        "video/mp2t"
    } else if path.ends_with(".m3u8") {
        "application/vnd.apple.mpegurl"
    } else {
        "application/octet-stream"
    }
}

fn insert_static(headers: &mut HeaderMap, name: HeaderName, value: &'static str) {
    headers.insert(name, HeaderValue::from_static(value));
}

fn cors(headers: &mut HeaderMap) {
    insert_static(headers, header::ACCESS_CONTROL_ALLOW_ORIGIN, "*");
}

/// Builds client headers for a live audio relay.
#[must_use]
pub fn live_audio_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();

    let content_type = normalize_content_type(
        upstream
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
    );
    let content_type = HeaderValue::from_str(&content_type)
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_AUDIO_CONTENT_TYPE));
    headers.insert(header::CONTENT_TYPE, content_type);

    for name in FORWARDED_ICY_HEADERS {
        if let Some(value) = upstream.get(name) {
            headers.insert(HeaderName::from_static(name), value.clone());
        }
    }

    insert_static(&mut headers, header::CACHE_CONTROL, LIVE_CACHE_CONTROL);
    insert_static(&mut headers, header::PRAGMA, "no-cache");
    insert_static(&mut headers, header::EXPIRES, "0");
    insert_static(&mut headers, header::ACCEPT_RANGES, "none");
    insert_static(
        &mut headers,
        HeaderName::from_static("x-accel-buffering"),
        "no",
    );
    cors(&mut headers);
    headers
}

/// Builds client headers for a proxied segment or manifest.
#[must_use]
pub fn segment_headers(upstream: &HeaderMap, path: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let content_type = upstream
        .get(header::CONTENT_TYPE)
        .filter(|v| !v.is_empty())
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(file_content_type(path)));
    headers.insert(header::CONTENT_TYPE, content_type);
    insert_static(&mut headers, header::CACHE_CONTROL, SEGMENT_CACHE_CONTROL);
    cors(&mut headers);
    headers
}

/// Builds client headers for a raw playlist body.
#[must_use]
pub fn playlist_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    insert_static(&mut headers, header::CONTENT_TYPE, "text/plain; charset=utf-8");
    insert_static(&mut headers, header::X_CONTENT_TYPE_OPTIONS, "nosniff");
    cors(&mut headers);
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(HeaderName::from_static(k), HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn metaint_defaults_to_zero() {
        assert_eq!(parse_metaint(&HeaderMap::new()), 0);
        assert_eq!(parse_metaint(&upstream(&[("icy-metaint", "abc")])), 0);
        assert_eq!(parse_metaint(&upstream(&[("icy-metaint", " 16000 ")])), 16000);
    }

    #[test]
    fn aac_plus_is_normalized() {
        assert_eq!(normalize_content_type(Some("audio/aacp")), "audio/aac");
        assert_eq!(normalize_content_type(Some("audio/AAC+")), "audio/aac");
        assert_eq!(normalize_content_type(Some("audio/ogg")), "audio/ogg");
        assert_eq!(normalize_content_type(None), "audio/mpeg");
        assert_eq!(normalize_content_type(Some("  ")), "audio/mpeg");
    }

    #[test]
    fn live_headers_forward_icy_and_drop_hop_by_hop() {
        let up = upstream(&[
            ("content-type", "audio/aacp"),
            ("icy-name", "Groove Salad"),
            ("icy-br", "128"),
            ("icy-metaint", "16000"),
            ("connection", "close"),
            ("transfer-encoding", "chunked"),
            ("content-length", "12345"),
        ]);
        let out = live_audio_headers(&up);

        assert_eq!(out[header::CONTENT_TYPE], "audio/aac");
        assert_eq!(out["icy-name"], "Groove Salad");
        assert_eq!(out["icy-br"], "128");
        assert_eq!(out[header::CACHE_CONTROL], LIVE_CACHE_CONTROL);
        assert_eq!(out[header::PRAGMA], "no-cache");
        assert_eq!(out[header::EXPIRES], "0");
        assert_eq!(out[header::ACCEPT_RANGES], "none");
        assert_eq!(out["x-accel-buffering"], "no");
        assert_eq!(out[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert!(out.get("icy-metaint").is_none());
        assert!(out.get(header::CONNECTION).is_none());
        assert!(out.get(header::TRANSFER_ENCODING).is_none());
        assert!(out.get(header::CONTENT_LENGTH).is_none());
    }

    #[test]
    fn segment_content_type_is_guessed_from_extension() {
        let out = segment_headers(&HeaderMap::new(), "/live/seg001.TS");
        assert_eq!(out[header::CONTENT_TYPE], "video/mp2t");
        assert_eq!(out[header::CACHE_CONTROL], "public, max-age=60");
        assert_eq!(file_content_type("/index.m3u8"), "application/vnd.apple.mpegurl");
        assert_eq!(file_content_type("/blob"), "application/octet-stream");
    }
}
