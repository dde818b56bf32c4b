//! Public addressing context for the relay.
//!
//! [`ProxyContext`] bundles what is needed to build URLs that point back at
//! this relay: the externally visible base URL and the shared proxy token.

use crate::hls::ProxyEndpoint;
use crate::utils::encode_query_value;

/// Addressing configuration shared across services.
#[derive(Clone)]
pub struct ProxyContext {
    /// Externally visible base URL. Empty gives root-relative URLs.
    public_base_url: String,
    token: String,
}

impl ProxyContext {
    /// Creates a context.
    ///
    /// # Arguments
    ///
    /// * `public_base_url` - Base URL clients reach the relay at, or empty.
    /// * `token` - Shared secret required by the stream endpoint.
    #[must_use]
    pub fn new(public_base_url: &str, token: impl Into<String>) -> Self {
        Self {
            public_base_url: public_base_url.trim().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// Creates a context for testing.
    #[cfg(test)]
    pub fn for_test() -> Self {
        Self::new("", "test-token")
    }

    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Returns a `UrlBuilder` for the current configuration.
    #[must_use]
    pub fn url_builder(&self) -> UrlBuilder {
        UrlBuilder::new(self.public_base_url.clone(), self.token.clone())
    }

    /// Relay endpoint used when rewriting manifests and planning playback.
    #[must_use]
    pub fn endpoint(&self) -> ProxyEndpoint {
        ProxyEndpoint::new(&self.public_base_url, &self.token)
    }
}

/// Builder for constructing URLs served by the relay.
pub struct UrlBuilder {
    base: String,
    token: String,
}

impl UrlBuilder {
    /// Creates a new `UrlBuilder` for the given base URL and token.
    pub fn new(base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            token: token.into(),
        }
    }

    /// Returns the base URL (empty for root-relative URLs).
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base
    }

    /// Returns the relay URL streaming `upstream`.
    #[must_use]
    pub fn stream_url(&self, upstream: &str) -> String {
        ProxyEndpoint::new(&self.base, &self.token).wrap(upstream)
    }

    /// Returns the now-playing poll URL for `stream_url`.
    #[must_use]
    pub fn metadata_url(&self, stream_url: &str) -> String {
        format!(
            "{}/proxy/metadata?stream_url={}",
            self.base,
            encode_query_value(stream_url)
        )
    }
}
