//! Playback planning: how a player should open a station URL.

use std::sync::Arc;

use reqwest::Url;
use serde::Serialize;

use super::{is_manifest_url, needs_proxy, Fetcher, HlsProxyLoader, ProxyEndpoint};
use crate::services::resolver::is_playlist_path;

/// Appends `/;` to an explicit-port root (`http://host:8000/` →
/// `http://host:8000/;`). Anything else is returned unchanged.
#[must_use]
pub fn fix_shoutcast_root(url: &str) -> String {
    let Ok(mut parsed) = Url::parse(url) else {
        return url.to_string();
    };
    let is_root = parsed.path().is_empty() || parsed.path() == "/";
    if parsed.port().is_none() || !is_root {
        return url.to_string();
    }
    parsed.set_path("/;");
    parsed.to_string()
}

/// What a player does with a station URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlaybackPlan {
    /// Play through an HLS player with the proxy loader.
    Hls {
        manifest_url: String,
        /// Relay prefix for the loader, when segments must be proxied.
        proxy_prefix: Option<String>,
    },
    /// Fetch the playlist text, pick an entry, then play it directly.
    Playlist {
        playlist_url: String,
        fetch_url: String,
    },
    /// Open the URL as a continuous audio stream.
    Direct {
        /// URL to poll metadata with.
        stream_url: String,
        /// URL the audio element opens.
        play_url: String,
    },
}

impl PlaybackPlan {
    /// Chooses a plan by sniffing `source_url`.
    #[must_use]
    pub fn for_source(source_url: &str, page_is_https: bool, endpoint: &ProxyEndpoint) -> Self {
        let source_url = source_url.trim();
        let proxied = needs_proxy(source_url, page_is_https);

        if is_manifest_url(source_url) {
            return Self::Hls {
                manifest_url: source_url.to_string(),
                proxy_prefix: proxied.then(|| endpoint.prefix().to_string()),
            };
        }

        let path = Url::parse(source_url)
            .map(|u| u.path().to_string())
            .unwrap_or_default();
        if is_playlist_path(&path) {
            let fetch_url = if proxied {
                endpoint.wrap_playlist(source_url)
            } else {
                source_url.to_string()
            };
            return Self::Playlist {
                playlist_url: source_url.to_string(),
                fetch_url,
            };
        }

        Self::direct(source_url, page_is_https, endpoint)
    }

    /// Plan for a concrete stream URL, e.g. an entry picked from a playlist.
    #[must_use]
    pub fn direct(stream_url: &str, page_is_https: bool, endpoint: &ProxyEndpoint) -> Self {
        let stream_url = fix_shoutcast_root(stream_url);
        let play_url = if needs_proxy(&stream_url, page_is_https) {
            endpoint.wrap(&stream_url)
        } else {
            stream_url.clone()
        };
        Self::Direct {
            stream_url,
            play_url,
        }
    }

    /// URL the player polls now-playing metadata with. Relayed metadata is
    /// cached under the same URL.
    #[must_use]
    pub fn metadata_source(&self) -> &str {
        match self {
            Self::Hls { manifest_url, .. } => manifest_url,
            Self::Playlist { playlist_url, .. } => playlist_url,
            Self::Direct { stream_url, .. } => stream_url,
        }
    }

    /// Builds the HLS loader for this plan. Non-HLS plans have none.
    pub fn loader(
        &self,
        endpoint: &ProxyEndpoint,
        page_is_https: bool,
        fetcher: Arc<dyn Fetcher>,
    ) -> Option<HlsProxyLoader> {
        match self {
            Self::Hls { manifest_url, .. } => Some(HlsProxyLoader::for_source(
                manifest_url.clone(),
                endpoint.clone(),
                page_is_https,
                fetcher,
            )),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hls::tests::TableFetcher;
    use std::collections::HashMap;

    fn endpoint() -> ProxyEndpoint {
        ProxyEndpoint::new("https://relay.example", "t")
    }

    #[test]
    fn shoutcast_root_gets_semicolon() {
        assert_eq!(fix_shoutcast_root("http://a.example:8000"), "http://a.example:8000/;");
        assert_eq!(fix_shoutcast_root("http://a.example:8000/"), "http://a.example:8000/;");
        assert_eq!(
            fix_shoutcast_root("http://a.example:8000/live"),
            "http://a.example:8000/live"
        );
        assert_eq!(fix_shoutcast_root("http://a.example/"), "http://a.example/");
        assert_eq!(fix_shoutcast_root("not a url"), "not a url");
    }

    #[test]
    fn m3u8_sources_use_hls() {
        let plan = PlaybackPlan::for_source("http://a.example/live/index.m3u8", true, &endpoint());
        assert_eq!(
            plan,
            PlaybackPlan::Hls {
                manifest_url: "http://a.example/live/index.m3u8".into(),
                proxy_prefix: Some(endpoint().prefix().to_string()),
            }
        );

        let https = PlaybackPlan::for_source("https://a.example/live/index.m3u8", true, &endpoint());
        assert!(matches!(https, PlaybackPlan::Hls { proxy_prefix: None, .. }));
    }

    #[test]
    fn playlists_are_fetched_through_relay_on_https_pages() {
        let plan = PlaybackPlan::for_source("http://a.example/listen.pls", true, &endpoint());
        assert_eq!(
            plan,
            PlaybackPlan::Playlist {
                playlist_url: "http://a.example/listen.pls".into(),
                fetch_url: endpoint().wrap_playlist("http://a.example/listen.pls"),
            }
        );

        let plain = PlaybackPlan::for_source("http://a.example/listen.m3u", false, &endpoint());
        assert!(matches!(plain, PlaybackPlan::Playlist { ref fetch_url, .. } if fetch_url == "http://a.example/listen.m3u"));
    }

    #[test]
    fn direct_streams_are_fixed_and_proxied() {
        let plan = PlaybackPlan::for_source("http://a.example:8000/", true, &endpoint());
        assert_eq!(
            plan,
            PlaybackPlan::Direct {
                stream_url: "http://a.example:8000/;".into(),
                play_url: endpoint().wrap("http://a.example:8000/;"),
            }
        );

        let https = PlaybackPlan::for_source("https://ice2.somafm.com/groovesalad-128-mp3", true, &endpoint());
        assert!(matches!(https, PlaybackPlan::Direct { ref play_url, .. } if play_url == "https://ice2.somafm.com/groovesalad-128-mp3"));
    }

    #[test]
    fn metadata_source_is_the_played_stream() {
        let direct = PlaybackPlan::for_source("http://a.example:8000/", true, &endpoint());
        assert_eq!(direct.metadata_source(), "http://a.example:8000/;");

        let hls = PlaybackPlan::for_source("http://a.example/index.m3u8", true, &endpoint());
        assert_eq!(hls.metadata_source(), "http://a.example/index.m3u8");

        let playlist = PlaybackPlan::for_source("http://a.example/listen.pls", true, &endpoint());
        assert_eq!(playlist.metadata_source(), "http://a.example/listen.pls");
    }

    #[test]
    fn plan_serializes_with_kind_tag() {
        let json = serde_json::to_value(PlaybackPlan::direct("https://a.example/s", true, &endpoint())).unwrap();
        assert_eq!(json["kind"], "direct");
        assert_eq!(json["play_url"], "https://a.example/s");
    }

    #[test]
    fn only_hls_plans_build_a_loader() {
        let fetcher: Arc<dyn Fetcher> = Arc::new(TableFetcher(HashMap::new()));
        let hls = PlaybackPlan::for_source("http://a.example/index.m3u8", true, &endpoint());
        let loader = hls.loader(&endpoint(), true, Arc::clone(&fetcher)).unwrap();
        assert_eq!(loader.source_url(), "http://a.example/index.m3u8");

        let direct = PlaybackPlan::for_source("http://a.example/live", true, &endpoint());
        assert!(direct.loader(&endpoint(), true, fetcher).is_none());
    }
}
