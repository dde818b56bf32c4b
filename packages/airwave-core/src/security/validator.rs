//! Upstream URL safety validation.
//!
//! Every proxied fetch (stream, playlist, manifest, segment) passes through
//! [`UrlValidator::validate`] before any network I/O toward the target. The
//! result is never cached: DNS answers can change between requests.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use thiserror::Error;

use super::dns::GuardedResolver;
use crate::error::ErrorCode;
use crate::state::ValidatorConfig;

/// Literal hosts rejected before any address inspection.
const BLOCKED_HOSTS: [&str; 7] = [
    "localhost",
    "0.0.0.0",
    "::1",
    "127.0.0.1",
    "metadata.google.internal",
    "169.254.169.254",
    "fd00:ec2::254",
];

/// Reasons a URL is refused.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// No scheme or host, or not a URL at all.
    #[error("URL could not be parsed")]
    Malformed,

    /// Scheme other than http/https.
    #[error("scheme '{0}' is not allowed")]
    UnsupportedScheme(String),

    /// Host is on the literal block list.
    #[error("host '{0}' is blocked")]
    BlockedHost(String),

    /// Host is, or resolves to, a non-public address.
    #[error("address {0} is private or reserved")]
    PrivateAddress(IpAddr),

    /// Name did not resolve and is not trusted.
    #[error("could not resolve '{0}'")]
    ResolutionFailed(String),

    /// Explicit port outside the allow-list.
    #[error("port {0} is not allowed")]
    PortNotAllowed(u16),
}

// ─────────────────────────────────────────────────────────────────────────────
// StreamTarget
// ─────────────────────────────────────────────────────────────────────────────

/// An upstream URL that passed validation.
///
/// Only [`UrlValidator`] can construct one, so holding a `StreamTarget` is
/// proof the checks ran for this request.
#[derive(Debug, Clone)]
pub struct StreamTarget {
    url: Url,
}

impl StreamTarget {
    /// Wraps a URL without validation. Tests point relays at loopback servers.
    #[cfg(test)]
    pub(crate) fn unchecked(url: &str) -> Self {
        Self {
            url: Url::parse(url).expect("test URL must parse"),
        }
    }

    /// Same scheme, host and port with a different path and no query.
    ///
    /// Safety depends only on scheme, host and port, so the result is still
    /// a valid target.
    #[must_use]
    pub(crate) fn with_path(&self, path: &str) -> Self {
        let mut url = self.url.clone();
        url.set_path(path);
        url.set_query(None);
        url.set_fragment(None);
        Self { url }
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    #[must_use]
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    #[must_use]
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// Explicit port, or the scheme default.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.url.port_or_known_default().unwrap_or(80)
    }

    /// Whether the URL carried an explicit port.
    #[must_use]
    pub fn has_explicit_port(&self) -> bool {
        self.url.port().is_some()
    }

    #[must_use]
    pub fn path(&self) -> &str {
        self.url.path()
    }

    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.url.query()
    }

    #[must_use]
    pub fn is_https(&self) -> bool {
        self.url.scheme() == "https"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolution
// ─────────────────────────────────────────────────────────────────────────────

/// DNS lookup seam so validation can be tested without a network.
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Returns every A/AAAA address for `host`.
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the system resolver via Tokio.
#[derive(Debug, Clone, Default)]
pub struct TokioResolver;

#[async_trait]
impl HostResolver for TokioResolver {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, port)).await?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Address classification
// ─────────────────────────────────────────────────────────────────────────────

/// Returns true for addresses a relay must never connect to.
#[must_use]
pub fn is_forbidden_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_forbidden_v4(v4),
        IpAddr::V6(v6) => is_forbidden_v6(v6),
    }
}

fn is_forbidden_v4(ip: Ipv4Addr) -> bool {
    let [a, b, c, _] = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_multicast()
        || a == 0
        // 100.64.0.0/10 carrier-grade NAT
        || (a == 100 && (b & 0xc0) == 64)
        // 192.0.0.0/24 IETF protocol assignments
        || (a == 192 && b == 0 && c == 0)
        // 198.18.0.0/15 benchmarking
        || (a == 198 && (b & 0xfe) == 18)
        // 240.0.0.0/4 reserved
        || a >= 240
}

fn is_forbidden_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_forbidden_v4(v4);
    }
    let seg = ip.segments();
    let embedded_v4 = |hi: u16, lo: u16| {
        let [a, b] = hi.to_be_bytes();
        let [c, d] = lo.to_be_bytes();
        Ipv4Addr::new(a, b, c, d)
    };

    // 64:ff9b::/96 NAT64 well-known prefix translates to the embedded address
    if seg[..6] == [0x64, 0xff9b, 0, 0, 0, 0] {
        return is_forbidden_v4(embedded_v4(seg[6], seg[7]));
    }
    // 2002::/16 6to4 relays to the embedded address
    if seg[0] == 0x2002 {
        return is_forbidden_v4(embedded_v4(seg[1], seg[2]));
    }

    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        // ::/96 deprecated IPv4-compatible
        || seg[..6] == [0; 6]
        // 64:ff9b:1::/48 local-use NAT64
        || seg[..3] == [0x64, 0xff9b, 1]
        // 100::/64 discard-only
        || seg[..4] == [0x100, 0, 0, 0]
        // 2001::/32 Teredo
        || seg[..2] == [0x2001, 0]
        // 2001:db8::/32 documentation
        || seg[..2] == [0x2001, 0xdb8]
        // fc00::/7 unique local
        || (seg[0] & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (seg[0] & 0xffc0) == 0xfe80
        // fec0::/10 deprecated site local
        || (seg[0] & 0xffc0) == 0xfec0
}

fn literal_ip(host: &str) -> Option<IpAddr> {
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .ok()
}

// ─────────────────────────────────────────────────────────────────────────────
// Validator
// ─────────────────────────────────────────────────────────────────────────────

/// SSRF gate for user-supplied upstream URLs.
#[derive(Clone)]
pub struct UrlValidator {
    config: ValidatorConfig,
    resolver: Arc<dyn HostResolver>,
}

impl UrlValidator {
    /// Creates a validator with an explicit resolver.
    pub fn new(config: ValidatorConfig, resolver: Arc<dyn HostResolver>) -> Self {
        Self { config, resolver }
    }

    /// Creates a validator using the system resolver.
    pub fn with_system_resolver(config: ValidatorConfig) -> Self {
        Self::new(config, Arc::new(TokioResolver))
    }

    /// Resolver for upstream HTTP clients that applies the address checks at
    /// connect time, covering redirect hops and DNS answers that changed
    /// since [`validate`](Self::validate) ran.
    #[must_use]
    pub fn dns_resolver(&self) -> Arc<GuardedResolver> {
        Arc::new(GuardedResolver::new(Arc::clone(&self.resolver)))
    }

    /// Whether `host` is a subdomain of a trusted streaming-provider domain.
    ///
    /// Provider edge hosts (`ice2.somafm.com`) match; the apex itself does not.
    #[must_use]
    pub fn is_trusted(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.config.trusted_domains.iter().any(|domain| {
            let domain = domain.trim_start_matches('.').to_ascii_lowercase();
            host.ends_with(&format!(".{}", domain))
        })
    }

    /// Runs every check that needs no DNS: scheme, literal host, literal IP
    /// ranges and port.
    ///
    /// Used on redirect hops, where async resolution is not available.
    pub fn check_static(&self, url: &Url) -> Result<(), ValidationError> {
        let scheme = url.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(ValidationError::UnsupportedScheme(scheme.to_string()));
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or(ValidationError::Malformed)?
            .to_ascii_lowercase();
        let bare = host.trim_start_matches('[').trim_end_matches(']');

        if BLOCKED_HOSTS.contains(&bare) {
            return Err(ValidationError::BlockedHost(bare.to_string()));
        }

        if let Some(ip) = literal_ip(bare) {
            if is_forbidden_ip(ip) {
                return Err(ValidationError::PrivateAddress(ip));
            }
        }

        self.check_port(url)
    }

    fn check_port(&self, url: &Url) -> Result<(), ValidationError> {
        match url.port() {
            Some(port) if !self.config.allowed_ports.contains(&port) => {
                Err(ValidationError::PortNotAllowed(port))
            }
            _ => Ok(()),
        }
    }

    /// Classifies `raw` as safe or unsafe.
    ///
    /// Named hosts are resolved and every address must be public. Resolution
    /// failure is unsafe unless the host is trusted, in which case DNS is
    /// skipped entirely.
    pub async fn validate(&self, raw: &str) -> Result<StreamTarget, ValidationError> {
        let result = self.validate_inner(raw).await;
        if let Err(ref e) = result {
            log::warn!("[Validator] Rejected '{}': {} [{}]", raw, e, e.code());
        }
        result
    }

    async fn validate_inner(&self, raw: &str) -> Result<StreamTarget, ValidationError> {
        let url = Url::parse(raw.trim()).map_err(|_| ValidationError::Malformed)?;
        self.check_static(&url)?;

        let host = url
            .host_str()
            .ok_or(ValidationError::Malformed)?
            .to_ascii_lowercase();

        if literal_ip(&host).is_none() {
            if self.is_trusted(&host) {
                log::debug!("[Validator] Trusted host '{}', skipping DNS checks", host);
            } else {
                let port = url.port_or_known_default().unwrap_or(80);
                let addrs = self
                    .resolver
                    .resolve(&host, port)
                    .await
                    .map_err(|_| ValidationError::ResolutionFailed(host.clone()))?;
                if addrs.is_empty() {
                    return Err(ValidationError::ResolutionFailed(host));
                }
                if let Some(bad) = addrs.into_iter().find(|ip| is_forbidden_ip(*ip)) {
                    return Err(ValidationError::PrivateAddress(bad));
                }
            }
        }

        Ok(StreamTarget { url })
    }
}
