//! Connect-time address checks for upstream HTTP clients.
//!
//! [`UrlValidator::validate`](super::UrlValidator::validate) runs before a
//! request is sent, but redirect hops and DNS answers that change between
//! validation and connect never pass through it. [`GuardedResolver`] is
//! installed as the client's resolver so every name the client connects to is
//! resolved here and refused if any address is forbidden.

use std::net::SocketAddr;
use std::sync::Arc;

use reqwest::dns::{Addrs, Name, Resolve, Resolving};

use super::validator::{is_forbidden_ip, HostResolver, ValidationError};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// reqwest resolver that refuses private and reserved addresses.
pub struct GuardedResolver {
    resolver: Arc<dyn HostResolver>,
}

impl GuardedResolver {
    pub fn new(resolver: Arc<dyn HostResolver>) -> Self {
        Self { resolver }
    }
}

impl Resolve for GuardedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let resolver = Arc::clone(&self.resolver);
        let host = name.as_str().to_ascii_lowercase();
        Box::pin(async move {
            // Port 0 is replaced by reqwest with the URL's port.
            let addrs = resolver.resolve(&host, 0).await?;
            if addrs.is_empty() {
                return Err(ValidationError::ResolutionFailed(host).into());
            }
            if let Some(bad) = addrs.iter().copied().find(|ip| is_forbidden_ip(*ip)) {
                log::warn!("[Validator] Refusing connect to '{}': resolves to {}", host, bad);
                return Err(ValidationError::PrivateAddress(bad).into());
            }
            let addrs: Addrs = Box::new(addrs.into_iter().map(|ip| SocketAddr::new(ip, 0)));
            Ok::<_, BoxError>(addrs)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::validator::tests::StaticResolver;
    use std::collections::HashMap;
    use std::net::IpAddr;
    use std::str::FromStr;

    fn guarded(entries: &[(&'static str, &str)]) -> GuardedResolver {
        let mut table: HashMap<&'static str, Vec<IpAddr>> = HashMap::new();
        for (host, ip) in entries {
            table.entry(host).or_default().push(ip.parse().unwrap());
        }
        GuardedResolver::new(Arc::new(StaticResolver(table)))
    }

    async fn lookup(resolver: &GuardedResolver, host: &str) -> Result<Vec<SocketAddr>, String> {
        resolver
            .resolve(Name::from_str(host).unwrap())
            .await
            .map(|addrs| addrs.collect())
            .map_err(|e| e.to_string())
    }

    #[tokio::test]
    async fn public_answers_pass_through() {
        let resolver = guarded(&[("radio.example", "93.184.216.34")]);
        let addrs = lookup(&resolver, "radio.example").await.unwrap();
        assert_eq!(addrs, vec!["93.184.216.34:0".parse().unwrap()]);
    }

    #[tokio::test]
    async fn private_answers_are_refused() {
        let resolver = guarded(&[
            ("vm", "127.0.0.1"),
            ("mixed.example", "93.184.216.34"),
            ("mixed.example", "192.168.0.10"),
        ]);
        let err = lookup(&resolver, "vm").await.unwrap_err();
        assert!(err.contains("127.0.0.1"), "{}", err);
        assert!(lookup(&resolver, "mixed.example").await.is_err());
    }

    #[tokio::test]
    async fn unknown_names_fail() {
        let resolver = guarded(&[]);
        assert!(lookup(&resolver, "nowhere.example").await.is_err());
    }
}
