//! Client identity resolution.
//!
//! The identity is an opaque bucketing key. It is never validated as an IP
//! address, and header-derived identities can be spoofed by any client that
//! is not behind a proxy rewriting them.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::HeaderMap;

use crate::config::IdentityConfig;

/// Identity used when nothing about the client is known.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Strategy for turning request metadata into a client identity.
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String;
}

/// Leftmost `X-Forwarded-For` entry, then `X-Real-IP`, then the peer address.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardedForResolver;

/// Socket peer address only; forwarding headers are ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct PeerAddressResolver;

impl IdentityResolver for ForwardedForResolver {
    fn resolve(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        header_value(headers, "x-forwarded-for")
            .and_then(|xff| xff.split(',').next())
            .map(str::trim)
            .filter(|first| !first.is_empty())
            .or_else(|| header_value(headers, "x-real-ip").map(str::trim).filter(|ip| !ip.is_empty()))
            .map(str::to_string)
            .unwrap_or_else(|| PeerAddressResolver.resolve(headers, peer))
    }
}

impl IdentityResolver for PeerAddressResolver {
    fn resolve(&self, _headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        peer.map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| UNKNOWN_IDENTITY.to_string())
    }
}

/// Pick the resolver the configuration asks for.
pub fn resolver_for(config: &IdentityConfig) -> Arc<dyn IdentityResolver> {
    if config.trust_forwarded_headers {
        Arc::new(ForwardedForResolver)
    } else {
        Arc::new(PeerAddressResolver)
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> Option<SocketAddr> {
        Some("192.168.1.10:54321".parse().unwrap())
    }

    #[test]
    fn test_forwarded_for_takes_leftmost_entry() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static(" 203.0.113.7 , 10.0.0.1, 10.0.0.2"),
        );

        assert_eq!(ForwardedForResolver.resolve(&headers, peer()), "203.0.113.7");
    }

    #[test]
    fn test_forwarded_for_is_opaque() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("not-an-ip"));

        assert_eq!(ForwardedForResolver.resolve(&headers, peer()), "not-an-ip");
    }

    #[test]
    fn test_real_ip_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(" ,10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static(" 198.51.100.4 "));

        assert_eq!(ForwardedForResolver.resolve(&headers, peer()), "198.51.100.4");
    }

    #[test]
    fn test_peer_fallback() {
        let headers = HeaderMap::new();
        assert_eq!(ForwardedForResolver.resolve(&headers, peer()), "192.168.1.10");
    }

    #[test]
    fn test_unknown_sentinel() {
        let headers = HeaderMap::new();
        assert_eq!(ForwardedForResolver.resolve(&headers, None), UNKNOWN_IDENTITY);
        assert_eq!(PeerAddressResolver.resolve(&headers, None), UNKNOWN_IDENTITY);
    }

    #[test]
    fn test_resolver_for_config() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7"));

        let trusting = resolver_for(&IdentityConfig {
            trust_forwarded_headers: true,
        });
        let strict = resolver_for(&IdentityConfig {
            trust_forwarded_headers: false,
        });

        assert_eq!(trusting.resolve(&headers, peer()), "203.0.113.7");
        assert_eq!(strict.resolve(&headers, peer()), "192.168.1.10");
    }

    #[test]
    fn test_peer_resolver_ignores_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7"));
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.4"));

        assert_eq!(PeerAddressResolver.resolve(&headers, peer()), "192.168.1.10");
    }
}
