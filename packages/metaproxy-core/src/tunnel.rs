//! Tunnel URL construction and decoding.
//!
//! A media player only knows "play this URL". To route it through the proxy,
//! the real origin URL is percent-encoded into the single path segment of a
//! loopback URL: `http://[::1]:41234/http%3A%2F%2Fradio.example%2Flive`.
//! The session recovers the origin from the request target.

use std::net::SocketAddr;

use reqwest::Url;

use crate::error::{ProxyError, ProxyResult};
use crate::utils::percent_decode_strict;

/// Builds loopback URLs for a listening proxy.
#[derive(Debug, Clone, Copy)]
pub struct TunnelUrlBuilder {
    addr: SocketAddr,
}

impl TunnelUrlBuilder {
    /// Creates a builder for the given listener address.
    #[must_use]
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Returns the proxy base URL (e.g. `http://127.0.0.1:41234`).
    ///
    /// IPv6 addresses are bracketed.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Returns the loopback URL that tunnels `origin`.
    #[must_use]
    pub fn tunnel_url(&self, origin: &str) -> String {
        format!("{}/{}", self.base_url(), encode_tunnel_target(origin))
    }
}

/// Percent-encodes an origin URL into a single path segment.
///
/// Everything except ASCII alphanumerics and `-_.~` is escaped, so `/`, `?`,
/// `&`, `=`, `%` and `+` all survive the trip.
#[must_use]
pub fn encode_tunnel_target(origin: &str) -> String {
    urlencoding::encode(origin).into_owned()
}

/// Recovers the origin URL text from a request target.
///
/// A leading `/` is stripped. `+` is read as a space, matching clients that
/// form-encode the path; [`encode_tunnel_target`] never emits a bare `+`.
pub fn decode_tunnel_path(target: &str) -> ProxyResult<String> {
    let encoded = target.strip_prefix('/').unwrap_or(target);
    if encoded.is_empty() {
        return Err(ProxyError::InvalidTunnelTarget("empty path".to_string()));
    }

    percent_decode_strict(&encoded.replace('+', " "))
        .map_err(|e| ProxyError::InvalidTunnelTarget(format!("{encoded:?}: {e}")))
}

/// Recovers and validates the origin URL from a request target.
///
/// Only `http` and `https` origins are accepted.
pub fn decode_tunnel_target(target: &str) -> ProxyResult<Url> {
    let decoded = decode_tunnel_path(target)?;
    let url = Url::parse(&decoded)
        .map_err(|e| ProxyError::InvalidTunnelTarget(format!("{decoded:?}: {e}")))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ProxyError::InvalidTunnelTarget(format!(
            "unsupported scheme {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    fn builder_v4(port: u16) -> TunnelUrlBuilder {
        TunnelUrlBuilder::new(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port))
    }

    #[test]
    fn ipv6_base_url_is_bracketed() {
        let builder =
            TunnelUrlBuilder::new(SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 41234));
        assert_eq!(builder.base_url(), "http://[::1]:41234");
    }

    #[test]
    fn tunnel_url_escapes_origin_into_one_segment() {
        let url = builder_v4(8000).tunnel_url("http://radio.example/live?x=1");
        assert_eq!(
            url,
            "http://127.0.0.1:8000/http%3A%2F%2Fradio.example%2Flive%3Fx%3D1"
        );
    }

    #[test]
    fn round_trip_preserves_reserved_characters() {
        let origins = [
            "http://radio.example/stream?a=1&b=2",
            "http://radio.example/100%25/live",
            "https://radio.example/a+b/c d",
            "http://radio.example/björk/ストリーム",
            "http://[2001:db8::1]:8000/mount",
        ];

        for origin in origins {
            let tunneled = builder_v4(1).tunnel_url(origin);
            let path = tunneled.trim_start_matches("http://127.0.0.1:1");
            assert_eq!(decode_tunnel_path(path).unwrap(), origin);
        }
    }

    #[test]
    fn decodes_target_into_url() {
        let url = decode_tunnel_target("/http%3A%2F%2Fradio.example%3A8000%2Flive").unwrap();
        assert_eq!(url.host_str(), Some("radio.example"));
        assert_eq!(url.port(), Some(8000));
        assert_eq!(url.path(), "/live");
    }

    #[test]
    fn plus_in_target_is_a_space() {
        assert_eq!(
            decode_tunnel_path("/http%3A%2F%2Fa%2Fb+c").unwrap(),
            "http://a/b c"
        );
    }

    #[test]
    fn rejects_malformed_escapes() {
        let err = decode_tunnel_path("/http%3A%2F%2Fa%2").unwrap_err();
        assert!(matches!(err, ProxyError::InvalidTunnelTarget(_)));
        assert!(err.is_malformed_input());
    }

    #[test]
    fn rejects_empty_and_relative_targets() {
        assert!(decode_tunnel_target("/").is_err());
        assert!(decode_tunnel_target("").is_err());
        assert!(decode_tunnel_target("/not-a-url").is_err());
    }

    #[test]
    fn rejects_non_http_schemes() {
        let err = decode_tunnel_target("/ftp%3A%2F%2Fa%2Fb").unwrap_err();
        assert!(err.to_string().contains("ftp"));
    }
}
