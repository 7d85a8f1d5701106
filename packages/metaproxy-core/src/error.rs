//! Centralized error types for the metadata proxy.
//!
//! Errors fall into three groups:
//! - transport failures (bind, connect, read/write, timeouts)
//! - malformed input (bad tunnel target, bad metadata interval header,
//!   unparseable upstream response head)
//! - lifecycle conditions (stopped, invalid configuration)
//!
//! Only [`ProxyError::Bind`] and [`ProxyError::InvalidConfig`] ever reach the
//! caller of [`crate::MetaStreamProxy::start`]. Everything else ends a single
//! session and is logged at the session boundary.

use thiserror::Error;

/// Trait for error types that provide machine-readable error codes.
pub trait ErrorCode {
    /// Returns a machine-readable error code for logs and diagnostics.
    fn code(&self) -> &'static str;
}

/// Error type shared by the proxy server, its sessions and the tunnel codec.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The loopback listening socket could not be opened.
    #[error("Failed to bind loopback listener: {0}")]
    Bind(#[source] std::io::Error),

    /// Configuration values would cause runtime issues.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The downstream client sent something that is not a request line.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// The tunneled origin URL could not be recovered from the request path.
    #[error("Invalid tunnel target: {0}")]
    InvalidTunnelTarget(String),

    /// The origin sent an `icy-metaint` header that is not a non-negative integer.
    #[error("Invalid icy-metaint header: {0:?}")]
    InvalidMetaInt(String),

    /// The origin's response head could not be parsed.
    #[error("Invalid upstream response: {0}")]
    InvalidUpstreamResponse(String),

    /// The upstream HTTP exchange failed.
    #[error("Upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    /// Socket I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A bounded wait expired.
    #[error("Timed out: {0}")]
    Timeout(&'static str),

    /// The session or server was asked to stop.
    #[error("Stopped")]
    Stopped,
}

impl ErrorCode for ProxyError {
    fn code(&self) -> &'static str {
        match self {
            Self::Bind(_) => "bind_failed",
            Self::InvalidConfig(_) => "invalid_config",
            Self::MalformedRequest(_) => "malformed_request",
            Self::InvalidTunnelTarget(_) => "invalid_tunnel_target",
            Self::InvalidMetaInt(_) => "invalid_metaint",
            Self::InvalidUpstreamResponse(_) => "invalid_upstream_response",
            Self::Upstream(_) => "upstream_failed",
            Self::Io(_) => "io_error",
            Self::Timeout(_) => "timeout",
            Self::Stopped => "stopped",
        }
    }
}

impl ProxyError {
    /// Returns true for errors caused by bad input rather than transport.
    ///
    /// Used to pick the log level at the session boundary.
    #[must_use]
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            Self::MalformedRequest(_)
                | Self::InvalidTunnelTarget(_)
                | Self::InvalidMetaInt(_)
                | Self::InvalidUpstreamResponse(_)
        )
    }
}

/// Convenient Result alias for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_error_returns_correct_code() {
        let err = ProxyError::Bind(std::io::Error::from(std::io::ErrorKind::AddrInUse));
        assert_eq!(err.code(), "bind_failed");
        assert!(!err.is_malformed_input());
    }

    #[test]
    fn metaint_error_is_malformed_input() {
        let err = ProxyError::InvalidMetaInt("abc".into());
        assert_eq!(err.code(), "invalid_metaint");
        assert!(err.is_malformed_input());
        assert_eq!(err.to_string(), "Invalid icy-metaint header: \"abc\"");
    }
}
