//! Proxy configuration.
//!
//! All fields have defaults matching the timeouts a mobile media player
//! tolerates. The embedding application may override them before calling
//! [`crate::MetaStreamProxy::start`].

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol_constants::USER_AGENT;

/// Which loopback stack the listener binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindPreference {
    /// Try `::1` first and fall back to `127.0.0.1`.
    #[default]
    Auto,
    /// Only `127.0.0.1`.
    Ipv4,
    /// Only `::1`.
    Ipv6,
}

impl BindPreference {
    /// Returns the loopback addresses to try, in order.
    #[must_use]
    pub fn candidates(&self) -> &'static [IpAddr] {
        const V6: IpAddr = IpAddr::V6(Ipv6Addr::LOCALHOST);
        const V4: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
        match self {
            Self::Auto => &[V6, V4],
            Self::Ipv4 => &[V4],
            Self::Ipv6 => &[V6],
        }
    }
}

/// Configuration for the loopback proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Loopback stack to listen on.
    pub bind: BindPreference,

    /// Listen queue length.
    pub listen_backlog: u32,

    /// Ceiling for establishing the upstream connection (seconds).
    pub connect_timeout_secs: u64,

    /// Ceiling for a single upstream body read (seconds).
    /// Expiry counts as an empty read, not a failure.
    pub read_timeout_secs: u64,

    /// Ceiling for reading the downstream request head (seconds).
    pub request_timeout_secs: u64,

    /// How long `stop()` waits for session tasks to wind down (seconds).
    pub shutdown_timeout_secs: u64,

    /// Maximum size of the downstream request head (bytes).
    pub max_request_head_bytes: usize,

    /// User agent sent upstream.
    pub user_agent: String,
}

impl ProxyConfig {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.listen_backlog == 0 {
            return Err("listen_backlog must be >= 1".to_string());
        }
        if self.connect_timeout_secs == 0 {
            return Err("connect_timeout_secs must be >= 1".to_string());
        }
        if self.read_timeout_secs == 0 {
            return Err("read_timeout_secs must be >= 1".to_string());
        }
        if self.request_timeout_secs == 0 {
            return Err("request_timeout_secs must be >= 1".to_string());
        }
        if self.shutdown_timeout_secs == 0 {
            return Err("shutdown_timeout_secs must be >= 1".to_string());
        }
        if self.max_request_head_bytes < 64 {
            return Err("max_request_head_bytes must be >= 64".to_string());
        }
        Ok(())
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind: BindPreference::Auto,
            listen_backlog: 10,
            connect_timeout_secs: 20,
            read_timeout_secs: 15,
            request_timeout_secs: 15,
            shutdown_timeout_secs: 5,
            max_request_head_bytes: 8 * 1024,
            user_agent: USER_AGENT.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ProxyConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_read_timeout_is_rejected() {
        let config = ProxyConfig {
            read_timeout_secs: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.contains("read_timeout_secs"));
    }

    #[test]
    fn tiny_request_head_is_rejected() {
        let config = ProxyConfig {
            max_request_head_bytes: 10,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn auto_prefers_ipv6_loopback() {
        let candidates = BindPreference::Auto.candidates();
        assert_eq!(candidates.len(), 2);
        assert!(candidates[0].is_ipv6());
        assert!(candidates[1].is_ipv4());
        assert!(candidates.iter().all(|ip| ip.is_loopback()));
    }
}
