//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::path::Path;

use anyhow::{Context, Result};
use metaproxy_core::{BindPreference, ProxyConfig};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Loopback stack to listen on (`auto`, `ipv4`, `ipv6`).
    /// Override: `METAPROXY_BIND`
    pub bind: BindPreference,

    /// Origin stream to print a tunnel URL for at startup.
    /// Override: `METAPROXY_ORIGIN` (handled by clap in main.rs)
    pub origin: Option<String>,

    /// Upstream connect ceiling in seconds.
    /// Override: `METAPROXY_CONNECT_TIMEOUT`
    pub connect_timeout_secs: u64,

    /// Upstream per-read ceiling in seconds.
    /// Override: `METAPROXY_READ_TIMEOUT`
    pub read_timeout_secs: u64,

    /// Seconds to wait for sessions on shutdown.
    pub shutdown_timeout_secs: u64,

    /// Listen queue length.
    pub listen_backlog: u32,

    /// User agent sent upstream. Defaults to the library's.
    pub user_agent: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let proxy = ProxyConfig::default();
        Self {
            bind: proxy.bind,
            origin: None,
            connect_timeout_secs: proxy.connect_timeout_secs,
            read_timeout_secs: proxy.read_timeout_secs,
            shutdown_timeout_secs: proxy.shutdown_timeout_secs,
            listen_backlog: proxy.listen_backlog,
            user_agent: None,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Applies `METAPROXY_*` overrides from `lookup`. Unparseable values are
    /// logged and ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("METAPROXY_BIND") {
            match parse_bind(&val) {
                Ok(bind) => self.bind = bind,
                Err(e) => log::warn!("Ignoring METAPROXY_BIND: {}", e),
            }
        }

        if let Some(val) = lookup("METAPROXY_CONNECT_TIMEOUT") {
            match val.parse() {
                Ok(secs) => self.connect_timeout_secs = secs,
                Err(_) => log::warn!("Ignoring METAPROXY_CONNECT_TIMEOUT={:?}", val),
            }
        }

        if let Some(val) = lookup("METAPROXY_READ_TIMEOUT") {
            match val.parse() {
                Ok(secs) => self.read_timeout_secs = secs,
                Err(_) => log::warn!("Ignoring METAPROXY_READ_TIMEOUT={:?}", val),
            }
        }
    }

    /// Converts to the library's configuration type.
    pub fn to_proxy_config(&self) -> ProxyConfig {
        let mut proxy = ProxyConfig {
            bind: self.bind,
            connect_timeout_secs: self.connect_timeout_secs,
            read_timeout_secs: self.read_timeout_secs,
            shutdown_timeout_secs: self.shutdown_timeout_secs,
            listen_backlog: self.listen_backlog,
            ..Default::default()
        };
        if let Some(ref user_agent) = self.user_agent {
            proxy.user_agent = user_agent.clone();
        }
        proxy
    }
}

/// Parses a bind preference name, as accepted in YAML.
pub fn parse_bind(value: &str) -> Result<BindPreference, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "auto" => Ok(BindPreference::Auto),
        "ipv4" => Ok(BindPreference::Ipv4),
        "ipv6" => Ok(BindPreference::Ipv6),
        other => Err(format!(
            "unknown bind preference {other:?} (expected auto, ipv4 or ipv6)"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn missing_file_path_uses_defaults() {
        let config = ServerConfig::default();
        let proxy = config.to_proxy_config();
        assert_eq!(proxy.bind, BindPreference::Auto);
        assert_eq!(proxy.connect_timeout_secs, 20);
        assert!(proxy.validate().is_ok());
    }

    #[test]
    fn loads_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "bind: ipv4\norigin: http://radio.example/live\nread_timeout_secs: 5\nuser_agent: test-agent"
        )
        .unwrap();

        let config = ServerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.bind, BindPreference::Ipv4);
        assert_eq!(config.origin.as_deref(), Some("http://radio.example/live"));

        let proxy = config.to_proxy_config();
        assert_eq!(proxy.read_timeout_secs, 5);
        assert_eq!(proxy.connect_timeout_secs, 20);
        assert_eq!(proxy.user_agent, "test-agent");
    }

    #[test]
    fn unreadable_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.yaml");
        let err = ServerConfig::load(Some(missing.as_path())).unwrap_err();
        assert!(format!("{err:#}").contains("missing.yaml"));
    }

    #[test]
    fn overrides_replace_file_values() {
        let env: HashMap<&str, &str> = [
            ("METAPROXY_BIND", "IPv6"),
            ("METAPROXY_CONNECT_TIMEOUT", "7"),
            ("METAPROXY_READ_TIMEOUT", "soon"),
        ]
        .into_iter()
        .collect();

        let mut config = ServerConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.bind, BindPreference::Ipv6);
        assert_eq!(config.connect_timeout_secs, 7);
        // Unparseable value leaves the default in place
        assert_eq!(config.read_timeout_secs, 15);
    }

    #[test]
    fn parse_bind_rejects_unknown_values() {
        assert_eq!(parse_bind(" ipv4 "), Ok(BindPreference::Ipv4));
        assert!(parse_bind("ethernet").is_err());
    }
}
