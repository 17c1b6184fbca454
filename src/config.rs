//! Server configuration for the relay and static file servers.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for the relay server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Host to bind the relay to
    pub host: String,
    /// Port to bind the relay to
    pub port: u16,
    /// Directory where uploaded session logs are written
    pub logs_dir: PathBuf,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_RELAY_PORT,
            logs_dir: PathBuf::from("logs"),
        }
    }
}

impl RelayConfig {
    /// Create a new relay configuration with custom host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Build from the `BRIDGE_HOST` and `BRIDGE_PORT` environment variables,
    /// falling back to defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("BRIDGE_HOST").unwrap_or(defaults.host),
            port: std::env::var("BRIDGE_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            logs_dir: defaults.logs_dir,
        }
    }

    /// Set the host for the relay server.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port for the relay server.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the directory where uploaded session logs are written.
    pub fn with_logs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.logs_dir = dir.into();
        self
    }

    /// Get the full bind address.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration for the static file server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticConfig {
    /// Host to bind the server to
    pub host: String,
    /// Port to bind the server to
    pub port: u16,
    /// Directory that file paths are resolved against
    pub base_dir: PathBuf,
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_STATIC_PORT,
            base_dir: PathBuf::from("."),
        }
    }
}

impl StaticConfig {
    /// Create a new static server configuration with custom host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Build from the `STATIC_HOST` and `STATIC_PORT` environment variables,
    /// falling back to defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("STATIC_HOST").unwrap_or(defaults.host),
            port: std::env::var("STATIC_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            base_dir: defaults.base_dir,
        }
    }

    /// Set the host for the static server.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port for the static server.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the directory that file paths are resolved against.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    /// Get the full bind address.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_defaults_and_builders() {
        let config = RelayConfig::default();
        assert_eq!(config.bind_address(), "127.0.0.1:8123");

        let config = RelayConfig::new("0.0.0.0", 9000).with_logs_dir("/tmp/logs");
        assert_eq!(config.bind_address(), "0.0.0.0:9000");
        assert_eq!(config.logs_dir, PathBuf::from("/tmp/logs"));
    }

    #[test]
    fn static_defaults_and_builders() {
        let config = StaticConfig::default();
        assert_eq!(config.bind_address(), "127.0.0.1:8000");

        let config = StaticConfig::default().with_port(8080).with_base_dir("site");
        assert_eq!(config.bind_address(), "127.0.0.1:8080");
        assert_eq!(config.base_dir, PathBuf::from("site"));
    }
}
