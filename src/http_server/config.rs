//! Gateway Configuration
//!
//! Bind address, advertised origin, CORS, feed and logging settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Gateway configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Host to bind to (default: "0.0.0.0")
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind to (default: 5984)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Protocol used in `Location` headers (default: "http")
    #[serde(default = "default_protocol")]
    pub advertised_protocol: String,

    /// Host used in `Location` headers (default: the bind host)
    #[serde(default)]
    pub advertised_host: Option<String>,

    /// CORS allowed origins; empty allows any origin
    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Default changes feed heartbeat in milliseconds (default: 6000)
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,

    /// Largest `count` accepted by `/_uuids` (default: 1000)
    #[serde(default = "default_max_uuid_count")]
    pub max_uuid_count: usize,

    /// Log filter when `RUST_LOG` is unset (default: "info")
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// "text" or "json" (default: "text")
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5984
}

fn default_protocol() -> String {
    "http".to_string()
}

fn default_heartbeat_ms() -> u64 {
    6000
}

fn default_max_uuid_count() -> usize {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            advertised_protocol: default_protocol(),
            advertised_host: None,
            cors_origins: Vec::new(),
            heartbeat_ms: default_heartbeat_ms(),
            max_uuid_count: default_max_uuid_count(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl GatewayConfig {
    /// Create a new config with specified port
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    /// Get the socket address string
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// `protocol://host:port` as clients should see it
    pub fn advertised_origin(&self) -> String {
        let host = match self.advertised_host.as_deref() {
            Some(host) => host,
            None if self.host == "0.0.0.0" => "localhost",
            None => &self.host,
        };
        format!("{}://{}:{}", self.advertised_protocol, host, self.port)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    /// Check value ranges; the message names the offending field
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("port must be > 0".to_string());
        }
        if self.heartbeat_ms == 0 {
            return Err("heartbeat_ms must be > 0".to_string());
        }
        if self.max_uuid_count == 0 {
            return Err("max_uuid_count must be > 0".to_string());
        }
        if !matches!(self.advertised_protocol.as_str(), "http" | "https") {
            return Err(format!(
                "Invalid advertised_protocol: '{}'. Use 'http' or 'https'.",
                self.advertised_protocol
            ));
        }
        if !matches!(self.log_format.as_str(), "text" | "json") {
            return Err(format!(
                "Invalid log_format: '{}'. Use 'text' or 'json'.",
                self.log_format
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 5984);
        assert_eq!(config.heartbeat(), Duration::from_millis(6000));
        assert!(config.cors_origins.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_socket_addr() {
        let config = GatewayConfig::with_port(8080);
        assert_eq!(config.socket_addr(), "0.0.0.0:8080");
    }

    #[test]
    fn test_advertised_origin() {
        let config = GatewayConfig::with_port(5985);
        assert_eq!(config.advertised_origin(), "http://localhost:5985");

        let config = GatewayConfig {
            host: "10.0.0.2".into(),
            advertised_protocol: "https".into(),
            ..Default::default()
        };
        assert_eq!(config.advertised_origin(), "https://10.0.0.2:5984");

        let config = GatewayConfig {
            advertised_host: Some("couch.example.com".into()),
            ..Default::default()
        };
        assert_eq!(config.advertised_origin(), "http://couch.example.com:5984");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: GatewayConfig = serde_json::from_str(r#"{"port": 6000}"#).unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.max_uuid_count, 1000);
        assert_eq!(config.log_format, "text");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad = [
            GatewayConfig { port: 0, ..Default::default() },
            GatewayConfig { heartbeat_ms: 0, ..Default::default() },
            GatewayConfig { advertised_protocol: "ftp".into(), ..Default::default() },
            GatewayConfig { log_format: "xml".into(), ..Default::default() },
        ];
        for config in bad {
            assert!(config.validate().is_err());
        }
    }
}
