//! # Gateway
//!
//! The service object every handler receives. It owns the database
//! registry, the replicator and the configuration; nothing is global.

use std::sync::Arc;

use chrono::Utc;
use reqwest::Url;

use crate::http_server::GatewayConfig;
use crate::registry::DatabaseRegistry;
use crate::replication::Replicator;
use crate::store::{DocumentStore, MemoryStore};

/// Shared state behind every route
pub struct Gateway {
    registry: Arc<DatabaseRegistry>,
    replicator: Replicator,
    config: GatewayConfig,
    start_time: i64,
}

impl Gateway {
    pub fn new(store: Arc<dyn DocumentStore>, config: GatewayConfig) -> Self {
        let registry = Arc::new(DatabaseRegistry::new(store));
        Self {
            replicator: Replicator::new(Arc::clone(&registry)),
            registry,
            config,
            start_time: Utc::now().timestamp_millis(),
        }
    }

    /// Gateway over a fresh in-memory store
    pub fn in_memory(config: GatewayConfig) -> Self {
        Self::new(Arc::new(MemoryStore::new()), config)
    }

    pub fn registry(&self) -> &DatabaseRegistry {
        &self.registry
    }

    pub fn replicator(&self) -> &Replicator {
        &self.replicator
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Milliseconds since epoch at gateway start, as CouchDB reports it
    pub fn instance_start_time(&self) -> String {
        self.start_time.to_string()
    }

    /// Absolute URL of a resource, each segment percent-encoded
    pub fn location(&self, segments: &[&str]) -> String {
        let origin = self.config.advertised_origin();
        match Url::parse(&origin) {
            Ok(mut url) => {
                if let Ok(mut path) = url.path_segments_mut() {
                    path.clear().extend(segments);
                }
                url.to_string()
            }
            Err(_) => format!("{}/{}", origin, segments.join("/")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_uses_advertised_origin() {
        let gateway = Gateway::in_memory(GatewayConfig::with_port(5990));
        assert_eq!(gateway.location(&["db", "doc"]), "http://localhost:5990/db/doc");
    }

    #[test]
    fn test_location_encodes_segments() {
        let gateway = Gateway::in_memory(GatewayConfig::default());
        assert_eq!(
            gateway.location(&["my db", "_design/app"]),
            "http://localhost:5984/my%20db/_design%2Fapp"
        );
    }

    #[test]
    fn test_instance_start_time_is_millis() {
        let gateway = Gateway::in_memory(GatewayConfig::default());
        let millis: i64 = gateway.instance_start_time().parse().unwrap();
        assert!(millis <= Utc::now().timestamp_millis());
    }
}
