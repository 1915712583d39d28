//! Connection tunables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How incoming application packets reach the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Packets are handed to the registered callback as they arrive.
    Push,
    /// Packets are buffered and fetched with [`crate::Connection::recv`].
    Pull,
}

/// Per-connection configuration. Every field has a usable default; a
/// deserialized config may specify any subset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Session keys older than this trigger a re-key request.
    pub max_key_age: Duration,
    /// Extra slack before a pending re-key is declared failed and the
    /// connection force-closed.
    pub max_age_skew: Duration,
    /// Socket read timeout for one reader-loop iteration.
    pub read_timeout: Duration,
    /// Consecutive decrypt/decode failures tolerated before dropping
    /// the connection.
    pub error_budget: u32,
    /// Capacity of the pull-mode delivery queue. The reader thread
    /// blocks while it is full.
    pub queue_capacity: usize,
    /// Gzip packet payloads before encryption.
    pub compress: bool,
    /// Initial delivery mode; switchable at runtime.
    pub delivery_mode: DeliveryMode,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_key_age: Duration::from_secs(60),
            max_age_skew: Duration::from_secs(10),
            read_timeout: Duration::from_millis(250),
            error_budget: 5,
            queue_capacity: 20,
            compress: false,
            delivery_mode: DeliveryMode::Push,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.max_key_age, Duration::from_secs(60));
        assert_eq!(config.max_age_skew, Duration::from_secs(10));
        assert_eq!(config.read_timeout, Duration::from_millis(250));
        assert_eq!(config.error_budget, 5);
        assert_eq!(config.queue_capacity, 20);
        assert!(!config.compress);
        assert_eq!(config.delivery_mode, DeliveryMode::Push);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: ConnectionConfig =
            serde_json::from_str(r#"{"error_budget": 2, "delivery_mode": "pull"}"#).unwrap();
        assert_eq!(config.error_budget, 2);
        assert_eq!(config.delivery_mode, DeliveryMode::Pull);
        assert_eq!(config.queue_capacity, 20);
    }
}
