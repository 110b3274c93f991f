//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the adapter.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AdapterConfig {
    /// Listener configuration (bind address, request timeout).
    pub listener: ListenerConfig,

    /// Downstream core-network endpoints.
    pub downstream: DownstreamConfig,

    /// Synchronizer settings.
    pub sync: SyncConfig,

    /// Streaming subscription settings.
    pub subscribe: SubscribeConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Optional path to an initial config-tree JSON payload.
    pub initial_tree: Option<String>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:9339").
    pub bind_address: String,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:9339".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Downstream endpoints for reconciled configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DownstreamConfig {
    /// Core configuration service base URL.
    pub core_endpoint: String,

    /// UPF configuration service base URL.
    pub upf_endpoint: String,
}

impl Default for DownstreamConfig {
    fn default() -> Self {
        Self {
            core_endpoint: "http://localhost:5000".to_string(),
            upf_endpoint: "http://localhost:5001".to_string(),
        }
    }
}

/// Synchronizer settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Interval between retries after push failures, in seconds.
    pub retry_interval_secs: u64,

    /// Per-request timeout for downstream pushes, in seconds.
    pub post_timeout_secs: u64,

    /// When false, pushes are logged no-ops.
    pub post_enable: bool,

    /// When set, payloads are appended to this file instead of pushed.
    pub output_file: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_interval_secs: 5,
            post_timeout_secs: 10,
            post_enable: true,
            output_file: None,
        }
    }
}

/// Streaming subscription settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SubscribeConfig {
    /// Server-enforced floor for SAMPLE intervals, in seconds.
    pub sample_floor_secs: u64,

    /// Depth of each client's outbound delivery queue.
    pub queue_depth: usize,
}

impl Default for SubscribeConfig {
    fn default() -> Self {
        Self {
            sample_floor_secs: 5,
            queue_depth: 16,
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Whether to expose the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics listener address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AdapterConfig::default();
        assert_eq!(config.listener.bind_address, "0.0.0.0:9339");
        assert_eq!(config.subscribe.sample_floor_secs, 5);
        assert!(config.sync.post_enable);
        assert!(config.initial_tree.is_none());
    }

    #[test]
    fn test_partial_toml() {
        let config: AdapterConfig = toml::from_str(
            r#"
            [downstream]
            core_endpoint = "http://webui:5000"

            [sync]
            retry_interval_secs = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.downstream.core_endpoint, "http://webui:5000");
        assert_eq!(config.sync.retry_interval_secs, 2);
        // Untouched sections keep their defaults.
        assert_eq!(config.sync.post_timeout_secs, 10);
        assert_eq!(config.subscribe.queue_depth, 16);
    }
}
