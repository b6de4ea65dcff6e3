//! Gateway configuration types.
//!
//! `GatewayConfig` represents the top-level `config.toml` controlling the
//! listen address, the inference backend, and history bounds. All fields
//! have sensible defaults so the gateway runs with no config file at all.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the Pumplink gateway.
///
/// Loaded from `~/.pumplink/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Listen host for the WebSocket server.
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port for the WebSocket server.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum number of historical messages rendered into one prompt.
    #[serde(default = "default_context_messages")]
    pub context_messages: i64,

    /// Maximum number of messages returned by a `load_history` request.
    #[serde(default = "default_history_messages")]
    pub history_messages: i64,

    #[serde(default)]
    pub inference: InferenceConfig,
}

/// Connection settings for the external answer-generation backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Endpoint receiving `{"prompt": ...}` and answering `{"answer": ...}`.
    #[serde(default = "default_inference_url")]
    pub url: String,

    /// Request timeout in seconds. On expiry the relay degrades to the
    /// canned fallback answer instead of failing.
    #[serde(default = "default_inference_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_context_messages() -> i64 {
    20
}

fn default_history_messages() -> i64 {
    500
}

fn default_inference_url() -> String {
    "http://127.0.0.1:8000/answer".to_string()
}

fn default_inference_timeout_secs() -> u64 {
    30
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            context_messages: default_context_messages(),
            history_messages: default_history_messages(),
            inference: InferenceConfig::default(),
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            url: default_inference_url(),
            timeout_secs: default_inference_timeout_secs(),
        }
    }
}
