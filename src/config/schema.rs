//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the tunnel.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::http::CodecLimits;

/// Root configuration for the upgrade tunnel.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TunnelConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Limits applied while parsing the handshake.
    pub limits: LimitsConfig,

    /// TLS settings used when dialing `wss` targets.
    pub upstream_tls: UpstreamTlsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS listener; upgrades arriving on it are dialed over TLS.
    pub tls: Option<TlsListenerConfig>,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            max_connections: 10_000,
        }
    }
}

/// TLS listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsListenerConfig {
    /// Bind address for the TLS listener.
    pub bind_address: String,

    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Timeout configuration. A value of zero disables the corresponding deadline.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Target connection establishment timeout (TCP + TLS) in seconds.
    pub connect_secs: u64,

    /// Time allowed for the whole handshake relay in seconds.
    pub handshake_secs: u64,

    /// Close a tunnel after this many seconds with no bytes in either direction.
    pub idle_secs: u64,
}

impl TimeoutConfig {
    pub fn connect(&self) -> Option<Duration> {
        non_zero_secs(self.connect_secs)
    }

    pub fn handshake(&self) -> Option<Duration> {
        non_zero_secs(self.handshake_secs)
    }

    pub fn idle(&self) -> Option<Duration> {
        non_zero_secs(self.idle_secs)
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            handshake_secs: 30,
            idle_secs: 0,
        }
    }
}

/// Parsing limits for handshake messages.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum size of a request or response head in bytes.
    pub max_head_bytes: usize,

    /// Maximum number of header lines.
    pub max_headers: usize,

    /// Maximum body size in bytes.
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let limits = CodecLimits::default();
        Self {
            max_head_bytes: limits.max_head_bytes,
            max_headers: limits.max_headers,
            max_body_bytes: limits.max_body_bytes,
        }
    }
}

impl From<&LimitsConfig> for CodecLimits {
    fn from(config: &LimitsConfig) -> Self {
        Self {
            max_head_bytes: config.max_head_bytes,
            max_headers: config.max_headers,
            max_body_bytes: config.max_body_bytes,
        }
    }
}

/// TLS client settings for dialing targets.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamTlsConfig {
    /// Trust the bundled Mozilla root set.
    pub use_webpki_roots: bool,

    /// Extra CA bundle (PEM) to trust in addition to the bundled roots.
    pub extra_ca_path: Option<String>,
}

impl Default for UpstreamTlsConfig {
    fn default() -> Self {
        Self {
            use_webpki_roots: true,
            extra_ca_path: None,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
