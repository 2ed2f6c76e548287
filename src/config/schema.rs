//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::observability::access_log::DEFAULT_FORMAT;
use crate::routing::RouteDef;

/// Root configuration for the relay.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// SNI listener configuration.
    pub listener: ListenerConfig,

    /// Optional plain HTTP front.
    pub http: HttpConfig,

    /// Route definitions loaded into the route table.
    pub routes: Vec<RouteConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Access log settings for the HTTP front.
    pub access_log: AccessLogConfig,
}

impl ProxyConfig {
    /// Route definitions in the form the route table consumes.
    pub fn route_defs(&self) -> Vec<RouteDef> {
        self.routes.iter().map(RouteDef::from).collect()
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8443").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8443".to_string(),
            max_connections: 10_000,
        }
    }
}

/// HTTP front configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Serve plain HTTP alongside the SNI listener.
    pub enabled: bool,

    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// One target of a route.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Owning service name.
    pub service: String,

    /// Virtual host; empty matches any host on the HTTP front.
    #[serde(default)]
    pub host: String,

    /// Path prefix.
    #[serde(default = "default_path")]
    pub path: String,

    /// Upstream URL or `host:port`.
    pub target: String,

    /// Selection weight (must be positive).
    #[serde(default = "default_weight")]
    pub weight: i64,

    /// Opaque tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_path() -> String {
    "/".to_string()
}

fn default_weight() -> i64 {
    1
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream dial timeout in milliseconds.
    pub dial_ms: u64,

    /// Time allowed for the client's first bytes, in milliseconds.
    pub peek_ms: u64,

    /// HTTP request timeout in seconds.
    pub request_secs: u64,

    /// How long shutdown waits for in-flight relays, in seconds.
    pub shutdown_grace_secs: u64,
}

impl TimeoutConfig {
    pub fn dial(&self) -> Duration {
        Duration::from_millis(self.dial_ms)
    }

    pub fn peek(&self) -> Duration {
        Duration::from_millis(self.peek_ms)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            dial_ms: 5_000,
            peek_ms: 5_000,
            request_secs: 30,
            shutdown_grace_secs: 30,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Keep route timers in process and expose them to Prometheus.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Access log configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AccessLogConfig {
    /// Write one line per forwarded HTTP request to stdout.
    pub enabled: bool,

    /// Space-separated field list.
    pub format: String,
}

impl Default for AccessLogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            format: DEFAULT_FORMAT.to_string(),
        }
    }
}
