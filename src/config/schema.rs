//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the container.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for the application container.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ContainerConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Connection worker pool sizing.
    pub workers: WorkerConfig,

    /// HTTP/1.1 connection behaviour.
    pub http: HttpConfig,

    /// Deployment root and reconciliation settings.
    pub deployment: DeploymentConfig,

    /// Session defaults shared by every application.
    pub session: SessionConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Workers kept alive for the lifetime of the pool.
    pub core_workers: usize,

    /// Upper bound on workers, overflow workers included.
    pub max_workers: usize,

    /// Accepted connections allowed to wait for a worker.
    pub backlog: usize,

    /// Seconds an overflow worker may stay idle before exiting.
    pub idle_timeout_secs: u64,

    /// Seconds to wait for busy workers on shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            core_workers: 10,
            max_workers: 50,
            backlog: 100,
            idle_timeout_secs: 60,
            shutdown_timeout_secs: 10,
        }
    }
}

/// HTTP/1.1 connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Keep connections open between requests.
    pub keep_alive: bool,

    /// Seconds allowed for a client to send a complete request head.
    pub header_read_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            keep_alive: true,
            header_read_timeout_secs: 30,
        }
    }
}

/// What happens to in-flight requests when an application is undeployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DrainPolicy {
    /// Stop admitting requests, wait for in-flight ones (bounded), then tear down.
    Wait,
    /// Stop admitting requests and tear down immediately.
    Reject,
}

/// Deployment configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeploymentConfig {
    /// Directory holding one subdirectory per application.
    pub root: PathBuf,

    /// Directory name deployed at the root context path.
    pub root_app_name: String,

    /// Reconciliation interval in seconds.
    pub scan_interval_secs: u64,

    /// Also react to filesystem events between scans.
    pub watch: bool,

    /// Undeploy draining policy.
    pub drain: DrainPolicy,

    /// Upper bound on the wait under `DrainPolicy::Wait`, in seconds.
    pub drain_timeout_secs: u64,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("webapps"),
            root_app_name: "ROOT".to_string(),
            scan_interval_secs: 5,
            watch: true,
            drain: DrainPolicy::Wait,
            drain_timeout_secs: 10,
        }
    }
}

/// Session configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name of the session cookie.
    pub cookie_name: String,

    /// Query parameter consulted when no cookie is present.
    pub query_parameter: String,

    /// Default max-inactive interval in seconds; zero or less never expires.
    pub max_inactive_secs: i64,

    /// Expiry sweep interval in seconds.
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "JSESSIONID".to_string(),
            query_parameter: "jsessionid".to_string(),
            max_inactive_secs: 1800,
            sweep_interval_secs: 60,
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

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
