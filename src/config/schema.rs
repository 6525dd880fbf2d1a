//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard
//! service. All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::security::password::PasswordPolicy;
use crate::security::rbac::Permission;

/// Root configuration for the guard service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Extra role grants on top of the built-in permission table.
    pub rbac: RbacConfig,

    /// Sanitizer limits.
    pub sanitizer: SanitizerConfig,

    /// Password policy.
    pub password: PasswordPolicy,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,

    pub security: SecurityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent in-flight requests (backpressure).
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

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable the per-client API throttle on `/v1` routes.
    pub enabled: bool,

    /// Interval between sweeps of expired entries, in seconds.
    pub cleanup_interval_secs: u64,

    /// Per-action overrides keyed by action name (`login`, `two_factor`, ...).
    pub policies: HashMap<String, PolicyConfig>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cleanup_interval_secs: 300,
            policies: HashMap::new(),
        }
    }
}

/// Override for a single action's limits.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PolicyConfig {
    pub max_attempts: u32,
    pub window_secs: u64,
    pub block_secs: u64,
}

/// Role-based access control configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RbacConfig {
    /// Additional permissions per role name (`finance = ["export_reports"]`).
    pub grants: HashMap<String, Vec<Permission>>,
}

/// Limits applied by the sanitizer.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SanitizerConfig {
    /// Maximum filename length in characters, extension included.
    pub max_filename_length: usize,

    /// Maximum search query length in characters.
    pub max_search_query_length: usize,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            max_filename_length: 255,
            max_search_query_length: 200,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format: "compact", "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "compact".to_string(),
            metrics_enabled: true,
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

/// Request hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum body size in bytes.
    pub max_body_size: usize,

    /// Header carrying the authenticated user id, used as the throttle key.
    pub user_id_header: String,

    /// Bearer token the trusted backend must present on `/v1` routes.
    /// Unset leaves the API open to anyone who can reach the listener.
    pub service_token: Option<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 1024 * 1024, // 1MB
            user_id_header: "x-user-id".to_string(),
            service_token: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: GuardConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert!(config.rate_limit.enabled);
        assert_eq!(config.password.min_length, 12);
        assert!(!config.admin.enabled);
    }

    #[test]
    fn test_parse_overrides() {
        let raw = r#"
            [rate_limit]
            cleanup_interval_secs = 60

            [rate_limit.policies.login]
            max_attempts = 3
            window_secs = 60
            block_secs = 600

            [rbac.grants]
            finance = ["export_reports", "view_tasks"]

            [password]
            min_length = 16
        "#;
        let config: GuardConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.rate_limit.cleanup_interval_secs, 60);
        assert_eq!(
            config.rate_limit.policies.get("login"),
            Some(&PolicyConfig { max_attempts: 3, window_secs: 60, block_secs: 600 })
        );
        assert_eq!(
            config.rbac.grants.get("finance").map(Vec::len),
            Some(2)
        );
        assert_eq!(config.password.min_length, 16);
        assert!(config.password.require_uppercase);
    }
}
