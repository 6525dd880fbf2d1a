//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that action and role names in override tables exist
//! - Validate value ranges (windows and blocks within bounds, lengths consistent, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::GuardConfig;
use crate::security::rate_limit::{ActionType, MAX_POLICY_SECS};
use crate::security::rbac::Role;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration, collecting every error found.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    if config.rate_limit.cleanup_interval_secs == 0 {
        errors.push(ValidationError::new(
            "rate_limit.cleanup_interval_secs",
            "must be greater than 0",
        ));
    }
    for (name, policy) in &config.rate_limit.policies {
        let field = format!("rate_limit.policies.{name}");
        if name.parse::<ActionType>().is_err() {
            errors.push(ValidationError::new(&field, "unknown action type"));
        }
        if policy.max_attempts == 0 {
            errors.push(ValidationError::new(&field, "max_attempts must be greater than 0"));
        }
        for (key, secs) in [("window_secs", policy.window_secs), ("block_secs", policy.block_secs)] {
            if secs == 0 {
                errors.push(ValidationError::new(&field, format!("{key} must be greater than 0")));
            } else if secs > MAX_POLICY_SECS {
                errors.push(ValidationError::new(
                    &field,
                    format!("{key} must be at most {MAX_POLICY_SECS}"),
                ));
            }
        }
    }

    for role in config.rbac.grants.keys() {
        if role.parse::<Role>().is_err() {
            errors.push(ValidationError::new(format!("rbac.grants.{role}"), "unknown role"));
        }
    }

    if config.sanitizer.max_filename_length < 8 {
        errors.push(ValidationError::new("sanitizer.max_filename_length", "must be at least 8"));
    }
    if config.sanitizer.max_search_query_length == 0 {
        errors.push(ValidationError::new(
            "sanitizer.max_search_query_length",
            "must be greater than 0",
        ));
    }

    let password = &config.password;
    if password.min_length == 0 {
        errors.push(ValidationError::new("password.min_length", "must be greater than 0"));
    }
    if password.min_length > password.max_length {
        errors.push(ValidationError::new(
            "password.min_length",
            format!(
                "min_length {} exceeds max_length {}",
                password.min_length, password.max_length
            ),
        ));
    }

    if !matches!(config.observability.log_format.as_str(), "compact" | "pretty" | "json") {
        errors.push(ValidationError::new(
            "observability.log_format",
            format!("unsupported format '{}'", config.observability.log_format),
        ));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "is not a socket address",
        ));
    }

    if config.admin.enabled {
        if config.admin.api_key.trim().is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty"));
        }
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new("admin.bind_address", "is not a socket address"));
        }
    }

    if config.security.max_body_size == 0 {
        errors.push(ValidationError::new("security.max_body_size", "must be greater than 0"));
    }
    if config.security.user_id_header.is_empty() {
        errors.push(ValidationError::new("security.user_id_header", "must not be empty"));
    }
    if matches!(&config.security.service_token, Some(token) if token.trim().is_empty()) {
        errors.push(ValidationError::new("security.service_token", "must not be empty when set"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::PolicyConfig;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&GuardConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = GuardConfig::default();
        config.listener.bind_address = "not-an-address".into();
        config.password.min_length = 200;
        config.rate_limit.policies.insert(
            "teleport".into(),
            PolicyConfig { max_attempts: 0, window_secs: 1, block_secs: 1 },
        );

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"listener.bind_address"));
        assert!(fields.contains(&"password.min_length"));
        assert_eq!(
            fields.iter().filter(|f| **f == "rate_limit.policies.teleport").count(),
            2
        );
    }

    #[test]
    fn test_policy_durations_bounded() {
        let mut config = GuardConfig::default();
        config.rate_limit.policies.insert(
            "login".into(),
            PolicyConfig { max_attempts: 5, window_secs: 60, block_secs: u64::MAX },
        );
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].to_string(),
            format!("rate_limit.policies.login: block_secs must be at most {MAX_POLICY_SECS}")
        );
    }

    #[test]
    fn test_unknown_role_grant_rejected() {
        let mut config = GuardConfig::default();
        config.rbac.grants.insert("janitor".into(), Vec::new());
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].to_string(), "rbac.grants.janitor: unknown role");
    }

    #[test]
    fn test_blank_service_token_rejected() {
        let mut config = GuardConfig::default();
        config.security.service_token = Some(" ".into());
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "security.service_token");
    }

    #[test]
    fn test_admin_requires_key_when_enabled() {
        let mut config = GuardConfig::default();
        config.admin.enabled = true;
        config.admin.api_key = "  ".into();
        assert!(validate_config(&config).is_err());
    }
}
