//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (pool sizes, intervals > 0)
//! - Validate addresses parse before anything binds
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ContainerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::ContainerConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check a parsed configuration, collecting every error.
pub fn validate_config(config: &ContainerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);

    let workers = &config.workers;
    if workers.core_workers == 0 {
        errors.push(ValidationError::new("workers.core_workers", "must be at least 1"));
    }
    if workers.max_workers < workers.core_workers {
        errors.push(ValidationError::new(
            "workers.max_workers",
            format!(
                "must be >= core_workers ({} < {})",
                workers.max_workers, workers.core_workers
            ),
        ));
    }
    if workers.backlog == 0 {
        errors.push(ValidationError::new("workers.backlog", "must be at least 1"));
    }

    let deployment = &config.deployment;
    if deployment.scan_interval_secs == 0 {
        errors.push(ValidationError::new(
            "deployment.scan_interval_secs",
            "must be greater than zero",
        ));
    }
    if deployment.root_app_name.is_empty() || deployment.root_app_name.contains('/') {
        errors.push(ValidationError::new(
            "deployment.root_app_name",
            "must be a plain directory name",
        ));
    }

    let session = &config.session;
    if session.cookie_name.trim().is_empty() {
        errors.push(ValidationError::new("session.cookie_name", "must not be empty"));
    }
    if session.query_parameter.trim().is_empty() {
        errors.push(ValidationError::new("session.query_parameter", "must not be empty"));
    }
    if session.sweep_interval_secs == 0 {
        errors.push(ValidationError::new(
            "session.sweep_interval_secs",
            "must be greater than zero",
        ));
    }

    if config.observability.metrics_enabled {
        check_addr(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if config.admin.enabled {
        check_addr(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.trim().is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_addr(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            field,
            format!("'{}' is not a socket address", value),
        ));
    }
}
