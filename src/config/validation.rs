//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses, limits and timeouts
//! - Check every route would be accepted by the route table
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::observability::access_log::{AccessLog, AccessLogError};
use crate::observability::metrics::NoopRegistry;
use crate::routing::{RouteError, RouteDef, Table};

/// A single semantic problem in a configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("{field}: {value:?} is not a socket address")]
    Address { field: &'static str, value: String },

    #[error("listener.max_connections must be greater than zero")]
    MaxConnections,

    #[error("timeouts.{0} must be greater than zero")]
    ZeroTimeout(&'static str),

    #[error("routes[{index}]: service must not be empty")]
    EmptyService { index: usize },

    #[error("routes[{index}]: path {path:?} must start with '/'")]
    RelativePath { index: usize, path: String },

    #[error("routes[{index}]: {source}")]
    Route {
        index: usize,
        #[source]
        source: RouteError,
    },

    #[error("access_log.format: {0}")]
    AccessLogFormat(#[source] AccessLogError),
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::MaxConnections);
    }

    if config.http.enabled {
        check_address(&mut errors, "http.bind_address", &config.http.bind_address);
    }
    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    let timeouts = &config.timeouts;
    for (name, value) in [
        ("dial_ms", timeouts.dial_ms),
        ("peek_ms", timeouts.peek_ms),
        ("request_secs", timeouts.request_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::ZeroTimeout(name));
        }
    }

    let empty = Table::new();
    for (index, route) in config.routes.iter().enumerate() {
        if route.service.trim().is_empty() {
            errors.push(ValidationError::EmptyService { index });
        }
        if !route.path.starts_with('/') {
            errors.push(ValidationError::RelativePath {
                index,
                path: route.path.clone(),
            });
        }
        if let Err(source) = empty.add_route(&NoopRegistry, &RouteDef::from(route)) {
            errors.push(ValidationError::Route { index, source });
        }
    }

    if config.access_log.enabled {
        if let Err(e) = AccessLog::validate_format(&config.access_log.format) {
            errors.push(ValidationError::AccessLogFormat(e));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::Address {
            field,
            value: value.to_string(),
        });
    }
}
