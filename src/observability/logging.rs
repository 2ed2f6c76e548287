//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the `tracing` subscriber from configuration
//! - Let `RUST_LOG` override the configured level
//!
//! # Design Decisions
//! - JSON format for production, pretty format for development
//! - Initialization is fallible so tests and embedders can install their own subscriber

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::schema::{LogFormat, ObservabilityConfig};

pub use tracing_subscriber::util::TryInitError;

/// Install the global subscriber.
pub fn init(config: &ObservabilityConfig) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("edge_relay={},tower_http=info", config.log_level)));

    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer()).try_init(),
    }
}
