//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Route table mutation
//!     → metrics.rs (registry port: stale timers unregistered)
//! Relay / HTTP forward completes
//!     → metrics.rs (timer update, outcome counters)
//!     → access_log.rs (one line per HTTP request)
//!     → logging.rs (structured events)
//!
//! Consumers:
//!     → local.rs (in-process registry, mirrored to Prometheus)
//!     → Log aggregation (stdout, JSON)
//! ```
//!
//! # Design Decisions
//! - The registry is an injected trait object; the no-op registry is the default
//! - Timers are created on first use and pruned when their route disappears
//! - Access log writes are serialized by a mutex

pub mod access_log;
pub mod local;
pub mod logging;
pub mod metrics;

pub use access_log::{AccessLog, AccessRecord};
pub use local::LocalRegistry;
pub use metrics::{MetricsRegistry, NoopRegistry, Timer};
