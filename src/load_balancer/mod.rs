//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route table lookup → eligible targets for a host (or host + path)
//!     → weighted.rs (cumulative-weight random draw)
//!     → Return one target or None
//! ```
//!
//! # Design Decisions
//! - Selection is stateless per call: no counters, no session affinity
//! - Targets carry their own weight; the balancer never mutates them
//! - An empty target list yields None, which callers treat as "no route"

use std::sync::Arc;

use crate::routing::Target;

pub mod weighted;

pub use weighted::WeightedRandom;

/// Selects one target out of a candidate set.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    fn next_server(&self, targets: &[Arc<Target>]) -> Option<Arc<Target>>;
}
