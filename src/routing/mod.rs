//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route mutation (add / del / full load)
//!     → table.rs (build successor snapshot)
//!     → router.rs (publish atomically, prune stale metrics)
//!
//! Lookup:
//!     SNI hostname        → table.rs hostname index → weighted target
//!     HTTP host + path    → matcher.rs normalization → longest prefix → weighted target
//!     → Return: target or None ("no route")
//! ```
//!
//! # Design Decisions
//! - Snapshots are immutable; mutation is copy-on-write
//! - Lookups never block and never fail
//! - Metric identifiers are derived from the route, never stored separately (name.rs)

pub mod matcher;
pub mod name;
pub mod router;
pub mod table;

pub use router::{sync_registry, RouteTable};
pub use table::{Route, RouteError, RouteDef, Table, Target};
