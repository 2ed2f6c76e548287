//! SNI-routing TCP relay with a dynamic route table.
//!
//! # Architecture Overview
//!
//! ```text
//!     TLS client ──▶ net::listener ──▶ net::relay ──peek──▶ net::sni
//!                                          │
//!                                          ▼
//!                                   routing::RouteTable ──▶ load_balancer
//!                                          │                (weighted random)
//!                                          ▼
//!                                   upstream (bytes spliced both ways)
//!
//!     HTTP client ──▶ http::server ──▶ http::forward (metered) ──▶ upstream
//!
//!     config::watcher ──▶ RouteTable::load ──▶ registry sync (stale timers removed)
//! ```

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod routing;

// Traffic management
pub mod load_balancer;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use net::{Listener, SniRelay};
pub use routing::RouteTable;
