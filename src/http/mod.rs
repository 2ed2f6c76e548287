//! HTTP forwarding front.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, route lookup by host + path prefix)
//!     → forward.rs (metered client, per-status timers)
//!     → upstream target
//!     → access log line
//! ```

pub mod forward;
pub mod server;

pub use forward::{Metered, MeteredLayer};
pub use server::HttpServer;
