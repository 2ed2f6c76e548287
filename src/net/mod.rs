//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (id, in-flight tracking)
//!     → relay.rs (peek, route by SNI, splice)
//!         → sni.rs (ClientHello parsing)
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - TLS is passed through untouched; only the ClientHello is inspected

pub mod connection;
pub mod listener;
pub mod relay;
pub mod sni;

pub use listener::{Listener, ListenerError};
pub use relay::{RelayConfig, RelayError, SniRelay};
pub use sni::{parse_sni, read_server_name, SniResult};
