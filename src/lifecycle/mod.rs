//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     draining flag set → listeners stop accepting
//!     → in-flight relays finish or the grace period expires → exit
//! ```
//!
//! # Design Decisions
//! - New connections check the draining flag before reading anything
//! - Shutdown has a deadline: forced exit after the grace period

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
