//! OS signal handling.
//!
//! # Responsibilities
//! - Wait for SIGTERM or SIGINT
//! - Report which one arrived so the caller can trigger shutdown
//!
//! Route reloads come from the config file watcher, not from SIGHUP.

use std::io;

/// Wait until the process is asked to stop.
///
/// Returns the name of the signal received.
#[cfg(unix)]
pub async fn wait_for_signal() -> io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            Ok("SIGINT")
        }
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

/// Wait until the process is asked to stop.
#[cfg(not(unix))]
pub async fn wait_for_signal() -> io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}
