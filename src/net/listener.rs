//! TCP listener implementation with backpressure.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Accept incoming TCP connections
//! - Enforce max_connections limit via semaphore
//! - Hand each connection to the relay and drain them on shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::Instrument;

use crate::config::ListenerConfig;
use crate::lifecycle::Shutdown;
use crate::net::connection::ConnectionTracker;
use crate::net::relay::{log_outcome, SniRelay};

/// Pause after a failed accept so a persistent error (e.g. EMFILE) doesn't spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("invalid bind address {address:?}: {source}")]
    Address {
        address: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to accept: {0}")]
    Accept(#[source] std::io::Error),

    #[error("connection limit closed")]
    Closed,
}

/// A bounded TCP listener that limits concurrent connections.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// new connections wait in the kernel backlog until a slot frees up.
#[derive(Debug)]
pub struct Listener {
    /// The underlying TCP listener.
    inner: TcpListener,
    /// Semaphore to limit concurrent connections.
    connection_limit: Arc<Semaphore>,
    /// Configured maximum connections.
    max_connections: usize,
    tracker: ConnectionTracker,
}

impl Listener {
    /// Bind to the configured address with connection limits.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr =
            config
                .bind_address
                .parse()
                .map_err(|source| ListenerError::Address {
                    address: config.bind_address.clone(),
                    source,
                })?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ListenerError::Bind {
                address: addr,
                source,
            })?;

        let local_addr = listener
            .local_addr()
            .map_err(|source| ListenerError::Bind {
                address: addr,
                source,
            })?;

        tracing::info!(
            address = %local_addr,
            max_connections = config.max_connections,
            "Listener bound"
        );

        Ok(Self {
            inner: listener,
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            max_connections: config.max_connections,
            tracker: ConnectionTracker::new(),
        })
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// This will wait if the connection limit has been reached.
    /// Returns the stream and a permit that must be held for the connection's lifetime.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        // Acquire permit first (backpressure)
        let permit = self
            .connection_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    /// Get configured maximum connections.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Accept and relay connections until shutdown, then drain.
    ///
    /// In-flight relays get `grace` to finish; any still running after that
    /// are left to be torn down with the runtime.
    pub async fn serve(self, relay: Arc<SniRelay>, shutdown: Shutdown, grace: Duration) {
        let mut stop = shutdown.subscribe();

        while !shutdown.is_draining() {
            tokio::select! {
                _ = stop.recv() => break,
                accepted = self.accept() => match accepted {
                    Ok((stream, peer, permit)) => self.spawn_relay(&relay, stream, peer, permit),
                    Err(ListenerError::Closed) => break,
                    Err(e) => {
                        tracing::error!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        // Stop accepting before draining.
        let active = self.tracker.active_count();
        drop(self.inner);
        tracing::info!(active, grace_secs = grace.as_secs(), "Listener stopped, draining relays");

        match tokio::time::timeout(grace, self.tracker.wait_idle()).await {
            Ok(()) => tracing::info!("All relays finished"),
            Err(_) => tracing::warn!(
                remaining = self.tracker.active_count(),
                "Grace period expired with relays still open"
            ),
        }
    }

    fn spawn_relay(
        &self,
        relay: &Arc<SniRelay>,
        stream: TcpStream,
        peer: SocketAddr,
        permit: ConnectionPermit,
    ) {
        let relay = Arc::clone(relay);
        let guard = self.tracker.track();
        let span = tracing::info_span!("connection", id = %guard.id(), peer = %peer);

        tokio::spawn(
            async move {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::trace!(error = %e, "Failed to set TCP_NODELAY");
                }
                let result = relay.serve(stream).await;
                log_outcome(&result);
                drop(guard);
                drop(permit);
            }
            .instrument(span),
        );
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool.
/// This keeps backpressure intact even if the connection handler panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}
