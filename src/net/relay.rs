//! SNI-routed TCP relay.
//!
//! # Responsibilities
//! - Read the client's first bytes and extract the TLS server name
//! - Pick an upstream for that name from the current route table
//! - Replay the peeked bytes upstream, then copy both directions until
//!   either side finishes
//!
//! # Connection flow
//! ```text
//! Start ──draining──────────────────────────────▶ Closed
//!   │
//!   ▼
//! Peeking ──bad hello──▶ "handshake failed\n" ──▶ Closed
//!   │      ──no name───▶ "server_name missing\n" ▶ Closed
//!   ▼
//! Dialing ──no route / dial error───────────────▶ Closed
//!   │
//!   ▼
//! Relaying ──upstream done──────────────────────▶ both closed
//!   │      ──client done──▶ draining upstream ──▶ both closed
//! ```
//!
//! TLS is never terminated; the upstream sees the exact bytes the client sent.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::config::TimeoutConfig;
use crate::lifecycle::Shutdown;
use crate::net::sni::{parse_sni, SniResult};
use crate::routing::RouteTable;

/// Bytes read from the client before routing.
pub const PEEK_BUFFER_SIZE: usize = 1024;

/// Sent to a client whose first bytes are not a ClientHello.
pub const HANDSHAKE_FAILED: &[u8] = b"handshake failed\n";

/// Sent to a client whose ClientHello carries no server name.
pub const SERVER_NAME_MISSING: &[u8] = b"server_name missing\n";

/// How long the upstream may keep answering after the client stops sending.
pub const UPSTREAM_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Broad category of a failed relay, used for log levels and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Shutdown was in progress.
    Draining,
    /// The client did not speak TLS properly.
    Protocol,
    /// No route exists for the requested name.
    Routing,
    /// A socket operation failed.
    Transport,
}

/// Errors from relaying one connection.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("shutting down")]
    Draining,

    #[error("client closed before sending a handshake")]
    ClientClosed,

    #[error("timed out waiting for client handshake")]
    PeekTimeout,

    #[error("failed to read client handshake: {0}")]
    Peek(#[source] io::Error),

    #[error("handshake failed")]
    Handshake,

    #[error("server_name missing")]
    ServerNameMissing,

    #[error("no route for {0:?}")]
    NoRoute(String),

    #[error("timed out connecting to {0}")]
    DialTimeout(String),

    #[error("failed to connect to {address}: {source}")]
    Dial {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to replay handshake to {address}: {source}")]
    Replay {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("relay failed: {0}")]
    Copy(#[source] io::Error),
}

impl RelayError {
    /// Which kind of failure this is.
    pub fn class(&self) -> ErrorClass {
        match self {
            RelayError::Draining => ErrorClass::Draining,
            RelayError::ClientClosed
            | RelayError::PeekTimeout
            | RelayError::Handshake
            | RelayError::ServerNameMissing => ErrorClass::Protocol,
            RelayError::NoRoute(_) => ErrorClass::Routing,
            RelayError::Peek(_)
            | RelayError::DialTimeout(_)
            | RelayError::Dial { .. }
            | RelayError::Replay { .. }
            | RelayError::Copy(_) => ErrorClass::Transport,
        }
    }

    /// Metric label for this failure.
    pub fn outcome(&self) -> &'static str {
        match self {
            RelayError::Draining => "draining",
            RelayError::ClientClosed => "client_closed",
            RelayError::PeekTimeout => "peek_timeout",
            RelayError::Peek(_) => "peek_error",
            RelayError::Handshake => "handshake_failed",
            RelayError::ServerNameMissing => "server_name_missing",
            RelayError::NoRoute(_) => "no_route",
            RelayError::DialTimeout(_) => "dial_timeout",
            RelayError::Dial { .. } => "dial_error",
            RelayError::Replay { .. } | RelayError::Copy(_) => "copy_error",
        }
    }
}

/// Timeouts applied to a single relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Upper bound on establishing the upstream connection.
    pub dial_timeout: Duration,
    /// Upper bound on waiting for the client's first bytes.
    pub peek_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::from(&TimeoutConfig::default())
    }
}

impl From<&TimeoutConfig> for RelayConfig {
    fn from(timeouts: &TimeoutConfig) -> Self {
        Self {
            dial_timeout: timeouts.dial(),
            peek_timeout: timeouts.peek(),
        }
    }
}

/// A successfully relayed connection.
#[derive(Debug, Clone)]
pub struct Relayed {
    pub server_name: String,
    pub upstream: String,
    /// Time from upstream connect to teardown.
    pub elapsed: Duration,
}

/// Routes raw client connections to upstreams by SNI.
#[derive(Debug)]
pub struct SniRelay {
    routes: Arc<RouteTable>,
    shutdown: Shutdown,
    config: RelayConfig,
}

impl SniRelay {
    pub fn new(routes: Arc<RouteTable>, shutdown: Shutdown, config: RelayConfig) -> Self {
        Self {
            routes,
            shutdown,
            config,
        }
    }

    /// Relay one client connection to completion.
    ///
    /// The client stream is closed when this returns, whatever the outcome.
    /// The target's timer records the relay from upstream connect to teardown,
    /// excluding the handshake wait and dial.
    pub async fn serve<S>(&self, mut client: S) -> Result<Relayed, RelayError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        if self.shutdown.is_draining() {
            return Err(RelayError::Draining);
        }
        let hello = self.peek(&mut client).await?;
        let server_name = match parse_sni(&hello) {
            SniResult::Found(name) => name,
            SniResult::NoSni => {
                reject(&mut client, SERVER_NAME_MISSING).await;
                return Err(RelayError::ServerNameMissing);
            }
            SniResult::Malformed => {
                reject(&mut client, HANDSHAKE_FAILED).await;
                return Err(RelayError::Handshake);
            }
        };

        let target = self
            .routes
            .lookup_host(&server_name)
            .ok_or_else(|| RelayError::NoRoute(server_name.clone()))?;

        tracing::debug!(
            server_name = %server_name,
            upstream = %target.address,
            service = %target.service,
            "Routing connection"
        );

        let mut upstream = self.dial(&target.address).await?;
        let started = Instant::now();
        upstream
            .write_all(&hello)
            .await
            .map_err(|source| RelayError::Replay {
                address: target.address.clone(),
                source,
            })?;

        let result = splice(client, upstream).await;
        target.timer.update_since(started);
        result.map_err(RelayError::Copy)?;

        Ok(Relayed {
            server_name,
            upstream: target.address.clone(),
            elapsed: started.elapsed(),
        })
    }

    /// Read the first bytes the client sends, without waiting for more.
    async fn peek<S>(&self, client: &mut S) -> Result<Vec<u8>, RelayError>
    where
        S: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; PEEK_BUFFER_SIZE];
        let n = match timeout(self.config.peek_timeout, client.read(&mut buf)).await {
            Err(_) => return Err(RelayError::PeekTimeout),
            Ok(Err(e)) => return Err(RelayError::Peek(e)),
            Ok(Ok(0)) => return Err(RelayError::ClientClosed),
            Ok(Ok(n)) => n,
        };
        buf.truncate(n);
        Ok(buf)
    }

    async fn dial(&self, address: &str) -> Result<TcpStream, RelayError> {
        match timeout(self.config.dial_timeout, TcpStream::connect(address)).await {
            Err(_) => Err(RelayError::DialTimeout(address.to_string())),
            Ok(Err(source)) => Err(RelayError::Dial {
                address: address.to_string(),
                source,
            }),
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::trace!(error = %e, "Failed to set TCP_NODELAY upstream");
                }
                Ok(stream)
            }
        }
    }
}

/// Write a diagnostic line to a rejected client. Failures are ignored.
async fn reject<S>(client: &mut S, message: &[u8])
where
    S: AsyncWrite + Unpin,
{
    if let Err(e) = client.write_all(message).await {
        tracing::trace!(error = %e, "Failed to write diagnostic");
        return;
    }
    let _ = client.shutdown().await;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    ToUpstream,
    ToClient,
}

/// Copy bytes in both directions until one direction finishes, then close both.
///
/// Each direction runs as its own task and reports on a channel with room for
/// both results, so neither copier blocks on delivery. When the client
/// finishes sending first, the upstream write half is shut down and the
/// upstream gets [`UPSTREAM_DRAIN_TIMEOUT`] to deliver the rest of its reply.
async fn splice<C>(client: C, upstream: TcpStream) -> io::Result<()>
where
    C: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = upstream.into_split();
    let (done_tx, mut done_rx) = mpsc::channel::<(Direction, io::Result<u64>)>(2);

    let to_upstream = {
        let done = done_tx.clone();
        tokio::spawn(async move {
            let result = tokio::io::copy(&mut client_read, &mut upstream_write).await;
            if result.is_ok() {
                if let Err(e) = upstream_write.shutdown().await {
                    tracing::trace!(error = %e, "Failed to half-close upstream");
                }
            }
            let _ = done.send((Direction::ToUpstream, result)).await;
        })
    };
    let to_client = tokio::spawn(async move {
        let result = tokio::io::copy(&mut upstream_read, &mut client_write).await;
        let _ = done_tx.send((Direction::ToClient, result)).await;
    });

    let (direction, first) = done_rx
        .recv()
        .await
        .unwrap_or((Direction::ToClient, Ok(0)));

    if direction == Direction::ToUpstream && first.is_ok() {
        if timeout(UPSTREAM_DRAIN_TIMEOUT, done_rx.recv()).await.is_err() {
            tracing::trace!("Upstream still open after client finished");
        }
    }

    // Dropping the halves held by the copy tasks closes both sockets.
    to_upstream.abort();
    to_client.abort();
    let _ = to_upstream.await;
    let _ = to_client.await;
    while done_rx.try_recv().is_ok() {}

    match first {
        Ok(_) => Ok(()),
        Err(e) if is_disconnect(&e) => Ok(()),
        Err(e) => Err(e),
    }
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionAborted
    )
}

/// Log and count the outcome of one relay.
pub fn log_outcome(result: &Result<Relayed, RelayError>) {
    match result {
        Ok(done) => {
            crate::observability::metrics::record_relay("completed");
            tracing::debug!(
                server_name = %done.server_name,
                upstream = %done.upstream,
                elapsed_ms = done.elapsed.as_millis() as u64,
                "Relay finished"
            );
        }
        Err(e) => {
            crate::observability::metrics::record_relay(e.outcome());
            match e.class() {
                ErrorClass::Draining | ErrorClass::Protocol => {
                    tracing::debug!(error = %e, "Connection rejected")
                }
                ErrorClass::Routing => tracing::warn!(error = %e, "Connection not routed"),
                ErrorClass::Transport => match e {
                    RelayError::Dial { .. } | RelayError::DialTimeout(_) => {
                        tracing::error!(error = %e, "Upstream unreachable")
                    }
                    _ => tracing::debug!(error = %e, "Relay failed"),
                },
            }
        }
    }
}
