//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use edge_relay::config::ListenerConfig;
use edge_relay::lifecycle::Shutdown;
use edge_relay::net::{Listener, RelayConfig, SniRelay};
use edge_relay::RouteTable;

/// Start a TCP backend that echoes every byte back. Returns its address.
pub async fn start_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut rd, mut wr) = socket.split();
                let _ = tokio::io::copy(&mut rd, &mut wr).await;
            });
        }
    });
    addr
}

/// Start a backend that tags its replies, to tell backends apart.
pub async fn start_tagged_backend(tag: &'static [u8]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 2048];
                if socket.read(&mut buf).await.unwrap_or(0) > 0 {
                    let _ = socket.write_all(tag).await;
                }
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Start an HTTP backend whose status and body come from `f`.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                // Read the request head; bodies are not used by these tests.
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;

                let (status, body) = f().await;
                let status_text = match status {
                    200 => "200 OK",
                    404 => "404 Not Found",
                    500 => "500 Internal Server Error",
                    503 => "503 Service Unavailable",
                    _ => "200 OK",
                };
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_text,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
                tokio::time::sleep(Duration::from_millis(10)).await;
            });
        }
    });
    addr
}

/// Build a TLS 1.2-style ClientHello record, with an SNI extension if `server_name` is set.
pub fn client_hello(server_name: Option<&str>) -> Vec<u8> {
    let mut extensions = Vec::new();
    // supported_groups, so the hello has extensions even without SNI
    extensions.extend_from_slice(&[0x00, 0x0a, 0x00, 0x04, 0x00, 0x02, 0x00, 0x1d]);
    if let Some(name) = server_name {
        let mut list = vec![0x00];
        list.extend_from_slice(&(name.len() as u16).to_be_bytes());
        list.extend_from_slice(name.as_bytes());
        let mut data = (list.len() as u16).to_be_bytes().to_vec();
        data.extend(list);
        extensions.extend_from_slice(&[0x00, 0x00]);
        extensions.extend_from_slice(&(data.len() as u16).to_be_bytes());
        extensions.extend(data);
    }

    let mut body = vec![0x03, 0x03];
    body.extend_from_slice(&[0x5a; 32]);
    body.push(0x00);
    body.extend_from_slice(&[0x00, 0x04, 0xc0, 0x2f, 0x13, 0x01]);
    body.extend_from_slice(&[0x01, 0x00]);
    body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
    body.extend(extensions);

    let mut handshake = vec![0x01];
    handshake.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
    handshake.extend(body);

    let mut record = vec![0x16, 0x03, 0x01];
    record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
    record.extend(handshake);
    record
}

/// A relay listening on an ephemeral port.
pub struct RunningRelay {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub task: tokio::task::JoinHandle<()>,
}

/// Bind a listener on 127.0.0.1 and serve `routes` until shutdown.
pub async fn start_relay(routes: Arc<RouteTable>, grace: Duration) -> RunningRelay {
    let listener = Listener::bind(&ListenerConfig {
        bind_address: "127.0.0.1:0".to_string(),
        max_connections: 64,
    })
    .await
    .unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let relay = Arc::new(SniRelay::new(
        routes,
        shutdown.clone(),
        RelayConfig {
            dial_timeout: Duration::from_secs(1),
            peek_timeout: Duration::from_secs(1),
        },
    ));
    let task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { listener.serve(relay, shutdown, grace).await })
    };

    RunningRelay {
        addr,
        shutdown,
        task,
    }
}
