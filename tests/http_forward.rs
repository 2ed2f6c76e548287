//! HTTP front: route lookup, forwarding and per-status timers.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpListener;

use edge_relay::lifecycle::Shutdown;
use edge_relay::observability::{AccessLog, LocalRegistry, MetricsRegistry, Timer};
use edge_relay::routing::RouteDef;
use edge_relay::{HttpServer, RouteTable};

mod common;

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

async fn start_front(routes: Arc<RouteTable>, access_log: Option<Arc<AccessLog>>) -> (String, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = HttpServer::new(routes, access_log, Duration::from_secs(5));
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { server.run(listener, shutdown).await });
    }
    (format!("http://{addr}"), shutdown)
}

#[tokio::test]
async fn forwards_and_times_by_status() {
    let backend = common::start_programmable_backend(|| async { (503, "busy".to_string()) }).await;
    let registry = Arc::new(LocalRegistry::new());
    let routes = Arc::new(RouteTable::new(registry.clone()));
    routes
        .add_route(&RouteDef::new("api", "", "/api", format!("http://{backend}")))
        .unwrap();
    let (base, shutdown) = start_front(routes, None).await;

    let client = reqwest::Client::new();
    let resp = client.get(format!("{base}/api/items?id=1")).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 503);
    assert_eq!(resp.text().await.unwrap(), "busy");

    let names = registry.names();
    assert!(names.contains(&"http.status.503".to_string()), "{names:?}");
    assert!(registry.timer("http.status.503").rate1() >= 0.0);

    shutdown.trigger();
}

#[tokio::test]
async fn unmatched_request_is_404() {
    let backend = common::start_programmable_backend(|| async { (200, "ok".to_string()) }).await;
    let registry = Arc::new(LocalRegistry::new());
    let routes = Arc::new(RouteTable::new(registry.clone()));
    routes
        .add_route(&RouteDef::new("api", "", "/api", format!("http://{backend}")))
        .unwrap();
    let (base, shutdown) = start_front(routes, None).await;

    let resp = reqwest::get(format!("{base}/other")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 404);
    assert!(!registry.names().iter().any(|n| n.starts_with("http.status.")));

    shutdown.trigger();
}

#[tokio::test]
async fn unreachable_target_is_502() {
    let dead = {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap()
    };
    let registry = Arc::new(LocalRegistry::new());
    let routes = Arc::new(RouteTable::new(registry.clone()));
    routes
        .add_route(&RouteDef::new("gone", "", "/", dead.to_string()))
        .unwrap();
    let (base, shutdown) = start_front(routes, None).await;

    let resp = reqwest::get(format!("{base}/")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 502);
    // No upstream response, so no status timer.
    assert!(!registry.names().iter().any(|n| n.starts_with("http.status.")));

    shutdown.trigger();
}

#[tokio::test]
async fn writes_access_log_line() {
    let backend = common::start_programmable_backend(|| async { (200, "ok".to_string()) }).await;
    let routes = Arc::new(RouteTable::new(edge_relay::observability::metrics::noop()));
    routes
        .add_route(&RouteDef::new("web", "", "/", backend.to_string()))
        .unwrap();

    let buf = SharedBuf::default();
    let log = Arc::new(
        AccessLog::new(buf.clone(), "remote_addr request proxy_endpoint request_args").unwrap(),
    );
    let (base, shutdown) = start_front(routes, Some(log)).await;

    let resp = reqwest::get(format!("{base}/page?q=rust")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    let written = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
    assert_eq!(
        written,
        format!("127.0.0.1 \"GET /page?q=rust HTTP/1.1\" {backend} q=rust\n")
    );

    shutdown.trigger();
}
