//! HTTP front for the route table.
//!
//! # Responsibilities
//! - Create the Axum router with the proxy handler and middleware
//! - Match each request by host and path prefix
//! - Forward to the chosen target through the metered client
//! - Write one access log line per forwarded request

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, request::Parts, HeaderMap, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use chrono::Utc;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::net::TcpListener;
use tower::ServiceExt;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::http::forward::Metered;
use crate::lifecycle::Shutdown;
use crate::observability::{AccessLog, AccessRecord};
use crate::routing::matcher::request_host;
use crate::routing::{RouteTable, Target};

type UpstreamClient = Client<HttpConnector, Body>;

fn into_axum(response: Response<hyper::body::Incoming>) -> Response {
    let (parts, body) = response.into_parts();
    Response::from_parts(parts, Body::new(body))
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<RouteTable>,
    pub client: Metered<UpstreamClient>,
    pub access_log: Option<Arc<AccessLog>>,
}

/// HTTP server for the reverse proxy.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    /// Create a server forwarding by `routes`, with timers in the table's registry.
    pub fn new(
        routes: Arc<RouteTable>,
        access_log: Option<Arc<AccessLog>>,
        request_timeout: Duration,
    ) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        let registry = Arc::clone(routes.registry());

        let state = AppState {
            routes,
            client: Metered::new(client, registry),
            access_log,
        };

        Self {
            router: Self::build_router(state, request_timeout),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(state: AppState, request_timeout: Duration) -> Router {
        Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state)
            .layer(TimeoutLayer::new(request_timeout))
            .layer(TraceLayer::new_for_http())
    }

    /// Serve on `listener` until shutdown is triggered.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Main proxy handler.
/// Looks up a route, rewrites the URI to the target and forwards the request.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let started = Instant::now();
    let host = request_host(&request).unwrap_or_default();
    let path = request.uri().path().to_string();

    let Some(target) = state.routes.lookup(&host, &path) else {
        tracing::warn!(host = %host, path = %path, "No route matched");
        return (StatusCode::NOT_FOUND, "No matching route found").into_response();
    };

    let (mut parts, body) = request.into_parts();
    let mut record = state
        .access_log
        .as_ref()
        .map(|_| access_record(&parts, remote, &host, &target.address));

    let uri = match upstream_uri(&parts.uri, &target) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::error!(upstream = %target.address, error = %e, "Cannot build upstream URI");
            return (StatusCode::BAD_GATEWAY, "Invalid upstream").into_response();
        }
    };
    tracing::debug!(method = %parts.method, upstream = %uri, service = %target.service, "Proxying request");
    parts.uri = uri;
    append_forwarded_for(&mut parts.headers, remote);

    let response = match state.client.oneshot(Request::from_parts(parts, body)).await {
        Ok(response) => into_axum(response),
        Err(e) => {
            tracing::error!(upstream = %target.address, error = %e, "Upstream error");
            (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
        }
    };

    if let (Some(log), Some(record)) = (&state.access_log, record.as_mut()) {
        record.finished_at = Utc::now();
        record.elapsed = started.elapsed();
        if let Err(e) = log.log(record) {
            tracing::warn!(error = %e, "Failed to write access log");
        }
    }

    response
}

/// Point the request at `target`.
///
/// A target URL's path is a base that the request path is appended to, and
/// its query is joined with the request's.
fn upstream_uri(original: &Uri, target: &Target) -> Result<Uri, axum::http::Error> {
    let (base_path, base_query) = target
        .url
        .as_ref()
        .map(|url| (url.path(), url.query().unwrap_or_default()))
        .unwrap_or(("/", ""));

    let path = join_paths(base_path, original.path());
    let query = match (base_query, original.query().unwrap_or_default()) {
        ("", q) | (q, "") => q.to_string(),
        (base, q) => format!("{base}&{q}"),
    };
    let path_and_query = if query.is_empty() {
        path
    } else {
        format!("{path}?{query}")
    };

    Uri::builder()
        .scheme(target.scheme())
        .authority(target.address.as_str())
        .path_and_query(path_and_query)
        .build()
}

/// Join two paths with exactly one slash between them.
fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{base}{}", &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, remote: SocketAddr) {
    let ip = remote.ip().to_string();
    let value = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.is_empty() => format!("{existing}, {ip}"),
        _ => ip,
    };
    if let Ok(value) = value.parse() {
        headers.insert("x-forwarded-for", value);
    }
}

fn header_str(headers: &HeaderMap, name: impl header::AsHeaderName) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Capture what the access log needs before the request is consumed.
fn access_record(parts: &Parts, remote: SocketAddr, host: &str, upstream: &str) -> AccessRecord {
    AccessRecord {
        remote_addr: remote,
        method: parts.method.to_string(),
        request_uri: parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string()),
        proto: format!("{:?}", parts.version),
        content_length: header_str(&parts.headers, header::CONTENT_LENGTH)
            .parse()
            .unwrap_or(0),
        referer: header_str(&parts.headers, header::REFERER),
        user_agent: header_str(&parts.headers, header::USER_AGENT),
        forwarded_for: header_str(&parts.headers, "x-forwarded-for"),
        host: host.to_string(),
        upstream: upstream.to_string(),
        query: parts.uri.query().unwrap_or_default().to_string(),
        finished_at: Utc::now(),
        elapsed: Duration::ZERO,
    }
}
