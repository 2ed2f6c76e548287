//! Metered forwarding.
//!
//! [`MeteredLayer`] wraps any request/response service and records the time
//! each call took into a timer named after the response status
//! (`http.status.<code>`). Calls that fail without producing a response
//! record nothing; the caller reports those.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::http::{Request, Response};
use futures_util::future::BoxFuture;
use tower::{Layer, Service};

use crate::observability::MetricsRegistry;
use crate::routing::name::status_name;

/// Layer producing [`Metered`] services.
#[derive(Debug, Clone)]
pub struct MeteredLayer {
    registry: Arc<dyn MetricsRegistry>,
}

impl MeteredLayer {
    pub fn new(registry: Arc<dyn MetricsRegistry>) -> Self {
        Self { registry }
    }
}

impl<S> Layer<S> for MeteredLayer {
    type Service = Metered<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Metered {
            inner,
            registry: Arc::clone(&self.registry),
        }
    }
}

/// A forwarder that times every response by status code.
#[derive(Debug, Clone)]
pub struct Metered<S> {
    inner: S,
    registry: Arc<dyn MetricsRegistry>,
}

impl<S> Metered<S> {
    pub fn new(inner: S, registry: Arc<dyn MetricsRegistry>) -> Self {
        Self { inner, registry }
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for Metered<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let started = Instant::now();
        let registry = Arc::clone(&self.registry);
        let response = self.inner.call(req);

        Box::pin(async move {
            let result = response.await;
            if let Ok(response) = &result {
                registry
                    .timer(&status_name(response.status().as_u16()))
                    .update_since(started);
            }
            result
        })
    }
}
