//! Metrics registry port and Prometheus exposition.
//!
//! # Responsibilities
//! - Define the registry interface consumed by the route table and forwarders
//! - Provide the no-op registry used when no backend is configured
//! - Install the Prometheus exporter behind the `metrics` facade
//! - Record relay outcome counters
//!
//! # Metrics
//! - `relay_connections_total` (counter): finished relays by outcome
//! - `relay_active_connections` (gauge): relays currently in flight
//! - `route_timer_seconds` (histogram): mirror of every registry timer update,
//!   dropped from the exposition once idle for [`ROUTE_SERIES_IDLE_TIMEOUT`]
//!
//! # Design Decisions
//! - Timers are created lazily by `timer()`; the port has no register call
//! - Registries are injected as `Arc<dyn MetricsRegistry>`, never global

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use metrics_util::MetricKindMask;

/// Histogram series not updated for this long are removed from the exporter,
/// so series of deleted routes do not linger.
pub const ROUTE_SERIES_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// A metric counting events and timing their durations.
pub trait Timer: Send + Sync + std::fmt::Debug {
    /// Count an event whose duration is the time elapsed since `start`.
    fn update_since(&self, start: Instant);

    /// One-minute moving average rate, in events per second.
    fn rate1(&self) -> f64;

    /// The `nth` percentile (0.0..=1.0) of recorded durations, in nanoseconds.
    /// Out-of-range values are clamped and NaN is treated as 0.0.
    fn percentile(&self, nth: f64) -> f64;
}

/// The registry of named metrics.
///
/// Implementations must be safe to call from many tasks at once, including
/// concurrent `timer()` calls for the same name.
pub trait MetricsRegistry: Send + Sync + std::fmt::Debug {
    /// Return the timer registered under `name`, creating it if needed.
    fn timer(&self, name: &str) -> Arc<dyn Timer>;

    /// Remove a metric and stop reporting it.
    fn unregister(&self, name: &str);

    /// Remove every metric.
    fn unregister_all(&self);

    /// Names of all registered metrics, sorted lexicographically.
    fn names(&self) -> Vec<String>;
}

/// Registry that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRegistry;

/// Timer that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTimer;

impl Timer for NoopTimer {
    fn update_since(&self, _start: Instant) {}

    fn rate1(&self) -> f64 {
        0.0
    }

    fn percentile(&self, _nth: f64) -> f64 {
        0.0
    }
}

impl MetricsRegistry for NoopRegistry {
    fn timer(&self, _name: &str) -> Arc<dyn Timer> {
        Arc::new(NoopTimer)
    }

    fn unregister(&self, _name: &str) {}

    fn unregister_all(&self) {}

    fn names(&self) -> Vec<String> {
        Vec::new()
    }
}

/// The default registry when no metrics backend is configured.
pub fn noop() -> Arc<dyn MetricsRegistry> {
    Arc::new(NoopRegistry)
}

/// Install the Prometheus exporter and serve `/metrics` on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    prometheus_builder(ROUTE_SERIES_IDLE_TIMEOUT)
        .with_http_listener(addr)
        .install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

fn prometheus_builder(idle_timeout: Duration) -> PrometheusBuilder {
    PrometheusBuilder::new().idle_timeout(MetricKindMask::HISTOGRAM, Some(idle_timeout))
}

/// Count a finished relay by its outcome label.
pub fn record_relay(outcome: &'static str) {
    metrics::counter!("relay_connections_total", "outcome" => outcome).increment(1);
}

/// Publish the number of relays currently in flight.
pub fn record_active_connections(count: u64) {
    metrics::gauge!("relay_active_connections").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_registry_is_empty() {
        let registry = noop();
        registry.timer("a.b.c").update_since(Instant::now());
        assert!(registry.names().is_empty());
        assert_eq!(registry.timer("a.b.c").rate1(), 0.0);
        assert_eq!(registry.timer("a.b.c").percentile(0.99), 0.0);
    }

    #[test]
    fn idle_route_series_leave_the_exposition() {
        let recorder = prometheus_builder(Duration::from_millis(100)).build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            metrics::histogram!("route_timer_seconds", "name" => "svc.a_com./.10_0_0_1_80")
                .record(0.25);
            metrics::counter!("relay_connections_total", "outcome" => "completed").increment(1);
        });
        assert!(handle.render().contains("svc.a_com./.10_0_0_1_80"));

        std::thread::sleep(Duration::from_millis(250));
        let rendered = handle.render();
        assert!(!rendered.contains("svc.a_com./.10_0_0_1_80"));
        assert!(rendered.contains("relay_connections_total"));
    }
}
