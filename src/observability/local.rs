//! In-process metrics registry.
//!
//! Keeps a sliding window of recent durations and a one-minute EWMA rate per
//! timer, and mirrors every update into the `metrics` facade so the
//! Prometheus exporter sees it too.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::observability::metrics::{MetricsRegistry, Timer};

/// Number of recent durations kept per timer.
const SAMPLE_SIZE: usize = 1028;

/// EWMA tick interval.
const TICK: Duration = Duration::from_secs(5);

/// Registry backed by a concurrent map of timers.
#[derive(Debug, Default)]
pub struct LocalRegistry {
    timers: DashMap<String, Arc<LocalTimer>>,
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetricsRegistry for LocalRegistry {
    fn timer(&self, name: &str) -> Arc<dyn Timer> {
        if let Some(timer) = self.timers.get(name) {
            return Arc::clone(timer.value()) as Arc<dyn Timer>;
        }
        let timer = self
            .timers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(LocalTimer::new(name)));
        Arc::clone(timer.value()) as Arc<dyn Timer>
    }

    fn unregister(&self, name: &str) {
        if self.timers.remove(name).is_some() {
            tracing::debug!(metric = %name, "Metric unregistered");
        }
    }

    fn unregister_all(&self) {
        self.timers.clear();
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.timers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

/// A timer with a bounded sample window and a one-minute moving rate.
#[derive(Debug)]
pub struct LocalTimer {
    name: String,
    state: Mutex<TimerState>,
}

impl LocalTimer {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(TimerState::new(Instant::now())),
        }
    }

    /// Record one event of the given duration.
    pub fn update(&self, elapsed: Duration) {
        self.lock().record(Instant::now(), elapsed);
        metrics::histogram!("route_timer_seconds", "name" => self.name.clone())
            .record(elapsed.as_secs_f64());
    }

    /// Number of events recorded since creation.
    pub fn count(&self) -> u64 {
        self.lock().count
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Timer for LocalTimer {
    fn update_since(&self, start: Instant) {
        self.update(start.elapsed());
    }

    fn rate1(&self) -> f64 {
        let mut state = self.lock();
        state.tick_to(Instant::now());
        state.rate.unwrap_or(0.0)
    }

    fn percentile(&self, nth: f64) -> f64 {
        self.lock().percentile(nth)
    }
}

#[derive(Debug)]
struct TimerState {
    /// Recent durations in nanoseconds, oldest first.
    samples: VecDeque<u64>,
    count: u64,
    /// Events not yet folded into `rate`.
    uncounted: u64,
    rate: Option<f64>,
    last_tick: Instant,
}

impl TimerState {
    fn new(now: Instant) -> Self {
        Self {
            samples: VecDeque::with_capacity(SAMPLE_SIZE),
            count: 0,
            uncounted: 0,
            rate: None,
            last_tick: now,
        }
    }

    fn record(&mut self, now: Instant, elapsed: Duration) {
        self.tick_to(now);
        if self.samples.len() == SAMPLE_SIZE {
            self.samples.pop_front();
        }
        self.samples
            .push_back(u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX));
        self.count += 1;
        self.uncounted += 1;
    }

    /// Fold every whole tick between `last_tick` and `now` into the rate.
    fn tick_to(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_tick);
        let ticks = (elapsed.as_nanos() / TICK.as_nanos()) as u32;
        if ticks == 0 {
            return;
        }

        let alpha = 1.0 - (-TICK.as_secs_f64() / 60.0).exp();
        let instant_rate = self.uncounted as f64 / TICK.as_secs_f64();
        let mut rate = match self.rate {
            Some(rate) => rate + alpha * (instant_rate - rate),
            None => instant_rate,
        };
        // Idle ticks decay toward zero.
        rate *= (1.0 - alpha).powi(ticks as i32 - 1);

        self.rate = Some(rate);
        self.uncounted = 0;
        self.last_tick += TICK * ticks;
    }

    fn percentile(&self, nth: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let nth = if nth.is_nan() { 0.0 } else { nth.clamp(0.0, 1.0) };
        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();

        let len = sorted.len();
        let pos = nth * (len as f64 + 1.0);
        if pos < 1.0 {
            sorted[0] as f64
        } else if pos >= len as f64 {
            sorted[len - 1] as f64
        } else {
            let lower = sorted[pos as usize - 1] as f64;
            let upper = sorted[pos as usize] as f64;
            lower + (pos - pos.floor()) * (upper - lower)
        }
    }
}
