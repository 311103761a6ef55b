//! Per-provider circuit breaker.
//!
//! - Closed: calls pass through; outcomes land in a rolling window. Once the
//!   window holds `volume_threshold` calls and the failure share reaches
//!   `error_threshold_percentage`, the breaker opens.
//! - Open: calls are rejected with `CircuitOpen` without touching the provider.
//!   After `reset_timeout` the breaker becomes half-open.
//! - HalfOpen: exactly one probe call goes through. Success closes the
//!   breaker, failure opens it again.
//!
//! A call exceeding `timeout` is a failure and is also counted as a timeout.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::config::BreakerConfig;
use crate::error::{GatewayError, Result};
use crate::metrics::{MetricsSink, NoopMetrics};

const LATENCY_SAMPLE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BreakerState {
    Closed,
    HalfOpen,
    Open,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::HalfOpen => "half-open",
            Self::Open => "open",
        }
    }

    /// Gauge value: 0 closed, 1 half-open, 2 open
    pub fn level(&self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cumulative counters since the breaker was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakerStats {
    pub fires: u64,
    pub successes: u64,
    pub failures: u64,
    pub rejects: u64,
    pub timeouts: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: BreakerState,
    pub enabled: bool,
    pub stats: BreakerStats,
    pub latency_mean_ms: f64,
    pub latency_p99_ms: u64,
}

struct BreakerInner {
    state: BreakerState,
    /// (finished at, succeeded) for calls inside the rolling window
    window: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    probe_started: Option<Instant>,
    stats: BreakerStats,
    latencies: VecDeque<u64>,
}

enum Admission {
    Pass,
    Probe,
    Reject,
}

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    metrics: Arc<dyn MetricsSink>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self::with_metrics(name, config, Arc::new(NoopMetrics))
    }

    pub fn with_metrics(name: impl Into<String>, config: BreakerConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                window: VecDeque::new(),
                opened_at: None,
                probe_started: None,
                stats: BreakerStats::default(),
                latencies: VecDeque::with_capacity(LATENCY_SAMPLE),
            }),
            metrics,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Run `operation` under the breaker
    pub async fn call<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.config.enabled {
            return operation().await;
        }

        let probe = match self.admit() {
            Admission::Reject => return Err(GatewayError::CircuitOpen(self.name.clone())),
            Admission::Pass => false,
            Admission::Probe => true,
        };

        let started = Instant::now();
        let outcome = tokio::time::timeout(self.config.timeout(), operation()).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(Ok(value)) => {
                self.record_success(elapsed, probe);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.record_failure(elapsed, probe, false);
                Err(e)
            }
            Err(_) => {
                self.record_failure(elapsed, probe, true);
                Err(GatewayError::Translation(format!(
                    "{} timed out after {}ms",
                    self.name, self.config.timeout_ms
                )))
            }
        }
    }

    /// Current state, moving open to half-open once the reset timeout has passed
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, Instant::now());
        inner.state
    }

    /// Force the breaker closed and forget the rolling window
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.window.clear();
        inner.opened_at = None;
        inner.probe_started = None;
        self.transition(&mut inner, BreakerState::Closed);
        info!("Circuit breaker '{}' reset manually", self.name);
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, Instant::now());

        let (latency_mean_ms, latency_p99_ms) = latency_summary(&inner.latencies);
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state,
            enabled: self.config.enabled,
            stats: inner.stats,
            latency_mean_ms,
            latency_p99_ms,
        }
    }

    fn admit(&self) -> Admission {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.stats.fires += 1;
        self.refresh(&mut inner, now);

        match inner.state {
            BreakerState::Closed => Admission::Pass,
            BreakerState::Open => {
                inner.stats.rejects += 1;
                Admission::Reject
            }
            BreakerState::HalfOpen => {
                // A probe whose caller went away would otherwise block the breaker forever
                let probe_active = inner
                    .probe_started
                    .is_some_and(|started| now.duration_since(started) < self.config.timeout());
                if probe_active {
                    inner.stats.rejects += 1;
                    Admission::Reject
                } else {
                    inner.probe_started = Some(now);
                    Admission::Probe
                }
            }
        }
    }

    fn record_success(&self, elapsed: Duration, probe: bool) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.stats.successes += 1;
        push_latency(&mut inner.latencies, elapsed);

        if probe {
            inner.probe_started = None;
            inner.window.clear();
            inner.opened_at = None;
            self.transition(&mut inner, BreakerState::Closed);
        } else if inner.state == BreakerState::Closed {
            inner.window.push_back((now, true));
            self.prune(&mut inner.window, now);
        }
    }

    fn record_failure(&self, elapsed: Duration, probe: bool, timed_out: bool) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        inner.stats.failures += 1;
        if timed_out {
            inner.stats.timeouts += 1;
        }
        push_latency(&mut inner.latencies, elapsed);

        if probe {
            inner.probe_started = None;
            inner.opened_at = Some(now);
            warn!("Circuit breaker '{}' probe failed, reopening", self.name);
            self.transition(&mut inner, BreakerState::Open);
            return;
        }
        if inner.state != BreakerState::Closed {
            return;
        }

        inner.window.push_back((now, false));
        self.prune(&mut inner.window, now);

        let total = inner.window.len();
        let failed = inner.window.iter().filter(|(_, ok)| !ok).count();
        let percentage = failed as f64 * 100.0 / total as f64;
        if total >= self.config.volume_threshold as usize
            && percentage >= self.config.error_threshold_percentage
        {
            warn!(
                "Circuit breaker '{}' opening: {}/{} calls failed ({:.0}%)",
                self.name, failed, total, percentage
            );
            inner.window.clear();
            inner.opened_at = Some(now);
            self.transition(&mut inner, BreakerState::Open);
        }
    }

    fn refresh(&self, inner: &mut BreakerInner, now: Instant) {
        if inner.state == BreakerState::Open
            && inner
                .opened_at
                .is_none_or(|opened| now.duration_since(opened) >= self.config.reset_timeout())
        {
            inner.probe_started = None;
            self.transition(inner, BreakerState::HalfOpen);
        }
    }

    fn prune(&self, window: &mut VecDeque<(Instant, bool)>, now: Instant) {
        let span = self.config.rolling_window();
        while window
            .front()
            .is_some_and(|(at, _)| now.duration_since(*at) > span)
        {
            window.pop_front();
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: BreakerState) {
        if inner.state == to {
            return;
        }
        info!(provider = %self.name, from = %inner.state, to = %to, "Circuit breaker state change");
        inner.state = to;
        self.metrics.breaker_state(&self.name, to);
    }
}

fn push_latency(latencies: &mut VecDeque<u64>, elapsed: Duration) {
    if latencies.len() == LATENCY_SAMPLE {
        latencies.pop_front();
    }
    latencies.push_back(elapsed.as_millis() as u64);
}

fn latency_summary(latencies: &VecDeque<u64>) -> (f64, u64) {
    if latencies.is_empty() {
        return (0.0, 0);
    }
    let mean = latencies.iter().sum::<u64>() as f64 / latencies.len() as f64;
    let mut sorted: Vec<u64> = latencies.iter().copied().collect();
    sorted.sort_unstable();
    let rank = ((sorted.len() as f64) * 0.99).ceil() as usize;
    let p99 = sorted[rank.clamp(1, sorted.len()) - 1];
    (mean, p99)
}

/// Breakers keyed by provider name, owned by the orchestrator
pub struct BreakerRegistry {
    config: BreakerConfig,
    metrics: Arc<dyn MetricsSink>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            config,
            metrics,
            breakers: DashMap::new(),
        }
    }

    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::with_metrics(
                    name,
                    self.config.clone(),
                    self.metrics.clone(),
                ))
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| entry.value().clone())
    }

    /// Snapshots of every known breaker, sorted by name
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<BreakerSnapshot> =
            self.breakers.iter().map(|entry| entry.value().snapshot()).collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// `false` when no breaker exists under `name`
    pub fn reset(&self, name: &str) -> bool {
        match self.get(name) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }
}
