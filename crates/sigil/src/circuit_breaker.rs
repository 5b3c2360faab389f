//! Circuit breaker for certificate generation commands
//!
//! The breaker opens after `failure_threshold` failures within `window`, rejects commands while
//! open, lets trial commands through once `open_timeout` has passed and
//! closes again after `half_open_successes` trial successes.

use parking_lot::Mutex;
use sigil_core::BreakerConfig;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Commands are allowed
    Closed,
    /// Commands are rejected
    Open,
    /// Trial commands are allowed
    HalfOpen,
}

struct BreakerInternalState {
    state: BreakerState,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    half_open_successes: usize,
}

impl BreakerInternalState {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            failures: VecDeque::new(),
            opened_at: None,
            half_open_successes: 0,
        }
    }

    fn clean_old_failures(&mut self, config: &BreakerConfig, now: Instant) {
        let window = config.window();
        while let Some(&failure_time) = self.failures.front() {
            if now.duration_since(failure_time) > window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = BreakerState::Open;
        self.opened_at = Some(now);
        self.half_open_successes = 0;
    }
}

/// Circuit breaker counters
#[derive(Debug, Default)]
pub struct BreakerMetrics {
    pub successes: AtomicU64,
    pub failures: AtomicU64,
    /// Commands not issued because the circuit was open
    pub rejections: AtomicU64,
    pub opens: AtomicU64,
}

impl BreakerMetrics {
    pub fn snapshot(&self) -> BreakerMetricsSnapshot {
        BreakerMetricsSnapshot {
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            opens: self.opens.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerMetricsSnapshot {
    pub successes: u64,
    pub failures: u64,
    pub rejections: u64,
    pub opens: u64,
}

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    state: Mutex<BreakerInternalState>,
    metrics: BreakerMetrics,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerInternalState::new()),
            metrics: BreakerMetrics::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BreakerState {
        self.state.lock().state
    }

    pub fn metrics(&self) -> &BreakerMetrics {
        &self.metrics
    }

    /// Whether a command may be issued now
    ///
    /// An open circuit whose timeout has passed moves to half-open and allows
    /// the call.
    pub fn allow(&self) -> bool {
        let mut state = self.state.lock();
        match state.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = state
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.open_timeout())
                    .unwrap_or(true);
                if elapsed {
                    tracing::info!("Circuit breaker '{}': transitioning to half-open", self.name);
                    state.state = BreakerState::HalfOpen;
                    state.half_open_successes = 0;
                    true
                } else {
                    self.metrics.rejections.fetch_add(1, Ordering::Relaxed);
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        self.metrics.successes.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        if state.state != BreakerState::HalfOpen {
            return;
        }
        state.half_open_successes += 1;
        if state.half_open_successes >= self.config.half_open_successes {
            tracing::info!(
                "Circuit breaker '{}': closing circuit after {} successful trials",
                self.name,
                state.half_open_successes
            );
            state.state = BreakerState::Closed;
            state.failures.clear();
            state.opened_at = None;
        }
    }

    pub fn record_failure(&self) {
        self.metrics.failures.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let mut state = self.state.lock();
        match state.state {
            BreakerState::HalfOpen => {
                tracing::warn!(
                    "Circuit breaker '{}': reopening circuit after failed trial",
                    self.name
                );
                state.open(now);
                self.metrics.opens.fetch_add(1, Ordering::Relaxed);
            }
            BreakerState::Closed => {
                state.failures.push_back(now);
                state.clean_old_failures(&self.config, now);
                if state.failures.len() >= self.config.failure_threshold {
                    tracing::warn!(
                        "Circuit breaker '{}': opening circuit ({} failures in {:?})",
                        self.name,
                        state.failures.len(),
                        self.config.window()
                    );
                    state.open(now);
                    self.metrics.opens.fetch_add(1, Ordering::Relaxed);
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Force the circuit closed
    pub fn reset(&self) {
        let mut state = self.state.lock();
        tracing::info!("Circuit breaker '{}': manually reset", self.name);
        *state = BreakerInternalState::new();
    }
}
