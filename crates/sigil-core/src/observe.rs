//! Optional metrics instrumentation for Sigil.
//!
//! When the `observe` feature is enabled, key operations emit counters,
//! histograms, and gauges via the [`metrics`] crate. A downstream
//! application must install a metrics recorder to collect the data.
//!
//! When the feature is **not** enabled every function in this module is a
//! zero-cost no-op.

/// Record a projector run (counter + duration + statements applied/skipped).
///
/// - `sigil.projector.runs_total` – counter with `projection` label
/// - `sigil.projector.run_duration_seconds` – histogram
/// - `sigil.projector.events_applied_total` – counter
/// - `sigil.projector.events_skipped_total` – counter (redeliveries)
#[inline]
pub fn record_projector_run(
    projection: &str,
    duration: std::time::Duration,
    applied: u64,
    skipped: u64,
) {
    #[cfg(feature = "observe")]
    {
        let projection = projection.to_string();
        metrics::counter!("sigil.projector.runs_total", "projection" => projection.clone())
            .increment(1);
        metrics::histogram!("sigil.projector.run_duration_seconds", "projection" => projection.clone())
            .record(duration.as_secs_f64());
        metrics::counter!("sigil.projector.events_applied_total", "projection" => projection.clone())
            .increment(applied);
        metrics::counter!("sigil.projector.events_skipped_total", "projection" => projection)
            .increment(skipped);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (projection, duration, applied, skipped);
    }
}

/// Set the projection lag gauge (positions behind the log).
///
/// - `sigil.projector.lag` – gauge with `projection` label
#[inline]
pub fn set_projection_lag(projection: &str, lag: u64) {
    #[cfg(feature = "observe")]
    {
        metrics::gauge!("sigil.projector.lag", "projection" => projection.to_string())
            .set(lag as f64);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (projection, lag);
    }
}

/// Record a distributed lock attempt.
///
/// - `sigil.lock.attempts_total` – counter with `result` label (`acquired` / `contended`)
#[inline]
pub fn record_lock_attempt(acquired: bool) {
    #[cfg(feature = "observe")]
    {
        let result = if acquired { "acquired" } else { "contended" };
        metrics::counter!("sigil.lock.attempts_total", "result" => result).increment(1);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = acquired;
    }
}

/// Record an in-process lane lock wait time.
///
/// - `sigil.lane.wait_duration_seconds` – histogram
#[inline]
pub fn record_lock_wait(duration: std::time::Duration) {
    #[cfg(feature = "observe")]
    {
        metrics::histogram!("sigil.lane.wait_duration_seconds").record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = duration;
    }
}

/// Record one provisioning pass.
///
/// - `sigil.provision.total` – counter with `usage` and `outcome` labels
#[inline]
pub fn record_provision(usage: &'static str, outcome: &'static str) {
    #[cfg(feature = "observe")]
    {
        metrics::counter!("sigil.provision.total", "usage" => usage, "outcome" => outcome)
            .increment(1);
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (usage, outcome);
    }
}

/// Record a generation command result.
///
/// - `sigil.generation.total` – counter with `usage` and `outcome` labels
/// - `sigil.generation.duration_seconds` – histogram
#[inline]
pub fn record_generation(usage: &'static str, duration: std::time::Duration, success: bool) {
    #[cfg(feature = "observe")]
    {
        let outcome = if success { "ok" } else { "fail" };
        metrics::counter!("sigil.generation.total", "usage" => usage, "outcome" => outcome)
            .increment(1);
        metrics::histogram!("sigil.generation.duration_seconds", "usage" => usage)
            .record(duration.as_secs_f64());
    }
    #[cfg(not(feature = "observe"))]
    {
        let _ = (usage, duration, success);
    }
}
