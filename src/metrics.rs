//! Process-wide orchestration counters
//!
//! Lock-free atomic counters, same shape as the unauthorized-access
//! counter pattern: plain `AtomicU64`s behind a struct, `Relaxed`
//! ordering since these are monitoring counters, not synchronization
//! primitives. Durations are tracked as sum+count pairs rather than a
//! running average, so `snapshot()` can derive the average without ever
//! losing precision to repeated division.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct Metrics {
    containers_created: AtomicU64,
    containers_started: AtomicU64,
    containers_stopped: AtomicU64,
    containers_failed: AtomicU64,
    tasks_executed: AtomicU64,
    tasks_succeeded: AtomicU64,
    tasks_failed: AtomicU64,
    errors_total: AtomicU64,
    errors_recovered: AtomicU64,
    retries_total: AtomicU64,
    execution_ms_total: AtomicU64,
    execution_samples: AtomicU64,
    container_start_ms_total: AtomicU64,
    container_start_samples: AtomicU64,
}

macro_rules! counter_accessors {
    ($($field:ident => $inc:ident, $get:ident;)+) => {
        $(
            pub fn $inc(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }

            #[must_use]
            pub fn $get(&self) -> u64 {
                self.$field.load(Ordering::Relaxed)
            }
        )+
    };
}

/// A point-in-time view of the counters, with durations reduced to
/// averages. Never stored; constructed fresh on each `Metrics::snapshot`
/// call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub containers_created: u64,
    pub containers_started: u64,
    pub containers_stopped: u64,
    pub containers_failed: u64,
    pub tasks_executed: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub errors_total: u64,
    pub errors_recovered: u64,
    pub retries_total: u64,
    pub avg_execution_ms: f64,
    pub avg_container_start_ms: f64,
}

fn average(total: u64, samples: u64) -> f64 {
    if samples == 0 {
        0.0
    } else {
        total as f64 / samples as f64
    }
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    counter_accessors! {
        containers_created => record_container_created, containers_created;
        containers_started => record_container_started, containers_started;
        containers_stopped => record_container_stopped, containers_stopped;
        containers_failed => record_container_failed, containers_failed;
        tasks_executed => record_task_executed, tasks_executed;
        tasks_succeeded => record_task_succeeded, tasks_succeeded;
        tasks_failed => record_task_failed, tasks_failed;
        errors_total => record_error, errors_total;
        errors_recovered => record_error_recovered, errors_recovered;
        retries_total => record_retry, retries_total;
    }

    pub fn record_execution_ms(&self, elapsed: Duration) {
        self.execution_ms_total
            .fetch_add(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX), Ordering::Relaxed);
        self.execution_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_container_start_ms(&self, elapsed: Duration) {
        self.container_start_ms_total
            .fetch_add(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX), Ordering::Relaxed);
        self.container_start_samples.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            containers_created: self.containers_created(),
            containers_started: self.containers_started(),
            containers_stopped: self.containers_stopped(),
            containers_failed: self.containers_failed(),
            tasks_executed: self.tasks_executed(),
            tasks_succeeded: self.tasks_succeeded(),
            tasks_failed: self.tasks_failed(),
            errors_total: self.errors_total(),
            errors_recovered: self.errors_recovered(),
            retries_total: self.retries_total(),
            avg_execution_ms: average(
                self.execution_ms_total.load(Ordering::Relaxed),
                self.execution_samples.load(Ordering::Relaxed),
            ),
            avg_container_start_ms: average(
                self.container_start_ms_total.load(Ordering::Relaxed),
                self.container_start_samples.load(Ordering::Relaxed),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        let metrics = Metrics::new();
        assert_eq!(metrics.containers_created(), 0);
        assert_eq!(metrics.retries_total(), 0);
    }

    #[test]
    fn counters_only_increase() {
        let metrics = Metrics::new();
        metrics.record_container_created();
        metrics.record_container_created();
        metrics.record_retry();
        assert_eq!(metrics.containers_created(), 2);
        assert_eq!(metrics.retries_total(), 1);
    }

    #[test]
    fn snapshot_averages_are_zero_with_no_samples() {
        let metrics = Metrics::new();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.avg_execution_ms, 0.0);
        assert_eq!(snapshot.avg_container_start_ms, 0.0);
    }

    #[test]
    fn snapshot_derives_average_from_sum_and_count() {
        let metrics = Metrics::new();
        metrics.record_execution_ms(Duration::from_millis(100));
        metrics.record_execution_ms(Duration::from_millis(300));
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.avg_execution_ms, 200.0);
    }
}
