//! In-process counters for resilience components.
//!
//! The breaker and the secret cache keep their own counters; services can
//! render them in Prometheus text format from their metrics endpoint.

use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug)]
pub struct Counter {
    name: String,
    help: String,
    value: AtomicU64,
}

impl Counter {
    /// Create a new counter.
    #[must_use]
    pub fn new(name: impl Into<String>, help: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            value: AtomicU64::new(0),
        }
    }

    /// Increment the counter by 1.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current value.
    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Get the metric name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Format as Prometheus text.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP {} {}\n# TYPE {} counter\n{} {}\n",
            self.name,
            self.help,
            self.name,
            self.name,
            self.get()
        )
    }
}

/// Replaces characters Prometheus does not accept in metric names.
fn sanitize(prefix: &str) -> String {
    prefix
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Outcome counters for one circuit breaker.
#[derive(Debug)]
pub struct BreakerMetrics {
    /// Requests recorded as successful
    pub successes: Counter,
    /// Requests recorded as failed
    pub failures: Counter,
    /// Requests rejected without being attempted
    pub rejections: Counter,
    /// Transitions into the open state
    pub trips: Counter,
}

impl BreakerMetrics {
    /// Create breaker metrics for the named breaker.
    #[must_use]
    pub fn new(name: &str) -> Self {
        let prefix = sanitize(name);
        Self {
            successes: Counter::new(
                format!("{prefix}_breaker_successes_total"),
                "Requests counted as successes by the circuit breaker",
            ),
            failures: Counter::new(
                format!("{prefix}_breaker_failures_total"),
                "Requests counted as failures by the circuit breaker",
            ),
            rejections: Counter::new(
                format!("{prefix}_breaker_rejections_total"),
                "Requests rejected by an open or saturated circuit",
            ),
            trips: Counter::new(
                format!("{prefix}_breaker_trips_total"),
                "Number of times the circuit opened",
            ),
        }
    }

    /// Format all metrics as Prometheus text.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        format!(
            "{}{}{}{}",
            self.successes.to_prometheus(),
            self.failures.to_prometheus(),
            self.rejections.to_prometheus(),
            self.trips.to_prometheus()
        )
    }
}

/// Cache metrics.
#[derive(Debug)]
pub struct CacheMetrics {
    /// Lookups served from memory
    pub hits: Counter,
    /// Lookups that went to the remote store
    pub misses: Counter,
    /// Remote fetches that failed
    pub refresh_failures: Counter,
}

impl CacheMetrics {
    /// Create new cache metrics with the given prefix.
    #[must_use]
    pub fn new(prefix: &str) -> Self {
        let prefix = sanitize(prefix);
        Self {
            hits: Counter::new(
                format!("{prefix}_cache_hits_total"),
                "Total number of cache hits",
            ),
            misses: Counter::new(
                format!("{prefix}_cache_misses_total"),
                "Total number of cache misses",
            ),
            refresh_failures: Counter::new(
                format!("{prefix}_cache_refresh_failures_total"),
                "Total number of failed remote fetches",
            ),
        }
    }

    /// Record a cache hit.
    pub fn record_hit(&self) {
        self.hits.inc();
    }

    /// Record a cache miss.
    pub fn record_miss(&self) {
        self.misses.inc();
    }

    /// Record a failed refresh.
    pub fn record_refresh_failure(&self) {
        self.refresh_failures.inc();
    }

    /// Format all metrics as Prometheus text.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        format!(
            "{}{}{}",
            self.hits.to_prometheus(),
            self.misses.to_prometheus(),
            self.refresh_failures.to_prometheus()
        )
    }
}
