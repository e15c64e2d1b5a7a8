//! Metrics for observability
//!
//! Names are registered once with descriptions; recording goes through the
//! `metrics` facade and is a no-op until a recorder (the Prometheus
//! exporter in the server binary) is installed.

use metrics::{describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Describe every metric BCDB emits
pub fn init_metrics() {
    describe_counter!("bcdb.requests.total", "Requests handled, labelled by op");
    describe_counter!(
        "bcdb.requests.denied",
        "Requests rejected for missing rights, labelled by op"
    );
    describe_counter!(
        "bcdb.stream.items",
        "Items emitted by List, Find and Acl.List streams"
    );
    describe_histogram!(
        "bcdb.operation.duration_ms",
        Unit::Milliseconds,
        "Time spent in the access controller per request"
    );
    describe_counter!(
        "bcdb.auth.failures",
        "Calls rejected before dispatch for missing or bad credentials"
    );
}

/// Timer for measuring operation duration
pub struct Timer {
    name: &'static str,
    start: Instant,
}

impl Timer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
        }
    }

    /// Stop the timer and record the elapsed milliseconds
    pub fn stop(self) {
        let duration = self.start.elapsed();
        histogram!(self.name).record(duration.as_secs_f64() * 1000.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_without_recorder() {
        init_metrics();
        let timer = Timer::new("bcdb.operation.duration_ms");
        timer.stop();
    }
}
