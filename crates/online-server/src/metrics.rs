//! Metrics collection and export for the presence service.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::info;

/// Metric names.
pub mod names {
    pub const MARKS_TOTAL: &str = "online_marks_total";
    pub const QUERIES_TOTAL: &str = "online_queries_total";
    pub const MEMBERS_LISTED: &str = "online_members_listed";
    pub const STORE_LATENCY_SECONDS: &str = "online_store_latency_seconds";
    pub const ERRORS_TOTAL: &str = "online_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::MARKS_TOTAL,
        "Total number of online/offline marks"
    );
    metrics::describe_counter!(names::QUERIES_TOTAL, "Total number of presence queries");
    metrics::describe_gauge!(
        names::MEMBERS_LISTED,
        "Number of identifiers returned by the last full listing"
    );
    metrics::describe_histogram!(
        names::STORE_LATENCY_SECONDS,
        "Tracker round-trip latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record an online or offline mark.
pub fn record_mark(op: &'static str) {
    counter!(names::MARKS_TOTAL, "op" => op).increment(1);
}

/// Record a presence query.
pub fn record_query(op: &'static str) {
    counter!(names::QUERIES_TOTAL, "op" => op).increment(1);
}

/// Update the size of the last full listing.
pub fn set_members_listed(count: usize) {
    gauge!(names::MEMBERS_LISTED).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Records the elapsed time of a tracker call on drop.
pub struct LatencyTimer {
    op: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start timing `op`.
    #[must_use]
    pub fn start(op: &'static str) -> Self {
        Self {
            op,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        histogram!(names::STORE_LATENCY_SECONDS, "op" => self.op)
            .record(self.start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_timer() {
        // No recorder installed; just make sure nothing panics
        let _timer = LatencyTimer::start("is_online");
        record_mark("online");
        record_query("is_online");
        set_members_listed(3);
    }
}
