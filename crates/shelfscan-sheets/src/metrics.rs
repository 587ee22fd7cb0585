//! Sheets request metrics.

use std::time::Duration;

use metrics::{counter, histogram};

pub mod names {
    pub const REQUESTS_TOTAL: &str = "sheets_requests_total";
    pub const RETRIES_TOTAL: &str = "sheets_retries_total";
    pub const LATENCY_SECONDS: &str = "sheets_request_duration_seconds";
}

/// Coarse label for an HTTP status, keeping label cardinality low.
pub fn status_class(status: u16) -> &'static str {
    match status {
        200..=299 => "2xx",
        429 => "429",
        400..=499 => "4xx",
        500..=599 => "5xx",
        _ => "other",
    }
}

pub fn record_request(operation: &str, status: u16, elapsed: Duration) {
    counter!(
        names::REQUESTS_TOTAL,
        "operation" => operation.to_string(),
        "status" => status_class(status)
    )
    .increment(1);
    histogram!(names::LATENCY_SECONDS, "operation" => operation.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_retry(operation: &str) {
    counter!(names::RETRIES_TOTAL, "operation" => operation.to_string()).increment(1);
}
