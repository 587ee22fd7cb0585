//! Engine metrics.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{EngineError, EngineResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const FRAMES_PROCESSED: &str = "shelfscan_frames_processed_total";
    pub const DETECTIONS: &str = "shelfscan_detections_total";
    pub const ENTITIES_TRACKED: &str = "shelfscan_entities_tracked";
    pub const ENTITY_TRANSITIONS: &str = "shelfscan_entity_transitions_total";
    pub const BACKEND_CALLS: &str = "shelfscan_backend_calls_total";
    pub const BACKEND_CALL_DURATION: &str = "shelfscan_backend_call_duration_seconds";
    pub const COMMANDS_DROPPED: &str = "shelfscan_commands_dropped_total";
}

/// Install the Prometheus recorder with an HTTP listener on `addr`.
///
/// Must be called from inside a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> EngineResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| EngineError::Metrics(e.to_string()))
}

/// Per-frame detection counts by disposition.
pub fn record_frame(tracked: usize, context: usize, discarded: usize, live_entities: usize) {
    counter!(names::FRAMES_PROCESSED).increment(1);
    counter!(names::DETECTIONS, "disposition" => "tracked").increment(tracked as u64);
    counter!(names::DETECTIONS, "disposition" => "context").increment(context as u64);
    counter!(names::DETECTIONS, "disposition" => "discarded").increment(discarded as u64);
    gauge!(names::ENTITIES_TRACKED).set(live_entities as f64);
}

/// Entity lifecycle transition: `created`, `confirmed` or `removed`.
pub fn record_transition(transition: &'static str) {
    counter!(names::ENTITY_TRANSITIONS, "transition" => transition).increment(1);
}

pub fn record_backend_call(operation: &'static str, status: &'static str, latency_secs: f64) {
    counter!(
        names::BACKEND_CALLS,
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    histogram!(names::BACKEND_CALL_DURATION, "operation" => operation).record(latency_secs);
}

pub fn record_dropped(operation: &'static str) {
    counter!(names::COMMANDS_DROPPED, "operation" => operation).increment(1);
}
