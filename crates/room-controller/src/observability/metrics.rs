//! Metrics definitions for the Room Controller.
//!
//! All metrics follow Prometheus naming conventions:
//! - `rc_` prefix for Room Controller
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `kind`: 6 event kinds
//! - `operation` / `command`: bounded by the command surface (~12 values)
//! - `status`: success, error
//!
//! Room ids are never used as labels.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Heartbeat ticks must stay far below the 150ms interval
        .set_buckets_for_metric(
            Matcher::Prefix("rc_heartbeat".to_string()),
            &[
                0.0005, 0.001, 0.0025, 0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.500,
            ],
        )
        .map_err(|e| format!("Failed to set heartbeat buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("rc_native_call".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000,
                10.000,
            ],
        )
        .map_err(|e| format!("Failed to set native call buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Heartbeat
// ============================================================================

/// Record a completed heartbeat tick.
///
/// Metrics: `rc_heartbeat_ticks_total`, `rc_heartbeat_tick_duration_seconds`
pub fn record_heartbeat_tick(duration: Duration, callbacks: usize) {
    counter!("rc_heartbeat_ticks_total").increment(1);
    histogram!("rc_heartbeat_tick_duration_seconds").record(duration.as_secs_f64());
    // usize to u64 is lossless on supported targets
    counter!("rc_heartbeat_callbacks_total").increment(callbacks as u64);
}

/// Record a tick that took longer than the heartbeat interval.
///
/// Metric: `rc_heartbeat_overrun_total`
pub fn record_heartbeat_overrun() {
    counter!("rc_heartbeat_overrun_total").increment(1);
}

/// Record a fatal pump failure.
///
/// Metric: `rc_heartbeat_failures_total`
pub fn record_heartbeat_failure() {
    counter!("rc_heartbeat_failures_total").increment(1);
}

// ============================================================================
// Rooms & Subscribers (Gauges)
// ============================================================================

/// Set the number of rooms in the registry.
///
/// Metric: `rc_rooms_active`
pub fn set_rooms_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rc_rooms_active").set(count as f64);
}

/// Set the number of live event subscribers across all rooms.
///
/// Metric: `rc_subscribers_active`
pub fn set_subscribers_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("rc_subscribers_active").set(count as f64);
}

// ============================================================================
// Events
// ============================================================================

/// Record a published event.
///
/// Metric: `rc_events_published_total`
/// Labels: `kind`
pub fn record_event_published(kind: &'static str) {
    counter!("rc_events_published_total", "kind" => kind).increment(1);
}

/// Record a subscriber disconnected because its queue was full.
///
/// Metric: `rc_subscriber_overflow_total`
pub fn record_subscriber_overflow() {
    counter!("rc_subscriber_overflow_total").increment(1);
}

// ============================================================================
// Commands & native calls
// ============================================================================

/// Record native call latency.
///
/// Metric: `rc_native_call_duration_seconds`
/// Labels: `operation`
pub fn record_native_call(operation: &'static str, duration: Duration) {
    histogram!("rc_native_call_duration_seconds", "operation" => operation)
        .record(duration.as_secs_f64());
}

/// Record a command outcome.
///
/// Metric: `rc_commands_total`
/// Labels: `command`, `status`
pub fn record_command(command: &'static str, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!("rc_commands_total", "command" => command, "status" => status).increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    #[test]
    fn test_command_counter_labels() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            record_command("pair", true);
            record_command("pair", false);
            record_command("pair", true);
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let success = snapshot.iter().find(|(key, _, _, _)| {
            key.key().name() == "rc_commands_total"
                && key
                    .key()
                    .labels()
                    .any(|l| l.key() == "status" && l.value() == "success")
        });
        assert!(matches!(success, Some((_, _, _, DebugValue::Counter(2)))));
    }

    #[test]
    fn test_gauges_and_histograms_do_not_panic_without_recorder() {
        set_rooms_active(3);
        set_subscribers_active(0);
        record_heartbeat_tick(Duration::from_millis(1), 4);
        record_native_call("pair", Duration::from_millis(12));
        record_event_published("ConfReady");
        record_subscriber_overflow();
        record_heartbeat_overrun();
        record_heartbeat_failure();
    }
}
