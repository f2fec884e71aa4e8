//! Observability for the Room Controller.
//!
//! # Privacy by Default
//!
//! Activation codes and meeting passwords are never logged or used as metric
//! labels. Room ids appear in log fields only.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `rc_heartbeat_ticks_total` | Counter | none | Pump invocations |
//! | `rc_heartbeat_tick_duration_seconds` | Histogram | none | Tick latency |
//! | `rc_heartbeat_overrun_total` | Counter | none | Ticks longer than the interval |
//! | `rc_heartbeat_failures_total` | Counter | none | Fatal pump errors |
//! | `rc_rooms_active` | Gauge | none | Registered rooms |
//! | `rc_subscribers_active` | Gauge | none | Live event subscribers |
//! | `rc_events_published_total` | Counter | `kind` | Events fanned out |
//! | `rc_subscriber_overflow_total` | Counter | none | Subscribers dropped on full queue |
//! | `rc_native_call_duration_seconds` | Histogram | `operation` | Native call latency |
//! | `rc_commands_total` | Counter | `command`, `status` | Command outcomes |

pub mod health;
pub mod metrics;

pub use health::{health_router, service_router, HealthState};
pub use metrics::init_metrics_recorder;
