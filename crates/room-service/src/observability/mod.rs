//! Observability for the room service.
//!
//! # Privacy by Default
//!
//! Store and bus operations use `#[instrument(skip_all)]` with explicit
//! fields. Credentials and raw tokens are never logged, and room or
//! participant IDs never become metric labels.
//!
//! # Metrics
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `room_connections_active` | Gauge | none |
//! | `room_votes_total` | Counter | `outcome` |
//! | `room_triggers_total` | Counter | none |
//! | `room_backend_errors_total` | Counter | `operation` |
//! | `room_backend_latency_seconds` | Histogram | `operation` |
//! | `room_fanout_publish_failures_total` | Counter | none |
//! | `room_credential_rejections_total` | Counter | `reason` |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
