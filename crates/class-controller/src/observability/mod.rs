//! Observability for the Class Controller.
//!
//! Instrumentation uses `#[instrument(skip_all)]` with explicit fields;
//! provider credentials never reach logs. Metric labels are bounded.
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `cc_sessions_active` | Gauge | `status` | Sessions known to the coordinator |
//! | `cc_actor_mailbox_depth` | Gauge | `actor_type` | Backpressure indicator |
//! | `cc_provider_events_total` | Counter | `kind` | Vendor events received |
//! | `cc_payload_unrecognized_total` | Counter | `payload_kind` | Dropped payloads |
//! | `cc_reconciliation_total` | Counter | `outcome` | Reconciliation passes |
//! | `cc_reconciliation_corrections_total` | Counter | `direction` | Missed events recovered |
//! | `cc_roster_query_duration_seconds` | Histogram | none | Roster query latency |
//! | `cc_join_attempts_total` | Counter | `role`, `outcome` | Join protocol outcomes |
//! | `cc_switchover_total` | Counter | `status` | Provider fallback switchovers |
//! | `cc_registry_evictions_total` | Counter | `reason` | Registry TTL evictions |
//! | `cc_store_latency_seconds` | Histogram | `operation` | Registry store latency |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
