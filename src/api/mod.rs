//! HTTP API Module
//!
//! Read-only endpoints exposing the latest snapshot and collector metrics.

mod routes;
mod metrics;

pub use routes::{router, run_api_server, ApiState};
pub use metrics::{Metrics, MetricsSnapshot};
