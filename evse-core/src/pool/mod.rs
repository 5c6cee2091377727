//! Pool/ramp controller: spins up many simulated charge points against
//! one CSMS target and tracks aggregate metrics.

pub mod controller;
pub mod metrics;

pub use controller::Pool;
pub use metrics::{LatencyStats, Metrics, MetricsSummary};
