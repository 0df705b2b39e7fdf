//! Health probes and metrics plumbing.

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
