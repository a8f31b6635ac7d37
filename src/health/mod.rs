//! Health monitoring and auto-restart of run profiles

pub mod manager;
pub mod probe;
pub mod types;

pub use manager::HealthMonitor;
pub use types::{health_key, HealthConfig, HealthState, HealthStatus, ProbeType, Status};
