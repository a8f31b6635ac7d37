// Module declarations
pub mod agents;
pub mod api;
pub mod config;
pub mod constants;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod process;
pub mod scheduler;
pub mod store;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use config::ManagerConfig;
pub use error::{AppError, ErrorCode};
pub use health::HealthMonitor;
pub use lifecycle::{AgentManager, ManagerContext};
pub use process::{ProcessController, ProcessRecord, RunProfile};
pub use scheduler::{TriggerRule, TriggerScheduler};
