//! Trigger rules, cron matching and the scheduler loop

pub mod cron;
pub mod files;
pub mod manager;
pub mod rules;
pub mod types;

pub use manager::{TriggerScheduler, WebhookReply};
pub use rules::TriggerRuleStore;
pub use types::*;
