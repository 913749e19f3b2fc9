pub mod config;
pub mod dispatch;
pub mod error;
pub mod extract;
pub mod orchestrator;
pub mod rate_limit;
pub mod router;
pub mod tasks;
