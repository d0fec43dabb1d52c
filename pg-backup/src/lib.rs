//! PostgreSQL Backup Daemon Library
//!
//! Scheduled dump-and-sync runs with the last outcome published as
//! Prometheus gauges.

pub mod api;
pub mod config;
pub mod daemon;
pub mod executor;
pub mod metrics;
pub mod scheduler;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::BackupError;
pub type Result<T> = std::result::Result<T, BackupError>;
