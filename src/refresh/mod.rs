//! Snapshot refresh - reload serving configuration from the durable store.
//!
//! Provides two refresh mechanisms:
//! 1. **Event-driven refresh** (RefreshService): triggered after admin writes
//! 2. **Scheduled refresh** (RefreshScheduler): periodic background task (60s default)

pub mod scheduler;
pub mod service;

pub use scheduler::{RefreshScheduler, SchedulerConfig};
pub use service::{RefreshService, RefreshStats};
