//! Scheduled snapshot refresh - background task for periodic reloading.
//!
//! Event-driven refresh after admin writes keeps the snapshot current in the
//! common case. The scheduler covers the rest:
//!
//! 1. **Resilience**: a post-write refresh that failed is retried on the next tick.
//! 2. **Out-of-band changes**: rows edited directly in the store still reach
//!    the engine within one interval.
//! 3. **Off the request path**: the store I/O runs on the blocking pool, so
//!    request handling only ever sees the atomic pointer swap.

use log::{error, info};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

use crate::refresh::{RefreshService, RefreshStats};
use crate::types::now_ms;

/// Configuration for the scheduled refresh service.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between refresh operations
    pub refresh_interval: Duration,
    /// Whether the scheduler is enabled
    pub enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60),
            enabled: true,
        }
    }
}

/// Scheduler for periodic snapshot refresh from the durable store.
///
/// Runs as a background task spawned during server initialization.
pub struct RefreshScheduler {
    service: Arc<RefreshService>,
    config: SchedulerConfig,
    /// Timestamp of the last successful refresh
    last_refresh_at: Arc<RwLock<u64>>,
}

impl RefreshScheduler {
    /// Creates a new refresh scheduler.
    ///
    /// # Example
    /// ```rust,no_run
    /// use std::sync::Arc;
    /// use adengine::cache::SnapshotCache;
    /// use adengine::refresh::{RefreshScheduler, RefreshService, SchedulerConfig};
    /// use adengine::storage::SqliteStore;
    ///
    /// let store = Arc::new(SqliteStore::open("./var/data/adengine.db")?);
    /// let service = Arc::new(RefreshService::new(Arc::new(SnapshotCache::new()), store));
    /// let scheduler = Arc::new(RefreshScheduler::new(service, SchedulerConfig::default()));
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn new(service: Arc<RefreshService>, config: SchedulerConfig) -> Self {
        Self {
            service,
            config,
            last_refresh_at: Arc::new(RwLock::new(now_ms())),
        }
    }

    /// Milliseconds since UNIX epoch of the last successful refresh, or
    /// creation time if none has completed yet.
    pub fn last_refresh(&self) -> u64 {
        *self.last_refresh_at.read()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Runs indefinitely; spawn it as a tokio task.
    ///
    /// The first tick fires one full interval after start, since the caller
    /// performs the initial load itself. Returns immediately when disabled.
    pub async fn start(self: Arc<Self>) {
        if !self.config.enabled {
            info!("Scheduled refresh is disabled, skipping");
            return;
        }

        info!(
            "Starting scheduled refresh with {}-second interval",
            self.config.refresh_interval.as_secs()
        );

        let mut ticker = interval(self.config.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval() completes its first tick immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            self.do_refresh().await;
        }
    }

    /// Executes one refresh cycle. Errors are logged and never stop the
    /// scheduler.
    pub async fn do_refresh(&self) -> Option<RefreshStats> {
        let service = Arc::clone(&self.service);
        let outcome = tokio::task::spawn_blocking(move || service.refresh_background()).await;

        match outcome {
            Ok(Ok(stats)) => {
                info!(
                    "Scheduled refresh completed: snapshot v{} with {} line items in {}ms",
                    stats.version, stats.line_items, stats.duration_ms
                );
                *self.last_refresh_at.write() = now_ms();
                Some(stats)
            }
            Ok(Err(e)) => {
                error!("Scheduled refresh failed: {}", e);
                None
            }
            Err(e) => {
                error!("Scheduled refresh task panicked: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SnapshotCache;
    use crate::storage::SqliteStore;

    #[test]
    fn test_scheduler_config_defaults() {
        let config = SchedulerConfig::default();
        assert!(config.enabled);
        assert_eq!(config.refresh_interval.as_secs(), 60);
    }

    #[test]
    fn test_scheduler_config_custom() {
        let config = SchedulerConfig {
            refresh_interval: Duration::from_secs(3600),
            enabled: false,
        };
        assert!(!config.enabled);
        assert_eq!(config.refresh_interval.as_secs(), 3600);
    }

    #[tokio::test]
    async fn test_do_refresh_updates_last_refresh() {
        let cache = Arc::new(SnapshotCache::new());
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let service = Arc::new(RefreshService::new(Arc::clone(&cache), store));
        let scheduler = RefreshScheduler::new(service, SchedulerConfig::default());

        let before = scheduler.last_refresh();
        let stats = scheduler.do_refresh().await.unwrap();
        assert_eq!(stats.version, 1);
        assert!(scheduler.last_refresh() >= before);
        assert_eq!(cache.version(), 1);
    }

    #[tokio::test]
    async fn test_disabled_scheduler_returns() {
        let service = Arc::new(RefreshService::new(
            Arc::new(SnapshotCache::new()),
            Arc::new(SqliteStore::open_in_memory().unwrap()),
        ));
        let scheduler = Arc::new(RefreshScheduler::new(
            service,
            SchedulerConfig {
                refresh_interval: Duration::from_secs(1),
                enabled: false,
            },
        ));
        scheduler.start().await;
    }
}
