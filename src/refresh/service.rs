//! Event-driven snapshot refresh service.
//!
//! Triggered after administrative writes and by the scheduler. Replaces the
//! cache's snapshot with the latest contents of the durable store and, when
//! configured, keeps the warm snapshot file in step.

use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{LoadStats, SnapshotCache};
use crate::context::RequestContext;
use crate::error::{EngineError, Result};
use crate::storage::{AdStore, WarmSnapshotFile};
use crate::types::now_ms;

/// Statistics from a refresh operation.
#[derive(Debug, Clone)]
pub struct RefreshStats {
    /// Version of the snapshot now being served
    pub version: u64,
    /// Number of line items in the new snapshot
    pub line_items: usize,
    pub ad_units: usize,
    /// Duration of refresh operation in milliseconds
    pub duration_ms: u64,
    /// Timestamp of refresh
    pub timestamp: u64,
}

impl From<LoadStats> for RefreshStats {
    fn from(stats: LoadStats) -> Self {
        Self {
            version: stats.version,
            line_items: stats.line_items,
            ad_units: stats.ad_units,
            duration_ms: stats.duration_ms,
            timestamp: now_ms(),
        }
    }
}

/// Snapshot refresh service.
pub struct RefreshService {
    cache: Arc<SnapshotCache>,
    store: Arc<dyn AdStore>,
    warm: Option<WarmSnapshotFile>,
    /// Bound applied to background refreshes that carry no caller deadline
    timeout: Duration,
}

impl RefreshService {
    pub fn new(cache: Arc<SnapshotCache>, store: Arc<dyn AdStore>) -> Self {
        Self {
            cache,
            store,
            warm: None,
            timeout: Duration::from_secs(30),
        }
    }

    /// Persist every good snapshot to `warm`.
    pub fn with_warm_snapshot(mut self, warm: WarmSnapshotFile) -> Self {
        self.warm = Some(warm);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cache(&self) -> &Arc<SnapshotCache> {
        &self.cache
    }

    /// Reload the snapshot now.
    ///
    /// On failure the previous snapshot keeps serving and the error is returned.
    pub fn refresh(&self, ctx: &RequestContext) -> Result<RefreshStats> {
        let stats = self.cache.load(self.store.as_ref(), ctx)?;
        self.persist_warm();
        Ok(stats.into())
    }

    /// Refresh with a fresh bounded context, for timers and startup.
    pub fn refresh_background(&self) -> Result<RefreshStats> {
        self.refresh(&RequestContext::with_timeout(self.timeout))
    }

    /// Refresh after an admin write. Failures are logged and swallowed so
    /// they never fail the write that triggered them.
    pub fn refresh_best_effort(&self, ctx: &RequestContext) -> Option<RefreshStats> {
        match self.refresh(ctx) {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!(
                    "Post-write refresh failed, serving snapshot v{}: {}",
                    self.cache.version(),
                    e
                );
                None
            }
        }
    }

    /// Startup path: load from the store, falling back to the warm snapshot
    /// file when the store is unreachable.
    pub fn initial_load(&self) -> Result<RefreshStats> {
        let store_err = match self.refresh_background() {
            Ok(stats) => return Ok(stats),
            Err(e) => e,
        };

        let Some(warm) = &self.warm else {
            return Err(store_err);
        };

        match warm.load() {
            Ok(Some(snapshot)) => {
                let stats = self.cache.install(snapshot.data);
                info!(
                    "Store unavailable ({}); restored warm snapshot v{} from {} as v{}",
                    store_err,
                    snapshot.snapshot_version,
                    warm.path().display(),
                    stats.version
                );
                Ok(stats.into())
            }
            Ok(None) => Err(store_err),
            Err(e) => Err(EngineError::Snapshot(format!(
                "store: {}; warm snapshot: {}",
                store_err, e
            ))),
        }
    }

    fn persist_warm(&self) {
        if let Some(warm) = &self.warm {
            let snapshot = self.cache.snapshot();
            if let Err(e) = warm.write(snapshot.version(), &snapshot.to_data()) {
                warn!(
                    "Failed to persist warm snapshot to {}: {}",
                    warm.path().display(),
                    e
                );
            }
        }
    }
}
