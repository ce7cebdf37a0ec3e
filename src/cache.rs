//! Snapshot cache - holds the engine's current serving snapshot.
//!
//! # Concurrency
//! - The current snapshot sits behind `RwLock<Arc<Snapshot>>`.
//! - Readers clone the `Arc` under a short read lock and then work lock-free
//!   on an immutable snapshot for the rest of the request.
//! - Loads are serialized by `load_lock`. Fetching from the store happens
//!   outside the snapshot lock; only the final pointer swap takes the write lock.

use log::{info, warn};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

use crate::context::RequestContext;
use crate::error::Result;
use crate::snapshot::{Snapshot, SnapshotData, SnapshotStats};
use crate::storage::AdStore;
use crate::types::{now_ms, AdUnit, LineItem};

#[derive(Debug)]
pub struct SnapshotCache {
    current: RwLock<Arc<Snapshot>>,
    /// One writer at a time
    load_lock: Mutex<()>,
}

/// Outcome of a successful load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadStats {
    pub version: u64,
    pub line_items: usize,
    pub ad_units: usize,
    pub duration_ms: u64,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(Snapshot::empty())),
            load_lock: Mutex::new(()),
        }
    }

    /// Fetches line items and ad units from the store and swaps in a new
    /// snapshot. On any fetch failure the previous snapshot stays current.
    pub fn load(&self, store: &dyn AdStore, ctx: &RequestContext) -> Result<LoadStats> {
        let _writer = self.load_lock.lock();
        let start = now_ms();

        let fetched = store
            .list_active_line_items(ctx)
            .and_then(|line_items| {
                let ad_units = store.list_ad_units(ctx)?;
                Ok(SnapshotData {
                    line_items,
                    ad_units,
                })
            });

        let data = match fetched {
            Ok(data) => data,
            Err(e) => {
                warn!(
                    "Snapshot load failed, keeping version {}: {}",
                    self.version(),
                    e
                );
                return Err(e);
            }
        };

        let stats = self.swap_in(data);
        let duration_ms = now_ms().saturating_sub(start);
        info!(
            "Snapshot v{} installed: {} line items, {} ad units in {}ms",
            stats.version, stats.line_items, stats.ad_units, duration_ms
        );
        Ok(LoadStats {
            duration_ms,
            ..stats
        })
    }

    /// Installs already-fetched data, e.g. a warm snapshot read at startup.
    pub fn install(&self, data: SnapshotData) -> LoadStats {
        let _writer = self.load_lock.lock();
        self.swap_in(data)
    }

    /// Caller holds `load_lock`.
    fn swap_in(&self, data: SnapshotData) -> LoadStats {
        let version = self.version() + 1;
        let snapshot = Arc::new(Snapshot::build(version, data));
        let stats = LoadStats {
            version,
            line_items: snapshot.line_items().len(),
            ad_units: snapshot.ad_units().len(),
            duration_ms: 0,
        };
        *self.current.write() = snapshot;
        stats
    }

    /// The current snapshot. Hold on to it for the whole request.
    #[inline]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.current.read())
    }

    /// Copy of the current snapshot's line items.
    pub fn active_line_items(&self) -> Vec<LineItem> {
        self.snapshot().line_items().to_vec()
    }

    pub fn ad_unit_by_code(&self, code: &str) -> Option<AdUnit> {
        self.snapshot().ad_unit_by_code(code).cloned()
    }

    pub fn version(&self) -> u64 {
        self.current.read().version()
    }

    pub fn stats(&self) -> SnapshotStats {
        self.snapshot().stats()
    }
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}
