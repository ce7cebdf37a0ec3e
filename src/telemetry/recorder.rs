//! # Event Recorder
//!
//! Thread-safe event recording with outcome counters.

use log::{debug, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::context::RequestContext;
use crate::storage::AdStore;
use crate::types::Event;

/// Thread-safe event recorder
pub struct EventRecorder {
    store: Arc<dyn AdStore>,
    recorded: AtomicU64,
    failed: AtomicU64,
}

impl EventRecorder {
    pub fn new(store: Arc<dyn AdStore>) -> Self {
        EventRecorder {
            store,
            recorded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Persist one event. Never fails; returns whether the write succeeded.
    pub fn record(&self, ctx: &RequestContext, event: &Event) -> bool {
        match self.store.record_event(ctx, event) {
            Ok(()) => {
                self.recorded.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Recorded {} for impression {} (line item {})",
                    event.event_type.as_str(),
                    event.impression_id,
                    event.line_item_id
                );
                true
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Failed to record {} event for impression {}: {}",
                    event.event_type.as_str(),
                    event.impression_id,
                    e
                );
                false
            }
        }
    }

    /// Get recording statistics
    pub fn stats(&self) -> EventStats {
        EventStats {
            recorded: self.recorded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Event recording statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventStats {
    pub recorded: u64,
    pub failed: u64,
}

impl EventStats {
    /// Fraction of attempted writes that failed
    pub fn failure_rate(&self) -> f64 {
        let attempted = self.recorded + self.failed;
        if attempted == 0 {
            0.0
        } else {
            self.failed as f64 / attempted as f64
        }
    }
}
