//! In-memory frequency capper.
//!
//! # Concurrency
//! - `check` takes the read lock, `increment` the write lock, so increments
//!   for the same key are always visible to later checks.
//! - The rollover task takes the same write lock to swap in an empty map.
//! - A check followed by a separate increment is not atomic: two concurrent
//!   requests can both pass a check at `cap - 1` and overshoot by one.

use chrono::NaiveDate;
use log::info;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

use super::clock::{DayClock, LocalClock};

type CounterKey = (i64, String, NaiveDate);

/// How often the rollover task compares the clock against the tracked day.
#[derive(Debug, Clone)]
pub struct RolloverConfig {
    pub check_interval: Duration,
}

impl Default for RolloverConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
        }
    }
}

struct CapperState {
    counts: HashMap<CounterKey, u32>,
    current_day: NaiveDate,
}

pub struct FrequencyCapper {
    state: RwLock<CapperState>,
    clock: Arc<dyn DayClock>,
}

impl FrequencyCapper {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(LocalClock))
    }

    pub fn with_clock(clock: Arc<dyn DayClock>) -> Self {
        let current_day = clock.today();
        Self {
            state: RwLock::new(CapperState {
                counts: HashMap::new(),
                current_day,
            }),
            clock,
        }
    }

    /// True when the user may see the line item again today.
    /// A cap of zero or less is uncapped.
    pub fn check(&self, line_item_id: i64, user_id: &str, cap: i32) -> bool {
        if cap <= 0 {
            return true;
        }
        i64::from(self.count(line_item_id, user_id)) < i64::from(cap)
    }

    /// Records one impression for today.
    pub fn increment(&self, line_item_id: i64, user_id: &str) {
        let key = (line_item_id, user_id.to_string(), self.clock.today());
        let mut state = self.state.write();
        let count = state.counts.entry(key).or_insert(0);
        *count = count.saturating_add(1);
    }

    /// Today's count; absent keys read as zero.
    pub fn count(&self, line_item_id: i64, user_id: &str) -> u32 {
        let key = (line_item_id, user_id.to_string(), self.clock.today());
        self.state.read().counts.get(&key).copied().unwrap_or(0)
    }

    /// Number of live counters.
    pub fn len(&self) -> usize {
        self.state.read().counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn current_day(&self) -> NaiveDate {
        self.state.read().current_day
    }

    /// Discards every counter when the calendar day has changed.
    /// Returns true when a rollover happened.
    pub fn rollover_if_needed(&self) -> bool {
        let today = self.clock.today();
        if self.state.read().current_day == today {
            return false;
        }

        let mut state = self.state.write();
        if state.current_day == today {
            return false;
        }
        let discarded = state.counts.len();
        let previous = state.current_day;
        state.counts = HashMap::new();
        state.current_day = today;
        drop(state);

        info!(
            "Frequency counters rolled over from {} to {}, discarded {} entries",
            previous, today, discarded
        );
        true
    }

    /// Clears all counters.
    pub fn reset(&self) {
        self.state.write().counts.clear();
    }

    /// Runs the day-rollover check forever; spawn it as a tokio task.
    pub async fn spawn_rollover(self: Arc<Self>, config: RolloverConfig) {
        info!(
            "Starting frequency rollover check every {} seconds",
            config.check_interval.as_secs()
        );
        let mut ticker = interval(config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.rollover_if_needed();
        }
    }
}

impl Default for FrequencyCapper {
    fn default() -> Self {
        Self::new()
    }
}
