//! Calendar-day source for the capper.

use chrono::{Local, NaiveDate};
use parking_lot::Mutex;

/// Supplies "today" to the frequency capper.
pub trait DayClock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Server-local calendar day.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalClock;

impl DayClock for LocalClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Hand-driven clock for simulating day rollover.
#[derive(Debug)]
pub struct ManualClock {
    day: Mutex<NaiveDate>,
}

impl ManualClock {
    pub fn new(day: NaiveDate) -> Self {
        Self {
            day: Mutex::new(day),
        }
    }

    pub fn set(&self, day: NaiveDate) {
        *self.day.lock() = day;
    }

    /// Moves the clock forward one day.
    pub fn advance(&self) {
        let mut day = self.day.lock();
        if let Some(next) = day.succ_opt() {
            *day = next;
        }
    }
}

impl DayClock for ManualClock {
    fn today(&self) -> NaiveDate {
        *self.day.lock()
    }
}
