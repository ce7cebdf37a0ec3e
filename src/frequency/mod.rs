//! Frequency capping - per (line item, user, day) impression counters.
//!
//! Counters live only in memory. They are cheap to rebuild, so the whole map
//! is discarded when the calendar day changes rather than expiring per key.

pub mod capper;
pub mod clock;

pub use capper::{FrequencyCapper, RolloverConfig};
pub use clock::{DayClock, LocalClock, ManualClock};
