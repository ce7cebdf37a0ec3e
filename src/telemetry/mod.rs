//! # Telemetry - tracking event persistence
//!
//! Impression, viewable and click beacons are recorded through the durable
//! store. Recording is fire-and-forget: a failed write is counted and logged,
//! and the beacon response is served regardless.

pub mod recorder;

pub use recorder::{EventRecorder, EventStats};
