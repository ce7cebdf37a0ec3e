//! # Ad Decision Engine
//!
//! Real-time ad selection over an in-memory campaign snapshot.
//!
//! ## Architecture
//!
//! ```text
//! AdRequest ─► AdDecisionEngine ─► SnapshotCache (read one Arc<Snapshot>)
//!                    │
//!                    ├─► targeting   (eligibility, creative fit, ad-unit allow-list)
//!                    ├─► frequency   (per user/day caps)
//!                    ├─► selection   (priority waterfall, SOV, weighted fill)
//!                    └─► tracking    (impression / viewable / click URLs)
//!
//! RefreshService / RefreshScheduler ─► AdStore ─► SnapshotCache (atomic swap)
//! ```
//!
//! Request handling never touches storage: the snapshot is rebuilt off the
//! request path and swapped in whole.

pub mod admin;
pub mod cache;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod frequency;
pub mod refresh;
pub mod selection;
pub mod snapshot;
pub mod storage;
pub mod targeting;
pub mod telemetry;
pub mod tracking;
pub mod types;

pub use admin::AdminService;
pub use cache::SnapshotCache;
pub use config::EngineConfig;
pub use context::RequestContext;
pub use engine::{AdDecisionEngine, EngineStats};
pub use error::{EngineError, Result};
pub use frequency::FrequencyCapper;
pub use refresh::{RefreshScheduler, RefreshService};
pub use storage::{AdStore, AdminStore, SqliteStore};
pub use tracking::{TrackingResponse, TrackingService, TrackingUrlBuilder};
pub use types::{AdRequest, AdResponse, AdResult, AdSlot};
