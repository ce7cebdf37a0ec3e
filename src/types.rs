//! Core data model for the ad decision engine.
//!
//! Entities mirror what the durable store hands back after a bulk read:
//! line items arrive already joined with their targeting rules, creatives and
//! allowed ad-unit ids.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Default fill weight applied when a line item's weight is zero or negative.
pub const DEFAULT_WEIGHT: i32 = 100;

/// Default priority given to new line items created without one.
pub const DEFAULT_PRIORITY: i32 = 5;

/// Returns the current time in milliseconds since UNIX epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ================================================================================================
// STATUS & OPERATORS
// ================================================================================================

/// Lifecycle status shared by campaigns, line items, creatives and ad units.
///
/// Only `Active` entities take part in serving. Any status string the store
/// does not recognise parses as `Inactive`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Status {
    Active,
    Paused,
    Archived,
    Inactive,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Active => "active",
            Status::Paused => "paused",
            Status::Archived => "archived",
            Status::Inactive => "inactive",
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self, Status::Active)
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::Active
    }
}

impl From<&str> for Status {
    fn from(value: &str) -> Self {
        match value {
            "active" => Status::Active,
            "paused" => Status::Paused,
            "archived" => Status::Archived,
            _ => Status::Inactive,
        }
    }
}

impl From<String> for Status {
    fn from(value: String) -> Self {
        Status::from(value.as_str())
    }
}

impl From<Status> for String {
    fn from(value: Status) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Targeting rule operator.
///
/// Unrecognised operators are kept verbatim so they round-trip through the
/// store, and evaluate with `IN` semantics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operator {
    Eq,
    In,
    NotIn,
    Other(String),
}

impl Operator {
    pub fn as_str(&self) -> &str {
        match self {
            Operator::Eq => "EQ",
            Operator::In => "IN",
            Operator::NotIn => "NOT_IN",
            Operator::Other(raw) => raw.as_str(),
        }
    }
}

impl From<&str> for Operator {
    fn from(value: &str) -> Self {
        match value {
            "EQ" => Operator::Eq,
            // Empty operators are stored as IN
            "IN" | "" => Operator::In,
            "NOT_IN" => Operator::NotIn,
            other => Operator::Other(other.to_string()),
        }
    }
}

impl From<String> for Operator {
    fn from(value: String) -> Self {
        Operator::from(value.as_str())
    }
}

impl From<Operator> for String {
    fn from(value: Operator) -> Self {
        value.as_str().to_string()
    }
}

// ================================================================================================
// ENTITIES
// ================================================================================================

/// A creative size, serialized as a `[width, height]` pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[u32; 2]", into = "[u32; 2]")]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl From<[u32; 2]> for Size {
    fn from(pair: [u32; 2]) -> Self {
        Size::new(pair[0], pair[1])
    }
}

impl From<Size> for [u32; 2] {
    fn from(size: Size) -> Self {
        [size.width, size.height]
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: i64,
    pub name: String,
    pub status: Status,
}

/// A single targeting predicate over one request key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetingRule {
    pub id: i64,
    pub line_item_id: i64,
    pub key: String,
    pub operator: Operator,
    pub values: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creative {
    pub id: i64,
    pub line_item_id: i64,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub image_url: String,
    pub click_url: String,
    pub status: Status,
}

impl Creative {
    #[inline]
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    #[inline]
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// A line item hydrated with everything needed to serve it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: i64,
    pub campaign_id: i64,
    pub name: String,
    /// Higher serves first.
    pub priority: i32,
    /// Fill-rate tiebreak among equal priorities.
    pub weight: i32,
    /// Impressions per user per period, 0 = uncapped.
    pub frequency_cap: i32,
    pub frequency_cap_period: String,
    /// Guaranteed share of wins among same-priority competitors, 0 = none.
    pub sov_percentage: i32,
    pub status: Status,
    pub targeting_rules: Vec<TargetingRule>,
    pub creatives: Vec<Creative>,
    /// Allowed ad units; empty serves everywhere.
    pub ad_unit_ids: Vec<i64>,
}

impl LineItem {
    /// Weight used by weighted-random fill.
    #[inline]
    pub fn effective_weight(&self) -> u32 {
        if self.weight <= 0 {
            DEFAULT_WEIGHT as u32
        } else {
            self.weight as u32
        }
    }

    #[inline]
    pub fn has_sov(&self) -> bool {
        self.sov_percentage > 0
    }
}

/// An inventory unit publishers reference by code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdUnit {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub description: String,
    pub platform: String,
    /// Allowed creative sizes; empty allows any size.
    pub sizes: Vec<Size>,
    pub status: Status,
}

// ================================================================================================
// TRACKING EVENTS
// ================================================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Impression,
    Viewable,
    Click,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Impression => "impression",
            EventType::Viewable => "viewable",
            EventType::Click => "click",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "impression" => Some(EventType::Impression),
            "viewable" => Some(EventType::Viewable),
            "click" => Some(EventType::Click),
            _ => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub impression_id: String,
    pub line_item_id: i64,
    pub creative_id: i64,
    pub user_id: String,
    pub country: String,
    pub platform: String,
    pub ad_unit: String,
    pub section: String,
    /// Unix ms; set by the store when recorded.
    #[serde(default)]
    pub created_at: u64,
}

// ================================================================================================
// AD REQUEST / RESPONSE
// ================================================================================================

/// One display slot in an ad request.
///
/// A slot with `width == 0 && height == 0 && max_width > 0` is responsive.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdSlot {
    pub id: String,
    pub width: u32,
    pub height: u32,
    pub max_width: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ad_unit: Option<String>,
}

impl AdSlot {
    #[inline]
    pub fn is_responsive(&self) -> bool {
        self.width == 0 && self.height == 0 && self.max_width > 0
    }

    /// Ad-unit code, treating an empty string as absent.
    pub fn ad_unit_code(&self) -> Option<&str> {
        self.ad_unit.as_deref().filter(|code| !code.is_empty())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdRequest {
    pub slots: Vec<AdSlot>,
    pub targeting: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub platform: String,
    pub country: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingUrls {
    pub impression: String,
    pub viewable: String,
    pub click: String,
}

/// The ad chosen for one slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdResult {
    pub slot_id: String,
    pub impression_id: String,
    pub line_item_id: i64,
    pub creative_id: i64,
    pub width: u32,
    pub height: u32,
    pub image_url: String,
    /// Click tracking URL wrapping the creative's click-through target.
    pub click_url: String,
    pub tracking: TrackingUrls,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdResponse {
    pub ads: Vec<AdResult>,
}
