//! Input types for administrative writes.
//!
//! Update structs follow the store's partial-update rules: `None` (or an
//! empty string for text fields) leaves the stored value untouched.

use crate::types::{Size, Status};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewCampaign {
    pub name: String,
    /// Defaults to `active`.
    pub status: Option<Status>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignUpdate {
    pub name: Option<String>,
    pub status: Option<Status>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewLineItem {
    pub campaign_id: i64,
    pub name: String,
    /// 0 means "use the default priority".
    pub priority: i32,
    /// `None` stores the default weight.
    pub weight: Option<i32>,
    pub frequency_cap: i32,
    /// Defaults to `day`.
    pub frequency_cap_period: Option<String>,
    pub sov_percentage: i32,
    pub status: Option<Status>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LineItemUpdate {
    pub name: Option<String>,
    pub priority: Option<i32>,
    pub weight: Option<i32>,
    pub frequency_cap: Option<i32>,
    pub frequency_cap_period: Option<String>,
    pub sov_percentage: Option<i32>,
    pub status: Option<Status>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetingRuleInput {
    pub key: String,
    /// Empty is stored as `IN`.
    pub operator: String,
    pub values: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewCreative {
    pub line_item_id: i64,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub image_url: String,
    pub click_url: String,
    pub status: Option<Status>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CreativeUpdate {
    pub name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub image_url: Option<String>,
    pub click_url: Option<String>,
    pub status: Option<Status>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewAdUnit {
    pub code: String,
    pub name: String,
    pub description: String,
    pub platform: String,
    pub sizes: Vec<Size>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdUnitUpdate {
    pub code: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub platform: Option<String>,
    pub sizes: Option<Vec<Size>>,
    pub status: Option<Status>,
}
