//! Durable store collaborator.
//!
//! The engine never reads storage on the decision path. It consumes:
//! - **`AdStore`**: bulk reads for snapshot refresh and event recording
//! - **`AdminStore`**: CRUD used by the administrative surface
//!
//! `SqliteStore` implements both. `WarmSnapshotFile` keeps the last good
//! snapshot on local disk so a restart can serve while the store is down.

pub mod sqlite;
pub mod types;
pub mod warm_snapshot;

pub use sqlite::SqliteStore;
pub use types::{
    AdUnitUpdate, CampaignUpdate, CreativeUpdate, LineItemUpdate, NewAdUnit, NewCampaign,
    NewCreative, NewLineItem, TargetingRuleInput,
};
pub use warm_snapshot::WarmSnapshotFile;

use crate::context::RequestContext;
use crate::error::Result;
use crate::types::{AdUnit, Campaign, Creative, Event, LineItem, TargetingRule};

/// Reads and writes the serving path depends on.
pub trait AdStore: Send + Sync {
    /// All `active` line items of `active` campaigns, joined with their
    /// targeting rules, creatives and allowed ad-unit ids.
    fn list_active_line_items(&self, ctx: &RequestContext) -> Result<Vec<LineItem>>;

    fn list_ad_units(&self, ctx: &RequestContext) -> Result<Vec<AdUnit>>;

    fn record_event(&self, ctx: &RequestContext, event: &Event) -> Result<()>;
}

/// Administrative CRUD.
///
/// `get_*`/`update_*` return `Ok(None)` for a missing id and `delete_*`
/// returns whether a row was removed; the admin service maps both to
/// `NotFound`. Replace-all operations are transactional.
pub trait AdminStore: AdStore {
    // Campaigns
    fn list_campaigns(&self, ctx: &RequestContext) -> Result<Vec<Campaign>>;
    fn get_campaign(&self, ctx: &RequestContext, id: i64) -> Result<Option<Campaign>>;
    fn create_campaign(&self, ctx: &RequestContext, input: &NewCampaign) -> Result<Campaign>;
    fn update_campaign(
        &self,
        ctx: &RequestContext,
        id: i64,
        update: &CampaignUpdate,
    ) -> Result<Option<Campaign>>;
    fn delete_campaign(&self, ctx: &RequestContext, id: i64) -> Result<bool>;

    // Line items (returned without nested rules/creatives)
    fn list_line_items(&self, ctx: &RequestContext, campaign_id: i64) -> Result<Vec<LineItem>>;
    fn get_line_item(&self, ctx: &RequestContext, id: i64) -> Result<Option<LineItem>>;
    fn create_line_item(&self, ctx: &RequestContext, input: &NewLineItem) -> Result<LineItem>;
    fn update_line_item(
        &self,
        ctx: &RequestContext,
        id: i64,
        update: &LineItemUpdate,
    ) -> Result<Option<LineItem>>;
    fn delete_line_item(&self, ctx: &RequestContext, id: i64) -> Result<bool>;

    // Targeting rules
    fn get_targeting_rules(
        &self,
        ctx: &RequestContext,
        line_item_id: i64,
    ) -> Result<Vec<TargetingRule>>;
    /// Replaces every rule of the line item, all or nothing.
    fn replace_targeting_rules(
        &self,
        ctx: &RequestContext,
        line_item_id: i64,
        rules: &[TargetingRuleInput],
    ) -> Result<Vec<TargetingRule>>;

    // Creatives
    fn list_creatives(&self, ctx: &RequestContext, line_item_id: i64) -> Result<Vec<Creative>>;
    fn get_creative(&self, ctx: &RequestContext, id: i64) -> Result<Option<Creative>>;
    fn create_creative(&self, ctx: &RequestContext, input: &NewCreative) -> Result<Creative>;
    fn update_creative(
        &self,
        ctx: &RequestContext,
        id: i64,
        update: &CreativeUpdate,
    ) -> Result<Option<Creative>>;
    fn delete_creative(&self, ctx: &RequestContext, id: i64) -> Result<bool>;

    // Ad units
    fn get_ad_unit(&self, ctx: &RequestContext, id: i64) -> Result<Option<AdUnit>>;
    fn create_ad_unit(&self, ctx: &RequestContext, input: &NewAdUnit) -> Result<AdUnit>;
    fn update_ad_unit(
        &self,
        ctx: &RequestContext,
        id: i64,
        update: &AdUnitUpdate,
    ) -> Result<Option<AdUnit>>;
    fn delete_ad_unit(&self, ctx: &RequestContext, id: i64) -> Result<bool>;

    // Line item ↔ ad unit assignment
    fn get_line_item_ad_units(&self, ctx: &RequestContext, line_item_id: i64) -> Result<Vec<i64>>;
    /// Replaces the allowed ad-unit set of the line item, all or nothing.
    fn replace_line_item_ad_units(
        &self,
        ctx: &RequestContext,
        line_item_id: i64,
        ad_unit_ids: &[i64],
    ) -> Result<Vec<i64>>;

    // Events
    fn recent_events(&self, ctx: &RequestContext, limit: usize) -> Result<Vec<Event>>;
}
