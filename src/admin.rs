//! Administrative surface - validated CRUD over the durable store.
//!
//! Every successful mutation triggers a best-effort snapshot refresh so the
//! engine serves the change without waiting for the next scheduled reload.
//! A failed refresh is logged and never fails the write.

use std::sync::Arc;

use crate::context::RequestContext;
use crate::error::{EngineError, Result};
use crate::refresh::RefreshService;
use crate::storage::{
    AdUnitUpdate, AdminStore, CampaignUpdate, CreativeUpdate, LineItemUpdate, NewAdUnit,
    NewCampaign, NewCreative, NewLineItem, TargetingRuleInput,
};
use crate::types::{AdUnit, Campaign, Creative, Event, LineItem, Size, TargetingRule};

/// Upper bound for `recent_events`.
pub const MAX_EVENT_LIMIT: usize = 1000;

pub struct AdminService {
    store: Arc<dyn AdminStore>,
    refresh: Arc<RefreshService>,
}

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::InvalidRequest(message.into())
}

fn require_name(name: &str, what: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(invalid(format!("{} name is required", what)));
    }
    Ok(())
}

fn validate_sov(sov: i32) -> Result<()> {
    if !(0..=100).contains(&sov) {
        return Err(invalid(format!(
            "sov_percentage must be between 0 and 100, got {}",
            sov
        )));
    }
    Ok(())
}

fn validate_frequency_cap(cap: i32) -> Result<()> {
    if cap < 0 {
        return Err(invalid("frequency_cap cannot be negative"));
    }
    Ok(())
}

fn validate_sizes(sizes: &[Size]) -> Result<()> {
    if sizes.iter().any(|s| s.width == 0 || s.height == 0) {
        return Err(invalid("ad unit sizes must have positive dimensions"));
    }
    Ok(())
}

fn found<T>(value: Option<T>, entity: &'static str, id: i64) -> Result<T> {
    value.ok_or_else(|| EngineError::not_found(entity, id))
}

fn deleted(removed: bool, entity: &'static str, id: i64) -> Result<()> {
    if removed {
        Ok(())
    } else {
        Err(EngineError::not_found(entity, id))
    }
}

impl AdminService {
    pub fn new(store: Arc<dyn AdminStore>, refresh: Arc<RefreshService>) -> Self {
        Self { store, refresh }
    }

    fn after_write(&self, ctx: &RequestContext) {
        self.refresh.refresh_best_effort(ctx);
    }

    // ============================================================================================
    // CAMPAIGNS
    // ============================================================================================

    pub fn list_campaigns(&self, ctx: &RequestContext) -> Result<Vec<Campaign>> {
        self.store.list_campaigns(ctx)
    }

    pub fn get_campaign(&self, ctx: &RequestContext, id: i64) -> Result<Campaign> {
        found(self.store.get_campaign(ctx, id)?, "campaign", id)
    }

    pub fn create_campaign(&self, ctx: &RequestContext, input: &NewCampaign) -> Result<Campaign> {
        require_name(&input.name, "campaign")?;
        let campaign = self.store.create_campaign(ctx, input)?;
        self.after_write(ctx);
        Ok(campaign)
    }

    pub fn update_campaign(
        &self,
        ctx: &RequestContext,
        id: i64,
        update: &CampaignUpdate,
    ) -> Result<Campaign> {
        let campaign = found(self.store.update_campaign(ctx, id, update)?, "campaign", id)?;
        self.after_write(ctx);
        Ok(campaign)
    }

    /// Removes the campaign and everything beneath it.
    pub fn delete_campaign(&self, ctx: &RequestContext, id: i64) -> Result<()> {
        deleted(self.store.delete_campaign(ctx, id)?, "campaign", id)?;
        self.after_write(ctx);
        Ok(())
    }

    // ============================================================================================
    // LINE ITEMS
    // ============================================================================================

    pub fn list_line_items(&self, ctx: &RequestContext, campaign_id: i64) -> Result<Vec<LineItem>> {
        found(self.store.get_campaign(ctx, campaign_id)?, "campaign", campaign_id)?;
        self.store.list_line_items(ctx, campaign_id)
    }

    /// Line item with its targeting rules, creatives and ad-unit ids attached.
    pub fn get_line_item(&self, ctx: &RequestContext, id: i64) -> Result<LineItem> {
        let mut line_item = found(self.store.get_line_item(ctx, id)?, "line item", id)?;
        line_item.targeting_rules = self.store.get_targeting_rules(ctx, id)?;
        line_item.creatives = self.store.list_creatives(ctx, id)?;
        line_item.ad_unit_ids = self.store.get_line_item_ad_units(ctx, id)?;
        Ok(line_item)
    }

    pub fn create_line_item(&self, ctx: &RequestContext, input: &NewLineItem) -> Result<LineItem> {
        require_name(&input.name, "line item")?;
        validate_sov(input.sov_percentage)?;
        validate_frequency_cap(input.frequency_cap)?;
        let line_item = self.store.create_line_item(ctx, input)?;
        self.after_write(ctx);
        Ok(line_item)
    }

    pub fn update_line_item(
        &self,
        ctx: &RequestContext,
        id: i64,
        update: &LineItemUpdate,
    ) -> Result<LineItem> {
        if let Some(sov) = update.sov_percentage {
            validate_sov(sov)?;
        }
        if let Some(cap) = update.frequency_cap {
            validate_frequency_cap(cap)?;
        }
        let line_item = found(self.store.update_line_item(ctx, id, update)?, "line item", id)?;
        self.after_write(ctx);
        Ok(line_item)
    }

    pub fn delete_line_item(&self, ctx: &RequestContext, id: i64) -> Result<()> {
        deleted(self.store.delete_line_item(ctx, id)?, "line item", id)?;
        self.after_write(ctx);
        Ok(())
    }

    pub fn get_targeting_rules(
        &self,
        ctx: &RequestContext,
        line_item_id: i64,
    ) -> Result<Vec<TargetingRule>> {
        found(self.store.get_line_item(ctx, line_item_id)?, "line item", line_item_id)?;
        self.store.get_targeting_rules(ctx, line_item_id)
    }

    /// Replaces the whole rule set; an empty list removes all targeting.
    pub fn set_targeting_rules(
        &self,
        ctx: &RequestContext,
        line_item_id: i64,
        rules: &[TargetingRuleInput],
    ) -> Result<Vec<TargetingRule>> {
        if rules.iter().any(|r| r.key.trim().is_empty()) {
            return Err(invalid("targeting rule key is required"));
        }
        let stored = self
            .store
            .replace_targeting_rules(ctx, line_item_id, rules)?;
        self.after_write(ctx);
        Ok(stored)
    }

    pub fn get_line_item_ad_units(&self, ctx: &RequestContext, line_item_id: i64) -> Result<Vec<i64>> {
        found(self.store.get_line_item(ctx, line_item_id)?, "line item", line_item_id)?;
        self.store.get_line_item_ad_units(ctx, line_item_id)
    }

    /// Restricts the line item to these ad units; empty serves everywhere.
    pub fn set_line_item_ad_units(
        &self,
        ctx: &RequestContext,
        line_item_id: i64,
        ad_unit_ids: &[i64],
    ) -> Result<Vec<i64>> {
        let stored = self
            .store
            .replace_line_item_ad_units(ctx, line_item_id, ad_unit_ids)?;
        self.after_write(ctx);
        Ok(stored)
    }

    // ============================================================================================
    // CREATIVES
    // ============================================================================================

    pub fn list_creatives(&self, ctx: &RequestContext, line_item_id: i64) -> Result<Vec<Creative>> {
        found(self.store.get_line_item(ctx, line_item_id)?, "line item", line_item_id)?;
        self.store.list_creatives(ctx, line_item_id)
    }

    pub fn get_creative(&self, ctx: &RequestContext, id: i64) -> Result<Creative> {
        found(self.store.get_creative(ctx, id)?, "creative", id)
    }

    pub fn create_creative(&self, ctx: &RequestContext, input: &NewCreative) -> Result<Creative> {
        require_name(&input.name, "creative")?;
        if input.width == 0 || input.height == 0 {
            return Err(invalid("creative width and height must be positive"));
        }
        if input.image_url.trim().is_empty() {
            return Err(invalid("creative image_url is required"));
        }
        let creative = self.store.create_creative(ctx, input)?;
        self.after_write(ctx);
        Ok(creative)
    }

    pub fn update_creative(
        &self,
        ctx: &RequestContext,
        id: i64,
        update: &CreativeUpdate,
    ) -> Result<Creative> {
        if update.width == Some(0) || update.height == Some(0) {
            return Err(invalid("creative width and height must be positive"));
        }
        let creative = found(self.store.update_creative(ctx, id, update)?, "creative", id)?;
        self.after_write(ctx);
        Ok(creative)
    }

    pub fn delete_creative(&self, ctx: &RequestContext, id: i64) -> Result<()> {
        deleted(self.store.delete_creative(ctx, id)?, "creative", id)?;
        self.after_write(ctx);
        Ok(())
    }

    // ============================================================================================
    // AD UNITS
    // ============================================================================================

    pub fn list_ad_units(&self, ctx: &RequestContext) -> Result<Vec<AdUnit>> {
        self.store.list_ad_units(ctx)
    }

    pub fn get_ad_unit(&self, ctx: &RequestContext, id: i64) -> Result<AdUnit> {
        found(self.store.get_ad_unit(ctx, id)?, "ad unit", id)
    }

    pub fn create_ad_unit(&self, ctx: &RequestContext, input: &NewAdUnit) -> Result<AdUnit> {
        if input.code.trim().is_empty() {
            return Err(invalid("ad unit code is required"));
        }
        require_name(&input.name, "ad unit")?;
        validate_sizes(&input.sizes)?;
        let unit = self.store.create_ad_unit(ctx, input)?;
        self.after_write(ctx);
        Ok(unit)
    }

    pub fn update_ad_unit(
        &self,
        ctx: &RequestContext,
        id: i64,
        update: &AdUnitUpdate,
    ) -> Result<AdUnit> {
        if let Some(sizes) = &update.sizes {
            validate_sizes(sizes)?;
        }
        let unit = found(self.store.update_ad_unit(ctx, id, update)?, "ad unit", id)?;
        self.after_write(ctx);
        Ok(unit)
    }

    pub fn delete_ad_unit(&self, ctx: &RequestContext, id: i64) -> Result<()> {
        deleted(self.store.delete_ad_unit(ctx, id)?, "ad unit", id)?;
        self.after_write(ctx);
        Ok(())
    }

    // ============================================================================================
    // EVENTS
    // ============================================================================================

    /// Newest first, `limit` clamped to [`MAX_EVENT_LIMIT`].
    pub fn recent_events(&self, ctx: &RequestContext, limit: usize) -> Result<Vec<Event>> {
        self.store.recent_events(ctx, limit.min(MAX_EVENT_LIMIT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SnapshotCache;
    use crate::storage::SqliteStore;

    fn service() -> (Arc<SnapshotCache>, AdminService) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let cache = Arc::new(SnapshotCache::new());
        let refresh = Arc::new(RefreshService::new(Arc::clone(&cache), store.clone()));
        (cache, AdminService::new(store, refresh))
    }

    fn ctx() -> RequestContext {
        RequestContext::background()
    }

    #[test]
    fn test_create_campaign_requires_name() {
        let (_, admin) = service();
        let err = admin
            .create_campaign(&ctx(), &NewCampaign::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));
    }

    #[test]
    fn test_writes_refresh_the_snapshot() {
        let (cache, admin) = service();
        let campaign = admin
            .create_campaign(
                &ctx(),
                &NewCampaign {
                    name: "Spring".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        let line_item = admin
            .create_line_item(
                &ctx(),
                &NewLineItem {
                    campaign_id: campaign.id,
                    name: "Homepage takeover".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(cache.active_line_items().len(), 1);

        admin
            .update_line_item(
                &ctx(),
                line_item.id,
                &LineItemUpdate {
                    status: Some(crate::types::Status::Paused),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(cache.active_line_items().is_empty());
    }

    #[test]
    fn test_missing_entities_are_not_found() {
        let (_, admin) = service();
        assert_eq!(
            admin.get_campaign(&ctx(), 42).unwrap_err(),
            EngineError::not_found("campaign", 42)
        );
        assert_eq!(
            admin.delete_creative(&ctx(), 7).unwrap_err(),
            EngineError::not_found("creative", 7)
        );
        assert_eq!(
            admin
                .update_ad_unit(&ctx(), 3, &AdUnitUpdate::default())
                .unwrap_err(),
            EngineError::not_found("ad unit", 3)
        );
        assert_eq!(
            admin.set_targeting_rules(&ctx(), 9, &[]).unwrap_err(),
            EngineError::not_found("line item", 9)
        );
    }

    #[test]
    fn test_line_item_validation() {
        let (_, admin) = service();
        let err = admin
            .create_line_item(
                &ctx(),
                &NewLineItem {
                    campaign_id: 1,
                    name: "Too much".into(),
                    sov_percentage: 120,
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));

        let err = admin
            .update_line_item(
                &ctx(),
                1,
                &LineItemUpdate {
                    frequency_cap: Some(-1),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));
    }

    #[test]
    fn test_rule_keys_required() {
        let (_, admin) = service();
        let rules = [TargetingRuleInput {
            key: " ".into(),
            operator: "IN".into(),
            values: vec!["US".into()],
        }];
        assert!(matches!(
            admin.set_targeting_rules(&ctx(), 1, &rules).unwrap_err(),
            EngineError::InvalidRequest(_)
        ));
    }

    #[test]
    fn test_ad_unit_validation() {
        let (_, admin) = service();
        let err = admin
            .create_ad_unit(
                &ctx(),
                &NewAdUnit {
                    code: "home_top".into(),
                    name: "Home top".into(),
                    sizes: vec![Size::new(300, 0)],
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));

        let unit = admin
            .create_ad_unit(
                &ctx(),
                &NewAdUnit {
                    code: "home_top".into(),
                    name: "Home top".into(),
                    sizes: vec![Size::new(300, 250)],
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(admin.get_ad_unit(&ctx(), unit.id).unwrap().code, "home_top");
    }

    #[test]
    fn test_get_line_item_is_hydrated() {
        let (_, admin) = service();
        let campaign = admin
            .create_campaign(
                &ctx(),
                &NewCampaign {
                    name: "Spring".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        let line_item = admin
            .create_line_item(
                &ctx(),
                &NewLineItem {
                    campaign_id: campaign.id,
                    name: "Sidebar".into(),
                    ..Default::default()
                },
            )
            .unwrap();
        admin
            .create_creative(
                &ctx(),
                &NewCreative {
                    line_item_id: line_item.id,
                    name: "MPU".into(),
                    width: 300,
                    height: 250,
                    image_url: "https://cdn.example/mpu.png".into(),
                    click_url: "https://shop.example".into(),
                    status: None,
                },
            )
            .unwrap();
        admin
            .set_targeting_rules(
                &ctx(),
                line_item.id,
                &[TargetingRuleInput {
                    key: "country".into(),
                    operator: String::new(),
                    values: vec!["US".into()],
                }],
            )
            .unwrap();

        let hydrated = admin.get_line_item(&ctx(), line_item.id).unwrap();
        assert_eq!(hydrated.creatives.len(), 1);
        assert_eq!(hydrated.targeting_rules.len(), 1);
        assert!(hydrated.ad_unit_ids.is_empty());
    }
}
