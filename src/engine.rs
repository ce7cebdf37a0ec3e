//! Ad decision engine - turns an ad request into per-slot ad results.
//!
//! Per request:
//! 1. Resolve the user id (request, then caller fallback, then a fresh UUID).
//! 2. Take one snapshot for the whole request.
//! 3. For each slot: match, apply the ad-unit allow-list, drop capped line
//!    items, run the selection policy, pick a creative, count the impression
//!    and stamp tracking URLs.
//!
//! Slots without an eligible ad are left out of the response.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::debug;
use uuid::Uuid;

use crate::cache::SnapshotCache;
use crate::error::{EngineError, Result};
use crate::frequency::FrequencyCapper;
use crate::selection::{self, RandomSource, ThreadRandom};
use crate::snapshot::Snapshot;
use crate::targeting;
use crate::tracking::{BeaconParams, TrackingUrlBuilder};
use crate::types::{AdRequest, AdResponse, AdResult, AdSlot, Creative, LineItem, Size};

/// Targeting key copied into tracking URLs as `sec`.
const SECTION_KEY: &str = "section";

/// Point-in-time decision counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub requests: u64,
    pub slots: u64,
    pub filled: u64,
    pub unfilled: u64,
}

impl EngineStats {
    pub fn fill_rate(&self) -> f64 {
        if self.slots == 0 {
            0.0
        } else {
            self.filled as f64 / self.slots as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    slots: AtomicU64,
    filled: AtomicU64,
    unfilled: AtomicU64,
}

pub struct AdDecisionEngine {
    cache: Arc<SnapshotCache>,
    capper: Arc<FrequencyCapper>,
    urls: TrackingUrlBuilder,
    counters: Counters,
}

impl AdDecisionEngine {
    pub fn new(
        cache: Arc<SnapshotCache>,
        capper: Arc<FrequencyCapper>,
        urls: TrackingUrlBuilder,
    ) -> Self {
        Self {
            cache,
            capper,
            urls,
            counters: Counters::default(),
        }
    }

    pub fn cache(&self) -> &Arc<SnapshotCache> {
        &self.cache
    }

    pub fn capper(&self) -> &Arc<FrequencyCapper> {
        &self.capper
    }

    /// Decides every slot with thread-local randomness.
    ///
    /// `fallback_user_id` is used when the request carries no user id,
    /// typically a cookie or header value.
    pub fn get_ads(&self, req: &AdRequest, fallback_user_id: Option<&str>) -> Result<AdResponse> {
        self.get_ads_with(req, fallback_user_id, &mut ThreadRandom)
    }

    pub fn get_ads_with(
        &self,
        req: &AdRequest,
        fallback_user_id: Option<&str>,
        rng: &mut dyn RandomSource,
    ) -> Result<AdResponse> {
        if req.slots.is_empty() {
            return Err(EngineError::InvalidRequest(
                "at least one slot is required".to_string(),
            ));
        }
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        let user_id = resolve_user_id(req, fallback_user_id);
        let snapshot = self.cache.snapshot();

        let mut ads = Vec::with_capacity(req.slots.len());
        for slot in &req.slots {
            self.counters.slots.fetch_add(1, Ordering::Relaxed);
            match self.decide_slot(&snapshot, req, slot, &user_id, rng) {
                Some(ad) => {
                    self.counters.filled.fetch_add(1, Ordering::Relaxed);
                    ads.push(ad);
                }
                None => {
                    self.counters.unfilled.fetch_add(1, Ordering::Relaxed);
                    debug!("No eligible ad for slot {}", slot.id);
                }
            }
        }

        Ok(AdResponse { ads })
    }

    fn decide_slot(
        &self,
        snapshot: &Snapshot,
        req: &AdRequest,
        slot: &AdSlot,
        user_id: &str,
        rng: &mut dyn RandomSource,
    ) -> Option<AdResult> {
        let responsive = slot.is_responsive();
        let ad_unit = slot.ad_unit_code().and_then(|code| snapshot.ad_unit_by_code(code));
        let allowed_sizes: &[Size] = match (responsive, ad_unit) {
            (true, Some(unit)) => unit.sizes.as_slice(),
            _ => &[],
        };

        let mut matched = if responsive {
            targeting::match_responsive(
                &req.targeting,
                snapshot.line_items(),
                slot.max_width,
                allowed_sizes,
            )
        } else {
            targeting::match_fixed(&req.targeting, snapshot.line_items(), slot.width, slot.height)
        };

        if slot.ad_unit_code().is_some() {
            matched = targeting::filter_by_ad_unit(matched, ad_unit);
        }

        matched.sort_by(|a, b| b.priority.cmp(&a.priority));

        let eligible: Vec<&LineItem> = matched
            .into_iter()
            .filter(|li| self.capper.check(li.id, user_id, li.frequency_cap))
            .collect();
        if eligible.is_empty() {
            return None;
        }

        let winner = selection::select(&eligible, rng)?;
        let creative: &Creative = if responsive {
            targeting::select_creative_responsive(winner, slot.max_width, allowed_sizes)?
        } else {
            targeting::select_creative(winner, slot.width, slot.height)?
        };

        self.capper.increment(winner.id, user_id);

        let impression_id = Uuid::new_v4().to_string();
        let section = req
            .targeting
            .get(SECTION_KEY)
            .map(String::as_str)
            .unwrap_or_default();
        let tracking = self.urls.build(
            &BeaconParams {
                impression_id: &impression_id,
                line_item_id: winner.id,
                creative_id: creative.id,
                user_id,
                platform: &req.platform,
                country: &req.country,
                section,
                ad_unit: slot.ad_unit_code().unwrap_or_default(),
            },
            &creative.click_url,
        );

        Some(AdResult {
            slot_id: slot.id.clone(),
            impression_id,
            line_item_id: winner.id,
            creative_id: creative.id,
            width: creative.width,
            height: creative.height,
            image_url: creative.image_url.clone(),
            click_url: tracking.click.clone(),
            tracking,
        })
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            requests: self.counters.requests.load(Ordering::Relaxed),
            slots: self.counters.slots.load(Ordering::Relaxed),
            filled: self.counters.filled.load(Ordering::Relaxed),
            unfilled: self.counters.unfilled.load(Ordering::Relaxed),
        }
    }
}

fn resolve_user_id(req: &AdRequest, fallback: Option<&str>) -> String {
    req.user_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .or_else(|| fallback.filter(|id| !id.is_empty()))
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::SequenceRandom;
    use crate::snapshot::SnapshotData;
    use crate::types::{AdUnit, Operator, Status, TargetingRule};
    use std::collections::HashMap;

    fn creative(id: i64, line_item_id: i64, width: u32, height: u32) -> Creative {
        Creative {
            id,
            line_item_id,
            name: format!("c-{}", id),
            width,
            height,
            image_url: format!("https://cdn.example/{}.png", id),
            click_url: "https://advertiser.example/landing".into(),
            status: Status::Active,
        }
    }

    fn line_item(id: i64, priority: i32, creatives: Vec<Creative>) -> LineItem {
        LineItem {
            id,
            campaign_id: 1,
            name: format!("li-{}", id),
            priority,
            weight: 100,
            frequency_cap: 0,
            frequency_cap_period: "day".into(),
            sov_percentage: 0,
            status: Status::Active,
            targeting_rules: vec![],
            creatives,
            ad_unit_ids: vec![],
        }
    }

    fn engine_with(line_items: Vec<LineItem>, ad_units: Vec<AdUnit>) -> AdDecisionEngine {
        let cache = Arc::new(SnapshotCache::new());
        cache.install(SnapshotData {
            line_items,
            ad_units,
        });
        AdDecisionEngine::new(
            cache,
            Arc::new(FrequencyCapper::new()),
            TrackingUrlBuilder::new("http://localhost:8080"),
        )
    }

    fn fixed_slot(id: &str, width: u32, height: u32) -> AdSlot {
        AdSlot {
            id: id.into(),
            width,
            height,
            ..Default::default()
        }
    }

    fn request(slots: Vec<AdSlot>) -> AdRequest {
        AdRequest {
            slots,
            user_id: Some("user-1".into()),
            platform: "web".into(),
            country: "US".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_slots_rejected() {
        let engine = engine_with(vec![], vec![]);
        let err = engine.get_ads(&request(vec![]), None).unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));
    }

    #[test]
    fn test_empty_snapshot_serves_nothing() {
        let engine = engine_with(vec![], vec![]);
        let response = engine
            .get_ads(&request(vec![fixed_slot("s1", 300, 250)]), None)
            .unwrap();
        assert!(response.ads.is_empty());
        assert_eq!(engine.stats().unfilled, 1);
    }

    #[test]
    fn test_fixed_slot_result_fields() {
        let engine = engine_with(vec![line_item(1, 5, vec![creative(10, 1, 300, 250)])], vec![]);
        let mut req = request(vec![fixed_slot("s1", 300, 250)]);
        req.targeting = HashMap::from([("section".to_string(), "sports".to_string())]);

        let response = engine.get_ads(&req, None).unwrap();
        assert_eq!(response.ads.len(), 1);
        let ad = &response.ads[0];
        assert_eq!(ad.slot_id, "s1");
        assert_eq!((ad.line_item_id, ad.creative_id), (1, 10));
        assert_eq!((ad.width, ad.height), (300, 250));
        assert_eq!(ad.click_url, ad.tracking.click);
        assert!(ad.tracking.impression.contains(&format!("id={}", ad.impression_id)));
        assert!(ad.tracking.impression.contains("sec=sports"));
        assert!(ad.tracking.impression.contains("u=user-1"));
        assert!(ad
            .tracking
            .click
            .contains("url=https%3A%2F%2Fadvertiser.example%2Flanding"));
    }

    #[test]
    fn test_slots_are_independent() {
        let engine = engine_with(vec![line_item(1, 5, vec![creative(10, 1, 300, 250)])], vec![]);
        let req = request(vec![
            fixed_slot("s1", 728, 90),
            fixed_slot("s2", 300, 250),
        ]);
        let response = engine.get_ads(&req, None).unwrap();
        assert_eq!(response.ads.len(), 1);
        assert_eq!(response.ads[0].slot_id, "s2");
        let stats = engine.stats();
        assert_eq!((stats.slots, stats.filled, stats.unfilled), (2, 1, 1));
    }

    #[test]
    fn test_impression_ids_are_unique() {
        let engine = engine_with(vec![line_item(1, 5, vec![creative(10, 1, 300, 250)])], vec![]);
        let req = request(vec![fixed_slot("s1", 300, 250), fixed_slot("s2", 300, 250)]);
        let response = engine.get_ads(&req, None).unwrap();
        assert_eq!(response.ads.len(), 2);
        assert_ne!(response.ads[0].impression_id, response.ads[1].impression_id);
    }

    #[test]
    fn test_frequency_cap_falls_through_to_lower_priority() {
        let mut capped = line_item(1, 10, vec![creative(10, 1, 300, 250)]);
        capped.frequency_cap = 1;
        let backup = line_item(2, 5, vec![creative(20, 2, 300, 250)]);
        let engine = engine_with(vec![capped, backup], vec![]);
        let req = request(vec![fixed_slot("s1", 300, 250)]);

        let first = engine.get_ads(&req, None).unwrap();
        assert_eq!(first.ads[0].line_item_id, 1);
        let second = engine.get_ads(&req, None).unwrap();
        assert_eq!(second.ads[0].line_item_id, 2);

        // A different user is not affected
        let mut fresh = req.clone();
        fresh.user_id = Some("user-2".into());
        assert_eq!(engine.get_ads(&fresh, None).unwrap().ads[0].line_item_id, 1);
    }

    #[test]
    fn test_sov_gap_does_not_count_impression() {
        let mut sov = line_item(1, 5, vec![creative(10, 1, 300, 250)]);
        sov.sov_percentage = 40;
        sov.frequency_cap = 1;
        let engine = engine_with(vec![sov], vec![]);
        let req = request(vec![fixed_slot("s1", 300, 250)]);

        // 70 lands in the unfilled gap
        let mut rng = SequenceRandom::new(vec![70, 10]);
        assert!(engine.get_ads_with(&req, None, &mut rng).unwrap().ads.is_empty());
        assert_eq!(engine.capper().count(1, "user-1"), 0);
        assert_eq!(engine.get_ads_with(&req, None, &mut rng).unwrap().ads.len(), 1);
    }

    #[test]
    fn test_responsive_slot_uses_ad_unit_sizes() {
        let unit = AdUnit {
            id: 3,
            code: "home_top".into(),
            name: "Home top".into(),
            description: String::new(),
            platform: "web".into(),
            sizes: vec![Size::new(320, 50)],
            status: Status::Active,
        };
        let item = line_item(
            1,
            5,
            vec![creative(10, 1, 300, 250), creative(11, 1, 320, 50)],
        );
        let engine = engine_with(vec![item], vec![unit]);

        let slot = AdSlot {
            id: "s1".into(),
            max_width: 728,
            ad_unit: Some("home_top".into()),
            ..Default::default()
        };
        let response = engine.get_ads(&request(vec![slot.clone()]), None).unwrap();
        assert_eq!(response.ads[0].creative_id, 11);
        assert!(response.ads[0].tracking.impression.contains("au=home_top"));

        // Without the ad unit the largest creative wins
        let open = AdSlot {
            ad_unit: None,
            ..slot
        };
        let response = engine.get_ads(&request(vec![open]), None).unwrap();
        assert_eq!(response.ads[0].creative_id, 10);
    }

    #[test]
    fn test_responsive_slot_with_unknown_ad_unit_is_unrestricted() {
        let unit = AdUnit {
            id: 3,
            code: "home_top".into(),
            name: "Home top".into(),
            description: String::new(),
            platform: "web".into(),
            sizes: vec![Size::new(320, 50)],
            status: Status::Active,
        };
        let mut item = line_item(
            1,
            5,
            vec![creative(10, 1, 300, 250), creative(11, 1, 320, 50)],
        );
        item.ad_unit_ids = vec![99];
        let engine = engine_with(vec![item], vec![unit]);

        let slot = AdSlot {
            id: "s1".into(),
            max_width: 728,
            ad_unit: Some("missing_unit".into()),
            ..Default::default()
        };
        let response = engine.get_ads(&request(vec![slot]), None).unwrap();
        assert_eq!(response.ads.len(), 1);
        assert_eq!(response.ads[0].line_item_id, 1);
        assert_eq!(response.ads[0].creative_id, 10);
    }

    #[test]
    fn test_ad_unit_allow_list() {
        let unit = AdUnit {
            id: 3,
            code: "article_side".into(),
            name: "Article side".into(),
            description: String::new(),
            platform: "web".into(),
            sizes: vec![],
            status: Status::Active,
        };
        let mut elsewhere = line_item(1, 10, vec![creative(10, 1, 300, 250)]);
        elsewhere.ad_unit_ids = vec![99];
        let open = line_item(2, 5, vec![creative(20, 2, 300, 250)]);
        let engine = engine_with(vec![elsewhere, open], vec![unit]);

        let mut slot = fixed_slot("s1", 300, 250);
        slot.ad_unit = Some("article_side".into());
        let response = engine.get_ads(&request(vec![slot.clone()]), None).unwrap();
        assert_eq!(response.ads[0].line_item_id, 2);

        // Unknown code applies no filtering
        slot.ad_unit = Some("nope".into());
        let response = engine.get_ads(&request(vec![slot]), None).unwrap();
        assert_eq!(response.ads[0].line_item_id, 1);
    }

    #[test]
    fn test_targeting_is_applied() {
        let mut item = line_item(1, 5, vec![creative(10, 1, 300, 250)]);
        item.targeting_rules = vec![TargetingRule {
            id: 1,
            line_item_id: 1,
            key: "country".into(),
            operator: Operator::In,
            values: vec!["US".into(), "CA".into()],
        }];
        let engine = engine_with(vec![item], vec![]);

        let mut req = request(vec![fixed_slot("s1", 300, 250)]);
        req.targeting = HashMap::from([("country".to_string(), "FR".to_string())]);
        assert!(engine.get_ads(&req, None).unwrap().ads.is_empty());

        req.targeting = HashMap::from([("country".to_string(), "CA".to_string())]);
        assert_eq!(engine.get_ads(&req, None).unwrap().ads.len(), 1);
    }

    #[test]
    fn test_user_id_resolution() {
        let mut req = request(vec![]);
        assert_eq!(resolve_user_id(&req, Some("cookie")), "user-1");

        req.user_id = Some(String::new());
        assert_eq!(resolve_user_id(&req, Some("cookie")), "cookie");

        req.user_id = None;
        let generated = resolve_user_id(&req, None);
        assert!(Uuid::parse_str(&generated).is_ok());
    }
}
