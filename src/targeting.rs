//! Targeting matcher.
//!
//! Decides which line items may serve into a slot and which of their
//! creatives fits it. Everything here is a pure function over borrowed
//! snapshot data; eligible candidates are returned as references into the
//! snapshot, never copies.
//!
//! # Eligibility
//! A line item is eligible when it has at least one `active` creative that
//! fits the slot AND every one of its targeting rules passes:
//! - a rule fails outright when its key is missing from the request
//! - `EQ`/`IN`: request value equals one of the rule's values
//! - `NOT_IN`: request value equals none of them
//! - any other operator behaves like `IN`
//! - no rules at all matches every request

use std::collections::HashMap;

use crate::types::{AdUnit, Creative, LineItem, Operator, Size, TargetingRule};

/// Request targeting key/value pairs.
pub type TargetingMap = HashMap<String, String>;

// ================================================================================================
// RULE EVALUATION
// ================================================================================================

/// Evaluates a single rule against the request targeting.
pub fn rule_matches(targeting: &TargetingMap, rule: &TargetingRule) -> bool {
    let Some(value) = targeting.get(&rule.key) else {
        return false;
    };
    let listed = rule.values.iter().any(|v| v == value);

    match rule.operator {
        Operator::NotIn => !listed,
        Operator::Eq | Operator::In | Operator::Other(_) => listed,
    }
}

/// Conjunction of all rules; rule-less line items match unconditionally.
pub fn matches_targeting(targeting: &TargetingMap, rules: &[TargetingRule]) -> bool {
    rules.iter().all(|rule| rule_matches(targeting, rule))
}

/// An empty allow-list permits any size.
#[inline]
pub fn size_allowed(width: u32, height: u32, allowed: &[Size]) -> bool {
    allowed.is_empty()
        || allowed
            .iter()
            .any(|size| size.width == width && size.height == height)
}

#[inline]
fn fits_fixed(creative: &Creative, width: u32, height: u32) -> bool {
    creative.status.is_active() && creative.width == width && creative.height == height
}

#[inline]
fn fits_responsive(creative: &Creative, max_width: u32, allowed: &[Size]) -> bool {
    creative.status.is_active()
        && creative.width <= max_width
        && size_allowed(creative.width, creative.height, allowed)
}

// ================================================================================================
// CANDIDATE MATCHING
// ================================================================================================

/// Line items eligible for a fixed `width`×`height` slot, in input order.
pub fn match_fixed<'a>(
    targeting: &TargetingMap,
    candidates: &'a [LineItem],
    width: u32,
    height: u32,
) -> Vec<&'a LineItem> {
    candidates
        .iter()
        .filter(|li| li.creatives.iter().any(|c| fits_fixed(c, width, height)))
        .filter(|li| matches_targeting(targeting, &li.targeting_rules))
        .collect()
}

/// Line items eligible for a responsive slot bounded by `max_width`.
///
/// `allowed_sizes` usually comes from the slot's ad unit; empty means any size.
pub fn match_responsive<'a>(
    targeting: &TargetingMap,
    candidates: &'a [LineItem],
    max_width: u32,
    allowed_sizes: &[Size],
) -> Vec<&'a LineItem> {
    candidates
        .iter()
        .filter(|li| {
            li.creatives
                .iter()
                .any(|c| fits_responsive(c, max_width, allowed_sizes))
        })
        .filter(|li| matches_targeting(targeting, &li.targeting_rules))
        .collect()
}

// ================================================================================================
// CREATIVE SELECTION
// ================================================================================================

/// First active creative with exactly these dimensions, in stored order.
pub fn select_creative(line_item: &LineItem, width: u32, height: u32) -> Option<&Creative> {
    line_item
        .creatives
        .iter()
        .find(|c| fits_fixed(c, width, height))
}

/// Largest-area active creative that fits `max_width` and the size list.
/// The first creative encountered wins ties.
pub fn select_creative_responsive<'a>(
    line_item: &'a LineItem,
    max_width: u32,
    allowed_sizes: &[Size],
) -> Option<&'a Creative> {
    let mut best: Option<&Creative> = None;
    for creative in line_item
        .creatives
        .iter()
        .filter(|c| fits_responsive(c, max_width, allowed_sizes))
    {
        if best.map_or(true, |b| creative.area() > b.area()) {
            best = Some(creative);
        }
    }
    best
}

// ================================================================================================
// AD-UNIT ALLOW-LIST
// ================================================================================================

/// Keeps line items allowed to serve into `ad_unit`.
///
/// A line item with no ad-unit restriction serves everywhere. An unresolved
/// ad unit (`None`) applies no filtering.
pub fn filter_by_ad_unit<'a>(
    candidates: Vec<&'a LineItem>,
    ad_unit: Option<&AdUnit>,
) -> Vec<&'a LineItem> {
    let Some(unit) = ad_unit else {
        return candidates;
    };
    candidates
        .into_iter()
        .filter(|li| li.ad_unit_ids.is_empty() || li.ad_unit_ids.contains(&unit.id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Status;

    fn creative(id: i64, width: u32, height: u32, status: Status) -> Creative {
        Creative {
            id,
            line_item_id: 1,
            name: format!("{}x{}", width, height),
            width,
            height,
            image_url: format!("https://cdn.example/{}.png", id),
            click_url: "https://advertiser.example".into(),
            status,
        }
    }

    fn rule(key: &str, operator: Operator, values: &[&str]) -> TargetingRule {
        TargetingRule {
            id: 0,
            line_item_id: 1,
            key: key.into(),
            operator,
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    fn line_item(id: i64, creatives: Vec<Creative>, rules: Vec<TargetingRule>) -> LineItem {
        LineItem {
            id,
            campaign_id: 1,
            name: format!("li-{}", id),
            priority: 5,
            weight: 100,
            frequency_cap: 0,
            frequency_cap_period: "day".into(),
            sov_percentage: 0,
            status: Status::Active,
            targeting_rules: rules,
            creatives,
            ad_unit_ids: vec![],
        }
    }

    fn targeting(pairs: &[(&str, &str)]) -> TargetingMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_in_rule() {
        let r = rule("country", Operator::In, &["US", "CA"]);
        assert!(rule_matches(&targeting(&[("country", "US")]), &r));
        assert!(!rule_matches(&targeting(&[("country", "FR")]), &r));
        assert!(!rule_matches(&targeting(&[]), &r));
    }

    #[test]
    fn test_not_in_rule() {
        let r = rule("country", Operator::NotIn, &["US"]);
        assert!(rule_matches(&targeting(&[("country", "FR")]), &r));
        assert!(!rule_matches(&targeting(&[("country", "US")]), &r));
        // Missing key fails even for NOT_IN
        assert!(!rule_matches(&targeting(&[]), &r));
    }

    #[test]
    fn test_unknown_operator_behaves_like_in() {
        let r = rule("section", Operator::Other("CONTAINS".into()), &["sports"]);
        assert!(rule_matches(&targeting(&[("section", "sports")]), &r));
        assert!(!rule_matches(&targeting(&[("section", "spo")]), &r));
    }

    #[test]
    fn test_rules_are_conjunctive() {
        let rules = vec![
            rule("country", Operator::Eq, &["US"]),
            rule("section", Operator::NotIn, &["news"]),
        ];
        assert!(matches_targeting(
            &targeting(&[("country", "US"), ("section", "sports")]),
            &rules
        ));
        assert!(!matches_targeting(
            &targeting(&[("country", "US"), ("section", "news")]),
            &rules
        ));
        assert!(matches_targeting(&targeting(&[]), &[]));
    }

    #[test]
    fn test_match_fixed_requires_active_exact_size() {
        let items = vec![
            line_item(1, vec![creative(10, 300, 250, Status::Active)], vec![]),
            line_item(2, vec![creative(20, 300, 250, Status::Paused)], vec![]),
            line_item(3, vec![creative(30, 728, 90, Status::Active)], vec![]),
        ];
        let matched = match_fixed(&targeting(&[]), &items, 300, 250);
        assert_eq!(matched.iter().map(|li| li.id).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_match_fixed_applies_targeting() {
        let items = vec![line_item(
            1,
            vec![creative(10, 300, 250, Status::Active)],
            vec![rule("country", Operator::In, &["US", "CA"])],
        )];
        assert_eq!(match_fixed(&targeting(&[("country", "CA")]), &items, 300, 250).len(), 1);
        assert!(match_fixed(&targeting(&[("country", "FR")]), &items, 300, 250).is_empty());
    }

    #[test]
    fn test_match_responsive_respects_size_list() {
        let items = vec![
            line_item(1, vec![creative(10, 320, 100, Status::Active)], vec![]),
            line_item(2, vec![creative(20, 970, 250, Status::Active)], vec![]),
        ];
        let any = match_responsive(&targeting(&[]), &items, 728, &[]);
        assert_eq!(any.iter().map(|li| li.id).collect::<Vec<_>>(), vec![1]);

        let allowed = [Size::new(300, 250)];
        assert!(match_responsive(&targeting(&[]), &items, 728, &allowed).is_empty());
    }

    #[test]
    fn test_select_creative_first_in_order() {
        let li = line_item(
            1,
            vec![
                creative(10, 300, 250, Status::Paused),
                creative(11, 300, 250, Status::Active),
                creative(12, 300, 250, Status::Active),
            ],
            vec![],
        );
        assert_eq!(select_creative(&li, 300, 250).map(|c| c.id), Some(11));
        assert!(select_creative(&li, 728, 90).is_none());
    }

    #[test]
    fn test_select_creative_responsive_largest_area() {
        let li = line_item(
            1,
            vec![
                creative(10, 320, 100, Status::Active),
                creative(11, 300, 250, Status::Active),
                creative(12, 970, 250, Status::Active),
            ],
            vec![],
        );
        assert_eq!(select_creative_responsive(&li, 728, &[]).map(|c| c.id), Some(11));
    }

    #[test]
    fn test_select_creative_responsive_tie_keeps_first() {
        let li = line_item(
            1,
            vec![
                creative(10, 250, 300, Status::Active),
                creative(11, 300, 250, Status::Active),
            ],
            vec![],
        );
        assert_eq!(select_creative_responsive(&li, 728, &[]).map(|c| c.id), Some(10));
        let allowed = [Size::new(300, 250)];
        assert_eq!(
            select_creative_responsive(&li, 728, &allowed).map(|c| c.id),
            Some(11)
        );
    }

    #[test]
    fn test_filter_by_ad_unit() {
        let mut restricted = line_item(1, vec![], vec![]);
        restricted.ad_unit_ids = vec![7];
        let mut elsewhere = line_item(2, vec![], vec![]);
        elsewhere.ad_unit_ids = vec![8];
        let open = line_item(3, vec![], vec![]);
        let items = vec![restricted, elsewhere, open];

        let unit = AdUnit {
            id: 7,
            code: "home_top".into(),
            name: "Home top".into(),
            description: String::new(),
            platform: "web".into(),
            sizes: vec![],
            status: Status::Active,
        };

        let all: Vec<&LineItem> = items.iter().collect();
        let kept = filter_by_ad_unit(all.clone(), Some(&unit));
        assert_eq!(kept.iter().map(|li| li.id).collect::<Vec<_>>(), vec![1, 3]);

        // Unresolved code fails open
        assert_eq!(filter_by_ad_unit(all, None).len(), 3);
    }
}
