//! Selection policy - picks one winner per slot.
//!
//! 1. Only the highest-priority candidates are considered.
//! 2. Among those, share-of-voice line items own `sov_percentage` percent of
//!    rolls each (total capped at 100).
//! 3. Rolls outside every SOV band go to weighted-random fill. With no fill
//!    candidates the slot stays empty.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::LineItem;

/// Uniform integer source for the policy's draws.
pub trait RandomSource {
    /// Uniform value in `[0, bound)`. `bound` is always positive.
    fn next_below(&mut self, bound: u64) -> u64;
}

/// Thread-local RNG, used on the serving path.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_below(&mut self, bound: u64) -> u64 {
        rand::thread_rng().gen_range(0..bound)
    }
}

/// Reproducible RNG for tests and benchmarks.
#[derive(Debug, Clone)]
pub struct SeededRandom(StdRng);

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }
}

impl RandomSource for SeededRandom {
    fn next_below(&mut self, bound: u64) -> u64 {
        self.0.gen_range(0..bound)
    }
}

/// Replays fixed draws in order, wrapping around. Each draw is reduced
/// modulo the requested bound.
#[derive(Debug, Clone)]
pub struct SequenceRandom {
    values: Vec<u64>,
    next: usize,
}

impl SequenceRandom {
    pub fn new(values: Vec<u64>) -> Self {
        Self { values, next: 0 }
    }
}

impl RandomSource for SequenceRandom {
    fn next_below(&mut self, bound: u64) -> u64 {
        if self.values.is_empty() {
            return 0;
        }
        let value = self.values[self.next % self.values.len()];
        self.next += 1;
        value % bound
    }
}

// ================================================================================================
// POLICY
// ================================================================================================

const SOV_SCALE: u64 = 100;

/// Runs the full policy over eligible, frequency-passing candidates.
///
/// Candidates need not be sorted. Returns `None` for an empty input or when
/// the roll lands in an unfilled SOV gap.
pub fn select<'a>(
    candidates: &[&'a LineItem],
    rng: &mut dyn RandomSource,
) -> Option<&'a LineItem> {
    let top = top_priority(candidates);
    if top.is_empty() {
        return None;
    }

    let (sov, fill): (Vec<&LineItem>, Vec<&LineItem>) =
        top.into_iter().partition(|li| li.has_sov());

    if sov.is_empty() {
        return weighted_random(&fill, rng);
    }

    let total_sov = sov
        .iter()
        .map(|li| li.sov_percentage.max(0) as u64)
        .sum::<u64>()
        .min(SOV_SCALE);

    let roll = rng.next_below(SOV_SCALE);
    if roll < total_sov {
        let mut cumulative = 0u64;
        for li in &sov {
            cumulative = (cumulative + li.sov_percentage.max(0) as u64).min(SOV_SCALE);
            if roll < cumulative {
                return Some(*li);
            }
        }
    }

    if fill.is_empty() {
        None
    } else {
        weighted_random(&fill, rng)
    }
}

/// Stable sort by priority descending, cut to the highest priority.
/// Candidates keep their relative input order within the group.
pub fn top_priority<'a>(candidates: &[&'a LineItem]) -> Vec<&'a LineItem> {
    let mut sorted = candidates.to_vec();
    sorted.sort_by(|a, b| b.priority.cmp(&a.priority));

    let Some(first) = sorted.first() else {
        return sorted;
    };
    let max = first.priority;
    sorted.retain(|li| li.priority == max);
    sorted
}

/// Weighted pick over `group`, a weight of zero or less counting as 100.
/// Weights are summed as `u64`.
pub fn weighted_random<'a>(
    group: &[&'a LineItem],
    rng: &mut dyn RandomSource,
) -> Option<&'a LineItem> {
    match group {
        [] => None,
        [only] => Some(*only),
        _ => {
            let total: u64 = group.iter().map(|li| li.effective_weight() as u64).sum();
            let roll = rng.next_below(total);
            let mut cumulative = 0u64;
            for li in group {
                cumulative += li.effective_weight() as u64;
                if roll < cumulative {
                    return Some(*li);
                }
            }
            group.first().copied()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Status;
    use std::collections::HashMap;

    fn li(id: i64, priority: i32, weight: i32, sov: i32) -> LineItem {
        LineItem {
            id,
            campaign_id: 1,
            name: format!("li-{}", id),
            priority,
            weight,
            frequency_cap: 0,
            frequency_cap_period: "day".into(),
            sov_percentage: sov,
            status: Status::Active,
            targeting_rules: vec![],
            creatives: vec![],
            ad_unit_ids: vec![],
        }
    }

    fn tally(items: &[LineItem], trials: usize, seed: u64) -> HashMap<Option<i64>, usize> {
        let refs: Vec<&LineItem> = items.iter().collect();
        let mut rng = SeededRandom::new(seed);
        let mut counts = HashMap::new();
        for _ in 0..trials {
            let winner = select(&refs, &mut rng).map(|li| li.id);
            *counts.entry(winner).or_insert(0) += 1;
        }
        counts
    }

    fn share(counts: &HashMap<Option<i64>, usize>, key: Option<i64>, trials: usize) -> f64 {
        *counts.get(&key).unwrap_or(&0) as f64 / trials as f64
    }

    #[test]
    fn test_empty_candidates() {
        assert!(select(&[], &mut ThreadRandom).is_none());
    }

    #[test]
    fn test_single_candidate_short_circuits() {
        let item = li(1, 5, 100, 0);
        let mut rng = SequenceRandom::new(vec![]);
        assert_eq!(select(&[&item], &mut rng).map(|l| l.id), Some(1));
    }

    #[test]
    fn test_priority_waterfall() {
        let items = vec![li(1, 10, 100, 0), li(2, 10, 100, 0), li(3, 5, 100, 0)];
        let counts = tally(&items, 5_000, 7);
        assert!(!counts.contains_key(&Some(3)));
        assert!(counts.contains_key(&Some(1)));
        assert!(counts.contains_key(&Some(2)));
    }

    #[test]
    fn test_top_priority_keeps_input_order() {
        let items = vec![li(1, 5, 100, 0), li(2, 10, 100, 0), li(3, 10, 100, 0)];
        let refs: Vec<&LineItem> = items.iter().collect();
        let top: Vec<i64> = top_priority(&refs).iter().map(|l| l.id).collect();
        assert_eq!(top, vec![2, 3]);
    }

    #[test]
    fn test_sov_split() {
        let items = vec![li(1, 5, 100, 40), li(2, 5, 100, 60)];
        let trials = 20_000;
        let counts = tally(&items, trials, 11);
        assert!((share(&counts, Some(1), trials) - 0.40).abs() < 0.02);
        assert!((share(&counts, Some(2), trials) - 0.60).abs() < 0.02);
        assert!(!counts.contains_key(&None));
    }

    #[test]
    fn test_sov_gap_without_fill_yields_no_ad() {
        let items = vec![li(1, 5, 100, 40)];
        let trials = 20_000;
        let counts = tally(&items, trials, 13);
        assert!((share(&counts, Some(1), trials) - 0.40).abs() < 0.02);
        assert!((share(&counts, None, trials) - 0.60).abs() < 0.02);
    }

    #[test]
    fn test_sov_gap_is_filled() {
        let items = vec![li(1, 5, 100, 40), li(2, 5, 100, 0)];
        let trials = 20_000;
        let counts = tally(&items, trials, 17);
        assert!((share(&counts, Some(1), trials) - 0.40).abs() < 0.02);
        assert!((share(&counts, Some(2), trials) - 0.60).abs() < 0.02);
    }

    #[test]
    fn test_sov_total_capped_at_100() {
        let items = vec![li(1, 5, 100, 80), li(2, 5, 100, 80), li(3, 5, 100, 0)];
        let trials = 10_000;
        let counts = tally(&items, trials, 19);
        assert!(!counts.contains_key(&Some(3)));
        assert!(!counts.contains_key(&None));
        assert!((share(&counts, Some(1), trials) - 0.80).abs() < 0.02);
    }

    #[test]
    fn test_weighted_fill_ratio() {
        let items = vec![li(1, 5, 100, 0), li(2, 5, 300, 0)];
        let trials = 20_000;
        let counts = tally(&items, trials, 23);
        assert!((share(&counts, Some(1), trials) - 0.25).abs() < 0.02);
        assert!((share(&counts, Some(2), trials) - 0.75).abs() < 0.02);
    }

    #[test]
    fn test_non_positive_weight_defaults() {
        let items = vec![li(1, 5, 0, 0), li(2, 5, -4, 0)];
        let refs: Vec<&LineItem> = items.iter().collect();
        // Total 200: 99 falls in the first band, 100 in the second
        let mut rng = SequenceRandom::new(vec![99, 100]);
        assert_eq!(weighted_random(&refs, &mut rng).map(|l| l.id), Some(1));
        assert_eq!(weighted_random(&refs, &mut rng).map(|l| l.id), Some(2));
    }

    #[test]
    fn test_max_weights_share_evenly() {
        let items = vec![
            li(1, 5, i32::MAX, 0),
            li(2, 5, i32::MAX, 0),
            li(3, 5, i32::MAX, 0),
        ];
        let trials = 30_000;
        let counts = tally(&items, trials, 5);
        for id in 1..=3 {
            assert!(
                (share(&counts, Some(id), trials) - 1.0 / 3.0).abs() < 0.02,
                "item {} won {:?} of {}",
                id,
                counts.get(&Some(id)),
                trials
            );
        }
    }

    #[test]
    fn test_max_weight_bands_reach_last_item() {
        let items = vec![
            li(1, 5, i32::MAX, 0),
            li(2, 5, i32::MAX, 0),
            li(3, 5, i32::MAX, 0),
        ];
        let refs: Vec<&LineItem> = items.iter().collect();
        let band = i32::MAX as u64;
        let mut rng = SequenceRandom::new(vec![2 * band - 1, 2 * band, 3 * band - 1]);
        assert_eq!(weighted_random(&refs, &mut rng).map(|l| l.id), Some(2));
        assert_eq!(weighted_random(&refs, &mut rng).map(|l| l.id), Some(3));
        assert_eq!(weighted_random(&refs, &mut rng).map(|l| l.id), Some(3));
    }

    #[test]
    fn test_sov_band_boundaries() {
        let items = vec![li(1, 5, 100, 30), li(2, 5, 100, 20)];
        let refs: Vec<&LineItem> = items.iter().collect();
        let mut rng = SequenceRandom::new(vec![29, 30, 49, 50]);
        assert_eq!(select(&refs, &mut rng).map(|l| l.id), Some(1));
        assert_eq!(select(&refs, &mut rng).map(|l| l.id), Some(2));
        assert_eq!(select(&refs, &mut rng).map(|l| l.id), Some(2));
        assert_eq!(select(&refs, &mut rng), None);
    }
}
