//! Immutable serving snapshot.
//!
//! A `Snapshot` is built once per refresh from the store's bulk reads and
//! never mutated afterwards. Ad units live in a flat arena indexed by code, so
//! a request resolves codes without touching the store.

use crate::types::{now_ms, AdUnit, LineItem};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Raw snapshot contents, as fetched from the store or the warm file.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SnapshotData {
    pub line_items: Vec<LineItem>,
    pub ad_units: Vec<AdUnit>,
}

#[derive(Debug)]
pub struct Snapshot {
    version: u64,
    built_at: u64,
    line_items: Vec<LineItem>,
    ad_units: Vec<AdUnit>,
    /// code → index into `ad_units`
    ad_unit_by_code: HashMap<String, usize>,
}

impl Snapshot {
    /// The snapshot a cache starts with before its first successful load.
    pub fn empty() -> Self {
        Self::build(0, SnapshotData::default())
    }

    /// Builds a snapshot, dropping line items that are not `active`.
    ///
    /// When two ad units share a code the last one wins, matching a fresh
    /// `code → unit` map built in store order.
    pub fn build(version: u64, data: SnapshotData) -> Self {
        let line_items: Vec<LineItem> = data
            .line_items
            .into_iter()
            .filter(|li| li.status.is_active())
            .collect();

        let mut ad_unit_by_code = HashMap::with_capacity(data.ad_units.len());
        for (idx, unit) in data.ad_units.iter().enumerate() {
            ad_unit_by_code.insert(unit.code.clone(), idx);
        }

        Self {
            version,
            built_at: now_ms(),
            line_items,
            ad_units: data.ad_units,
            ad_unit_by_code,
        }
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn built_at(&self) -> u64 {
        self.built_at
    }

    #[inline]
    pub fn line_items(&self) -> &[LineItem] {
        &self.line_items
    }

    pub fn ad_units(&self) -> &[AdUnit] {
        &self.ad_units
    }

    pub fn ad_unit_by_code(&self, code: &str) -> Option<&AdUnit> {
        self.ad_unit_by_code
            .get(code)
            .and_then(|&idx| self.ad_units.get(idx))
    }

    /// Copies the contents back out, e.g. for the warm snapshot file.
    pub fn to_data(&self) -> SnapshotData {
        SnapshotData {
            line_items: self.line_items.clone(),
            ad_units: self.ad_units.clone(),
        }
    }

    pub fn stats(&self) -> SnapshotStats {
        SnapshotStats {
            version: self.version,
            built_at: self.built_at,
            line_items: self.line_items.len(),
            creatives: self.line_items.iter().map(|li| li.creatives.len()).sum(),
            targeting_rules: self
                .line_items
                .iter()
                .map(|li| li.targeting_rules.len())
                .sum(),
            ad_units: self.ad_units.len(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SnapshotStats {
    pub version: u64,
    pub built_at: u64,
    pub line_items: usize,
    pub creatives: usize,
    pub targeting_rules: usize,
    pub ad_units: usize,
}
