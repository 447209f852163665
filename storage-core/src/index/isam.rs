//! ISAM index: a static two-level structure built once from a sorted
//! key set. Base pages never split after `build_from_pairs` — growth
//! past capacity chains an overflow page instead, so lookups always
//! know which base page to start from but may have to walk a chain.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::Result;
use crate::index::{Index, IndexStats};
use crate::metrics::Stats;
use crate::record::Rid;
use crate::types::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct IsamPage {
    capacity: usize,
    entries: Vec<(Value, Rid)>,
}

impl IsamPage {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Vec::new(),
        }
    }

    fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    fn push(&mut self, key: Value, rid: Rid) -> bool {
        if self.is_full() {
            return false;
        }
        self.entries.push((key, rid));
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsamIndex {
    page_capacity: usize,
    /// `keys[i]` is the first key of `pages[i]`, in page order.
    keys: Vec<Value>,
    pages: Vec<IsamPage>,
    overflow_chains: HashMap<usize, Vec<IsamPage>>,
    search_count: u64,
    insert_count: u64,
    delete_count: u64,
}

impl IsamIndex {
    pub fn new(page_capacity: usize) -> Self {
        Self {
            page_capacity,
            keys: Vec::new(),
            pages: Vec::new(),
            overflow_chains: HashMap::new(),
            search_count: 0,
            insert_count: 0,
            delete_count: 0,
        }
    }

    /// Rebuilds the static base-page layer from scratch, discarding
    /// any overflow. Used for the initial bulk-load from a heap scan.
    pub fn build_from_pairs(&mut self, mut pairs: Vec<(Value, Rid)>) {
        pairs.sort_by(|a, b| a.0.cmp_key(&b.0));
        self.keys.clear();
        self.pages.clear();
        self.overflow_chains.clear();
        if pairs.is_empty() {
            return;
        }
        let mut current = IsamPage::new(self.page_capacity);
        for (key, rid) in pairs {
            if current.is_full() {
                self.pages.push(current);
                current = IsamPage::new(self.page_capacity);
            }
            if current.entries.is_empty() {
                self.keys.push(key.clone());
            }
            current.push(key, rid);
        }
        if !current.entries.is_empty() {
            self.pages.push(current);
        }
    }

    fn find_page_index(&self, key: &Value) -> usize {
        if self.keys.is_empty() {
            return 0;
        }
        // Index of the last directory key <= `key`, clamped to 0.
        let pos = self
            .keys
            .partition_point(|k| k.cmp_key(key) != std::cmp::Ordering::Greater);
        pos.saturating_sub(1).max(0)
    }

    fn first_key(&self) -> Option<&Value> {
        self.pages.first().and_then(|p| p.entries.first()).map(|(k, _)| k)
    }
}

impl Index for IsamIndex {
    fn add(&mut self, key: &Value, rid: Rid, _stats: &mut Stats) -> Result<()> {
        self.insert_count += 1;

        if self.pages.is_empty() {
            trace!(?key, "isam: first insertion, creating base page");
            let mut page = IsamPage::new(self.page_capacity);
            page.push(key.clone(), rid);
            self.pages.push(page);
            self.keys.push(key.clone());
            return Ok(());
        }

        let mut page_idx = self.find_page_index(key);
        if page_idx >= self.pages.len() {
            page_idx = self.pages.len() - 1;
        }

        if !self.pages[page_idx].is_full() && self.pages[page_idx].push(key.clone(), rid) {
            return Ok(());
        }

        let last_key = self
            .keys
            .last()
            .cloned()
            .or_else(|| self.first_key().cloned());
        if page_idx == self.pages.len() - 1
            && last_key
                .as_ref()
                .map(|lk| key.cmp_key(lk) == std::cmp::Ordering::Greater)
                .unwrap_or(true)
        {
            trace!(?key, "isam: key exceeds directory, opening new base page");
            self.keys.push(key.clone());
            let mut page = IsamPage::new(self.page_capacity);
            page.push(key.clone(), rid);
            self.pages.push(page);
            return Ok(());
        }

        trace!(page_idx, ?key, "isam: base page full, routing to overflow");
        let chain = self.overflow_chains.entry(page_idx).or_default();
        for page in chain.iter_mut() {
            if page.push(key.clone(), rid) {
                return Ok(());
            }
        }
        let mut fresh = IsamPage::new(self.page_capacity);
        fresh.push(key.clone(), rid);
        chain.push(fresh);
        Ok(())
    }

    fn remove(&mut self, key: &Value, rid: Rid, _stats: &mut Stats) -> bool {
        self.delete_count += 1;
        let page_idx = self.find_page_index(key);
        let mut removed = false;

        if let Some(page) = self.pages.get_mut(page_idx) {
            let before = page.entries.len();
            page.entries
                .retain(|(k, r)| !(k.cmp_key(key) == std::cmp::Ordering::Equal && *r == rid));
            removed |= page.entries.len() < before;
        }

        if let Some(chain) = self.overflow_chains.get_mut(&page_idx) {
            for page in chain.iter_mut() {
                let before = page.entries.len();
                page.entries
                    .retain(|(k, r)| !(k.cmp_key(key) == std::cmp::Ordering::Equal && *r == rid));
                removed |= page.entries.len() < before;
            }
        }
        removed
    }

    fn search(&self, key: &Value, _stats: &mut Stats) -> Vec<Rid> {
        let page_idx = self.find_page_index(key);
        let mut out = Vec::new();
        if let Some(page) = self.pages.get(page_idx) {
            out.extend(
                page.entries
                    .iter()
                    .filter(|(k, _)| k.cmp_key(key) == std::cmp::Ordering::Equal)
                    .map(|(_, r)| *r),
            );
        }
        if let Some(chain) = self.overflow_chains.get(&page_idx) {
            for page in chain {
                out.extend(
                    page.entries
                        .iter()
                        .filter(|(k, _)| k.cmp_key(key) == std::cmp::Ordering::Equal)
                        .map(|(_, r)| *r),
                );
            }
        }
        out
    }

    fn range_search(&self, begin: &Value, end: &Value, _stats: &mut Stats) -> Vec<Rid> {
        let start = self.find_page_index(begin);
        let mut out = Vec::new();
        for page_idx in start..self.pages.len() {
            if page_idx < self.keys.len() && self.keys[page_idx].cmp_key(end) == std::cmp::Ordering::Greater {
                break;
            }
            let page = &self.pages[page_idx];
            out.extend(page.entries.iter().filter_map(|(k, r)| {
                let in_range = k.cmp_key(begin) != std::cmp::Ordering::Less
                    && k.cmp_key(end) != std::cmp::Ordering::Greater;
                in_range.then_some(*r)
            }));
            if let Some(chain) = self.overflow_chains.get(&page_idx) {
                for overflow in chain {
                    out.extend(overflow.entries.iter().filter_map(|(k, r)| {
                        let in_range = k.cmp_key(begin) != std::cmp::Ordering::Less
                            && k.cmp_key(end) != std::cmp::Ordering::Greater;
                        in_range.then_some(*r)
                    }));
                }
            }
        }
        out
    }

    fn get_stats(&self) -> IndexStats {
        let overflow_pages: usize = self.overflow_chains.values().map(|c| c.len()).sum();
        let overflow_records: usize = self
            .overflow_chains
            .values()
            .flat_map(|c| c.iter())
            .map(|p| p.entries.len())
            .sum();
        let base_records: usize = self.pages.iter().map(|p| p.entries.len()).sum();
        IndexStats {
            index_type: "ISAM",
            searches: self.search_count,
            inserts: self.insert_count,
            deletes: self.delete_count,
            extra: vec![
                ("base_pages", self.pages.len() as u64),
                ("base_records", base_records as u64),
                ("overflow_pages", overflow_pages as u64),
                ("overflow_records", overflow_records as u64),
            ],
        }
    }
}

impl IsamIndex {
    pub fn save(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_vec(self)?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rid(n: u32) -> Rid {
        Rid::new(n, 0)
    }

    #[test]
    fn build_from_pairs_lays_out_sorted_base_pages() {
        let mut idx = IsamIndex::new(4);
        let pairs: Vec<_> = (0..16i64).map(|i| (Value::Int(i), rid(i as u32))).collect();
        idx.build_from_pairs(pairs);
        assert_eq!(idx.pages.len(), 4);
        let mut stats = Stats::new();
        assert_eq!(idx.search(&Value::Int(9), &mut stats), vec![rid(9)]);
    }

    #[test]
    fn overflow_chain_absorbs_inserts_into_a_full_middle_page() {
        let mut idx = IsamIndex::new(2);
        let mut stats = Stats::new();
        idx.build_from_pairs(vec![
            (Value::Int(1), rid(1)),
            (Value::Int(2), rid(2)),
            (Value::Int(10), rid(10)),
            (Value::Int(11), rid(11)),
        ]);
        idx.add(&Value::Int(3), rid(3), &mut stats).unwrap();
        assert_eq!(idx.search(&Value::Int(3), &mut stats), vec![rid(3)]);
        assert_eq!(idx.get_stats().extra[2].1, 1); // overflow_pages
    }

    #[test]
    fn range_search_spans_base_pages_and_overflow() {
        let mut idx = IsamIndex::new(3);
        let mut stats = Stats::new();
        idx.build_from_pairs((0..12i64).map(|i| (Value::Int(i), rid(i as u32))).collect());
        let got = idx.range_search(&Value::Int(2), &Value::Int(7), &mut stats);
        assert_eq!(got.len(), 6);
    }
}
