//! Extendible hash index: a directory of `2^global_depth` entries
//! pointing at buckets, each bucket carrying its own `local_depth`.
//! A full bucket splits and, once its local depth catches up to the
//! directory's global depth, the directory doubles.
//!
//! Key hashing uses `xxh3` over the key's canonical JSON encoding,
//! matching the hash-of-serialized-key approach the directory lookup
//! originally used, minus language-level hash-randomization quirks.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::Result;
use crate::index::{Index, IndexStats};
use crate::metrics::Stats;
use crate::record::Rid;
use crate::types::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Bucket {
    local_depth: u32,
    capacity: usize,
    entries: HashMap<String, (Value, Vec<Rid>)>,
}

impl Bucket {
    fn new(local_depth: u32, capacity: usize) -> Self {
        Self {
            local_depth,
            capacity,
            entries: HashMap::new(),
        }
    }

    fn size(&self) -> usize {
        self.entries.values().map(|(_, rids)| rids.len()).sum()
    }

    fn is_full(&self) -> bool {
        self.size() >= self.capacity
    }
}

fn key_token(key: &Value) -> String {
    serde_json::to_string(key).expect("Value always serializes")
}

fn hash_key(key: &Value, global_depth: u32) -> u64 {
    let h = xxh3_64(key_token(key).as_bytes());
    let mask = (1u64 << global_depth) - 1;
    h & mask
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashIndex {
    global_depth: u32,
    bucket_capacity: usize,
    buckets: Vec<Bucket>,
    directory: Vec<usize>,
    search_count: u64,
    insert_count: u64,
    delete_count: u64,
}

impl HashIndex {
    pub fn new(global_depth: u32, bucket_capacity: usize) -> Self {
        let global_depth = global_depth.max(1);
        let num = 1usize << global_depth;
        let buckets = (0..num).map(|_| Bucket::new(global_depth, bucket_capacity)).collect();
        Self {
            global_depth,
            bucket_capacity,
            buckets,
            directory: (0..num).collect(),
            search_count: 0,
            insert_count: 0,
            delete_count: 0,
        }
    }

    fn bucket_index_for(&self, key: &Value) -> usize {
        self.directory[hash_key(key, self.global_depth) as usize]
    }

    fn double_directory(&mut self) {
        self.global_depth += 1;
        let old = self.directory.clone();
        self.directory = old.iter().chain(old.iter()).copied().collect();
    }

    fn split_bucket(&mut self, bidx: usize) {
        if self.buckets[bidx].local_depth == self.global_depth {
            self.double_directory();
        }
        let new_depth = self.buckets[bidx].local_depth + 1;
        self.buckets[bidx].local_depth = new_depth;
        let new_bucket = Bucket::new(new_depth, self.bucket_capacity);
        self.buckets.push(new_bucket);
        let new_idx = self.buckets.len() - 1;

        let bit = 1usize << (new_depth - 1);
        for (i, idx) in self.directory.iter_mut().enumerate() {
            if *idx == bidx && (i & bit) != 0 {
                *idx = new_idx;
            }
        }

        let items: Vec<(Value, Rid)> = self.buckets[bidx]
            .entries
            .drain()
            .flat_map(|(_, (key, rids))| rids.into_iter().map(move |r| (key.clone(), r)))
            .collect();

        for (key, rid) in items {
            let target = self.bucket_index_for(&key);
            let bucket = &mut self.buckets[target];
            let entry = bucket
                .entries
                .entry(key_token(&key))
                .or_insert_with(|| (key.clone(), Vec::new()));
            entry.1.push(rid);
        }
    }
}

impl Index for HashIndex {
    fn add(&mut self, key: &Value, rid: Rid, _stats: &mut Stats) -> Result<()> {
        self.insert_count += 1;
        let bidx = self.bucket_index_for(key);
        let token = key_token(key);
        let has_key = self.buckets[bidx].entries.contains_key(&token);

        if !self.buckets[bidx].is_full() || has_key {
            let entry = self.buckets[bidx]
                .entries
                .entry(token)
                .or_insert_with(|| (key.clone(), Vec::new()));
            entry.1.push(rid);
            return Ok(());
        }

        self.split_bucket(bidx);
        let bidx2 = self.bucket_index_for(key);
        let entry = self.buckets[bidx2]
            .entries
            .entry(key_token(key))
            .or_insert_with(|| (key.clone(), Vec::new()));
        entry.1.push(rid);
        Ok(())
    }

    fn remove(&mut self, key: &Value, rid: Rid, _stats: &mut Stats) -> bool {
        self.delete_count += 1;
        let bidx = self.bucket_index_for(key);
        let token = key_token(key);
        if let Some((_, rids)) = self.buckets[bidx].entries.get_mut(&token) {
            let before = rids.len();
            rids.retain(|r| *r != rid);
            let removed = rids.len() < before;
            if rids.is_empty() {
                self.buckets[bidx].entries.remove(&token);
            }
            return removed;
        }
        false
    }

    fn search(&self, key: &Value, _stats: &mut Stats) -> Vec<Rid> {
        let bidx = self.bucket_index_for(key);
        self.buckets[bidx]
            .entries
            .get(&key_token(key))
            .map(|(_, rids)| rids.clone())
            .unwrap_or_default()
    }

    /// Extendible hashing has no notion of key ordering, so a range
    /// scan can't target a subset of buckets; it isn't supported.
    fn range_search(&self, _begin: &Value, _end: &Value, _stats: &mut Stats) -> Vec<Rid> {
        Vec::new()
    }

    fn get_stats(&self) -> IndexStats {
        IndexStats {
            index_type: "Hash",
            searches: self.search_count,
            inserts: self.insert_count,
            deletes: self.delete_count,
            extra: vec![
                ("global_depth", self.global_depth as u64),
                ("buckets", self.buckets.len() as u64),
            ],
        }
    }
}

impl HashIndex {
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
    fn directory_doubles_once_local_depth_catches_global() {
        let mut idx = HashIndex::new(1, 1);
        let mut stats = Stats::new();
        for i in 0..40i64 {
            idx.add(&Value::Int(i), rid(i as u32), &mut stats).unwrap();
        }
        assert!(idx.global_depth > 1);
        for i in 0..40i64 {
            assert_eq!(idx.search(&Value::Int(i), &mut stats), vec![rid(i as u32)]);
        }
    }

    #[test]
    fn remove_drops_the_key_entirely_when_empty() {
        let mut idx = HashIndex::new(2, 4);
        let mut stats = Stats::new();
        idx.add(&Value::Int(5), rid(5), &mut stats).unwrap();
        assert!(idx.remove(&Value::Int(5), rid(5), &mut stats));
        assert!(idx.search(&Value::Int(5), &mut stats).is_empty());
    }

    #[test]
    fn range_search_is_unsupported() {
        let idx = HashIndex::new(2, 4);
        let mut stats = Stats::new();
        assert!(idx.range_search(&Value::Int(0), &Value::Int(10), &mut stats).is_empty());
    }
}
