//! The polymorphic index set: one shared capability surface, six
//! concrete implementations with very different internal shapes
//! (a balanced tree, a static two-level structure, a hash directory,
//! a spatial tree, a term index). Index selection happens in
//! `Column::index`/`TableSchema::suggest_indexes`; this module only
//! describes what every index can do once chosen.

pub mod avl;
pub mod btree;
pub mod hash;
pub mod inverted;
pub mod isam;
pub mod rtree;

use crate::error::Result;
use crate::metrics::Stats;
use crate::record::Rid;
use crate::types::Value;

/// Every index over a scalar column supports exact and range lookup,
/// keyed on the table's stable `Rid`.
pub trait Index {
    fn add(&mut self, key: &Value, rid: Rid, stats: &mut Stats) -> Result<()>;
    fn remove(&mut self, key: &Value, rid: Rid, stats: &mut Stats) -> bool;
    fn search(&self, key: &Value, stats: &mut Stats) -> Vec<Rid>;
    fn range_search(&self, begin: &Value, end: &Value, stats: &mut Stats) -> Vec<Rid>;
    fn get_stats(&self) -> IndexStats;
}

#[derive(Debug, Clone)]
pub struct IndexStats {
    pub index_type: &'static str,
    pub searches: u64,
    pub inserts: u64,
    pub deletes: u64,
    pub extra: Vec<(&'static str, u64)>,
}
