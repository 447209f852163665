//! Table manager: coordinates writes to the heap and every attached
//! index, and dispatches reads to whichever index covers the query
//! column (falling back to a sequential scan when none does).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value as Json;

use crate::config::EngineConfig;
use crate::datafile::DataFile;
use crate::error::Result;
use crate::index::avl::AvlIndex;
use crate::index::btree::BTreeIndex;
use crate::index::hash::HashIndex;
use crate::index::inverted::{search_topk, InvertedIndex, SpimiBuilder};
use crate::index::isam::IsamIndex;
use crate::index::rtree::RTreeIndex;
use crate::index::{Index, IndexStats};
use crate::metrics::Stats;
use crate::record::{Record, Rid};
use crate::schema::{Column, IndexKind, TableSchema};
use crate::types::{convert_value, Value};

/// Every ordered/hashed/full-text index shares the [`Index`] trait;
/// the enum just lets `Table` hold one column's index without boxing.
enum IndexHandle {
    BTree(BTreeIndex),
    Avl(AvlIndex),
    Isam(IsamIndex),
    Hash(HashIndex),
    FullText(InvertedIndex),
}

impl IndexHandle {
    fn as_index(&self) -> &dyn Index {
        match self {
            IndexHandle::BTree(i) => i,
            IndexHandle::Avl(i) => i,
            IndexHandle::Isam(i) => i,
            IndexHandle::Hash(i) => i,
            IndexHandle::FullText(_) => unreachable!("full-text columns use add_document, not the ordered-index path"),
        }
    }

    fn as_index_mut(&mut self) -> &mut dyn Index {
        match self {
            IndexHandle::BTree(i) => i,
            IndexHandle::Avl(i) => i,
            IndexHandle::Isam(i) => i,
            IndexHandle::Hash(i) => i,
            IndexHandle::FullText(_) => unreachable!(),
        }
    }

    fn save(&self, path: &Path) -> Result<()> {
        match self {
            IndexHandle::BTree(i) => i.save(path),
            IndexHandle::Avl(i) => i.save(path),
            IndexHandle::Isam(i) => i.save(path),
            IndexHandle::Hash(i) => i.save(path),
            IndexHandle::FullText(i) => i.save(path),
        }
    }
}

fn fresh_handle(kind: IndexKind, config: &EngineConfig) -> Option<IndexHandle> {
    match kind {
        IndexKind::BTree => Some(IndexHandle::BTree(BTreeIndex::new(config.btree_order))),
        IndexKind::Avl => Some(IndexHandle::Avl(AvlIndex::new())),
        IndexKind::Isam => Some(IndexHandle::Isam(IsamIndex::new(config.isam_page_size))),
        IndexKind::Hash => Some(IndexHandle::Hash(HashIndex::new(config.hash_global_depth, config.hash_bucket_capacity))),
        IndexKind::FullText => Some(IndexHandle::FullText(InvertedIndex::new(true))),
        IndexKind::RTree => None,
    }
}

fn load_handle(kind: IndexKind, path: &Path) -> Result<Option<IndexHandle>> {
    if !path.exists() {
        return Ok(None);
    }
    let handle = match kind {
        IndexKind::BTree => IndexHandle::BTree(BTreeIndex::load(path)?),
        IndexKind::Avl => IndexHandle::Avl(AvlIndex::load(path)?),
        IndexKind::Isam => IndexHandle::Isam(IsamIndex::load(path)?),
        IndexKind::Hash => IndexHandle::Hash(HashIndex::load(path)?),
        IndexKind::FullText => IndexHandle::FullText(InvertedIndex::load(path)?),
        IndexKind::RTree => return Ok(None),
    };
    Ok(Some(handle))
}

/// The spec's spatial-dimension inference is a fixed stub in the
/// system this was modeled on: every `ARRAY_FLOAT` column gets 2
/// dimensions regardless of the data it actually carries. Kept as-is
/// rather than inferring from a sample row, since that's a behavior
/// change a caller might depend on (see DESIGN.md).
fn infer_rtree_dimensions(_column: &Column) -> usize {
    2
}

pub struct Table {
    base_dir: PathBuf,
    schema: TableSchema,
    datafile: DataFile,
    config: EngineConfig,
    indexes: std::collections::HashMap<String, IndexHandle>,
    rtrees: std::collections::HashMap<String, RTreeIndex>,
}

impl Table {
    fn schema_path(base_dir: &Path) -> PathBuf {
        base_dir.join("schema.json")
    }

    fn data_path(base_dir: &Path) -> PathBuf {
        base_dir.join("data.dat")
    }

    fn index_dir(base_dir: &Path) -> PathBuf {
        base_dir.join("indexes")
    }

    fn index_path(base_dir: &Path, column: &str) -> PathBuf {
        Self::index_dir(base_dir).join(format!("{column}.idx"))
    }

    fn spimi_blocks_dir(base_dir: &Path, column: &str) -> PathBuf {
        base_dir.join(format!("spimi_blocks_{column}"))
    }

    fn spimi_index_dir(base_dir: &Path, column: &str) -> PathBuf {
        base_dir.join(format!("spimi_index_{column}"))
    }

    /// Opens (or creates) a table rooted at `base_dir`. Reloads every
    /// index snapshot that exists; any indexed column missing one
    /// starts empty and should be populated by
    /// [`Table::build_indexes_from_datafile`].
    pub fn open(base_dir: impl Into<PathBuf>, schema: TableSchema, config: EngineConfig) -> Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        std::fs::create_dir_all(Self::index_dir(&base_dir))?;

        let schema_path = Self::schema_path(&base_dir);
        if !schema_path.exists() {
            schema.save(&schema_path)?;
        }

        let datafile = DataFile::open(Self::data_path(&base_dir), config.page_size)?;

        let mut indexes = std::collections::HashMap::new();
        let mut rtrees = std::collections::HashMap::new();

        for (col, kind) in schema.indexed_columns() {
            let path = Self::index_path(&base_dir, &col.name);
            if kind == IndexKind::RTree {
                if path.exists() {
                    rtrees.insert(col.name.clone(), RTreeIndex::load(&path)?);
                } else {
                    rtrees.insert(
                        col.name.clone(),
                        RTreeIndex::new(infer_rtree_dimensions(col), config.rtree_max_entries),
                    );
                }
                continue;
            }
            let handle = match load_handle(kind, &path)? {
                Some(h) => h,
                None => fresh_handle(kind, &config).expect("non-RTree kind always yields a handle"),
            };
            indexes.insert(col.name.clone(), handle);
        }

        Ok(Self {
            base_dir,
            schema,
            datafile,
            config,
            indexes,
            rtrees,
        })
    }

    fn save_indexes(&self) -> Result<()> {
        let dir = Self::index_dir(&self.base_dir);
        for (col, handle) in &self.indexes {
            handle.save(&Self::index_path(&self.base_dir, col))?;
        }
        for (col, rtree) in &self.rtrees {
            rtree.save(dir.join(format!("{col}.idx")))?;
        }
        Ok(())
    }

    fn column_value_for_index(&self, record: &Record, column: &str) -> Option<Value> {
        record.get(column).filter(|v| !v.is_null()).cloned()
    }

    /// Validates and coerces `values` against the schema, appends the
    /// record, and keeps every attached index in sync. An index
    /// update failure never undoes the heap write — indexes can
    /// always be rebuilt from the data file.
    pub fn insert(&mut self, values: &BTreeMap<String, Json>, stats: &mut Stats) -> Result<Rid> {
        stats.inc("table.insert.calls");
        let record = Record::from_input(&self.schema, values)?;
        let rid = self.datafile.insert_clustered(&record, stats)?;
        self.index_record(&record, rid, stats);
        self.save_indexes()?;
        Ok(rid)
    }

    fn index_record(&mut self, record: &Record, rid: Rid, stats: &mut Stats) {
        for col in self.schema.columns.clone() {
            let Some(value) = self.column_value_for_index(record, &col.name) else { continue };

            if let Some(rtree) = self.rtrees.get_mut(&col.name) {
                if let Some(point) = value.as_float_vec() {
                    let _ = rtree.add(point, rid);
                }
                continue;
            }
            let Some(handle) = self.indexes.get_mut(&col.name) else { continue };
            match handle {
                IndexHandle::FullText(idx) => {
                    if let Some(text) = value.as_str() {
                        idx.add_document(text, rid);
                    }
                }
                _ => {
                    let _ = handle.as_index_mut().add(&value, rid, stats);
                }
            }
        }
    }

    /// Inserts every row in `values_list`. When `rebuild` is true,
    /// indexing is skipped during the append pass and every index is
    /// rebuilt in one sweep afterward — much faster for large loads
    /// than incremental per-row indexing.
    pub fn insert_bulk(
        &mut self,
        values_list: &[BTreeMap<String, Json>],
        rebuild: bool,
        stats: &mut Stats,
    ) -> Result<Vec<Rid>> {
        stats.inc("table.insert.bulk");
        if !rebuild {
            let mut rids = Vec::with_capacity(values_list.len());
            for values in values_list {
                rids.push(self.insert(values, stats)?);
            }
            return Ok(rids);
        }

        let mut rids = Vec::with_capacity(values_list.len());
        for values in values_list {
            let record = Record::from_input(&self.schema, values)?;
            rids.push(self.datafile.insert_clustered(&record, stats)?);
        }
        self.build_indexes_from_datafile(stats)?;
        Ok(rids)
    }

    /// Rescans the data file page by page and rebuilds every index
    /// from scratch; ISAM's base-page layer is bulk-loaded via
    /// `build_from_pairs` instead of inserted row by row.
    pub fn build_indexes_from_datafile(&mut self, stats: &mut Stats) -> Result<()> {
        let page_count = self.datafile.page_count()?;
        let mut all: Vec<(Rid, Record)> = Vec::new();
        for page_id in 0..page_count {
            let page = self.datafile.read_page(page_id, stats)?;
            for (slot, record) in page.records().into_iter().enumerate() {
                all.push((Rid::new(page_id, slot as u32), record));
            }
        }

        for col in self.schema.columns.clone() {
            let Some(kind) = col.index else { continue };

            if kind == IndexKind::RTree {
                let mut rtree = RTreeIndex::new(infer_rtree_dimensions(&col), self.config.rtree_max_entries);
                for (rid, record) in &all {
                    if let Some(value) = self.column_value_for_index(record, &col.name) {
                        if let Some(point) = value.as_float_vec() {
                            rtree.add(point, *rid)?;
                        }
                    }
                }
                self.rtrees.insert(col.name.clone(), rtree);
                continue;
            }

            if kind == IndexKind::Isam {
                let pairs: Vec<(Value, Rid)> = all
                    .iter()
                    .filter_map(|(rid, record)| self.column_value_for_index(record, &col.name).map(|v| (v, *rid)))
                    .collect();
                let mut idx = IsamIndex::new(self.config.isam_page_size);
                idx.build_from_pairs(pairs);
                self.indexes.insert(col.name.clone(), IndexHandle::Isam(idx));
                continue;
            }

            if kind == IndexKind::FullText {
                let mut idx = InvertedIndex::new(true);
                let mut docs = Vec::new();
                for (rid, record) in &all {
                    if let Some(value) = self.column_value_for_index(record, &col.name) {
                        if let Some(text) = value.as_str() {
                            idx.add_document(text, *rid);
                            docs.push((text.to_string(), *rid));
                        }
                    }
                }
                self.indexes.insert(col.name.clone(), IndexHandle::FullText(idx));

                if !docs.is_empty() {
                    let blocks_dir = Self::spimi_blocks_dir(&self.base_dir, &col.name);
                    let index_dir = Self::spimi_index_dir(&self.base_dir, &col.name);
                    let builder = SpimiBuilder::new(self.config.spimi_block_docs, self.config.spimi_shard_threshold, true);
                    let total = builder.build_blocks(docs.into_iter(), &blocks_dir)?;
                    builder.merge_blocks(&blocks_dir, &index_dir, total)?;
                }
                continue;
            }

            let mut handle = fresh_handle(kind, &self.config).expect("ordered kinds always produce a handle");
            for (rid, record) in &all {
                if let Some(value) = self.column_value_for_index(record, &col.name) {
                    handle.as_index_mut().add(&value, *rid, stats)?;
                }
            }
            self.indexes.insert(col.name.clone(), handle);
        }

        self.save_indexes()?;
        Ok(())
    }

    fn coerce_for(&self, column: &str, raw: &Json) -> Result<Value> {
        let col = self.schema.get_column(column)?;
        convert_value(column, col.col_type, raw, col.length)
    }

    fn fetch(&self, rids: &[Rid], stats: &mut Stats) -> Result<Vec<Record>> {
        let mut out = Vec::with_capacity(rids.len());
        for rid in rids {
            if let Some(rec) = self.datafile.read_record(*rid, stats)? {
                out.push(rec);
            }
        }
        Ok(out)
    }

    fn sequential_scan(&self, column: &str, key: &Value, stats: &mut Stats) -> Result<Vec<Record>> {
        let mut out = Vec::new();
        for page in self.datafile.iter_pages(stats)? {
            for record in page.records() {
                if record.get(column).map(|v| matches_value(v, key)).unwrap_or(false) {
                    out.push(record);
                }
            }
        }
        Ok(out)
    }

    /// Exact-match lookup. Falls back to a full sequential scan when
    /// the column carries no index. A full-text column is searched as
    /// an AND query over its tokens rather than coerced to a typed key.
    pub fn search(&self, column: &str, key: &Json, stats: &mut Stats) -> Result<Vec<Record>> {
        stats.inc("table.search.calls");
        if let Some(IndexHandle::FullText(idx)) = self.indexes.get(column) {
            let query = key.as_str().map(str::to_string).unwrap_or_else(|| key.to_string());
            let rids = idx.search(&query, stats);
            return self.fetch(&rids, stats);
        }
        let key = self.coerce_for(column, key)?;
        if let Some(handle) = self.indexes.get(column) {
            let rids = handle.as_index().search(&key, stats);
            return self.fetch(&rids, stats);
        }
        self.sequential_scan(column, &key, stats)
    }

    /// Inclusive range lookup. Requires an ordered index (B+ tree,
    /// AVL, or ISAM) on the column; an R-tree or unindexed column
    /// returns an empty result rather than a full scan, since there's
    /// no meaningful ordering to fall back to.
    pub fn range_search(&self, column: &str, lo: &Json, hi: &Json, stats: &mut Stats) -> Result<Vec<Record>> {
        stats.inc("table.range.calls");
        let lo = self.coerce_for(column, lo)?;
        let hi = self.coerce_for(column, hi)?;
        let Some(handle) = self.indexes.get(column) else { return Ok(Vec::new()) };
        let rids = handle.as_index().range_search(&lo, &hi, stats);
        self.fetch(&rids, stats)
    }

    pub fn range_radius(&self, column: &str, center: &[f64], radius: f64, stats: &mut Stats) -> Result<Vec<Record>> {
        let Some(rtree) = self.rtrees.get(column) else { return Ok(Vec::new()) };
        let rids = rtree.range_radius(center, radius, stats);
        self.fetch(&rids, stats)
    }

    pub fn knn(&self, column: &str, center: &[f64], k: usize, stats: &mut Stats) -> Result<Vec<(Record, f64)>> {
        let Some(rtree) = self.rtrees.get(column) else { return Ok(Vec::new()) };
        let hits = rtree.knn(center, k, stats);
        let mut out = Vec::with_capacity(hits.len());
        for (rid, dist) in hits {
            if let Some(rec) = self.datafile.read_record(rid, stats)? {
                out.push((rec, dist));
            }
        }
        Ok(out)
    }

    /// Cosine-ranked top-k full-text query. Prefers the on-disk SPIMI
    /// index built by `build_indexes_from_datafile`; falls back to an
    /// unranked AND match against the in-memory index (score 1.0 for
    /// every hit) when no SPIMI index has been built yet.
    pub fn fulltext_search(&self, column: &str, query: &str, k: usize, stats: &mut Stats) -> Result<Vec<(Record, f64)>> {
        stats.inc("index.fulltext.search");
        let spimi_dir = Self::spimi_index_dir(&self.base_dir, column);
        if spimi_dir.join("meta.json").exists() {
            let hits = search_topk(&spimi_dir, query, k, true)?;
            let mut out = Vec::with_capacity(hits.len());
            for (rid, score) in hits {
                if let Some(rec) = self.datafile.read_record(rid, stats)? {
                    out.push((rec, score));
                }
            }
            return Ok(out);
        }
        let Some(IndexHandle::FullText(idx)) = self.indexes.get(column) else { return Ok(Vec::new()) };
        let rids = idx.search(query, stats);
        let mut out = Vec::with_capacity(rids.len().min(k));
        for rid in rids.into_iter().take(k) {
            if let Some(rec) = self.datafile.read_record(rid, stats)? {
                out.push((rec, 1.0));
            }
        }
        Ok(out)
    }

    /// Removes every RID matching `key` from the column's index. The
    /// underlying heap record is untouched: sequential scans still
    /// see it, only index-driven lookups stop finding it (spec.md
    /// §4.9's tombstone-by-unindexing contract).
    pub fn delete(&mut self, column: &str, key: &Json, stats: &mut Stats) -> Result<usize> {
        stats.inc("table.delete.calls");
        if let Some(IndexHandle::FullText(idx)) = self.indexes.get_mut(column) {
            let query = key.as_str().map(str::to_string).unwrap_or_else(|| key.to_string());
            let rids = idx.search(&query, stats);
            let deleted = rids.len();
            for rid in rids {
                idx.remove_rid(rid);
            }
            self.save_indexes()?;
            return Ok(deleted);
        }
        let key = self.coerce_for(column, key)?;
        let Some(handle) = self.indexes.get_mut(column) else { return Ok(0) };
        let rids = handle.as_index().search(&key, stats);
        let deleted = rids.len();
        for rid in rids {
            handle.as_index_mut().remove(&key, rid, stats);
        }
        self.save_indexes()?;
        Ok(deleted)
    }

    pub fn query_stats(&self) -> Vec<(String, IndexStats)> {
        self.indexes
            .iter()
            .map(|(col, handle)| {
                let stats = match handle {
                    IndexHandle::FullText(idx) => IndexStats {
                        index_type: "fulltext",
                        searches: 0,
                        inserts: 0,
                        deletes: 0,
                        extra: vec![("terms", idx.terms().len() as u64)],
                    },
                    _ => handle.as_index().get_stats(),
                };
                (col.clone(), stats)
            })
            .chain(self.rtrees.iter().map(|(col, rtree)| {
                (
                    col.clone(),
                    IndexStats {
                        index_type: "rtree",
                        searches: 0,
                        inserts: 0,
                        deletes: 0,
                        extra: vec![("height", rtree.get_height() as u64), ("size", rtree.size() as u64)],
                    },
                )
            }))
            .collect()
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }
}

fn matches_value(a: &Value, b: &Value) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b) && a.cmp_key(b) == std::cmp::Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;
    use crate::types::ColumnType;
    use serde_json::json;

    fn schema_with_fulltext() -> TableSchema {
        let mut schema = TableSchema::new("articles");
        schema.add_column(Column::new("id", ColumnType::Int).primary_key()).unwrap();
        schema
            .add_column(Column::new("body", ColumnType::Varchar).with_length(200).with_index(IndexKind::FullText))
            .unwrap();
        schema.suggest_indexes();
        schema
    }

    fn row(id: i64, body: &str) -> BTreeMap<String, Json> {
        let mut m = BTreeMap::new();
        m.insert("id".to_string(), json!(id));
        m.insert("body".to_string(), json!(body));
        m
    }

    #[test]
    fn insert_then_search_by_primary_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut schema = TableSchema::new("t");
        schema.add_column(Column::new("id", ColumnType::Int).primary_key()).unwrap();
        schema.suggest_indexes();
        let mut table = Table::open(dir.path(), schema, EngineConfig::default()).unwrap();
        let mut stats = Stats::new();
        table.insert(&row_id_only(7), &mut stats).unwrap();
        let hits = table.search("id", &json!(7), &mut stats).unwrap();
        assert_eq!(hits.len(), 1);
    }

    fn row_id_only(id: i64) -> BTreeMap<String, Json> {
        let mut m = BTreeMap::new();
        m.insert("id".to_string(), json!(id));
        m
    }

    #[test]
    fn range_search_covers_an_inclusive_interval() {
        let dir = tempfile::tempdir().unwrap();
        let mut schema = TableSchema::new("t");
        schema.add_column(Column::new("id", ColumnType::Int).primary_key()).unwrap();
        schema.suggest_indexes();
        let mut table = Table::open(dir.path(), schema, EngineConfig::default()).unwrap();
        let mut stats = Stats::new();
        for i in 0..10 {
            table.insert(&row_id_only(i), &mut stats).unwrap();
        }
        let hits = table.range_search("id", &json!(3), &json!(6), &mut stats).unwrap();
        assert_eq!(hits.len(), 4);
    }

    #[test]
    fn delete_unindexes_without_touching_the_heap() {
        let dir = tempfile::tempdir().unwrap();
        let mut schema = TableSchema::new("t");
        schema.add_column(Column::new("id", ColumnType::Int).primary_key()).unwrap();
        schema.suggest_indexes();
        let mut table = Table::open(dir.path(), schema, EngineConfig::default()).unwrap();
        let mut stats = Stats::new();
        table.insert(&row_id_only(1), &mut stats).unwrap();
        let removed = table.delete("id", &json!(1), &mut stats).unwrap();
        assert_eq!(removed, 1);
        assert!(table.search("id", &json!(1), &mut stats).unwrap().is_empty());
        assert_eq!(table.datafile.page_count().unwrap(), 1);
    }

    #[test]
    fn fulltext_search_falls_back_to_unranked_and_match_before_a_build() {
        let dir = tempfile::tempdir().unwrap();
        let schema = schema_with_fulltext();
        let mut table = Table::open(dir.path(), schema, EngineConfig::default()).unwrap();
        let mut stats = Stats::new();
        table.insert(&row(1, "the quick brown fox"), &mut stats).unwrap();
        table.insert(&row(2, "the lazy dog"), &mut stats).unwrap();
        let hits = table.fulltext_search("body", "quick fox", 5, &mut stats).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].1, 1.0);
    }

    #[test]
    fn build_indexes_from_datafile_enables_ranked_fulltext_search() {
        let dir = tempfile::tempdir().unwrap();
        let schema = schema_with_fulltext();
        let mut table = Table::open(dir.path(), schema, EngineConfig::default()).unwrap();
        let mut stats = Stats::new();
        table.insert(&row(1, "the quick brown fox"), &mut stats).unwrap();
        table.insert(&row(2, "quick fox jumps"), &mut stats).unwrap();
        table.build_indexes_from_datafile(&mut stats).unwrap();
        let hits = table.fulltext_search("body", "quick fox", 5, &mut stats).unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].0.get("id").unwrap().as_i64(), Some(2));
    }
}
