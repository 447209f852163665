//! The heap: an append-mostly chain of `DataPage`s addressed by `Rid`.
//!
//! Insertion tries the last page first (so a hot table doesn't grow a
//! page per row) and only appends a fresh page once the current tail
//! is full, chaining it via `next_page_id` (spec.md §3).

use std::path::Path;

use crate::disk::DiskManager;
use crate::error::{Error, Result};
use crate::metrics::Stats;
use crate::page::DataPage;
use crate::record::{Record, Rid};

pub struct DataFile {
    disk: DiskManager,
    page_size: u32,
    last_page_id: Option<u32>,
}

impl DataFile {
    pub fn open(path: impl AsRef<Path>, page_size: u32) -> Result<Self> {
        let disk = DiskManager::open(path, page_size)?;
        let last_page_id = match disk.page_count()? {
            0 => None,
            n => Some(n - 1),
        };
        Ok(Self {
            disk,
            page_size,
            last_page_id,
        })
    }

    pub fn page_count(&self) -> Result<u32> {
        self.disk.page_count()
    }

    pub fn read_page(&self, page_id: u32, stats: &mut Stats) -> Result<DataPage> {
        let bytes = self.disk.read_page(page_id, stats)?;
        DataPage::unpack(&bytes)
    }

    fn write_page(&self, page_id: u32, page: &DataPage, stats: &mut Stats) -> Result<()> {
        self.disk.write_page(page_id, &page.pack(), stats)
    }

    /// Appends a record to the file, preferring the current tail page
    /// and opening a new one only once that page is full. Returns the
    /// record's stable `Rid`.
    pub fn insert_clustered(&mut self, record: &Record, stats: &mut Stats) -> Result<Rid> {
        if let Some(page_id) = self.last_page_id {
            let mut page = self.read_page(page_id, stats)?;
            let slot = page.record_count() as u32;
            if page.append_record(record) {
                self.write_page(page_id, &page, stats)?;
                return Ok(Rid::new(page_id, slot));
            }
        }
        let mut page = DataPage::new(self.page_size as usize);
        if !page.append_record(record) {
            return Err(Error::State("record does not fit in an empty page".into()));
        }
        let new_id = self.disk.append_page(Some(&page.pack()), stats)?;
        self.last_page_id = Some(new_id);
        Ok(Rid::new(new_id, 0))
    }

    pub fn read_record(&self, rid: Rid, stats: &mut Stats) -> Result<Option<Record>> {
        if rid.page_id >= self.disk.page_count()? {
            return Ok(None);
        }
        let page = self.read_page(rid.page_id, stats)?;
        Ok(page.records().into_iter().nth(rid.slot as usize))
    }

    pub fn iter_pages(&self, stats: &mut Stats) -> Result<Vec<DataPage>> {
        let mut pages = Vec::new();
        for id in 0..self.disk.page_count()? {
            pages.push(self.read_page(id, stats)?);
        }
        Ok(pages)
    }

    pub fn flush(&self, stats: &mut Stats) -> Result<()> {
        self.disk.flush(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, TableSchema};
    use crate::types::ColumnType;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn sample_schema() -> TableSchema {
        let mut schema = TableSchema::new("t");
        schema
            .add_column(Column::new("id", ColumnType::Int))
            .unwrap();
        schema
            .add_column(Column::new("name", ColumnType::Varchar).with_length(16))
            .unwrap();
        schema
    }

    fn sample_record(schema: &TableSchema, id: i64) -> Record {
        let mut input = BTreeMap::new();
        input.insert("id".to_string(), json!(id));
        input.insert("name".to_string(), json!("x"));
        Record::from_input(schema, &input).unwrap()
    }

    #[test]
    fn insert_fills_current_page_before_appending_a_new_one() {
        let dir = tempfile::tempdir().unwrap();
        let mut df = DataFile::open(dir.path().join("heap.dat"), 64).unwrap();
        let mut stats = Stats::new();
        let schema = sample_schema();
        let r1 = df
            .insert_clustered(&sample_record(&schema, 1), &mut stats)
            .unwrap();
        let r2 = df
            .insert_clustered(&sample_record(&schema, 2), &mut stats)
            .unwrap();
        assert_eq!(r1.page_id, r2.page_id);
        assert_eq!(r1.slot, 0);
        assert_eq!(r2.slot, 1);
    }

    #[test]
    fn insert_spills_to_a_new_page_once_full() {
        let dir = tempfile::tempdir().unwrap();
        let mut df = DataFile::open(dir.path().join("heap.dat"), 40).unwrap();
        let mut stats = Stats::new();
        let schema = sample_schema();
        let r1 = df
            .insert_clustered(&sample_record(&schema, 1), &mut stats)
            .unwrap();
        let r2 = df
            .insert_clustered(&sample_record(&schema, 2), &mut stats)
            .unwrap();
        assert_ne!(r1.page_id, r2.page_id);
        assert_eq!(r2.slot, 0);
    }

    #[test]
    fn read_record_by_rid_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let mut df = DataFile::open(dir.path().join("heap.dat"), 4096).unwrap();
        let mut stats = Stats::new();
        let schema = sample_schema();
        let rid = df
            .insert_clustered(&sample_record(&schema, 9), &mut stats)
            .unwrap();
        let rec = df.read_record(rid, &mut stats).unwrap().unwrap();
        assert_eq!(rec.get("id").unwrap().as_i64(), Some(9));
    }
}
