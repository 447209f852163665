//! The heap's page layout: a small header followed by a tight
//! sequence of length-prefixed record payloads, zero-padded at the
//! tail (spec.md §3, §6).
//!
//! ```text
//! bytes 0..4   used_bytes    (u32 LE)
//! bytes 4..8   next_page_id  (u32 LE, 0xFFFFFFFF = none)
//! bytes 8..N   record stream, zero-padded
//! ```

use crate::error::{Error, Result};
use crate::record::{unpack_records, Record};

pub const HEADER_SIZE: usize = 8;
pub const NO_NEXT_PAGE: u32 = 0xFFFF_FFFF;

pub struct DataPage {
    page_size: usize,
    used_bytes: usize,
    next_page_id: u32,
    body: Vec<u8>,
}

impl DataPage {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            used_bytes: 0,
            next_page_id: NO_NEXT_PAGE,
            body: vec![0u8; page_size - HEADER_SIZE],
        }
    }

    pub fn body_capacity(&self) -> usize {
        self.page_size - HEADER_SIZE
    }

    pub fn free_space(&self) -> usize {
        self.body_capacity() - self.used_bytes
    }

    pub fn next_page_id(&self) -> u32 {
        self.next_page_id
    }

    pub fn set_next_page_id(&mut self, id: u32) {
        self.next_page_id = id;
    }

    /// Appends a record frame to the page if it fits; returns whether
    /// it was written.
    pub fn append_record(&mut self, record: &Record) -> bool {
        let encoded = record.pack();
        if encoded.len() > self.free_space() {
            return false;
        }
        let start = self.used_bytes;
        self.body[start..start + encoded.len()].copy_from_slice(&encoded);
        self.used_bytes += encoded.len();
        true
    }

    pub fn records(&self) -> Vec<Record> {
        unpack_records(&self.body[..self.used_bytes]).0
    }

    pub fn record_count(&self) -> usize {
        self.records().len()
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.page_size);
        out.extend_from_slice(&(self.used_bytes as u32).to_le_bytes());
        out.extend_from_slice(&self.next_page_id.to_le_bytes());
        out.extend_from_slice(&self.body);
        out.resize(self.page_size, 0);
        out
    }

    pub fn unpack(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < HEADER_SIZE {
            return Err(Error::State("page buffer smaller than header".into()));
        }
        let used_bytes = u32::from_le_bytes(buffer[0..4].try_into().unwrap()) as usize;
        let next_page_id = u32::from_le_bytes(buffer[4..8].try_into().unwrap());
        let body = buffer[HEADER_SIZE..].to_vec();
        if used_bytes > body.len() {
            return Err(Error::State("used_bytes exceeds page body".into()));
        }
        Ok(Self {
            page_size: buffer.len(),
            used_bytes,
            next_page_id,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, TableSchema};
    use crate::types::ColumnType;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn sample_record(id: i64) -> Record {
        let mut schema = TableSchema::new("t");
        schema
            .add_column(Column::new("id", ColumnType::Int))
            .unwrap();
        let mut input = BTreeMap::new();
        input.insert("id".to_string(), json!(id));
        Record::from_input(&schema, &input).unwrap()
    }

    #[test]
    fn append_respects_free_space() {
        let mut page = DataPage::new(40);
        assert!(page.append_record(&sample_record(1)));
        assert!(!page.append_record(&sample_record(2)));
    }

    #[test]
    fn pack_unpack_preserves_header_and_records() {
        let mut page = DataPage::new(64);
        page.append_record(&sample_record(1));
        page.set_next_page_id(3);
        let bytes = page.pack();
        assert_eq!(bytes.len(), 64);
        let back = DataPage::unpack(&bytes).unwrap();
        assert_eq!(back.next_page_id(), 3);
        assert_eq!(back.record_count(), 1);
    }
}
