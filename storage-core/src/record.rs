//! A schema-shaped tuple, and the length-prefixed codec used to pack
//! it into page bodies.
//!
//! Wire format (spec.md §6): `[len: u32 LE][payload: len bytes of
//! UTF-8 compact JSON]`, repeated; a zero-length prefix or a prefix
//! that would run past the buffer's end stops iteration.

use std::collections::BTreeMap;

use serde_json::Value as Json;

use crate::error::{Error, Result};
use crate::schema::TableSchema;
use crate::types::{convert_value, Value};

/// Record identifier: (page_id, slot). Stable for the life of the
/// table; records are never physically relocated (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Rid {
    pub page_id: u32,
    pub slot: u32,
}

impl Rid {
    pub fn new(page_id: u32, slot: u32) -> Self {
        Self { page_id, slot }
    }

    pub fn to_doc_id(self) -> String {
        format!("{}_{}", self.page_id, self.slot)
    }

    pub fn from_doc_id(s: &str) -> Option<Self> {
        let (p, s2) = s.split_once('_')?;
        Some(Self {
            page_id: p.parse().ok()?,
            slot: s2.parse().ok()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Record {
    pub values: BTreeMap<String, Value>,
}

impl Record {
    /// Validates and coerces a loosely-typed input map against `schema`.
    pub fn from_input(schema: &TableSchema, input: &BTreeMap<String, Json>) -> Result<Self> {
        let mut values = BTreeMap::new();
        for col in &schema.columns {
            let raw = input.get(&col.name);
            let value = match raw {
                Some(Json::Null) | None => {
                    if col.nullable {
                        Value::Null
                    } else {
                        return Err(Error::validation(&col.name, "missing required value"));
                    }
                }
                Some(raw) => convert_value(&col.name, col.col_type, raw, col.length)?,
            };
            values.insert(col.name.clone(), value);
        }
        Ok(Record { values })
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    fn to_json(&self) -> Json {
        let map: serde_json::Map<String, Json> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::to_value(v).unwrap()))
            .collect();
        Json::Object(map)
    }

    fn from_json(json: &Json) -> Result<Self> {
        let obj = json
            .as_object()
            .ok_or_else(|| Error::Json("record payload is not a JSON object".into()))?;
        let mut values = BTreeMap::new();
        for (k, v) in obj {
            let value: Value = serde_json::from_value(v.clone())?;
            values.insert(k.clone(), value);
        }
        Ok(Record { values })
    }

    pub fn pack(&self) -> Vec<u8> {
        pack_json(&self.to_json())
    }
}

/// Encodes one `[len:u32 LE][payload]` frame for an arbitrary JSON value.
pub fn pack_json(value: &Json) -> Vec<u8> {
    let payload = serde_json::to_vec(value).expect("record values are always serializable");
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(&payload);
    out
}

/// Decodes every frame in `buffer`, stopping at a zero-length prefix
/// or a prefix that would overrun the buffer. Returns the records and
/// the number of bytes actually consumed.
pub fn unpack_records(buffer: &[u8]) -> (Vec<Record>, usize) {
    let mut records = Vec::new();
    let mut offset = 0usize;
    let total = buffer.len();
    while offset + 4 <= total {
        let len = u32::from_le_bytes(buffer[offset..offset + 4].try_into().unwrap()) as usize;
        if len == 0 {
            break;
        }
        if offset + 4 + len > total {
            break;
        }
        let start = offset + 4;
        let end = start + len;
        if let Ok(json) = serde_json::from_slice::<Json>(&buffer[start..end]) {
            if let Ok(rec) = Record::from_json(&json) {
                records.push(rec);
            }
        }
        offset = end;
    }
    (records, offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;
    use crate::types::ColumnType;
    use serde_json::json;

    #[test]
    fn rid_doc_id_roundtrips() {
        let rid = Rid::new(3, 7);
        assert_eq!(Rid::from_doc_id(&rid.to_doc_id()), Some(rid));
    }

    #[test]
    fn pack_and_unpack_roundtrip_a_record() {
        let mut schema = TableSchema::new("t");
        schema
            .add_column(Column::new("id", ColumnType::Int).primary_key())
            .unwrap();
        schema
            .add_column(Column::new("name", ColumnType::Varchar).with_length(20))
            .unwrap();
        let mut input = BTreeMap::new();
        input.insert("id".to_string(), json!(42));
        input.insert("name".to_string(), json!("ada"));
        let rec = Record::from_input(&schema, &input).unwrap();
        let bytes = rec.pack();
        let (recs, consumed) = unpack_records(&bytes);
        assert_eq!(consumed, bytes.len());
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].get("id").unwrap().as_i64(), Some(42));
    }

    #[test]
    fn unpack_stops_at_zero_length_padding() {
        let mut buf = vec![0u8; 64];
        let mut schema = TableSchema::new("t");
        schema
            .add_column(Column::new("id", ColumnType::Int))
            .unwrap();
        let mut input = BTreeMap::new();
        input.insert("id".to_string(), json!(1));
        let rec = Record::from_input(&schema, &input).unwrap();
        let packed = rec.pack();
        buf[..packed.len()].copy_from_slice(&packed);
        let (recs, consumed) = unpack_records(&buf);
        assert_eq!(recs.len(), 1);
        assert_eq!(consumed, packed.len());
    }
}
