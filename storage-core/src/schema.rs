//! Column set, types, constraints and per-column index assignment.
//! Persisted as JSON alongside each table's heap file.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::ColumnType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    BTree,
    Isam,
    Avl,
    Hash,
    RTree,
    FullText,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub col_type: ColumnType,
    /// VARCHAR max length; `None` means unbounded.
    pub length: Option<usize>,
    pub nullable: bool,
    pub unique: bool,
    pub primary_key: bool,
    pub index: Option<IndexKind>,
}

impl Column {
    pub fn new(name: impl Into<String>, col_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            col_type,
            length: None,
            nullable: true,
            unique: false,
            primary_key: false,
            index: None,
        }
    }

    pub fn with_length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn with_index(mut self, kind: IndexKind) -> Self {
        self.index = Some(kind);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<Column>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    pub fn add_column(&mut self, column: Column) -> Result<()> {
        if self.columns.iter().any(|c| c.name == column.name) {
            return Err(Error::validation(&column.name, "duplicate column"));
        }
        self.columns.push(column);
        Ok(())
    }

    pub fn get_column(&self, name: &str) -> Result<&Column> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| Error::not_found(format!("column '{name}'")))
    }

    /// Assigns a default index to columns that don't already carry
    /// one: primary-key/unique columns and INT/FLOAT/DATE columns get
    /// a B+ tree; VARCHAR is left unindexed for the caller to opt in.
    pub fn suggest_indexes(&mut self) {
        for col in &mut self.columns {
            if col.index.is_some() {
                continue;
            }
            col.index = if col.primary_key || col.unique {
                Some(IndexKind::BTree)
            } else {
                match col.col_type {
                    ColumnType::Int | ColumnType::Float | ColumnType::Date => {
                        Some(IndexKind::BTree)
                    }
                    ColumnType::Varchar | ColumnType::ArrayFloat => None,
                }
            };
        }
    }

    pub fn add_index(&mut self, column_name: &str, kind: IndexKind) -> Result<()> {
        let col = self
            .columns
            .iter_mut()
            .find(|c| c.name == column_name)
            .ok_or_else(|| Error::not_found(format!("column '{column_name}'")))?;
        col.index = Some(kind);
        Ok(())
    }

    pub fn indexed_columns(&self) -> impl Iterator<Item = (&Column, IndexKind)> {
        self.columns
            .iter()
            .filter_map(|c| c.index.map(|k| (c, k)))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(tmp, path)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suggest_indexes_defaults_pk_and_scalar_columns_to_btree() {
        let mut schema = TableSchema::new("t");
        schema
            .add_column(Column::new("id", ColumnType::Int).primary_key())
            .unwrap();
        schema
            .add_column(Column::new("name", ColumnType::Varchar).with_length(64))
            .unwrap();
        schema.suggest_indexes();
        assert_eq!(schema.get_column("id").unwrap().index, Some(IndexKind::BTree));
        assert_eq!(schema.get_column("name").unwrap().index, None);
    }

    #[test]
    fn save_and_load_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let mut schema = TableSchema::new("t");
        schema
            .add_column(Column::new("id", ColumnType::Int).primary_key())
            .unwrap();
        schema.suggest_indexes();
        let path = dir.path().join("schema.json");
        schema.save(&path).unwrap();
        let loaded = TableSchema::load(&path).unwrap();
        assert_eq!(loaded.name, "t");
        assert_eq!(loaded.columns.len(), 1);
    }
}
