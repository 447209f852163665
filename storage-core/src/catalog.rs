//! Database catalog: the directory of tables within one database
//! root, persisted as `metadata.json` alongside a `tables/` directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::schema::TableSchema;
use crate::table::Table;

#[derive(Serialize, Deserialize)]
struct Metadata {
    name: String,
    tables: Vec<String>,
}

pub struct Catalog {
    base_dir: PathBuf,
    name: String,
    config: EngineConfig,
    tables: HashMap<String, Table>,
}

impl Catalog {
    fn meta_path(base_dir: &Path) -> PathBuf {
        base_dir.join("metadata.json")
    }

    fn table_dir(base_dir: &Path, name: &str) -> PathBuf {
        base_dir.join("tables").join(name)
    }

    /// Opens the catalog at `base_dir`, reopening every table named
    /// in `metadata.json` (skipping any whose schema file has gone
    /// missing, rather than failing the whole open).
    pub fn open(base_dir: impl Into<PathBuf>, name: impl Into<String>, config: EngineConfig) -> Result<Self> {
        let base_dir = base_dir.into();
        let name = name.into();
        std::fs::create_dir_all(base_dir.join("tables"))?;

        let meta_path = Self::meta_path(&base_dir);
        let meta = if meta_path.exists() {
            let bytes = std::fs::read(&meta_path)?;
            serde_json::from_slice(&bytes).unwrap_or(Metadata { name: name.clone(), tables: Vec::new() })
        } else {
            Metadata { name: name.clone(), tables: Vec::new() }
        };

        let mut tables = HashMap::new();
        for tname in &meta.tables {
            let tdir = Self::table_dir(&base_dir, tname);
            let schema_path = tdir.join("schema.json");
            if !schema_path.exists() {
                continue;
            }
            let schema = TableSchema::load(&schema_path)?;
            tables.insert(tname.clone(), Table::open(tdir, schema, config)?);
        }

        let catalog = Self { base_dir, name, config, tables };
        catalog.save_metadata()?;
        Ok(catalog)
    }

    fn save_metadata(&self) -> Result<()> {
        std::fs::create_dir_all(self.base_dir.join("tables"))?;
        let meta = Metadata {
            name: self.name.clone(),
            tables: self.tables.keys().cloned().collect(),
        };
        let tmp = Self::meta_path(&self.base_dir).with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&meta)?)?;
        std::fs::rename(tmp, Self::meta_path(&self.base_dir))?;
        Ok(())
    }

    /// Persists `schema` (after assigning default indexes to any
    /// column that doesn't already name one) and opens an empty table
    /// for it.
    pub fn create_table(&mut self, mut schema: TableSchema) -> Result<&mut Table> {
        if self.tables.contains_key(&schema.name) {
            return Err(Error::validation("name", format!("table '{}' already exists", schema.name)));
        }
        schema.suggest_indexes();
        let tdir = Self::table_dir(&self.base_dir, &schema.name);
        let name = schema.name.clone();
        let table = Table::open(tdir, schema, self.config)?;
        self.tables.insert(name.clone(), table);
        self.save_metadata()?;
        Ok(self.tables.get_mut(&name).expect("just inserted"))
    }

    /// Removes `name` from the catalog. Matches the on-disk layout's
    /// general no-physical-delete stance: the table's directory and
    /// files are left on disk, only the catalog entry disappears.
    pub fn drop_table(&mut self, name: &str) -> Result<bool> {
        if self.tables.remove(name).is_none() {
            return Ok(false);
        }
        self.save_metadata()?;
        Ok(true)
    }

    pub fn get_table(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.get_mut(name)
    }

    pub fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, IndexKind};
    use crate::types::ColumnType;

    #[test]
    fn create_table_persists_metadata_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut catalog = Catalog::open(dir.path(), "db", EngineConfig::default()).unwrap();
            let mut schema = TableSchema::new("users");
            schema.add_column(Column::new("id", ColumnType::Int).primary_key()).unwrap();
            catalog.create_table(schema).unwrap();
            assert_eq!(catalog.list_tables(), vec!["users".to_string()]);
        }
        let catalog = Catalog::open(dir.path(), "db", EngineConfig::default()).unwrap();
        assert_eq!(catalog.list_tables(), vec!["users".to_string()]);
    }

    #[test]
    fn drop_table_removes_the_catalog_entry_but_keeps_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = Catalog::open(dir.path(), "db", EngineConfig::default()).unwrap();
        let mut schema = TableSchema::new("t");
        schema.add_column(Column::new("id", ColumnType::Int).with_index(IndexKind::BTree)).unwrap();
        catalog.create_table(schema).unwrap();
        assert!(catalog.drop_table("t").unwrap());
        assert!(catalog.list_tables().is_empty());
        assert!(Catalog::table_dir(dir.path(), "t").join("schema.json").exists());
    }

    #[test]
    fn create_table_rejects_duplicate_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut catalog = Catalog::open(dir.path(), "db", EngineConfig::default()).unwrap();
        catalog.create_table(TableSchema::new("t")).unwrap();
        assert!(catalog.create_table(TableSchema::new("t")).is_err());
    }
}
