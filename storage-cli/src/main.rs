//! `storedb`: a command-line front end over the storage engine,
//! operating on a root data directory laid out as
//! `<root>/users/<user>/databases/<db>/`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value as Json;

use storage_core::{Catalog, Column, ColumnType, EngineConfig, IndexKind, Stats, TableSchema};

#[derive(Parser)]
#[command(name = "storedb")]
#[command(about = "Multi-index disk-resident storage engine")]
#[command(version)]
struct Cli {
    /// Root data directory.
    #[arg(long, default_value = "./data")]
    root: PathBuf,

    /// User namespace under the root directory.
    #[arg(long, default_value = "default")]
    user: String,

    /// Database name under the user namespace.
    #[arg(long, default_value = "default")]
    db: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Creates a table. Columns are given as "name:type[:flag,...]",
    /// e.g. "id:int:pk" "name:varchar64" "body:varchar:fulltext".
    CreateTable {
        #[arg(long)]
        table: String,
        #[arg(long = "column", required = true)]
        columns: Vec<String>,
    },
    /// Inserts one row from a JSON object.
    Insert {
        #[arg(long)]
        table: String,
        #[arg(long)]
        json: String,
    },
    /// Exact-match lookup on an indexed (or unindexed) column.
    Search {
        #[arg(long)]
        table: String,
        #[arg(long)]
        column: String,
        #[arg(long)]
        key: String,
    },
    /// Inclusive range lookup on an ordered index.
    Range {
        #[arg(long)]
        table: String,
        #[arg(long)]
        column: String,
        #[arg(long)]
        lo: String,
        #[arg(long)]
        hi: String,
    },
    /// Points within `radius` of `center` on an R-tree column.
    RangeRadius {
        #[arg(long)]
        table: String,
        #[arg(long)]
        column: String,
        /// Comma-separated coordinates, e.g. "1.0,2.0".
        #[arg(long)]
        center: String,
        #[arg(long)]
        radius: f64,
    },
    /// The k nearest neighbors of `center` on an R-tree column.
    Knn {
        #[arg(long)]
        table: String,
        #[arg(long)]
        column: String,
        #[arg(long)]
        center: String,
        #[arg(long)]
        k: usize,
    },
    /// Removes every RID matching `key` from the column's index.
    Delete {
        #[arg(long)]
        table: String,
        #[arg(long)]
        column: String,
        #[arg(long)]
        key: String,
    },
    /// Cosine-ranked top-k full-text query.
    Fulltext {
        #[arg(long)]
        table: String,
        #[arg(long)]
        column: String,
        #[arg(long)]
        query: String,
        #[arg(long, default_value_t = 10)]
        k: usize,
    },
    /// Rebuilds every index on a table from the heap.
    Reindex {
        #[arg(long)]
        table: String,
    },
    ListTables,
    /// Per-index operation counters for a table.
    Stats {
        #[arg(long)]
        table: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let db_dir = cli.root.join("users").join(&cli.user).join("databases").join(&cli.db);
    let mut catalog = Catalog::open(&db_dir, &cli.db, EngineConfig::default())
        .with_context(|| format!("opening database at {}", db_dir.display()))?;
    let mut stats = Stats::new();

    match cli.command {
        Commands::CreateTable { table, columns } => {
            let schema = parse_schema(&table, &columns)?;
            catalog.create_table(schema)?;
            println!("created table '{table}'");
        }
        Commands::Insert { table, json } => {
            let values = parse_row(&json)?;
            let t = get_table(&mut catalog, &table)?;
            let rid = t.insert(&values, &mut stats)?;
            println!("inserted ({}, {})", rid.page_id, rid.slot);
        }
        Commands::Search { table, column, key } => {
            let key = parse_scalar(&key);
            let t = get_table(&mut catalog, &table)?;
            let rows = t.search(&column, &key, &mut stats)?;
            print_rows(&rows);
        }
        Commands::Range { table, column, lo, hi } => {
            let (lo, hi) = (parse_scalar(&lo), parse_scalar(&hi));
            let t = get_table(&mut catalog, &table)?;
            let rows = t.range_search(&column, &lo, &hi, &mut stats)?;
            print_rows(&rows);
        }
        Commands::RangeRadius { table, column, center, radius } => {
            let center = parse_point(&center)?;
            let t = get_table(&mut catalog, &table)?;
            let rows = t.range_radius(&column, &center, radius, &mut stats)?;
            print_rows(&rows);
        }
        Commands::Knn { table, column, center, k } => {
            let center = parse_point(&center)?;
            let t = get_table(&mut catalog, &table)?;
            let hits = t.knn(&column, &center, k, &mut stats)?;
            for (rec, dist) in hits {
                println!("{:.6}  {}", dist, serde_json::to_string(&record_json(&rec))?);
            }
        }
        Commands::Delete { table, column, key } => {
            let key = parse_scalar(&key);
            let t = get_table(&mut catalog, &table)?;
            let removed = t.delete(&column, &key, &mut stats)?;
            println!("removed {removed} entries");
        }
        Commands::Fulltext { table, column, query, k } => {
            let t = get_table(&mut catalog, &table)?;
            let hits = t.fulltext_search(&column, &query, k, &mut stats)?;
            for (rec, score) in hits {
                println!("{:.6}  {}", score, serde_json::to_string(&record_json(&rec))?);
            }
        }
        Commands::Reindex { table } => {
            let t = get_table(&mut catalog, &table)?;
            t.build_indexes_from_datafile(&mut stats)?;
            println!("rebuilt indexes for '{table}'");
        }
        Commands::ListTables => {
            for name in catalog.list_tables() {
                println!("{name}");
            }
        }
        Commands::Stats { table } => {
            let t = get_table(&mut catalog, &table)?;
            for (column, s) in t.query_stats() {
                println!(
                    "{column}: type={} searches={} inserts={} deletes={}",
                    s.index_type, s.searches, s.inserts, s.deletes
                );
                for (key, val) in s.extra {
                    println!("  {key}={val}");
                }
            }
        }
    }

    Ok(())
}

fn get_table<'a>(catalog: &'a mut Catalog, name: &str) -> Result<&'a mut storage_core::Table> {
    catalog.get_table(name).with_context(|| format!("no such table '{name}'"))
}

fn parse_schema(table: &str, columns: &[String]) -> Result<TableSchema> {
    let mut schema = TableSchema::new(table);
    for spec in columns {
        let mut parts = spec.split(':');
        let name = parts.next().context("column spec missing a name")?;
        let ty = parts.next().context("column spec missing a type")?;
        let flags: Vec<&str> = parts.next().map(|f| f.split(',').collect()).unwrap_or_default();

        let (col_type, length) = match ty {
            "int" => (ColumnType::Int, None),
            "float" => (ColumnType::Float, None),
            "date" => (ColumnType::Date, None),
            "array_float" => (ColumnType::ArrayFloat, None),
            other if other.starts_with("varchar") => {
                let len = other.strip_prefix("varchar").and_then(|n| n.parse::<usize>().ok());
                (ColumnType::Varchar, len)
            }
            other => bail!("unknown column type '{other}' in spec '{spec}'"),
        };

        let mut column = Column::new(name, col_type);
        if let Some(len) = length {
            column = column.with_length(len);
        }
        for flag in flags {
            column = match flag {
                "pk" => column.primary_key(),
                "unique" => column.unique(),
                "notnull" => column.not_null(),
                "btree" => column.with_index(IndexKind::BTree),
                "avl" => column.with_index(IndexKind::Avl),
                "isam" => column.with_index(IndexKind::Isam),
                "hash" => column.with_index(IndexKind::Hash),
                "rtree" => column.with_index(IndexKind::RTree),
                "fulltext" => column.with_index(IndexKind::FullText),
                other => bail!("unknown column flag '{other}' in spec '{spec}'"),
            };
        }
        schema.add_column(column)?;
    }
    Ok(schema)
}

fn parse_row(json: &str) -> Result<BTreeMap<String, Json>> {
    let value: Json = serde_json::from_str(json).context("row must be a JSON object")?;
    let obj = value.as_object().context("row must be a JSON object")?;
    Ok(obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

/// Scalar CLI arguments arrive as plain strings; try numeric coercion
/// first so `--key 5` searches an INT column by value rather than a
/// stringified "5".
fn parse_scalar(raw: &str) -> Json {
    if let Ok(n) = raw.parse::<i64>() {
        return Json::from(n);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Json::from(f);
    }
    Json::from(raw)
}

fn parse_point(raw: &str) -> Result<Vec<f64>> {
    raw.split(',')
        .map(|p| p.trim().parse::<f64>().with_context(|| format!("invalid coordinate '{p}'")))
        .collect()
}

fn print_rows(rows: &[storage_core::Record]) {
    for rec in rows {
        println!("{}", serde_json::to_string(&record_json(rec)).unwrap_or_default());
    }
}

fn record_json(record: &storage_core::Record) -> Json {
    let map: serde_json::Map<String, Json> = record
        .values
        .iter()
        .map(|(k, v)| (k.clone(), value_json(v)))
        .collect();
    Json::Object(map)
}

fn value_json(value: &storage_core::Value) -> Json {
    match value {
        storage_core::Value::Int(i) => Json::from(*i),
        storage_core::Value::Float(f) => Json::from(*f),
        storage_core::Value::Date(s) | storage_core::Value::Text(s) => Json::from(s.clone()),
        storage_core::Value::FloatVec(v) => Json::from(v.clone()),
        storage_core::Value::Null => Json::Null,
    }
}
