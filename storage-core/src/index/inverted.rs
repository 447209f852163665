//! Full-text search: an in-memory AND-postings index for small
//! tables, and an on-disk SPIMI build/merge/query path for large
//! ones. Both share the same tokenizer.
//!
//! Accent folding is done with a manual Latin transliteration table
//! instead of a full Unicode NFKD decomposition (no normalization
//! crate appears anywhere in this codebase's dependency stack); it
//! covers the accented letters this project's text columns actually
//! contain. Stemming falls back to the same trailing-'s' heuristic
//! the original indexer used when no stemmer library was available —
//! there's no stemmer crate here either. Doc-norm shard routing uses
//! `xxh3` (already pulled in for the hash index) instead of SHA-1.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::Result;
use crate::metrics::Stats;
use crate::record::Rid;

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "in", "on", "at", "to", "of", "for",
];

fn fold_accents(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'ä' | 'â' => 'a',
            'é' | 'è' | 'ë' | 'ê' => 'e',
            'í' | 'ì' | 'ï' | 'î' => 'i',
            'ó' | 'ò' | 'ö' | 'ô' => 'o',
            'ú' | 'ù' | 'ü' | 'û' => 'u',
            'ñ' => 'n',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

/// Splits on `\w+`, lowercases, optionally folds accents, drops
/// stopwords and single-character tokens, and optionally applies the
/// trailing-'s' stemming fallback.
pub fn tokenize(text: &str, do_stem: bool, normalize: bool) -> Vec<String> {
    let re = Regex::new(r"\w+").expect("static regex");
    let folded = if normalize { fold_accents(text) } else { text.to_string() };
    let lower = folded.to_lowercase();
    let mut tokens: Vec<String> = re
        .find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .filter(|t| t.len() > 1 && !STOPWORDS.contains(&t.as_str()))
        .collect();
    if do_stem {
        for t in &mut tokens {
            if let Some(stripped) = t.strip_suffix('s') {
                *t = stripped.to_string();
            }
        }
    }
    tokens
}

/// In-memory term -> postings map for tables small enough to hold
/// the whole index in RAM. Search is AND-semantics across terms.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvertedIndex {
    do_stem: bool,
    index: BTreeMap<String, BTreeSet<Rid>>,
}

impl InvertedIndex {
    pub fn new(do_stem: bool) -> Self {
        Self {
            do_stem,
            index: BTreeMap::new(),
        }
    }

    pub fn add_document(&mut self, text: &str, rid: Rid) {
        for term in tokenize(text, self.do_stem, true) {
            self.index.entry(term).or_default().insert(rid);
        }
    }

    pub fn remove_rid(&mut self, rid: Rid) {
        let mut emptied = Vec::new();
        for (term, set) in self.index.iter_mut() {
            if set.remove(&rid) && set.is_empty() {
                emptied.push(term.clone());
            }
        }
        for term in emptied {
            self.index.remove(&term);
        }
    }

    pub fn search(&self, query: &str, stats: &mut Stats) -> Vec<Rid> {
        stats.inc("index.fulltext.search");
        let terms = tokenize(query, self.do_stem, true);
        if terms.is_empty() {
            return Vec::new();
        }
        let mut sets = Vec::with_capacity(terms.len());
        for term in &terms {
            match self.index.get(term) {
                Some(s) => sets.push(s),
                None => return Vec::new(),
            }
        }
        sets.sort_by_key(|s| s.len());
        let mut iter = sets.into_iter();
        let mut acc: BTreeSet<Rid> = iter.next().cloned().unwrap_or_default();
        for s in iter {
            acc = acc.intersection(s).copied().collect();
        }
        acc.into_iter().collect()
    }

    pub fn terms(&self) -> Vec<&str> {
        self.index.keys().map(|s| s.as_str()).collect()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.as_ref().with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec(self)?)?;
        std::fs::rename(tmp, path)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

// ---- SPIMI: block-then-merge on-disk build for large text columns ----

#[derive(Serialize, Deserialize)]
struct TermPostings {
    df: usize,
    postings: Vec<(String, u32)>,
}

#[derive(Serialize, Deserialize)]
struct SpimiMeta {
    n: usize,
    num_terms: usize,
    doc_norms_sharded: bool,
    shard_count: usize,
    doc_norms: BTreeMap<String, f64>,
}

pub struct SpimiBuilder {
    block_max_docs: usize,
    shard_threshold: usize,
    do_stem: bool,
}

impl SpimiBuilder {
    pub fn new(block_max_docs: usize, shard_threshold: usize, do_stem: bool) -> Self {
        Self {
            block_max_docs,
            shard_threshold,
            do_stem,
        }
    }

    /// Phase 1: tokenizes each (text, rid) pair and flushes term->tf
    /// blocks to `block_dir` every `block_max_docs` documents.
    pub fn build_blocks(
        &self,
        docs: impl Iterator<Item = (String, Rid)>,
        block_dir: impl AsRef<Path>,
    ) -> Result<usize> {
        let block_dir = block_dir.as_ref();
        std::fs::create_dir_all(block_dir)?;
        let mut block: BTreeMap<String, BTreeMap<String, u32>> = BTreeMap::new();
        let mut docs_in_block = 0usize;
        let mut block_id = 0usize;
        let mut total_docs = 0usize;

        for (text, rid) in docs {
            total_docs += 1;
            docs_in_block += 1;
            let docid = rid.to_doc_id();
            let mut counts: HashMap<String, u32> = HashMap::new();
            for term in tokenize(&text, self.do_stem, true) {
                *counts.entry(term).or_insert(0) += 1;
            }
            for (term, tf) in counts {
                *block.entry(term).or_default().entry(docid.clone()).or_insert(0) += tf;
            }
            if docs_in_block >= self.block_max_docs {
                self.write_block(block_dir, block_id, &block)?;
                block.clear();
                docs_in_block = 0;
                block_id += 1;
            }
        }
        if !block.is_empty() {
            self.write_block(block_dir, block_id, &block)?;
        }
        Ok(total_docs)
    }

    fn write_block(
        &self,
        block_dir: &Path,
        id: usize,
        block: &BTreeMap<String, BTreeMap<String, u32>>,
    ) -> Result<()> {
        let path = block_dir.join(format!("block_{id}.json"));
        let serial: BTreeMap<&str, Vec<(&str, u32)>> = block
            .iter()
            .map(|(t, postings)| (t.as_str(), postings.iter().map(|(d, tf)| (d.as_str(), *tf)).collect()))
            .collect();
        std::fs::write(path, serde_json::to_vec(&serial)?)?;
        Ok(())
    }

    /// Phase 2: multi-way merges every block file into one posting
    /// list per term under `index_dir/terms/`, then computes tf-idf
    /// document norms and writes `meta.json` (sharding the norm table
    /// once the collection passes `shard_threshold` documents).
    pub fn merge_blocks(&self, block_dir: impl AsRef<Path>, index_dir: impl AsRef<Path>, total_docs: usize) -> Result<()> {
        let block_dir = block_dir.as_ref();
        let index_dir = index_dir.as_ref();
        let terms_dir = index_dir.join("terms");
        std::fs::create_dir_all(&terms_dir)?;

        let mut merged: BTreeMap<String, BTreeMap<String, u32>> = BTreeMap::new();
        let mut entries: Vec<PathBuf> = std::fs::read_dir(block_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
            .collect();
        entries.sort();
        for path in entries {
            let bytes = std::fs::read(&path)?;
            let data: BTreeMap<String, Vec<(String, u32)>> = serde_json::from_slice(&bytes)?;
            for (term, postings) in data {
                let entry = merged.entry(term).or_default();
                for (docid, tf) in postings {
                    *entry.entry(docid).or_insert(0) += tf;
                }
            }
        }

        let n = total_docs.max(1);
        let mut doc_sumsq: BTreeMap<String, f64> = BTreeMap::new();
        let mut num_terms = 0usize;

        for (term, postings) in &merged {
            let df = postings.len();
            if df == 0 {
                continue;
            }
            num_terms += 1;
            let idf = ((n + 1) as f64 / df as f64).ln();
            let mut sorted_postings: Vec<(String, u32)> = postings.iter().map(|(d, tf)| (d.clone(), *tf)).collect();
            sorted_postings.sort();
            for (docid, tf) in &sorted_postings {
                let tfw = if *tf > 0 { 1.0 + (*tf as f64).ln() } else { 0.0 };
                let w = tfw * idf;
                *doc_sumsq.entry(docid.clone()).or_insert(0.0) += w * w;
            }
            let payload = TermPostings {
                df,
                postings: sorted_postings,
            };
            std::fs::write(terms_dir.join(format!("{}.json", term_filename(term))), serde_json::to_vec(&payload)?)?;
        }

        let doc_norms: BTreeMap<String, f64> = doc_sumsq.into_iter().map(|(d, s)| (d, s.sqrt())).collect();

        if doc_norms.len() > self.shard_threshold {
            let shard_dir = index_dir.join("doc_norms");
            std::fs::create_dir_all(&shard_dir)?;
            let mut buckets: Vec<BTreeMap<String, f64>> = vec![BTreeMap::new(); 256];
            for (docid, norm) in &doc_norms {
                let shard = (xxh3_64(docid.as_bytes()) & 0xFF) as usize;
                buckets[shard].insert(docid.clone(), *norm);
            }
            for (i, bucket) in buckets.into_iter().enumerate() {
                if bucket.is_empty() {
                    continue;
                }
                std::fs::write(shard_dir.join(format!("{i:02x}.json")), serde_json::to_vec(&bucket)?)?;
            }
            let meta = SpimiMeta {
                n,
                num_terms,
                doc_norms_sharded: true,
                shard_count: 256,
                doc_norms: BTreeMap::new(),
            };
            std::fs::write(index_dir.join("meta.json"), serde_json::to_vec(&meta)?)?;
        } else {
            let meta = SpimiMeta {
                n,
                num_terms,
                doc_norms_sharded: false,
                shard_count: 0,
                doc_norms,
            };
            std::fs::write(index_dir.join("meta.json"), serde_json::to_vec(&meta)?)?;
        }
        Ok(())
    }
}

/// Tokens are already restricted to `\w+`, but term files are keyed by
/// an `xxh3` digest rather than the raw term to avoid any filesystem
/// case-folding or length surprises across platforms.
fn term_filename(term: &str) -> String {
    format!("{:016x}", xxh3_64(term.as_bytes()))
}

fn load_term_postings(index_dir: &Path, term: &str) -> Result<(usize, Vec<(String, u32)>)> {
    let path = index_dir.join("terms").join(format!("{}.json", term_filename(term)));
    if !path.exists() {
        return Ok((0, Vec::new()));
    }
    let bytes = std::fs::read(path)?;
    let data: TermPostings = serde_json::from_slice(&bytes)?;
    Ok((data.df, data.postings))
}

fn load_doc_norm(index_dir: &Path, meta: &SpimiMeta, docid: &str) -> f64 {
    if !meta.doc_norms_sharded {
        return meta.doc_norms.get(docid).copied().unwrap_or(0.0);
    }
    let shard = xxh3_64(docid.as_bytes()) & 0xFF;
    let path = index_dir.join("doc_norms").join(format!("{shard:02x}.json"));
    let Ok(bytes) = std::fs::read(path) else { return 0.0 };
    let Ok(bucket) = serde_json::from_slice::<BTreeMap<String, f64>>(&bytes) else { return 0.0 };
    bucket.get(docid).copied().unwrap_or(0.0)
}

/// Cosine top-k query against an index built by [`SpimiBuilder`].
pub fn search_topk(index_dir: impl AsRef<Path>, query: &str, k: usize, do_stem: bool) -> Result<Vec<(Rid, f64)>> {
    let index_dir = index_dir.as_ref();
    let meta_path = index_dir.join("meta.json");
    if !meta_path.exists() {
        return Ok(Vec::new());
    }
    let meta: SpimiMeta = serde_json::from_slice(&std::fs::read(meta_path)?)?;
    if meta.n == 0 {
        return Ok(Vec::new());
    }

    let q_terms = tokenize(query, do_stem, true);
    if q_terms.is_empty() {
        return Ok(Vec::new());
    }
    let mut q_tf: HashMap<String, u32> = HashMap::new();
    for t in &q_terms {
        *q_tf.entry(t.clone()).or_insert(0) += 1;
    }

    let mut q_weights: HashMap<String, f64> = HashMap::new();
    for (term, tf) in &q_tf {
        let (df, _) = load_term_postings(index_dir, term)?;
        if df == 0 {
            continue;
        }
        let idf = ((meta.n + 1) as f64 / df as f64).ln();
        let tfw = 1.0 + (*tf as f64).ln();
        q_weights.insert(term.clone(), tfw * idf);
    }
    if q_weights.is_empty() {
        return Ok(Vec::new());
    }

    let mut scores: HashMap<String, f64> = HashMap::new();
    for (term, qw) in &q_weights {
        let (df, postings) = load_term_postings(index_dir, term)?;
        if df == 0 {
            continue;
        }
        let idf = ((meta.n + 1) as f64 / df as f64).ln();
        for (docid, tf) in postings {
            let tfw = if tf > 0 { 1.0 + (tf as f64).ln() } else { 0.0 };
            *scores.entry(docid).or_insert(0.0) += qw * tfw * idf;
        }
    }

    let q_norm = q_weights.values().map(|w| w * w).sum::<f64>().sqrt();
    let mut ranked: Vec<(Rid, f64)> = scores
        .into_iter()
        .filter_map(|(docid, dot)| {
            let dn = load_doc_norm(index_dir, &meta, &docid);
            if dn == 0.0 || q_norm == 0.0 {
                return None;
            }
            Rid::from_doc_id(&docid).map(|rid| (rid, dot / (dn * q_norm)))
        })
        .collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(k);
    Ok(ranked)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_strips_accents_and_stopwords() {
        let toks = tokenize("El camión rápido y el perro", false, true);
        assert!(toks.contains(&"camion".to_string()));
        assert!(!toks.contains(&"el".to_string()));
        assert!(!toks.contains(&"y".to_string()));
    }

    #[test]
    fn in_memory_search_is_and_semantics() {
        let mut idx = InvertedIndex::new(false);
        let mut stats = Stats::new();
        idx.add_document("quick brown fox", Rid::new(0, 0));
        idx.add_document("quick red fox", Rid::new(0, 1));
        let got = idx.search("quick fox", &mut stats);
        assert_eq!(got.len(), 2);
        let got = idx.search("quick brown", &mut stats);
        assert_eq!(got, vec![Rid::new(0, 0)]);
    }

    #[test]
    fn spimi_build_merge_and_cosine_query_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let block_dir = dir.path().join("blocks");
        let index_dir = dir.path().join("index");
        let builder = SpimiBuilder::new(500, 50_000, false);
        let docs = vec![
            ("the quick brown fox".to_string(), Rid::new(0, 0)),
            ("the lazy dog sleeps".to_string(), Rid::new(0, 1)),
            ("quick fox jumps".to_string(), Rid::new(0, 2)),
        ];
        let total = builder.build_blocks(docs.into_iter(), &block_dir).unwrap();
        builder.merge_blocks(&block_dir, &index_dir, total).unwrap();
        let results = search_topk(&index_dir, "quick fox", 2, false).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].0, Rid::new(0, 2));
    }
}
