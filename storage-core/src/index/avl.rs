//! In-memory AVL index. Persisted as a sorted `(key, rids)` array and
//! rebuilt as a perfectly balanced tree on load, rather than
//! serializing rotation-sensitive pointers.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::index::{Index, IndexStats};
use crate::metrics::Stats;
use crate::record::Rid;
use crate::types::Value;

struct Node {
    key: Value,
    vals: Vec<Rid>,
    left: Option<Box<Node>>,
    right: Option<Box<Node>>,
    height: i64,
}

fn height(n: &Option<Box<Node>>) -> i64 {
    n.as_ref().map(|n| n.height).unwrap_or(0)
}

fn update(n: &mut Node) {
    n.height = 1 + height(&n.left).max(height(&n.right));
}

fn balance(n: &Node) -> i64 {
    height(&n.left) - height(&n.right)
}

fn rotate_left(mut z: Box<Node>) -> Box<Node> {
    let mut y = z.right.take().expect("rotate_left requires a right child");
    z.right = y.left.take();
    update(&mut z);
    y.left = Some(z);
    update(&mut y);
    y
}

fn rotate_right(mut z: Box<Node>) -> Box<Node> {
    let mut y = z.left.take().expect("rotate_right requires a left child");
    z.left = y.right.take();
    update(&mut z);
    y.right = Some(z);
    update(&mut y);
    y
}

fn insert(node: Option<Box<Node>>, key: Value, val: Rid) -> Box<Node> {
    let mut node = match node {
        None => {
            return Box::new(Node {
                key,
                vals: vec![val],
                left: None,
                right: None,
                height: 1,
            })
        }
        Some(n) => n,
    };
    use std::cmp::Ordering::*;
    match key.cmp_key(&node.key) {
        Equal => {
            node.vals.push(val);
            return node;
        }
        Less => node.left = Some(insert(node.left.take(), key, val)),
        Greater => node.right = Some(insert(node.right.take(), key, val)),
    }
    update(&mut node);
    let bal = balance(&node);
    if bal > 1 {
        let left_key = node.left.as_ref().unwrap().key.clone();
        if node.key.cmp_key(&left_key) != std::cmp::Ordering::Greater {
            return rotate_right(node);
        }
        node.left = Some(rotate_left(node.left.take().unwrap()));
        return rotate_right(node);
    }
    if bal < -1 {
        let right_key = node.right.as_ref().unwrap().key.clone();
        if node.key.cmp_key(&right_key) != std::cmp::Ordering::Less {
            return rotate_left(node);
        }
        node.right = Some(rotate_right(node.right.take().unwrap()));
        return rotate_left(node);
    }
    node
}

fn search<'a>(mut cur: Option<&'a Node>, key: &Value) -> Vec<Rid> {
    while let Some(n) = cur {
        match key.cmp_key(&n.key) {
            std::cmp::Ordering::Equal => return n.vals.clone(),
            std::cmp::Ordering::Less => cur = n.left.as_deref(),
            std::cmp::Ordering::Greater => cur = n.right.as_deref(),
        }
    }
    Vec::new()
}

fn range(node: &Option<Box<Node>>, lo: &Value, hi: &Value, out: &mut Vec<Rid>) {
    let Some(n) = node else { return };
    if lo.cmp_key(&n.key) == std::cmp::Ordering::Less {
        range(&n.left, lo, hi, out);
    }
    if lo.cmp_key(&n.key) != std::cmp::Ordering::Greater && hi.cmp_key(&n.key) != std::cmp::Ordering::Less {
        out.extend(n.vals.iter().copied());
    }
    if hi.cmp_key(&n.key) == std::cmp::Ordering::Greater {
        range(&n.right, lo, hi, out);
    }
}

fn min_node(node: &Node) -> (Value, Vec<Rid>) {
    let mut cur = node;
    while let Some(l) = cur.left.as_deref() {
        cur = l;
    }
    (cur.key.clone(), cur.vals.clone())
}

fn remove_key(node: Option<Box<Node>>, key: &Value, rid: Option<Rid>) -> (Option<Box<Node>>, bool) {
    let Some(mut n) = node else { return (None, false) };
    let mut removed = false;
    match key.cmp_key(&n.key) {
        std::cmp::Ordering::Less => {
            let (new_left, r) = remove_key(n.left.take(), key, rid);
            n.left = new_left;
            removed = r;
        }
        std::cmp::Ordering::Greater => {
            let (new_right, r) = remove_key(n.right.take(), key, rid);
            n.right = new_right;
            removed = r;
        }
        std::cmp::Ordering::Equal => {
            if let Some(rid) = rid {
                n.vals.retain(|r| *r != rid);
            } else {
                n.vals.clear();
            }
            removed = true;
            if !n.vals.is_empty() {
                return (Some(n), removed);
            }
            if n.left.is_none() || n.right.is_none() {
                return (n.left.or(n.right), removed);
            }
            let (succ_key, succ_vals) = min_node(n.right.as_ref().unwrap());
            n.key = succ_key.clone();
            n.vals = succ_vals;
            let (new_right, _) = remove_key(n.right.take(), &succ_key, None);
            n.right = new_right;
        }
    }
    update(&mut n);
    let bal = balance(&n);
    if bal > 1 {
        if balance(n.left.as_ref().unwrap()) < 0 {
            n.left = Some(rotate_left(n.left.take().unwrap()));
        }
        return (Some(rotate_right(n)), removed);
    }
    if bal < -1 {
        if balance(n.right.as_ref().unwrap()) > 0 {
            n.right = Some(rotate_right(n.right.take().unwrap()));
        }
        return (Some(rotate_left(n)), removed);
    }
    (Some(n), removed)
}

fn tree_height(node: &Option<Box<Node>>) -> i64 {
    height(node)
}

fn inorder(node: &Option<Box<Node>>, out: &mut Vec<(Value, Vec<Rid>)>) {
    let Some(n) = node else { return };
    inorder(&n.left, out);
    out.push((n.key.clone(), n.vals.clone()));
    inorder(&n.right, out);
}

fn build_balanced(items: &[(Value, Vec<Rid>)]) -> Option<Box<Node>> {
    if items.is_empty() {
        return None;
    }
    let mid = items.len() / 2;
    let (key, vals) = items[mid].clone();
    let mut node = Box::new(Node {
        key,
        vals,
        left: build_balanced(&items[..mid]),
        right: build_balanced(&items[mid + 1..]),
        height: 1,
    });
    update(&mut node);
    Some(node)
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    entries: Vec<(Value, Vec<Rid>)>,
}

pub struct AvlIndex {
    root: Option<Box<Node>>,
    search_count: u64,
    insert_count: u64,
    delete_count: u64,
}

impl Default for AvlIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl AvlIndex {
    pub fn new() -> Self {
        Self {
            root: None,
            search_count: 0,
            insert_count: 0,
            delete_count: 0,
        }
    }

    pub fn save(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        let mut entries = Vec::new();
        inorder(&self.root, &mut entries);
        let bytes = serde_json::to_vec(&Snapshot { entries })?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let snap: Snapshot = serde_json::from_slice(&bytes)?;
        Ok(Self {
            root: build_balanced(&snap.entries),
            search_count: 0,
            insert_count: 0,
            delete_count: 0,
        })
    }
}

impl Index for AvlIndex {
    fn add(&mut self, key: &Value, rid: Rid, _stats: &mut Stats) -> Result<()> {
        self.insert_count += 1;
        self.root = Some(insert(self.root.take(), key.clone(), rid));
        Ok(())
    }

    fn remove(&mut self, key: &Value, rid: Rid, _stats: &mut Stats) -> bool {
        self.delete_count += 1;
        let (root, removed) = remove_key(self.root.take(), key, Some(rid));
        self.root = root;
        removed
    }

    fn search(&self, key: &Value, _stats: &mut Stats) -> Vec<Rid> {
        search(self.root.as_deref(), key)
    }

    fn range_search(&self, begin: &Value, end: &Value, _stats: &mut Stats) -> Vec<Rid> {
        let (lo, hi) = if begin.cmp_key(end) == std::cmp::Ordering::Greater {
            (end, begin)
        } else {
            (begin, end)
        };
        let mut out = Vec::new();
        range(&self.root, lo, hi, &mut out);
        out
    }

    fn get_stats(&self) -> IndexStats {
        IndexStats {
            index_type: "AVL",
            searches: self.search_count,
            inserts: self.insert_count,
            deletes: self.delete_count,
            extra: vec![("height", tree_height(&self.root) as u64)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rid(n: u32) -> Rid {
        Rid::new(n, 0)
    }

    #[test]
    fn stays_balanced_under_sequential_insertion() {
        let mut idx = AvlIndex::new();
        let mut stats = Stats::new();
        for i in 0..100i64 {
            idx.add(&Value::Int(i), rid(i as u32), &mut stats).unwrap();
        }
        let h = tree_height(&idx.root);
        assert!(h < 12, "height {h} is too tall for a balanced tree of 100 nodes");
    }

    #[test]
    fn range_search_is_order_independent() {
        let mut idx = AvlIndex::new();
        let mut stats = Stats::new();
        for i in 0..20i64 {
            idx.add(&Value::Int(i), rid(i as u32), &mut stats).unwrap();
        }
        let a = idx.range_search(&Value::Int(5), &Value::Int(10), &mut stats);
        let b = idx.range_search(&Value::Int(10), &Value::Int(5), &mut stats);
        assert_eq!(a.len(), b.len());
        assert_eq!(a.len(), 6);
    }

    #[test]
    fn save_and_load_rebuilds_balanced() {
        let dir = tempfile::tempdir().unwrap();
        let mut idx = AvlIndex::new();
        let mut stats = Stats::new();
        for i in 0..30i64 {
            idx.add(&Value::Int(i), rid(i as u32), &mut stats).unwrap();
        }
        let path = dir.path().join("avl.json");
        idx.save(&path).unwrap();
        let loaded = AvlIndex::load(&path).unwrap();
        assert_eq!(loaded.search(&Value::Int(15), &mut stats), vec![rid(15)]);
    }
}
