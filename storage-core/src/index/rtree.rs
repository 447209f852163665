//! R-tree spatial index over fixed-dimension float vectors, arena
//! addressed like the B+ tree: nodes live in a `Vec<Node>` and refer
//! to each other (and their parent) by index, which makes the
//! quadratic split/condense rewiring a matter of swapping indices
//! instead of juggling shared ownership.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::metrics::Stats;
use crate::record::Rid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mbr {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Mbr {
    fn from_point(point: &[f64]) -> Self {
        Self {
            lower: point.to_vec(),
            upper: point.to_vec(),
        }
    }

    fn area(&self) -> f64 {
        self.lower
            .iter()
            .zip(&self.upper)
            .map(|(l, u)| u - l)
            .product()
    }

    fn union(&self, other: &Mbr) -> Mbr {
        let lower = self
            .lower
            .iter()
            .zip(&other.lower)
            .map(|(a, b)| a.min(*b))
            .collect();
        let upper = self
            .upper
            .iter()
            .zip(&other.upper)
            .map(|(a, b)| a.max(*b))
            .collect();
        Mbr { lower, upper }
    }

    fn enlargement(&self, other: &Mbr) -> f64 {
        self.union(other).area() - self.area()
    }

    fn mindist(&self, point: &[f64]) -> f64 {
        let mut sum_sq = 0.0;
        for i in 0..point.len() {
            let qi = point[i];
            let ri = if qi < self.lower[i] {
                self.lower[i]
            } else if qi > self.upper[i] {
                self.upper[i]
            } else {
                qi
            };
            sum_sq += (qi - ri).powi(2);
        }
        sum_sq.sqrt()
    }

    fn from_entries(entries: &[(Mbr, Entry)]) -> Option<Mbr> {
        let mut iter = entries.iter();
        let first = iter.next()?.0.clone();
        Some(iter.fold(first, |acc, (mbr, _)| acc.union(mbr)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Entry {
    Child(usize),
    Leaf { point: Vec<f64>, rid: Rid },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Node {
    is_leaf: bool,
    entries: Vec<(Mbr, Entry)>,
    parent: Option<usize>,
}

impl Node {
    fn leaf() -> Self {
        Self {
            is_leaf: true,
            entries: Vec::new(),
            parent: None,
        }
    }

    fn internal() -> Self {
        Self {
            is_leaf: false,
            entries: Vec::new(),
            parent: None,
        }
    }

    fn mbr(&self) -> Option<Mbr> {
        Mbr::from_entries(&self.entries)
    }
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt()
}

#[derive(PartialEq)]
struct Candidate {
    dist: f64,
    kind: CandidateKind,
}

#[derive(PartialEq)]
enum CandidateKind {
    Node(usize),
    Point(Vec<f64>, Rid),
}

impl Eq for Candidate {}
impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the smallest distance first.
        other.dist.partial_cmp(&self.dist).unwrap_or(Ordering::Equal)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RTreeIndex {
    dimensions: usize,
    max_entries: usize,
    min_entries: usize,
    arena: Vec<Node>,
    root: usize,
    size: usize,
    search_count: u64,
    insert_count: u64,
    delete_count: u64,
}

impl RTreeIndex {
    pub fn new(dimensions: usize, max_entries: usize) -> Self {
        let min_entries = max_entries.div_ceil(2).max(1);
        Self {
            dimensions,
            max_entries,
            min_entries,
            arena: vec![Node::leaf()],
            root: 0,
            size: 0,
            search_count: 0,
            insert_count: 0,
            delete_count: 0,
        }
    }

    pub fn add(&mut self, point: &[f64], rid: Rid) -> Result<()> {
        if point.len() != self.dimensions {
            return Err(Error::validation("point", format!("expected {} dimensions", self.dimensions)));
        }
        self.insert_count += 1;
        let mbr = Mbr::from_point(point);
        let leaf = self.choose_leaf(self.root, &mbr);
        self.arena[leaf].entries.push((
            mbr,
            Entry::Leaf {
                point: point.to_vec(),
                rid,
            },
        ));
        self.update_mbr_chain(leaf);
        self.size += 1;
        if self.arena[leaf].entries.len() >= self.max_entries {
            self.split_node(leaf);
        }
        Ok(())
    }

    fn choose_leaf(&self, idx: usize, mbr: &Mbr) -> usize {
        if self.arena[idx].is_leaf {
            return idx;
        }
        let mut best: Option<(f64, f64, usize)> = None;
        for (entry_mbr, entry) in &self.arena[idx].entries {
            let Entry::Child(child) = entry else { unreachable!() };
            let enlargement = entry_mbr.enlargement(mbr);
            let area = entry_mbr.area();
            let better = match &best {
                None => true,
                Some((be, ba, _)) => enlargement < *be || (enlargement == *be && area < *ba),
            };
            if better {
                best = Some((enlargement, area, *child));
            }
        }
        self.choose_leaf(best.unwrap().2, mbr)
    }

    fn update_mbr_chain(&mut self, mut idx: usize) {
        loop {
            let mbr = self.arena[idx].mbr();
            let parent = self.arena[idx].parent;
            match parent {
                None => break,
                Some(p) => {
                    if let Some(mbr) = mbr {
                        if let Some(slot) = self.arena[p]
                            .entries
                            .iter_mut()
                            .find(|(_, e)| matches!(e, Entry::Child(c) if *c == idx))
                        {
                            slot.0 = mbr;
                        }
                    }
                    idx = p;
                }
            }
        }
    }

    fn split_node(&mut self, idx: usize) {
        let entries = std::mem::take(&mut self.arena[idx].entries);
        let (seed1, seed2) = Self::pick_seeds(&entries);
        let mut group1 = vec![entries[seed1].clone()];
        let mut group2 = vec![entries[seed2].clone()];
        let mut remaining: Vec<(Mbr, Entry)> = entries
            .into_iter()
            .enumerate()
            .filter(|(i, _)| *i != seed1 && *i != seed2)
            .map(|(_, e)| e)
            .collect();

        while let Some(entry) = remaining.pop() {
            if group1.len() + remaining.len() + 1 <= self.min_entries {
                group1.push(entry);
                continue;
            }
            if group2.len() + remaining.len() + 1 <= self.min_entries {
                group2.push(entry);
                continue;
            }
            let mbr1 = Mbr::from_entries(&group1).unwrap();
            let mbr2 = Mbr::from_entries(&group2).unwrap();
            if mbr1.enlargement(&entry.0) < mbr2.enlargement(&entry.0) {
                group1.push(entry);
            } else {
                group2.push(entry);
            }
        }

        let is_leaf = self.arena[idx].is_leaf;
        self.arena[idx].entries = group1;
        let new_node = Node {
            is_leaf,
            entries: group2,
            parent: None,
        };
        let new_idx = self.arena.len();
        self.arena.push(new_node);

        if !is_leaf {
            let child_ids: Vec<usize> = self.arena[new_idx]
                .entries
                .iter()
                .map(|(_, e)| match e {
                    Entry::Child(c) => *c,
                    _ => unreachable!(),
                })
                .collect();
            for c in child_ids {
                self.arena[c].parent = Some(new_idx);
            }
        }

        let parent = self.arena[idx].parent;
        match parent {
            None => {
                let mut new_root = Node::internal();
                let mbr_a = self.arena[idx].mbr().unwrap();
                let mbr_b = self.arena[new_idx].mbr().unwrap();
                new_root.entries.push((mbr_a, Entry::Child(idx)));
                new_root.entries.push((mbr_b, Entry::Child(new_idx)));
                let root_idx = self.arena.len();
                self.arena.push(new_root);
                self.arena[idx].parent = Some(root_idx);
                self.arena[new_idx].parent = Some(root_idx);
                self.root = root_idx;
            }
            Some(p) => {
                self.arena[new_idx].parent = Some(p);
                let new_mbr = self.arena[new_idx].mbr().unwrap();
                self.arena[p].entries.push((new_mbr, Entry::Child(new_idx)));
                self.update_mbr_chain(idx);
                if self.arena[p].entries.len() >= self.max_entries {
                    self.split_node(p);
                }
            }
        }
    }

    fn pick_seeds(entries: &[(Mbr, Entry)]) -> (usize, usize) {
        let mut max_waste = -1.0;
        let mut seeds = (0, 1.min(entries.len() - 1));
        for i in 0..entries.len() {
            for j in (i + 1)..entries.len() {
                let union = entries[i].0.union(&entries[j].0);
                let waste = union.area() - entries[i].0.area() - entries[j].0.area();
                if waste > max_waste {
                    max_waste = waste;
                    seeds = (i, j);
                }
            }
        }
        seeds
    }

    pub fn range_radius(&self, point: &[f64], radius: f64, stats: &mut Stats) -> Vec<Rid> {
        stats.inc("index.rtree.range");
        let mut out = Vec::new();
        self.range_recursive(self.root, point, radius, &mut out);
        out
    }

    fn range_recursive(&self, idx: usize, point: &[f64], radius: f64, out: &mut Vec<Rid>) {
        let node = &self.arena[idx];
        if node.is_leaf {
            for (_, entry) in &node.entries {
                let Entry::Leaf { point: p, rid } = entry else { unreachable!() };
                if euclidean(point, p) <= radius {
                    out.push(*rid);
                }
            }
        } else {
            for (mbr, entry) in &node.entries {
                let Entry::Child(child) = entry else { unreachable!() };
                if mbr.mindist(point) <= radius {
                    self.range_recursive(*child, point, radius, out);
                }
            }
        }
    }

    pub fn knn(&self, point: &[f64], k: usize, stats: &mut Stats) -> Vec<(Rid, f64)> {
        stats.inc("index.rtree.knn");
        let mut heap = BinaryHeap::new();
        heap.push(Candidate {
            dist: 0.0,
            kind: CandidateKind::Node(self.root),
        });
        let mut out: Vec<(Rid, f64)> = Vec::new();
        while let Some(Candidate { dist, kind }) = heap.pop() {
            if out.len() >= k {
                break;
            }
            match kind {
                CandidateKind::Point(_, rid) => out.push((rid, dist)),
                CandidateKind::Node(idx) => {
                    let node = &self.arena[idx];
                    if node.is_leaf {
                        for (_, entry) in &node.entries {
                            let Entry::Leaf { point: p, rid } = entry else { unreachable!() };
                            heap.push(Candidate {
                                dist: euclidean(point, p),
                                kind: CandidateKind::Point(p.clone(), *rid),
                            });
                        }
                    } else {
                        for (mbr, entry) in &node.entries {
                            let Entry::Child(child) = entry else { unreachable!() };
                            heap.push(Candidate {
                                dist: mbr.mindist(point),
                                kind: CandidateKind::Node(*child),
                            });
                        }
                    }
                }
            }
        }
        out.truncate(k);
        out
    }

    pub fn remove(&mut self, point: &[f64], rid: Rid, _stats: &mut Stats) -> bool {
        self.delete_count += 1;
        let Some((leaf, pos)) = self.find_leaf(self.root, point, rid) else {
            return false;
        };
        self.arena[leaf].entries.remove(pos);
        self.size -= 1;
        self.update_mbr_chain(leaf);
        if leaf != self.root && self.arena[leaf].entries.len() < self.min_entries {
            self.condense(leaf);
        }
        if !self.arena[self.root].is_leaf && self.arena[self.root].entries.len() == 1 {
            if let Entry::Child(only) = self.arena[self.root].entries[0].1 {
                self.root = only;
                self.arena[self.root].parent = None;
            }
        }
        true
    }

    fn find_leaf(&self, idx: usize, point: &[f64], rid: Rid) -> Option<(usize, usize)> {
        let node = &self.arena[idx];
        if node.is_leaf {
            node.entries.iter().position(|(_, e)| match e {
                Entry::Leaf { point: p, rid: r } => *r == rid && euclidean(p, point) < 1e-9,
                _ => false,
            }).map(|pos| (idx, pos))
        } else {
            for (mbr, entry) in &node.entries {
                let Entry::Child(child) = entry else { unreachable!() };
                if point.iter().enumerate().all(|(i, &q)| q >= mbr.lower[i] - 1e-9 && q <= mbr.upper[i] + 1e-9) {
                    if let Some(found) = self.find_leaf(*child, point, rid) {
                        return Some(found);
                    }
                }
            }
            None
        }
    }

    fn condense(&mut self, leaf: usize) {
        let mut orphans: Vec<(Vec<f64>, Rid)> = Vec::new();
        let mut node = leaf;
        while node != self.root {
            let parent = self.arena[node].parent.unwrap();
            if self.arena[node].entries.len() < self.min_entries {
                self.arena[parent].entries.retain(|(_, e)| !matches!(e, Entry::Child(c) if *c == node));
                for (_, e) in std::mem::take(&mut self.arena[node].entries) {
                    if let Entry::Leaf { point, rid } = e {
                        orphans.push((point, rid));
                    }
                }
            }
            self.update_mbr_chain(parent);
            node = parent;
        }
        for (point, rid) in orphans {
            let _ = self.add(&point, rid);
        }
    }

    pub fn get_height(&self) -> usize {
        self.height(self.root)
    }

    fn height(&self, idx: usize) -> usize {
        if self.arena[idx].is_leaf {
            1
        } else {
            let Entry::Child(first) = self.arena[idx].entries[0].1 else { unreachable!() };
            1 + self.height(first)
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn save(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_vec(self)?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rid(n: u32) -> Rid {
        Rid::new(n, 0)
    }

    #[test]
    fn inserts_and_knn_finds_nearest() {
        let mut idx = RTreeIndex::new(2, 4);
        let mut stats = Stats::new();
        for i in 0..30i64 {
            idx.add(&[i as f64, i as f64], rid(i as u32)).unwrap();
        }
        let got = idx.knn(&[15.2, 15.2], 3, &mut stats);
        assert_eq!(got.len(), 3);
        assert_eq!(got[0].0, rid(15));
    }

    #[test]
    fn range_radius_filters_by_distance() {
        let mut idx = RTreeIndex::new(2, 4);
        let mut stats = Stats::new();
        for i in 0..10i64 {
            idx.add(&[i as f64, 0.0], rid(i as u32)).unwrap();
        }
        let got = idx.range_radius(&[5.0, 0.0], 2.0, &mut stats);
        assert_eq!(got.len(), 5); // 3,4,5,6,7
    }

    #[test]
    fn remove_drops_a_point() {
        let mut idx = RTreeIndex::new(2, 4);
        let mut stats = Stats::new();
        idx.add(&[1.0, 1.0], rid(1)).unwrap();
        idx.add(&[2.0, 2.0], rid(2)).unwrap();
        assert!(idx.remove(&[1.0, 1.0], rid(1), &mut stats));
        assert_eq!(idx.size(), 1);
        let got = idx.knn(&[1.0, 1.0], 5, &mut stats);
        assert!(got.iter().all(|(r, _)| *r != rid(1)));
    }
}
