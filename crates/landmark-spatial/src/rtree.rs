//! Copy-on-write R-tree over projected coordinates.
//!
//! The published tree is an immutable `TreeVersion` behind an `ArcSwap`.
//! Range queries load the current version and walk it without locking.
//! Writers are serialized by a mutex, copy the nodes on the path they
//! change, and publish a new version; untouched subtrees are shared.
//! A version is freed when the last reader holding it drops its `Arc`.
//!
//! Rebuilds bulk-load a shadow tree packed in Hilbert order while writes
//! continue against the live tree and are journaled. The journal is
//! replayed onto the shadow under the writer lock, then the shadow is
//! published in a single swap.
//!
//! Point lookups and stats never take the writer lock: atom locations live
//! in a sharded map the writer updates after each publish.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use landmark_types::{AtomId, Coord, IndexParams, ProjectedCoordinate, PROJECTED_DIMS};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::curve::CurveIndexer;
use crate::error::IndexError;
use crate::index::{IndexStats, Neighbor, RangeResult, RebuildStats, SpatialIndex};

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub min: Coord,
    pub max: Coord,
}

impl Rect {
    /// Identity for `union`; contains nothing.
    pub const EMPTY: Rect = Rect {
        min: [f32::INFINITY; PROJECTED_DIMS],
        max: [f32::NEG_INFINITY; PROJECTED_DIMS],
    };

    pub fn point(p: &Coord) -> Self {
        Self { min: *p, max: *p }
    }

    pub fn union(&self, other: &Rect) -> Rect {
        let mut out = *self;
        for d in 0..PROJECTED_DIMS {
            out.min[d] = out.min[d].min(other.min[d]);
            out.max[d] = out.max[d].max(other.max[d]);
        }
        out
    }

    pub fn volume(&self) -> f32 {
        (0..PROJECTED_DIMS).map(|d| self.max[d] - self.min[d]).product()
    }

    pub fn margin(&self) -> f32 {
        (0..PROJECTED_DIMS).map(|d| self.max[d] - self.min[d]).sum()
    }

    pub fn contains_point(&self, p: &Coord) -> bool {
        (0..PROJECTED_DIMS).all(|d| p[d] >= self.min[d] && p[d] <= self.max[d])
    }

    /// Squared distance from `p` to the nearest point of the box.
    pub fn min_dist_sq(&self, p: &Coord) -> f32 {
        let mut sum = 0.0;
        for d in 0..PROJECTED_DIMS {
            let delta = if p[d] < self.min[d] {
                self.min[d] - p[d]
            } else if p[d] > self.max[d] {
                p[d] - self.max[d]
            } else {
                0.0
            };
            sum += delta * delta;
        }
        sum
    }

    fn center(&self, axis: usize) -> f32 {
        (self.min[axis] + self.max[axis]) * 0.5
    }
}

fn dist_sq(a: &Coord, b: &Coord) -> f32 {
    (0..PROJECTED_DIMS).map(|d| (a[d] - b[d]) * (a[d] - b[d])).sum()
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    atom_id: AtomId,
    coord: Coord,
    key: u64,
}

#[derive(Debug, Clone)]
struct Child {
    rect: Rect,
    node: Arc<Node>,
}

impl Child {
    fn new(node: Arc<Node>) -> Self {
        Self {
            rect: node.bounds(),
            node,
        }
    }
}

#[derive(Debug)]
enum Node {
    Leaf(Vec<Entry>),
    Internal(Vec<Child>),
}

impl Node {
    fn bounds(&self) -> Rect {
        match self {
            Node::Leaf(entries) => entries
                .iter()
                .fold(Rect::EMPTY, |acc, e| acc.union(&Rect::point(&e.coord))),
            Node::Internal(children) => children
                .iter()
                .fold(Rect::EMPTY, |acc, c| acc.union(&c.rect)),
        }
    }
}

enum Removal {
    NotFound,
    Emptied,
    Replaced(Arc<Node>),
}

/// Mutable handle to a tree; cloning shares every node.
#[derive(Debug, Clone)]
struct Tree {
    root: Arc<Node>,
    height: usize,
    len: usize,
}

impl Tree {
    fn empty() -> Self {
        Self {
            root: Arc::new(Node::Leaf(Vec::new())),
            height: 1,
            len: 0,
        }
    }

    /// Pack entries in curve-key order, filling nodes to three quarters.
    fn bulk_load(mut entries: Vec<Entry>, max_entries: usize) -> Self {
        if entries.is_empty() {
            return Self::empty();
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key).then_with(|| a.atom_id.cmp(&b.atom_id)));
        let len = entries.len();
        let fill = (max_entries * 3 / 4).max(2);

        let mut level: Vec<Child> = entries
            .chunks(fill)
            .map(|chunk| Child::new(Arc::new(Node::Leaf(chunk.to_vec()))))
            .collect();
        let mut height = 1;
        while level.len() > 1 {
            level = level
                .chunks(fill)
                .map(|chunk| Child::new(Arc::new(Node::Internal(chunk.to_vec()))))
                .collect();
            height += 1;
        }

        match level.pop() {
            Some(child) => Self {
                root: child.node,
                height,
                len,
            },
            None => Self::empty(),
        }
    }

    fn insert(&mut self, entry: Entry, max_entries: usize) {
        let (node, split) = insert_rec(&self.root, entry, max_entries);
        self.root = match split {
            Some(sibling) => {
                self.height += 1;
                Arc::new(Node::Internal(vec![Child::new(node), Child::new(sibling)]))
            }
            None => node,
        };
        self.len += 1;
    }

    fn remove(&mut self, atom_id: &AtomId, coord: &Coord) -> bool {
        match remove_rec(&self.root, atom_id, coord) {
            Removal::NotFound => false,
            Removal::Emptied => {
                *self = Self::empty();
                true
            }
            Removal::Replaced(mut root) => {
                // Collapse single-child internal roots
                loop {
                    let next = match &*root {
                        Node::Internal(children) if children.len() == 1 => children[0].node.clone(),
                        _ => break,
                    };
                    root = next;
                    self.height -= 1;
                }
                self.root = root;
                self.len -= 1;
                true
            }
        }
    }

    fn extent(&self) -> Option<Rect> {
        (self.len > 0).then(|| self.root.bounds())
    }
}

fn insert_rec(node: &Node, entry: Entry, max_entries: usize) -> (Arc<Node>, Option<Arc<Node>>) {
    match node {
        Node::Leaf(entries) => {
            let mut updated = Vec::with_capacity(entries.len() + 1);
            updated.extend_from_slice(entries);
            updated.push(entry);
            if updated.len() > max_entries {
                let (left, right) = split_entries(updated);
                (Arc::new(Node::Leaf(left)), Some(Arc::new(Node::Leaf(right))))
            } else {
                (Arc::new(Node::Leaf(updated)), None)
            }
        }
        Node::Internal(children) => {
            let i = choose_subtree(children, &entry.coord);
            let (child, split) = insert_rec(&children[i].node, entry, max_entries);
            let mut updated = children.clone();
            updated[i] = Child::new(child);
            if let Some(sibling) = split {
                updated.push(Child::new(sibling));
            }
            if updated.len() > max_entries {
                let (left, right) = split_children(updated);
                (
                    Arc::new(Node::Internal(left)),
                    Some(Arc::new(Node::Internal(right))),
                )
            } else {
                (Arc::new(Node::Internal(updated)), None)
            }
        }
    }
}

fn remove_rec(node: &Node, atom_id: &AtomId, coord: &Coord) -> Removal {
    match node {
        Node::Leaf(entries) => match entries.iter().position(|e| e.atom_id == *atom_id) {
            None => Removal::NotFound,
            Some(_) if entries.len() == 1 => Removal::Emptied,
            Some(pos) => {
                let mut updated = entries.clone();
                updated.remove(pos);
                Removal::Replaced(Arc::new(Node::Leaf(updated)))
            }
        },
        Node::Internal(children) => {
            for (i, child) in children.iter().enumerate() {
                if !child.rect.contains_point(coord) {
                    continue;
                }
                match remove_rec(&child.node, atom_id, coord) {
                    Removal::NotFound => continue,
                    Removal::Emptied => {
                        if children.len() == 1 {
                            return Removal::Emptied;
                        }
                        let mut updated = children.clone();
                        updated.remove(i);
                        return Removal::Replaced(Arc::new(Node::Internal(updated)));
                    }
                    Removal::Replaced(node) => {
                        let mut updated = children.clone();
                        updated[i] = Child::new(node);
                        return Removal::Replaced(Arc::new(Node::Internal(updated)));
                    }
                }
            }
            Removal::NotFound
        }
    }
}

/// Child needing the least volume enlargement, then the smallest.
fn choose_subtree(children: &[Child], p: &Coord) -> usize {
    let point = Rect::point(p);
    let mut best = 0;
    let mut best_key = (f32::INFINITY, f32::INFINITY, f32::INFINITY);
    for (i, child) in children.iter().enumerate() {
        let grown = child.rect.union(&point);
        let key = (
            grown.volume() - child.rect.volume(),
            child.rect.volume(),
            grown.margin() - child.rect.margin(),
        );
        let better = key
            .0
            .total_cmp(&best_key.0)
            .then(key.1.total_cmp(&best_key.1))
            .then(key.2.total_cmp(&best_key.2))
            == Ordering::Less;
        if better {
            best = i;
            best_key = key;
        }
    }
    best
}

/// Axis along which item centers spread the most.
fn widest_axis<T>(items: &[T], center: impl Fn(&T, usize) -> f32) -> usize {
    let mut best_axis = 0;
    let mut best_spread = f32::NEG_INFINITY;
    for axis in 0..PROJECTED_DIMS {
        let (lo, hi) = items.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), item| {
            let c = center(item, axis);
            (lo.min(c), hi.max(c))
        });
        if hi - lo > best_spread {
            best_spread = hi - lo;
            best_axis = axis;
        }
    }
    best_axis
}

fn split_entries(mut entries: Vec<Entry>) -> (Vec<Entry>, Vec<Entry>) {
    let axis = widest_axis(&entries, |e, a| e.coord[a]);
    entries.sort_by(|a, b| {
        a.coord[axis]
            .total_cmp(&b.coord[axis])
            .then_with(|| a.atom_id.cmp(&b.atom_id))
    });
    let right = entries.split_off(entries.len() / 2);
    (entries, right)
}

fn split_children(mut children: Vec<Child>) -> (Vec<Child>, Vec<Child>) {
    let axis = widest_axis(&children, |c, a| c.rect.center(a));
    children.sort_by(|a, b| a.rect.center(axis).total_cmp(&b.rect.center(axis)));
    let right = children.split_off(children.len() / 2);
    (children, right)
}

enum Target {
    Node(Arc<Node>),
    Entry(AtomId),
}

struct HeapItem {
    dist_sq: f32,
    target: Target,
}

impl HeapItem {
    /// Nodes sort after entries at equal distance; entries by id.
    fn rank(&self) -> (u8, Option<&AtomId>) {
        match &self.target {
            Target::Entry(id) => (0, Some(id)),
            Target::Node(_) => (1, None),
        }
    }
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist_sq
            .total_cmp(&other.dist_sq)
            .then_with(|| self.rank().cmp(&other.rank()))
    }
}

/// Immutable published state.
#[derive(Debug)]
struct TreeVersion {
    tree: Tree,
    generation: u64,
    params: IndexParams,
    curve: CurveIndexer,
    /// Entries lying outside `params.bounds`
    outside: usize,
}

#[derive(Debug, Clone, Copy)]
enum JournalOp {
    Insert(AtomId, Coord),
    Remove(AtomId),
}

/// State owned by the single active writer.
#[derive(Debug, Default)]
struct WriterState {
    outside: HashSet<AtomId>,
    /// Present while a shadow rebuild is running
    journal: Option<Vec<JournalOp>>,
}

#[derive(Debug, Default)]
struct Counters {
    clamped: AtomicU64,
    rejected: AtomicU64,
    rebuilds: AtomicU64,
    last_rebuild_ms: AtomicU64,
    queries: AtomicU64,
    nodes_visited: AtomicU64,
}

/// Clears the rebuild flag and any leftover journal on every exit path.
struct RebuildGuard<'a>(&'a RTreeIndex);

impl Drop for RebuildGuard<'_> {
    fn drop(&mut self) {
        self.0.writer.lock().journal = None;
        self.0.rebuilding.store(false, AtomicOrdering::SeqCst);
    }
}

/// Concurrent R-tree implementing [`SpatialIndex`].
pub struct RTreeIndex {
    current: ArcSwap<TreeVersion>,
    /// Coordinate and curve key per atom; written only under `writer`
    locations: DashMap<AtomId, (Coord, u64)>,
    writer: Mutex<WriterState>,
    rebuilding: AtomicBool,
    counters: Counters,
}

impl RTreeIndex {
    pub fn new(params: IndexParams) -> Result<Self, IndexError> {
        let curve = CurveIndexer::new(&params)?;
        Ok(Self {
            current: ArcSwap::from_pointee(TreeVersion {
                tree: Tree::empty(),
                generation: 0,
                params,
                curve,
                outside: 0,
            }),
            locations: DashMap::new(),
            writer: Mutex::new(WriterState::default()),
            rebuilding: AtomicBool::new(false),
            counters: Counters::default(),
        })
    }

    /// Generation of the published tree.
    pub fn generation(&self) -> u64 {
        self.current.load().generation
    }

    pub fn is_rebuilding(&self) -> bool {
        self.rebuilding.load(AtomicOrdering::SeqCst)
    }

    /// Curve indexer of the published tree.
    pub fn curve(&self) -> CurveIndexer {
        self.current.load().curve
    }

    fn publish(&self, base: &TreeVersion, tree: Tree, outside: usize) {
        self.current.store(Arc::new(TreeVersion {
            tree,
            generation: base.generation + 1,
            params: base.params,
            curve: base.curve,
            outside,
        }));
    }

    fn rebuild_inner(
        &self,
        provided: Option<Vec<(AtomId, Coord)>>,
        params: IndexParams,
    ) -> Result<RebuildStats, IndexError> {
        let curve = CurveIndexer::new(&params)?;
        if self.rebuilding.swap(true, AtomicOrdering::SeqCst) {
            return Err(IndexError::RebuildInProgress);
        }
        let _guard = RebuildGuard(self);
        let started = Instant::now();

        let snapshot: Vec<(AtomId, Coord)> = {
            let mut w = self.writer.lock();
            w.journal = Some(Vec::new());
            match provided {
                Some(entries) => entries,
                None => self
                    .locations
                    .iter()
                    .map(|e| (*e.key(), e.value().0))
                    .collect(),
            }
        };

        // Shadow build, no locks held
        let mut clamped = 0usize;
        let mut locations: HashMap<AtomId, (Coord, u64)> = HashMap::with_capacity(snapshot.len());
        for (atom_id, coord) in snapshot {
            match curve.encode_lossy(&coord) {
                Ok(lin) => {
                    clamped += lin.clamped as usize;
                    locations.insert(atom_id, (coord, lin.key));
                }
                Err(e) => warn!(atom_id = %atom_id.short(), error = %e, "Skipping entry during rebuild"),
            }
        }
        let entries = locations
            .iter()
            .map(|(atom_id, (coord, key))| Entry {
                atom_id: *atom_id,
                coord: *coord,
                key: *key,
            })
            .collect();
        let mut tree = Tree::bulk_load(entries, params.max_node_entries);

        // Replay and swap
        let mut w = self.writer.lock();
        let journal = w.journal.take().unwrap_or_default();
        let replayed = journal.len();
        for op in journal {
            match op {
                JournalOp::Insert(atom_id, coord) => {
                    if let Some((old, _)) = locations.get(&atom_id).copied() {
                        tree.remove(&atom_id, &old);
                    }
                    if let Ok(lin) = curve.encode_lossy(&coord) {
                        clamped += lin.clamped as usize;
                        tree.insert(
                            Entry {
                                atom_id,
                                coord,
                                key: lin.key,
                            },
                            params.max_node_entries,
                        );
                        locations.insert(atom_id, (coord, lin.key));
                    }
                }
                JournalOp::Remove(atom_id) => {
                    if let Some((old, _)) = locations.remove(&atom_id) {
                        tree.remove(&atom_id, &old);
                    }
                }
            }
        }

        let outside: HashSet<AtomId> = locations
            .iter()
            .filter(|(_, (c, _))| !params.bounds.contains(c))
            .map(|(id, _)| *id)
            .collect();
        let generation = self.current.load().generation + 1;
        let height = tree.height;
        let len = tree.len;
        self.current.store(Arc::new(TreeVersion {
            tree,
            generation,
            params,
            curve,
            outside: outside.len(),
        }));
        self.locations.retain(|id, _| locations.contains_key(id));
        for (atom_id, location) in locations {
            self.locations.insert(atom_id, location);
        }
        w.outside = outside;
        drop(w);

        let elapsed = started.elapsed();
        self.counters.clamped.fetch_add(clamped as u64, AtomicOrdering::Relaxed);
        self.counters.rebuilds.fetch_add(1, AtomicOrdering::Relaxed);
        self.counters
            .last_rebuild_ms
            .store(elapsed.as_millis() as u64, AtomicOrdering::Relaxed);

        info!(
            entries = len,
            replayed,
            height,
            generation,
            elapsed_ms = elapsed.as_millis() as u64,
            "Spatial index rebuilt"
        );

        Ok(RebuildStats {
            entries: len,
            replayed,
            height,
            generation,
            clamped,
            elapsed,
        })
    }
}

impl SpatialIndex for RTreeIndex {
    fn insert(&self, atom_id: AtomId, coord: Coord) -> Result<u64, IndexError> {
        let mut w = self.writer.lock();
        let previous = self.locations.get(&atom_id).map(|e| *e.value());
        if let Some((old, key)) = previous {
            if old == coord {
                return Ok(key);
            }
        }

        let current = self.current.load_full();
        let lin = match current.curve.encode(&coord) {
            Ok(lin) => lin,
            Err(e) => {
                if matches!(e, IndexError::OutOfBounds { .. }) {
                    self.counters.rejected.fetch_add(1, AtomicOrdering::Relaxed);
                }
                return Err(e);
            }
        };
        if lin.clamped {
            self.counters.clamped.fetch_add(1, AtomicOrdering::Relaxed);
            debug!(atom_id = %atom_id.short(), ?coord, "Clamped coordinate outside index bounds");
        }

        let mut tree = current.tree.clone();
        if let Some((old, _)) = previous {
            if !tree.remove(&atom_id, &old) {
                return Err(IndexError::Consistency(format!(
                    "{} is tracked but missing from the tree",
                    atom_id
                )));
            }
        }
        tree.insert(
            Entry {
                atom_id,
                coord,
                key: lin.key,
            },
            current.params.max_node_entries,
        );
        if current.params.bounds.contains(&coord) {
            w.outside.remove(&atom_id);
        } else {
            w.outside.insert(atom_id);
        }
        self.publish(&current, tree, w.outside.len());
        self.locations.insert(atom_id, (coord, lin.key));
        if let Some(journal) = w.journal.as_mut() {
            journal.push(JournalOp::Insert(atom_id, coord));
        }
        Ok(lin.key)
    }

    fn remove(&self, atom_id: &AtomId) -> Result<bool, IndexError> {
        let mut w = self.writer.lock();
        let Some((coord, _)) = self.locations.get(atom_id).map(|e| *e.value()) else {
            return Ok(false);
        };

        let current = self.current.load_full();
        let mut tree = current.tree.clone();
        if !tree.remove(atom_id, &coord) {
            return Err(IndexError::Consistency(format!(
                "{} is tracked but missing from the tree",
                atom_id
            )));
        }
        w.outside.remove(atom_id);
        self.publish(&current, tree, w.outside.len());
        self.locations.remove(atom_id);
        if let Some(journal) = w.journal.as_mut() {
            journal.push(JournalOp::Remove(*atom_id));
        }
        Ok(true)
    }

    fn range_query(&self, center: &Coord, radius: f32, limit: usize) -> RangeResult {
        let mut result = RangeResult::default();
        if limit == 0 || radius.is_nan() || radius < 0.0 {
            return result;
        }
        let version = self.current.load_full();
        if version.tree.len == 0 {
            return result;
        }

        let r2 = radius * radius;
        let mut heap = BinaryHeap::new();
        heap.push(Reverse(HeapItem {
            dist_sq: version.tree.root.bounds().min_dist_sq(center),
            target: Target::Node(version.tree.root.clone()),
        }));

        while let Some(Reverse(item)) = heap.pop() {
            if item.dist_sq > r2 {
                break;
            }
            match item.target {
                Target::Entry(atom_id) => {
                    result.hits.push(Neighbor {
                        atom_id,
                        distance: item.dist_sq.sqrt(),
                    });
                    if result.hits.len() >= limit {
                        break;
                    }
                }
                Target::Node(node) => {
                    result.nodes_visited += 1;
                    match &*node {
                        Node::Leaf(entries) => {
                            for e in entries {
                                let d = dist_sq(center, &e.coord);
                                if d <= r2 {
                                    heap.push(Reverse(HeapItem {
                                        dist_sq: d,
                                        target: Target::Entry(e.atom_id),
                                    }));
                                }
                            }
                        }
                        Node::Internal(children) => {
                            for child in children {
                                let d = child.rect.min_dist_sq(center);
                                if d <= r2 {
                                    heap.push(Reverse(HeapItem {
                                        dist_sq: d,
                                        target: Target::Node(child.node.clone()),
                                    }));
                                }
                            }
                        }
                    }
                }
            }
        }

        self.counters.queries.fetch_add(1, AtomicOrdering::Relaxed);
        self.counters
            .nodes_visited
            .fetch_add(result.nodes_visited as u64, AtomicOrdering::Relaxed);
        result
    }

    fn rebuild(
        &self,
        entries: Vec<(AtomId, Coord)>,
        params: IndexParams,
    ) -> Result<RebuildStats, IndexError> {
        self.rebuild_inner(Some(entries), params)
    }

    fn reindex(&self, params: IndexParams) -> Result<RebuildStats, IndexError> {
        self.rebuild_inner(None, params)
    }

    fn entry(&self, atom_id: &AtomId) -> Option<ProjectedCoordinate> {
        self.locations.get(atom_id).map(|e| {
            let (coord, curve_key) = *e.value();
            ProjectedCoordinate {
                atom_id: *atom_id,
                coord,
                curve_key,
            }
        })
    }

    fn len(&self) -> usize {
        self.current.load().tree.len
    }

    fn params(&self) -> IndexParams {
        self.current.load().params
    }

    fn stats(&self) -> IndexStats {
        let version = self.current.load_full();
        IndexStats {
            len: version.tree.len,
            height: version.tree.height,
            generation: version.generation,
            params: version.params,
            extent: version.tree.extent().map(|r| (r.min, r.max)),
            outside_bounds: version.outside,
            clamped_total: self.counters.clamped.load(AtomicOrdering::Relaxed),
            rejected_total: self.counters.rejected.load(AtomicOrdering::Relaxed),
            rebuild_count: self.counters.rebuilds.load(AtomicOrdering::Relaxed),
            last_rebuild_ms: self.counters.last_rebuild_ms.load(AtomicOrdering::Relaxed),
            queries: self.counters.queries.load(AtomicOrdering::Relaxed),
            nodes_visited_total: self.counters.nodes_visited.load(AtomicOrdering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use landmark_types::{Bounds, OutOfBoundsPolicy};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn id(n: usize) -> AtomId {
        AtomId::compute(&[n as f32], "test")
    }

    fn random_points(n: usize, seed: u64) -> Vec<(AtomId, Coord)> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|i| {
                (
                    id(i),
                    [
                        rng.random_range(-1.0..1.0),
                        rng.random_range(-1.0..1.0),
                        rng.random_range(-1.0..1.0),
                    ],
                )
            })
            .collect()
    }

    fn brute_force(points: &[(AtomId, Coord)], center: &Coord, radius: f32, limit: usize) -> Vec<AtomId> {
        let mut hits: Vec<(f32, AtomId)> = points
            .iter()
            .map(|(id, c)| (dist_sq(center, c), *id))
            .filter(|(d, _)| *d <= radius * radius)
            .collect();
        hits.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        hits.into_iter().take(limit).map(|(_, id)| id).collect()
    }

    fn filled(points: &[(AtomId, Coord)]) -> RTreeIndex {
        let index = RTreeIndex::new(IndexParams::default()).unwrap();
        for (id, c) in points {
            index.insert(*id, *c).unwrap();
        }
        index
    }

    #[test]
    fn test_empty_index_query() {
        let index = RTreeIndex::new(IndexParams::default()).unwrap();
        assert!(index.range_query(&[0.0; 3], 10.0, 5).is_empty());
        assert!(index.is_empty());
    }

    #[test]
    fn test_range_query_matches_brute_force() {
        let points = random_points(2_000, 1);
        let index = filled(&points);
        assert_eq!(index.len(), 2_000);

        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..100 {
            let center: Coord = [
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
                rng.random_range(-1.0..1.0),
            ];
            let radius = rng.random_range(0.05..0.6);
            let limit = rng.random_range(1..200);
            let got: Vec<AtomId> = index
                .range_query(&center, radius, limit)
                .hits
                .iter()
                .map(|n| n.atom_id)
                .collect();
            assert_eq!(got, brute_force(&points, &center, radius, limit));
        }
    }

    #[test]
    fn test_results_sorted_by_distance() {
        let index = filled(&random_points(500, 3));
        let result = index.range_query(&[0.1, 0.2, 0.3], 1.0, 100);
        assert_eq!(result.len(), 100);
        for pair in result.hits.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
        assert!(result.nodes_visited > 0);
    }

    #[test]
    fn test_remove() {
        let points = random_points(300, 4);
        let index = filled(&points);
        for (id, _) in points.iter().take(150) {
            assert!(index.remove(id).unwrap());
        }
        assert!(!index.remove(&points[0].0).unwrap());
        assert_eq!(index.len(), 150);

        let got: Vec<AtomId> = index
            .range_query(&[0.0; 3], 10.0, 1_000)
            .hits
            .iter()
            .map(|n| n.atom_id)
            .collect();
        assert_eq!(got.len(), 150);
        assert_eq!(got, brute_force(&points[150..], &[0.0; 3], 10.0, 1_000));

        for (id, _) in points.iter().skip(150) {
            assert!(index.remove(id).unwrap());
        }
        assert!(index.is_empty());
        assert_eq!(index.stats().height, 1);
    }

    #[test]
    fn test_insert_is_idempotent_and_moves() {
        let index = RTreeIndex::new(IndexParams::default()).unwrap();
        let a = id(1);
        let key = index.insert(a, [0.1, 0.1, 0.1]).unwrap();
        let generation = index.generation();
        assert_eq!(index.insert(a, [0.1, 0.1, 0.1]).unwrap(), key);
        assert_eq!(index.generation(), generation);
        assert_eq!(index.len(), 1);

        index.insert(a, [-0.5, -0.5, -0.5]).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.entry(&a).unwrap().coord, [-0.5, -0.5, -0.5]);
        assert!(index.range_query(&[0.1, 0.1, 0.1], 0.01, 10).is_empty());
    }

    #[test]
    fn test_rebuild_replaces_contents_and_params() {
        let points = random_points(1_000, 5);
        let index = filled(&points);
        let params = IndexParams {
            bounds: Bounds::new(-2.0, 2.0),
            resolution_bits: 10,
            ..IndexParams::default()
        };
        let stats = index.rebuild(points[..600].to_vec(), params).unwrap();
        assert_eq!(stats.entries, 600);
        assert_eq!(index.len(), 600);
        assert_eq!(index.params().resolution_bits, 10);
        assert!(!index.contains(&points[700].0));

        let got: Vec<AtomId> = index
            .range_query(&[0.0; 3], 0.5, 50)
            .hits
            .iter()
            .map(|n| n.atom_id)
            .collect();
        assert_eq!(got, brute_force(&points[..600], &[0.0; 3], 0.5, 50));
    }

    #[test]
    fn test_reindex_keeps_entries() {
        let points = random_points(800, 6);
        let index = filled(&points);
        let before = index.range_query(&[0.2; 3], 0.4, 64).hits;
        let stats = index.reindex(IndexParams::default()).unwrap();
        assert_eq!(stats.entries, 800);
        assert_eq!(stats.replayed, 0);
        let after = index.range_query(&[0.2; 3], 0.4, 64).hits;
        assert_eq!(before, after);
    }

    #[test]
    fn test_writes_during_rebuild_survive_swap() {
        let points = random_points(20_000, 7);
        let index = Arc::new(filled(&points[..10_000]));
        let extra = points[10_000..].to_vec();

        let writer = {
            let index = index.clone();
            std::thread::spawn(move || {
                for (id, c) in extra {
                    index.insert(id, c).unwrap();
                }
                for (id, _) in points[..1_000].iter() {
                    index.remove(id).unwrap();
                }
            })
        };
        let rebuilder = {
            let index = index.clone();
            std::thread::spawn(move || index.reindex(IndexParams::default()).unwrap())
        };
        writer.join().unwrap();
        rebuilder.join().unwrap();

        assert_eq!(index.len(), 19_000);
        let all = index.range_query(&[0.0; 3], 10.0, 100_000);
        assert_eq!(all.len(), 19_000);
        assert!(!index.is_rebuilding());
    }

    #[test]
    fn test_lookups_do_not_wait_for_writer() {
        let points = random_points(100, 9);
        let index = Arc::new(filled(&points));
        let target = points[10];

        let _writer = index.writer.lock();
        let (tx, rx) = std::sync::mpsc::channel();
        {
            let index = index.clone();
            std::thread::spawn(move || {
                let entry = index.entry(&target.0);
                let stats = index.stats();
                tx.send((entry, stats)).unwrap();
            });
        }
        let (entry, stats) = rx
            .recv_timeout(std::time::Duration::from_secs(5))
            .expect("lookup blocked on the writer lock");
        assert_eq!(entry.unwrap().coord, target.1);
        assert_eq!(stats.len, 100);
    }

    #[test]
    fn test_readers_see_consistent_versions_during_writes() {
        let points = random_points(5_000, 8);
        let index = Arc::new(RTreeIndex::new(IndexParams::default()).unwrap());
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let index = index.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let result = index.range_query(&[0.0; 3], 0.8, 50);
                        for pair in result.hits.windows(2) {
                            assert!(pair[0].distance <= pair[1].distance);
                        }
                    }
                })
            })
            .collect();
        for (id, c) in &points {
            index.insert(*id, *c).unwrap();
        }
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(index.len(), 5_000);
    }

    #[test]
    fn test_out_of_bounds_reject_and_clamp() {
        let reject = RTreeIndex::new(IndexParams {
            out_of_bounds: OutOfBoundsPolicy::Reject,
            ..IndexParams::default()
        })
        .unwrap();
        assert!(matches!(
            reject.insert(id(1), [3.0, 0.0, 0.0]),
            Err(IndexError::OutOfBounds { .. })
        ));
        assert_eq!(reject.stats().rejected_total, 1);
        assert!(reject.is_empty());

        let clamp = RTreeIndex::new(IndexParams::default()).unwrap();
        clamp.insert(id(1), [3.0, 0.0, 0.0]).unwrap();
        clamp.insert(id(2), [0.0, 0.0, 0.0]).unwrap();
        let stats = clamp.stats();
        assert_eq!(stats.clamped_total, 1);
        assert_eq!(stats.outside_bounds, 1);
        assert!((stats.outside_fraction() - 0.5).abs() < 1e-9);
        let covering = stats.covering_bounds(0.0).unwrap();
        assert!(covering.max >= 3.0);
        // Stored coordinate is exact even though the key was clamped
        assert_eq!(clamp.range_query(&[3.0, 0.0, 0.0], 0.001, 1).hits[0].atom_id, id(1));
    }

    #[test]
    fn test_height_grows_logarithmically() {
        let index = filled(&random_points(10_000, 9));
        let height = index.stats().height;
        assert!((3..=8).contains(&height), "height {}", height);
    }
}
