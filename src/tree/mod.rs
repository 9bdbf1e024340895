//! The CF-tree: incremental, bounded-memory pre-clustering.
//!
//! A CF-tree ingests a stream of points and maintains a height-balanced tree
//! whose leaves are cluster features rather than raw points. Each insertion
//! descends greedily to the nearest child; a point close enough to a leaf
//! (by the absorption criterion, against a squared merge threshold) is
//! folded into it, otherwise a new leaf is created, splitting nodes as they
//! overflow. When the leaf count exceeds its budget, a condensation pass
//! raises the threshold and re-inserts all leaves, shrinking the tree.
//!
//! The tree is single-threaded and performs in-place mutation; callers must
//! serialize access.
//!
//! # References
//!
//! - Zhang, Ramakrishnan, Livny (1996). "BIRCH: An Efficient Data Clustering
//!   Method for Very Large Databases." SIGMOD.
//! - Lang & Schubert (2022). "BETULA: Fast Clustering of Large Data with
//!   Improved BIRCH CF-Trees." Information Systems.

mod arena;
mod iter;
mod node;

pub use arena::LeafId;
pub use iter::LeafIter;
pub use node::{CfEntry, CfNode};

use std::time::Instant;

use tracing::debug;

use crate::distance::CfDistance;
use crate::error::{Error, Result};
use crate::feature::ClusterFeature;
use crate::matrix::CfDistanceMatrix;
use arena::LeafArena;
use node::Insertion;

/// Opaque point identity, carried through absorption for traceability only.
/// Never used in distance computations.
pub type PointId = u64;

/// Heuristic for deriving the new squared merge threshold during
/// condensation, from the per-leaf candidate distances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdHeuristic {
    /// Arithmetic mean of the square roots of all finite candidates,
    /// squared back.
    Mean,
    /// Middle element of the candidates sorted ascending; if it is
    /// infinite, walk toward smaller indices until a finite one is found.
    Median,
}

/// Configuration for a CF-tree.
#[derive(Debug, Clone)]
pub struct CfTreeParams {
    /// Initial (unsquared) merge threshold. Condensation only raises it.
    pub threshold: f64,
    /// Maximum number of children per node. At least 2.
    pub branching: usize,
    /// Leaf budget: exceeding it triggers a synchronous condensation pass.
    pub max_leaves: usize,
    /// Threshold update heuristic.
    pub heuristic: ThresholdHeuristic,
    /// Keep a side table mapping each leaf to the point ids it absorbed.
    pub track_ids: bool,
}

impl Default for CfTreeParams {
    fn default() -> Self {
        Self {
            threshold: 0.0,
            branching: 64,
            max_leaves: 4096,
            heuristic: ThresholdHeuristic::Mean,
            track_ids: false,
        }
    }
}

impl CfTreeParams {
    /// Create a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the initial merge threshold (unsquared).
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the branching factor (node capacity).
    pub fn with_branching(mut self, branching: usize) -> Self {
        self.branching = branching;
        self
    }

    /// Set the leaf budget.
    pub fn with_max_leaves(mut self, max_leaves: usize) -> Self {
        self.max_leaves = max_leaves;
        self
    }

    /// Set the threshold update heuristic.
    pub fn with_heuristic(mut self, heuristic: ThresholdHeuristic) -> Self {
        self.heuristic = heuristic;
        self
    }

    /// Enable or disable the leaf-to-point-id side table.
    pub fn with_track_ids(mut self, track_ids: bool) -> Self {
        self.track_ids = track_ids;
        self
    }
}

/// Evaluation counters, exposed as an explicit value rather than mutated
/// behind private helpers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    /// Assignment-distance evaluations.
    pub distance_calcs: u64,
    /// Absorption-criterion evaluations.
    pub absorption_calcs: u64,
    /// Condensation passes run.
    pub rebuilds: u64,
}

/// Leaf-to-point-id side table, parallel to the leaf arena: entry `i`
/// describes arena slot `i`. Created, merged, and discarded in the same
/// logical step as the leaf it describes.
#[derive(Debug, Clone, Default)]
struct IdTable {
    lists: Vec<Option<Vec<PointId>>>,
}

impl IdTable {
    fn push(&mut self, list: Vec<PointId>) {
        self.lists.push(Some(list));
    }

    fn append(&mut self, leaf: LeafId, id: PointId) {
        self.lists[leaf.0]
            .as_mut()
            .expect("id list missing for live leaf")
            .push(id);
    }

    fn merge(&mut self, target: LeafId, donor: LeafId) {
        let donated = self.lists[donor.0]
            .take()
            .expect("id list missing for donor leaf");
        self.lists[target.0]
            .as_mut()
            .expect("id list missing for target leaf")
            .extend(donated);
    }

    fn take(&mut self, leaf: LeafId) -> Vec<PointId> {
        self.lists[leaf.0]
            .take()
            .expect("id list missing for live leaf")
    }

    fn get(&self, leaf: LeafId) -> Option<&[PointId]> {
        self.lists.get(leaf.0).and_then(|list| list.as_deref())
    }

    fn clear(&mut self) {
        self.lists.clear();
    }
}

/// Clustering-feature tree over feature layout `F`, with assignment
/// distance `D` and absorption criterion `A`.
///
/// The three type parameters form the strategy bundle: pick the layout and
/// the two distances together at construction time. See the crate docs for
/// the usual pairings.
#[derive(Debug)]
pub struct CfTree<F, D, A> {
    dist: D,
    absorption: A,
    threshold_sq: f64,
    branching: usize,
    max_leaves: usize,
    heuristic: ThresholdHeuristic,
    root: Option<CfNode<F>>,
    arena: LeafArena<F>,
    id_table: Option<IdTable>,
    num_leaves: usize,
    stats: TreeStats,
}

impl<F, D, A> CfTree<F, D, A>
where
    F: ClusterFeature,
    D: CfDistance<F>,
    A: CfDistance<F>,
{
    /// Create an empty tree.
    pub fn new(dist: D, absorption: A, params: CfTreeParams) -> Result<Self> {
        if params.branching < 2 {
            return Err(Error::InvalidParameter {
                name: "branching",
                message: "must be at least 2",
            });
        }
        if params.max_leaves == 0 {
            return Err(Error::InvalidParameter {
                name: "max_leaves",
                message: "must be positive",
            });
        }
        if !(params.threshold >= 0.0) {
            return Err(Error::InvalidParameter {
                name: "threshold",
                message: "must be a non-negative number",
            });
        }
        Ok(Self {
            dist,
            absorption,
            threshold_sq: params.threshold * params.threshold,
            branching: params.branching,
            max_leaves: params.max_leaves,
            heuristic: params.heuristic,
            root: None,
            arena: LeafArena::new(),
            id_table: params.track_ids.then(IdTable::default),
            num_leaves: 0,
            stats: TreeStats::default(),
        })
    }

    /// Build a tree from a point stream with sequential ids, logging build
    /// statistics.
    pub fn from_points<P, I>(dist: D, absorption: A, params: CfTreeParams, points: I) -> Result<Self>
    where
        P: AsRef<[f64]>,
        I: IntoIterator<Item = P>,
    {
        let mut tree = Self::new(dist, absorption, params)?;
        let start = Instant::now();
        let mut count: u64 = 0;
        for point in points {
            tree.insert(point.as_ref(), count)?;
            count += 1;
        }
        debug!(
            points = count,
            leaves = tree.num_leaves,
            rebuilds = tree.stats.rebuilds,
            distance_calcs = tree.stats.distance_calcs,
            absorption_calcs = tree.stats.absorption_calcs,
            threshold = tree.threshold_sq.sqrt(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "built cf-tree"
        );
        Ok(tree)
    }

    /// Absorb a point into the tree.
    ///
    /// Descends to the nearest child at every level; the point is merged
    /// into the closest leaf if the absorption criterion stays within the
    /// squared threshold, and becomes a new leaf otherwise, splitting nodes
    /// as they overflow. Exceeding the leaf budget triggers a synchronous
    /// condensation pass before returning.
    pub fn insert(&mut self, point: &[f64], id: PointId) -> Result<()> {
        let Some(mut root) = self.root.take() else {
            let dim = point.len();
            let mut cf = F::empty(dim);
            cf.add_point(point);
            let list = self.id_table.is_some().then(|| vec![id]);
            let leaf = self.alloc_leaf(cf, list);
            self.num_leaves += 1;
            let mut root = CfNode::new(F::empty(dim), self.branching);
            root.add_child(CfEntry::Leaf(leaf), &self.arena);
            self.root = Some(root);
            return Ok(());
        };
        let dim = root.cf().dim();
        if point.len() != dim {
            self.root = Some(root);
            return Err(Error::DimensionMismatch {
                expected: dim,
                found: point.len(),
            });
        }
        match self.insert_point(&mut root, point, id) {
            Insertion::NoSplit => {}
            Insertion::Split(sibling) => root = self.grow_root(root, sibling),
        }
        self.root = Some(root);

        if self.num_leaves > self.max_leaves {
            debug!(leaves = self.num_leaves, "compacting cf-tree");
            self.stats.rebuilds += 1;
            self.rebuild();
        }
        Ok(())
    }

    /// Find the leaf a point would be assigned to, without modifying the
    /// tree. No threshold test: descent always reaches some leaf.
    pub fn find_leaf(&self, point: &[f64]) -> Result<LeafId> {
        let root = self.root.as_ref().ok_or(Error::EmptyTree)?;
        let dim = root.cf().dim();
        if point.len() != dim {
            return Err(Error::DimensionMismatch {
                expected: dim,
                found: point.len(),
            });
        }
        let mut node = root;
        loop {
            assert!(!node.children.is_empty(), "unexpected empty node");
            let mut best = 0;
            let mut best_d = f64::INFINITY;
            for (i, child) in node.children.iter().enumerate() {
                let d = self.dist.squared_point(point, child.cf(&self.arena));
                if d < best_d {
                    best_d = d;
                    best = i;
                }
            }
            match &node.children[best] {
                CfEntry::Leaf(id) => return Ok(*id),
                CfEntry::Node(child) => node = child,
            }
        }
    }

    /// Number of live leaves.
    pub fn num_leaves(&self) -> usize {
        self.num_leaves
    }

    /// Branching factor (node capacity).
    pub fn branching(&self) -> usize {
        self.branching
    }

    /// Current squared merge threshold. Non-decreasing over the tree's
    /// lifetime.
    pub fn squared_threshold(&self) -> f64 {
        self.threshold_sq
    }

    /// Current merge threshold (unsquared).
    pub fn threshold(&self) -> f64 {
        self.threshold_sq.sqrt()
    }

    /// Evaluation counters.
    pub fn stats(&self) -> TreeStats {
        self.stats
    }

    /// Root node, if anything was inserted.
    pub fn root(&self) -> Option<&CfNode<F>> {
        self.root.as_ref()
    }

    /// Dimensionality of the inserted points, once known.
    pub fn dim(&self) -> Option<usize> {
        self.root.as_ref().map(|root| root.cf().dim())
    }

    /// Resolve a leaf handle.
    pub fn leaf_cf(&self, leaf: LeafId) -> &F {
        self.arena.get(leaf)
    }

    /// Point ids absorbed by a leaf, when tracking is enabled.
    pub fn point_ids(&self, leaf: LeafId) -> Option<&[PointId]> {
        self.id_table.as_ref().and_then(|table| table.get(leaf))
    }

    /// Lazy single-use iterator over the leaves.
    pub fn leaf_iter(&self) -> LeafIter<'_, F> {
        LeafIter::new(self.root.as_ref())
    }

    /// Collect all leaf handles.
    pub fn leaves(&self) -> Vec<LeafId> {
        self.leaf_iter().collect()
    }

    /// Collect references to all leaf features, in traversal order.
    pub fn leaf_cfs(&self) -> Vec<&F> {
        self.leaf_iter().map(|id| self.arena.get(id)).collect()
    }

    /// Pairwise squared assignment distances over the current leaves.
    #[cfg(not(feature = "parallel"))]
    pub fn distance_matrix(&self) -> Result<CfDistanceMatrix> {
        if self.root.is_none() {
            return Err(Error::EmptyTree);
        }
        CfDistanceMatrix::build(&self.dist, &self.leaf_cfs())
    }

    /// Pairwise squared assignment distances over the current leaves.
    #[cfg(feature = "parallel")]
    pub fn distance_matrix(&self) -> Result<CfDistanceMatrix>
    where
        F: Sync,
        D: Sync,
    {
        if self.root.is_none() {
            return Err(Error::EmptyTree);
        }
        CfDistanceMatrix::build(&self.dist, &self.leaf_cfs())
    }

    fn alloc_leaf(&mut self, cf: F, list: Option<Vec<PointId>>) -> LeafId {
        let id = self.arena.alloc(cf);
        if let Some(table) = &mut self.id_table {
            debug_assert_eq!(table.lists.len(), id.index());
            table.push(list.expect("id list required when tracking is enabled"));
        }
        id
    }

    fn grow_root(&self, old_root: CfNode<F>, sibling: CfNode<F>) -> CfNode<F> {
        let dim = old_root.cf().dim();
        let mut root = CfNode::new(F::empty(dim), self.branching);
        root.add_child(CfEntry::Node(Box::new(old_root)), &self.arena);
        root.add_child(CfEntry::Node(Box::new(sibling)), &self.arena);
        root
    }

    /// Recursive point insertion below `node`.
    fn insert_point(&mut self, node: &mut CfNode<F>, point: &[f64], id: PointId) -> Insertion<F> {
        assert!(!node.children.is_empty(), "unexpected empty node");
        // Stable left-to-right scan; the first encountered minimum wins.
        let mut best = 0;
        let mut best_d = f64::INFINITY;
        for (i, child) in node.children.iter().enumerate() {
            self.stats.distance_calcs += 1;
            let d = self.dist.squared_point(point, child.cf(&self.arena));
            if d < best_d {
                best_d = d;
                best = i;
            }
        }

        match &mut node.children[best] {
            CfEntry::Leaf(leaf) => {
                let leaf = *leaf;
                self.stats.absorption_calcs += 1;
                if self.absorption.squared_point(point, self.arena.get(leaf)) <= self.threshold_sq {
                    self.arena.get_mut(leaf).add_point(point);
                    if let Some(table) = &mut self.id_table {
                        table.append(leaf, id);
                    }
                    node.cf.add_point(point);
                    return Insertion::NoSplit;
                }
                let mut cf = F::empty(point.len());
                cf.add_point(point);
                let list = self.id_table.is_some().then(|| vec![id]);
                let new_leaf = self.alloc_leaf(cf, list);
                self.num_leaves += 1;
                match node.try_add_child(CfEntry::Leaf(new_leaf), &self.arena, self.branching) {
                    Ok(()) => Insertion::NoSplit,
                    Err(entry) => Insertion::Split(self.split(node, entry)),
                }
            }
            CfEntry::Node(child) => match self.insert_point(child, point, id) {
                Insertion::NoSplit => {
                    node.cf.add_point(point);
                    Insertion::NoSplit
                }
                Insertion::Split(sibling) => {
                    // The sibling's points are already counted in this
                    // node's aggregate; only the new point still is not.
                    match node.try_install(CfEntry::Node(Box::new(sibling)), self.branching) {
                        Ok(()) => {
                            node.cf.add_point(point);
                            Insertion::NoSplit
                        }
                        Err(entry) => Insertion::Split(self.split(node, entry)),
                    }
                }
            },
        }
    }

    /// Recursive leaf re-insertion below `node`, used by condensation.
    ///
    /// `incoming_cf` is a snapshot of the incoming leaf's feature: it stays
    /// readable for ancestor aggregate updates even after the arena entry
    /// is merged away.
    fn insert_leaf(
        &mut self,
        node: &mut CfNode<F>,
        incoming: LeafId,
        incoming_cf: &F,
    ) -> Insertion<F> {
        assert!(!node.children.is_empty(), "unexpected empty node");
        let mut best = 0;
        let mut best_d = f64::INFINITY;
        for (i, child) in node.children.iter().enumerate() {
            self.stats.distance_calcs += 1;
            let d = self.dist.squared_cf(child.cf(&self.arena), incoming_cf);
            if d < best_d {
                best_d = d;
                best = i;
            }
        }

        match &mut node.children[best] {
            CfEntry::Leaf(target) => {
                let target = *target;
                debug_assert_ne!(target, incoming);
                self.stats.absorption_calcs += 1;
                if self.absorption.squared_cf(self.arena.get(target), incoming_cf)
                    <= self.threshold_sq
                {
                    self.arena.get_mut(target).add_cf(incoming_cf);
                    if let Some(table) = &mut self.id_table {
                        table.merge(target, incoming);
                    }
                    self.arena.remove(incoming);
                    node.cf.add_cf(incoming_cf);
                    return Insertion::NoSplit;
                }
                self.num_leaves += 1;
                match node.try_add_child(CfEntry::Leaf(incoming), &self.arena, self.branching) {
                    Ok(()) => Insertion::NoSplit,
                    Err(entry) => Insertion::Split(self.split(node, entry)),
                }
            }
            CfEntry::Node(child) => match self.insert_leaf(child, incoming, incoming_cf) {
                Insertion::NoSplit => {
                    node.cf.add_cf(incoming_cf);
                    Insertion::NoSplit
                }
                Insertion::Split(sibling) => {
                    match node.try_install(CfEntry::Node(Box::new(sibling)), self.branching) {
                        Ok(()) => {
                            node.cf.add_cf(incoming_cf);
                            Insertion::NoSplit
                        }
                        Err(entry) => Insertion::Split(self.split(node, entry)),
                    }
                }
            },
        }
    }

    /// Split a full node holding one extra candidate child. Returns the new
    /// sibling; the caller installs it in the parent (or grows the root).
    fn split(&mut self, node: &mut CfNode<F>, extra: CfEntry<F>) -> CfNode<F> {
        debug_assert_eq!(node.children.len(), self.branching, "split of a non-full node");
        let dim = node.cf.dim();
        let mut sibling = CfNode::new(F::empty(dim), self.branching);

        let mut candidates = std::mem::take(&mut node.children);
        candidates.push(extra);
        let size = candidates.len();

        // Pairwise assignment distances; bounded by the branching factor,
        // not the dataset size.
        let mut dists = vec![0.0_f64; size * size];
        let (mut m1, mut m2) = (0, 0);
        let mut max_d = f64::NEG_INFINITY;
        for i in 0..size {
            for j in (i + 1)..size {
                self.stats.distance_calcs += 1;
                let d = self
                    .dist
                    .squared_cf(candidates[i].cf(&self.arena), candidates[j].cf(&self.arena));
                dists[i * size + j] = d;
                dists[j * size + i] = d;
                if d > max_d {
                    max_d = d;
                    m1 = i;
                    m2 = j;
                }
            }
        }

        node.cf.reset();
        // The sibling's aggregate starts empty; both are rebuilt below.

        let (mut si, mut sj) = (0usize, 0usize);
        for (i, entry) in candidates.into_iter().enumerate() {
            let d1 = dists[m1 * size + i];
            let d2 = dists[m2 * size + i];
            // Exact ties go to whichever output currently holds fewer.
            if i == m1 || (i != m2 && (d1 < d2 || (d1 == d2 && si <= sj))) {
                node.add_child(entry, &self.arena);
                si += 1;
            } else {
                sibling.add_child(entry, &self.arena);
                sj += 1;
            }
        }
        debug_assert!(si > 0 && sj > 0, "degenerate split");
        sibling
    }

    /// Condensation: raise the merge threshold and re-insert every leaf,
    /// shrinking the tree back under budget without losing information.
    fn rebuild(&mut self) {
        let root = self.root.take().expect("rebuild of an empty tree");
        let dim = root.cf().dim();
        let old_leaves = self.num_leaves;

        let mut collected = Vec::with_capacity(old_leaves);
        let mut candidates = Vec::with_capacity(old_leaves);
        self.estimate_threshold(&root, &mut collected, &mut candidates);
        debug_assert_eq!(collected.len(), old_leaves);
        drop(root);

        // Ascending candidate order; stable, so equal candidates keep
        // traversal order.
        let mut order: Vec<usize> = (0..collected.len()).collect();
        order.sort_by(|&a, &b| candidates[a].total_cmp(&candidates[b]));

        let t = match self.heuristic {
            ThresholdHeuristic::Mean => {
                let mut sum = 0.0;
                let mut n = 0usize;
                for &c in &candidates {
                    if c < f64::INFINITY {
                        sum += c.sqrt();
                        n += 1;
                    }
                }
                // NaN when every candidate is infinite; discarded below.
                let mean = sum / n as f64;
                mean * mean
            }
            ThresholdHeuristic::Median => {
                let mut m = collected.len() >> 1;
                let mut t = candidates[order[m]];
                while t == f64::INFINITY && m > 0 {
                    m -= 1;
                    t = candidates[order[m]];
                }
                t
            }
        };
        // Never decrease the threshold. A NaN estimate fails the
        // comparison and keeps the old value.
        if t > self.threshold_sq {
            self.threshold_sq = t;
        }
        debug!(threshold_sq = self.threshold_sq, "new squared merge threshold");

        // Drain the arena (and id table) before refilling.
        let mut survivors: Vec<Option<(F, Option<Vec<PointId>>)>> = Vec::with_capacity(collected.len());
        for &id in &collected {
            let cf = self.arena.take(id);
            let list = self.id_table.as_mut().map(|table| table.take(id));
            survivors.push(Some((cf, list)));
        }
        self.arena.clear();
        if let Some(table) = &mut self.id_table {
            table.clear();
        }
        self.num_leaves = 0;

        // Re-insert in descending candidate order against the new
        // threshold.
        let last = order[survivors.len() - 1];
        let (cf, list) = survivors[last].take().expect("survivor taken twice");
        let first = self.alloc_leaf(cf, list);
        self.num_leaves += 1;
        let mut root = CfNode::new(F::empty(dim), self.branching);
        root.add_child(CfEntry::Leaf(first), &self.arena);

        for k in (0..survivors.len() - 1).rev() {
            let (cf, list) = survivors[order[k]].take().expect("survivor taken twice");
            let incoming_cf = cf.clone();
            let incoming = self.alloc_leaf(cf, list);
            match self.insert_leaf(&mut root, incoming, &incoming_cf) {
                Insertion::NoSplit => {}
                Insertion::Split(sibling) => root = self.grow_root(root, sibling),
            }
        }
        self.root = Some(root);

        assert!(
            self.num_leaves <= old_leaves,
            "condensation failed to reduce the number of leaves"
        );
    }

    /// Collect every leaf together with its threshold candidate: infinity
    /// for leaves with no sibling, otherwise the absorption distance to the
    /// nearest-by-assignment-distance sibling under the same parent.
    fn estimate_threshold(
        &mut self,
        node: &CfNode<F>,
        collected: &mut Vec<LeafId>,
        candidates: &mut Vec<f64>,
    ) {
        assert!(!node.children.is_empty(), "unexpected empty node");
        match &node.children[0] {
            CfEntry::Node(_) => {
                for child in &node.children {
                    match child {
                        CfEntry::Node(inner) => {
                            self.estimate_threshold(inner, collected, candidates)
                        }
                        CfEntry::Leaf(_) => panic!("leaf and inner entries mixed in one node"),
                    }
                }
            }
            CfEntry::Leaf(only) => {
                if node.children.len() == 1 {
                    collected.push(*only);
                    candidates.push(f64::INFINITY);
                    return;
                }
                let k = node.children.len();
                // Running nearest-sibling cache; symmetric pairs are
                // evaluated once.
                let mut best = vec![f64::INFINITY; k];
                let mut best_idx = vec![0usize; k];
                for i in 0..k {
                    let ci = node.children[i].cf(&self.arena);
                    let mut bi = best[i];
                    let mut bii = best_idx[i];
                    for j in (i + 1)..k {
                        self.stats.distance_calcs += 1;
                        let d = self.dist.squared_cf(ci, node.children[j].cf(&self.arena));
                        if d < bi {
                            bi = d;
                            bii = j;
                        }
                        if d < best[j] {
                            best[j] = d;
                            best_idx[j] = i;
                        }
                    }
                    // Candidate uses the absorption criterion, selection
                    // used the assignment distance.
                    self.stats.absorption_calcs += 1;
                    let t = self
                        .absorption
                        .squared_cf(ci, node.children[bii].cf(&self.arena));
                    candidates.push(t);
                    match &node.children[i] {
                        CfEntry::Leaf(id) => collected.push(*id),
                        CfEntry::Node(_) => panic!("leaf and inner entries mixed in one node"),
                    }
                }
            }
        }
    }
}
