//! # betula
//!
//! Incremental Clustering-Feature tree (CF-tree) for BIRCH/BETULA-style
//! pre-clustering: summarize a stream of numeric points into a bounded
//! number of sufficient-statistics leaves, so datasets far too large to
//! hold as individual vectors can still be clustered.
//!
//! The tree absorbs each point into its nearest leaf when it is within a
//! merge threshold, splits nodes as they overflow, and, when the leaf
//! budget is exceeded, runs a condensation pass that raises the threshold
//! and re-inserts all leaves. Downstream clustering consumes the leaves
//! through iteration, leaf lookup, and a pairwise distance matrix.
//!
//! Pick a strategy bundle at construction time: a feature layout
//! ([`BirchCf`] or the numerically stable [`StableCf`]), an assignment
//! distance, and an absorption criterion. The usual pairings are
//! [`CentroidEuclidean`] or [`VarianceIncrease`] for assignment and
//! [`Radius`] or [`Diameter`] for absorption.
//!
//! ```rust
//! use betula::{CentroidEuclidean, CfTree, CfTreeParams, Radius, StableCf};
//!
//! let params = CfTreeParams::new()
//!     .with_threshold(0.5)
//!     .with_branching(8)
//!     .with_max_leaves(100);
//! let mut tree: CfTree<StableCf, _, _> =
//!     CfTree::new(CentroidEuclidean, Radius, params).unwrap();
//!
//! let points = [[0.0, 0.0], [0.1, 0.0], [5.0, 5.0]];
//! for (i, p) in points.iter().enumerate() {
//!     tree.insert(p, i as u64).unwrap();
//! }
//! // The two nearby points share a leaf; the far one got its own.
//! assert_eq!(tree.num_leaves(), 2);
//! ```

pub mod distance;
pub mod error;
pub mod feature;
pub mod matrix;
pub mod tree;


pub use distance::{CentroidEuclidean, CfDistance, Diameter, Radius, VarianceIncrease};
pub use error::{Error, Result};
pub use feature::{BirchCf, ClusterFeature, StableCf};
pub use matrix::{CfDistanceMatrix, MAX_MATRIX_LEAVES};
pub use tree::{
    CfEntry, CfNode, CfTree, CfTreeParams, LeafId, LeafIter, PointId, ThresholdHeuristic,
    TreeStats,
};
