//! Cluster features: additive sufficient statistics over point sets.
//!
//! A cluster feature (CF) summarizes a set of points well enough to recover
//! its centroid and spread without retaining the points themselves. Features
//! are merged in place as points are absorbed, so a tree of CFs stays
//! bounded in memory no matter how many points stream through it.
//!
//! Two layouts are provided:
//!
//! - [`BirchCf`]: the classic BIRCH triple (count, linear sum, sum of
//!   squares). Compact, but the squared-deviation sum is computed by
//!   cancellation and loses precision on far-from-origin data.
//! - [`StableCf`]: mean-based statistics with a numerically stable parallel
//!   update rule, as introduced for BETULA.
//!
//! # References
//!
//! - Zhang, Ramakrishnan, Livny (1996). "BIRCH: An Efficient Data Clustering
//!   Method for Very Large Databases." SIGMOD.
//! - Lang & Schubert (2020). "BETULA: Numerically Stable CF-Trees for BIRCH
//!   Clustering." SISAP.

mod birch;
mod stable;

pub use birch::BirchCf;
pub use stable::StableCf;

/// Additive sufficient statistics for a set of points.
///
/// Implementations must keep the weight monotonically non-decreasing under
/// merges, and merges must be order-insensitive up to floating-point
/// rounding. `empty` doubles as the factory: the concrete layout is chosen
/// by picking the type parameter of the tree.
pub trait ClusterFeature: Clone {
    /// A zero-weight feature of the given dimensionality.
    fn empty(dim: usize) -> Self;

    /// Dimensionality of the summarized points.
    fn dim(&self) -> usize;

    /// Number of points summarized.
    fn weight(&self) -> usize;

    /// Centroid value in dimension `d`.
    fn centroid(&self, d: usize) -> f64;

    /// Total sum of squared deviations from the centroid, over all
    /// dimensions. Never negative (clamped against rounding).
    fn squared_deviation_sum(&self) -> f64;

    /// Absorb a single point.
    fn add_point(&mut self, point: &[f64]);

    /// Absorb another feature of the same layout.
    fn add_cf(&mut self, other: &Self);

    /// Return to the zero-weight state, keeping the dimensionality.
    fn reset(&mut self);
}
