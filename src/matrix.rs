//! Pairwise distance cache over a leaf snapshot.
//!
//! Downstream global clustering repeatedly needs squared distances between
//! every pair of leaves of a finished tree. This module precomputes them
//! once into a condensed lower-triangular array of length `n·(n−1)/2`,
//! immutable after construction.
//!
//! The leaf order is fixed at construction; `get` takes positions in that
//! order, not arena handles.

use crate::distance::CfDistance;
use crate::error::{Error, Result};
use crate::feature::ClusterFeature;

/// Hard upper bound on the number of leaves: the triangular array grows
/// quadratically, and past this point both memory and offset arithmetic
/// become a liability. Condense or sample first.
pub const MAX_MATRIX_LEAVES: usize = 1 << 16;

/// Condensed symmetric matrix of pairwise squared distances.
#[derive(Debug, Clone)]
pub struct CfDistanceMatrix {
    n: usize,
    data: Vec<f64>,
}

impl CfDistanceMatrix {
    /// Precompute all pairwise squared distances over a leaf snapshot.
    ///
    /// Fails with [`Error::MatrixTooLarge`] beyond [`MAX_MATRIX_LEAVES`]
    /// leaves.
    #[cfg(not(feature = "parallel"))]
    pub fn build<F, D>(dist: &D, cfs: &[&F]) -> Result<Self>
    where
        F: ClusterFeature,
        D: CfDistance<F>,
    {
        let n = Self::check_size(cfs.len())?;
        let mut data = Vec::with_capacity(n * n.saturating_sub(1) / 2);
        for y in 1..n {
            for x in 0..y {
                data.push(dist.squared_cf(cfs[x], cfs[y]));
            }
        }
        Ok(Self { n, data })
    }

    /// Precompute all pairwise squared distances over a leaf snapshot,
    /// filling rows in parallel.
    ///
    /// Fails with [`Error::MatrixTooLarge`] beyond [`MAX_MATRIX_LEAVES`]
    /// leaves.
    #[cfg(feature = "parallel")]
    pub fn build<F, D>(dist: &D, cfs: &[&F]) -> Result<Self>
    where
        F: ClusterFeature + Sync,
        D: CfDistance<F> + Sync,
    {
        use rayon::prelude::*;

        let n = Self::check_size(cfs.len())?;
        let rows: Vec<Vec<f64>> = (1..n)
            .into_par_iter()
            .map(|y| (0..y).map(|x| dist.squared_cf(cfs[x], cfs[y])).collect())
            .collect();
        Ok(Self {
            n,
            data: rows.concat(),
        })
    }

    fn check_size(n: usize) -> Result<usize> {
        if n > MAX_MATRIX_LEAVES {
            return Err(Error::MatrixTooLarge {
                leaves: n,
                max: MAX_MATRIX_LEAVES,
            });
        }
        Ok(n)
    }

    /// Number of leaves in the snapshot.
    pub fn len(&self) -> usize {
        self.n
    }

    /// Whether the snapshot was empty.
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Squared distance between leaves at positions `x` and `y`.
    ///
    /// Zero on the diagonal and symmetric in its arguments. Panics if a
    /// position is out of bounds.
    pub fn get(&self, x: usize, y: usize) -> f64 {
        assert!(x < self.n && y < self.n, "leaf position out of bounds");
        if x == y {
            return 0.0;
        }
        let (lo, hi) = if x < y { (x, y) } else { (y, x) };
        self.data[hi * (hi - 1) / 2 + lo]
    }
}
