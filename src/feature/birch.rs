//! Classic BIRCH cluster feature: (N, LS, SS).

use ndarray::{aview1, Array1};

use super::ClusterFeature;

/// The original BIRCH sufficient statistics: point count, per-dimension
/// linear sum, and the scalar sum of squared norms.
///
/// All derived quantities follow from the triple: the centroid is `LS / N`
/// and the squared-deviation sum is `SS - ‖LS‖²/N`. The subtraction cancels
/// catastrophically when clusters sit far from the origin; prefer
/// [`StableCf`](super::StableCf) when that matters.
#[derive(Debug, Clone)]
pub struct BirchCf {
    n: usize,
    ls: Array1<f64>,
    ss: f64,
}

impl ClusterFeature for BirchCf {
    fn empty(dim: usize) -> Self {
        Self {
            n: 0,
            ls: Array1::zeros(dim),
            ss: 0.0,
        }
    }

    fn dim(&self) -> usize {
        self.ls.len()
    }

    fn weight(&self) -> usize {
        self.n
    }

    fn centroid(&self, d: usize) -> f64 {
        if self.n == 0 {
            return 0.0;
        }
        self.ls[d] / self.n as f64
    }

    fn squared_deviation_sum(&self) -> f64 {
        if self.n == 0 {
            return 0.0;
        }
        // SS - ‖LS‖²/N; rounding can push the difference slightly negative.
        (self.ss - self.ls.dot(&self.ls) / self.n as f64).max(0.0)
    }

    fn add_point(&mut self, point: &[f64]) {
        let p = aview1(point);
        self.n += 1;
        self.ls += &p;
        self.ss += p.dot(&p);
    }

    fn add_cf(&mut self, other: &Self) {
        self.n += other.n;
        self.ls += &other.ls;
        self.ss += other.ss;
    }

    fn reset(&mut self) {
        self.n = 0;
        self.ls.fill(0.0);
        self.ss = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_point() {
        let mut cf = BirchCf::empty(2);
        cf.add_point(&[3.0, 4.0]);

        assert_eq!(cf.weight(), 1);
        assert_eq!(cf.centroid(0), 3.0);
        assert_eq!(cf.centroid(1), 4.0);
        assert!(cf.squared_deviation_sum().abs() < 1e-12);
    }

    #[test]
    fn test_centroid_and_deviation() {
        let mut cf = BirchCf::empty(1);
        cf.add_point(&[0.0]);
        cf.add_point(&[2.0]);

        assert_eq!(cf.weight(), 2);
        assert!((cf.centroid(0) - 1.0).abs() < 1e-12);
        // deviations are -1 and +1, so the squared sum is 2
        assert!((cf.squared_deviation_sum() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_merge_matches_pointwise() {
        let points = [[1.0, 2.0], [3.0, 0.0], [5.0, -1.0], [2.0, 2.0]];

        let mut all = BirchCf::empty(2);
        for p in &points {
            all.add_point(p);
        }

        let mut left = BirchCf::empty(2);
        left.add_point(&points[0]);
        left.add_point(&points[1]);
        let mut right = BirchCf::empty(2);
        right.add_point(&points[2]);
        right.add_point(&points[3]);
        left.add_cf(&right);

        assert_eq!(left.weight(), all.weight());
        for d in 0..2 {
            assert!((left.centroid(d) - all.centroid(d)).abs() < 1e-12);
        }
        assert!((left.squared_deviation_sum() - all.squared_deviation_sum()).abs() < 1e-9);
    }

    #[test]
    fn test_reset() {
        let mut cf = BirchCf::empty(3);
        cf.add_point(&[1.0, 1.0, 1.0]);
        cf.reset();

        assert_eq!(cf.weight(), 0);
        assert_eq!(cf.dim(), 3);
        assert_eq!(cf.squared_deviation_sum(), 0.0);
    }
}
