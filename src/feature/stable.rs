//! Numerically stable cluster feature (BETULA).

use ndarray::{aview1, Array1};

use super::ClusterFeature;

/// Mean-based sufficient statistics: point count, running per-dimension
/// mean, and the scalar sum of squared deviations.
///
/// Updates use the parallel (Chan et al.) merge rule, so the deviation sum
/// is accumulated directly instead of being recovered by cancellation as in
/// [`BirchCf`](super::BirchCf). This is the VII layout of BETULA: one shared
/// variance scalar rather than a per-dimension vector.
#[derive(Debug, Clone)]
pub struct StableCf {
    n: usize,
    mean: Array1<f64>,
    ssd: f64,
}

impl ClusterFeature for StableCf {
    fn empty(dim: usize) -> Self {
        Self {
            n: 0,
            mean: Array1::zeros(dim),
            ssd: 0.0,
        }
    }

    fn dim(&self) -> usize {
        self.mean.len()
    }

    fn weight(&self) -> usize {
        self.n
    }

    fn centroid(&self, d: usize) -> f64 {
        self.mean[d]
    }

    fn squared_deviation_sum(&self) -> f64 {
        self.ssd
    }

    fn add_point(&mut self, point: &[f64]) {
        let p = aview1(point);
        if self.n == 0 {
            self.mean.assign(&p);
            self.n = 1;
            return;
        }
        let n1 = self.n as f64;
        let nn = n1 + 1.0;
        let delta = &p - &self.mean;
        self.mean.scaled_add(1.0 / nn, &delta);
        self.ssd += (n1 / nn) * delta.dot(&delta);
        self.n += 1;
    }

    fn add_cf(&mut self, other: &Self) {
        if other.n == 0 {
            return;
        }
        if self.n == 0 {
            self.mean.assign(&other.mean);
            self.ssd = other.ssd;
            self.n = other.n;
            return;
        }
        let n1 = self.n as f64;
        let n2 = other.n as f64;
        let nn = n1 + n2;
        let delta = &other.mean - &self.mean;
        self.mean.scaled_add(n2 / nn, &delta);
        self.ssd += other.ssd + (n1 * n2 / nn) * delta.dot(&delta);
        self.n += other.n;
    }

    fn reset(&mut self) {
        self.n = 0;
        self.mean.fill(0.0);
        self.ssd = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::BirchCf;

    #[test]
    fn test_single_point() {
        let mut cf = StableCf::empty(2);
        cf.add_point(&[-1.0, 7.0]);

        assert_eq!(cf.weight(), 1);
        assert_eq!(cf.centroid(0), -1.0);
        assert_eq!(cf.centroid(1), 7.0);
        assert_eq!(cf.squared_deviation_sum(), 0.0);
    }

    #[test]
    fn test_matches_birch_layout() {
        let points = [[1.5, 2.0], [3.0, 0.5], [4.5, -1.0], [0.0, 0.0], [2.0, 2.0]];

        let mut stable = StableCf::empty(2);
        let mut birch = BirchCf::empty(2);
        for p in &points {
            stable.add_point(p);
            birch.add_point(p);
        }

        assert_eq!(stable.weight(), birch.weight());
        for d in 0..2 {
            assert!((stable.centroid(d) - birch.centroid(d)).abs() < 1e-9);
        }
        assert!(
            (stable.squared_deviation_sum() - birch.squared_deviation_sum()).abs() < 1e-9,
            "layouts disagree on the deviation sum"
        );
    }

    #[test]
    fn test_merge_order_insensitive() {
        let a = [[0.0, 0.0], [1.0, 1.0]];
        let b = [[10.0, 10.0], [11.0, 9.0]];

        let mut ab = StableCf::empty(2);
        for p in a.iter().chain(&b) {
            ab.add_point(p);
        }

        let mut cf_a = StableCf::empty(2);
        a.iter().for_each(|p| cf_a.add_point(p));
        let mut cf_b = StableCf::empty(2);
        b.iter().for_each(|p| cf_b.add_point(p));
        cf_b.add_cf(&cf_a);

        assert_eq!(cf_b.weight(), ab.weight());
        for d in 0..2 {
            assert!((cf_b.centroid(d) - ab.centroid(d)).abs() < 1e-9);
        }
        assert!((cf_b.squared_deviation_sum() - ab.squared_deviation_sum()).abs() < 1e-9);
    }

    #[test]
    fn test_stable_far_from_origin() {
        // The classic layout cancels catastrophically here; the mean-based
        // update must not.
        let offset = 1e8;
        let mut cf = StableCf::empty(1);
        cf.add_point(&[offset]);
        cf.add_point(&[offset + 1.0]);

        assert!((cf.squared_deviation_sum() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_merge_into_empty() {
        let mut a = StableCf::empty(2);
        let mut b = StableCf::empty(2);
        b.add_point(&[2.0, 4.0]);
        a.add_cf(&b);

        assert_eq!(a.weight(), 1);
        assert_eq!(a.centroid(1), 4.0);
    }
}
