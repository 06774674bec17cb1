//! Binned posterior accumulators
//!
//! `Histogram1D` tracks a single sampled quantity; `Histogram2D` backs
//! the depth-parameter hitmap. Both are updated once per accepted state
//! after burn-in and reset exactly once when burn-in is declared.

use serde::{Deserialize, Serialize};

use super::mesh::RectilinearMesh1D;

/// What to do with update values that fall outside the mesh.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum BoundsPolicy {
    /// Drop the value silently
    #[default]
    Ignore,
    /// Count it in the nearest boundary cell
    Clamp,
}

/// A 1-D histogram over a fixed mesh.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Histogram1D {
    mesh: RectilinearMesh1D,
    counts: Vec<u64>,
    policy: BoundsPolicy,
}

impl Histogram1D {
    pub fn new(mesh: RectilinearMesh1D) -> Self {
        let counts = vec![0; mesh.n_cells()];
        Self {
            mesh,
            counts,
            policy: BoundsPolicy::default(),
        }
    }

    pub fn with_policy(mesh: RectilinearMesh1D, policy: BoundsPolicy) -> Self {
        let mut h = Self::new(mesh);
        h.policy = policy;
        h
    }

    pub fn mesh(&self) -> &RectilinearMesh1D {
        &self.mesh
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Increment the bin containing `x` subject to the bounds policy.
    pub fn update(&mut self, x: f64) {
        let idx = match self.policy {
            BoundsPolicy::Ignore => self.mesh.bin_index(x),
            BoundsPolicy::Clamp => {
                if x.is_finite() {
                    Some(self.mesh.bin_index_clamped(x))
                } else {
                    None
                }
            }
        };
        if let Some(i) = idx {
            self.counts[i] += 1;
        }
    }

    /// Zero all counts, keeping the mesh.
    pub fn reset(&mut self) {
        self.counts.iter_mut().for_each(|c| *c = 0);
    }

    pub fn percentile(&self, p: f64) -> f64 {
        self.mesh.percentile(&self.counts, p)
    }

    /// The `(p/2, 100 - p/2)` percentile pair.
    pub fn credible_interval(&self, percent: f64) -> (f64, f64) {
        let half = 0.5 * (100.0 - percent);
        (self.percentile(half), self.percentile(100.0 - half))
    }

    /// Centre of the fullest bin.
    pub fn mode(&self) -> f64 {
        let centres = self.mesh.centres();
        let mut best = 0;
        for (i, &c) in self.counts.iter().enumerate() {
            if c > self.counts[best] {
                best = i;
            }
        }
        centres[best]
    }

    /// Counts normalised to a probability density over the mesh.
    pub fn pdf(&self) -> Vec<f64> {
        let total = self.total() as f64;
        let widths = self.mesh.widths();
        self.counts
            .iter()
            .zip(widths.iter())
            .map(|(&c, &w)| {
                if total > 0.0 {
                    c as f64 / (total * w)
                } else {
                    0.0
                }
            })
            .collect()
    }
}

/// A 2-D histogram over a pair of fixed meshes.
///
/// Counts are stored row-major with the `y` (first) axis outermost:
/// `counts[iy * nx + ix]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Histogram2D {
    x: RectilinearMesh1D,
    y: RectilinearMesh1D,
    counts: Vec<u64>,
    policy: BoundsPolicy,
}

impl Histogram2D {
    pub fn new(x: RectilinearMesh1D, y: RectilinearMesh1D) -> Self {
        let counts = vec![0; x.n_cells() * y.n_cells()];
        Self {
            x,
            y,
            counts,
            policy: BoundsPolicy::default(),
        }
    }

    pub fn x_mesh(&self) -> &RectilinearMesh1D {
        &self.x
    }

    pub fn y_mesh(&self) -> &RectilinearMesh1D {
        &self.y
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn count_at(&self, ix: usize, iy: usize) -> u64 {
        self.counts[iy * self.x.n_cells() + ix]
    }

    /// Increment the cell containing `(x, y)` subject to the bounds policy.
    pub fn update(&mut self, x: f64, y: f64) {
        let (ix, iy) = match self.policy {
            BoundsPolicy::Ignore => match (self.x.bin_index(x), self.y.bin_index(y)) {
                (Some(ix), Some(iy)) => (ix, iy),
                _ => return,
            },
            BoundsPolicy::Clamp => {
                if !x.is_finite() || !y.is_finite() {
                    return;
                }
                (self.x.bin_index_clamped(x), self.y.bin_index_clamped(y))
            }
        };
        self.counts[iy * self.x.n_cells() + ix] += 1;
    }

    /// Increment the cell at a known `y` row for value `x`.
    ///
    /// Used by the hitmap rasteriser, which walks the depth axis row by
    /// row and bins the layer parameter at each row.
    pub fn update_row(&mut self, iy: usize, x: f64) {
        let ix = match self.policy {
            BoundsPolicy::Ignore => match self.x.bin_index(x) {
                Some(ix) => ix,
                None => return,
            },
            BoundsPolicy::Clamp => {
                if !x.is_finite() {
                    return;
                }
                self.x.bin_index_clamped(x)
            }
        };
        self.counts[iy * self.x.n_cells() + ix] += 1;
    }

    pub fn reset(&mut self) {
        self.counts.iter_mut().for_each(|c| *c = 0);
    }

    /// Marginal histogram along the chosen axis (0 = x, 1 = y).
    pub fn marginal(&self, axis: usize) -> Histogram1D {
        let nx = self.x.n_cells();
        let ny = self.y.n_cells();
        let mesh = if axis == 0 {
            self.x.clone()
        } else {
            self.y.clone()
        };
        let mut out = Histogram1D::new(mesh);
        for iy in 0..ny {
            for ix in 0..nx {
                let c = self.counts[iy * nx + ix];
                if axis == 0 {
                    out.counts[ix] += c;
                } else {
                    out.counts[iy] += c;
                }
            }
        }
        out
    }

    /// Credible interval of the x-axis values within row `iy`.
    pub fn row_credible_interval(&self, iy: usize, percent: f64) -> (f64, f64) {
        let nx = self.x.n_cells();
        let row = &self.counts[iy * nx..(iy + 1) * nx];
        let half = 0.5 * (100.0 - percent);
        (
            self.x.percentile(row, half),
            self.x.percentile(row, 100.0 - half),
        )
    }

    /// Median of the x-axis values within each row. This is the
    /// per-depth posterior summary extracted into 2-D sections.
    pub fn row_medians(&self) -> Vec<f64> {
        let nx = self.x.n_cells();
        (0..self.y.n_cells())
            .map(|iy| self.x.percentile(&self.counts[iy * nx..(iy + 1) * nx], 50.0))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mesh(lo: f64, hi: f64, n: usize) -> RectilinearMesh1D {
        RectilinearMesh1D::regular(lo, hi, n).unwrap()
    }

    #[test]
    fn test_update_and_total() {
        let mut h = Histogram1D::new(mesh(0.0, 10.0, 10));
        h.update(0.5);
        h.update(0.7);
        h.update(9.5);
        assert_eq!(h.total(), 3);
        assert_eq!(h.counts()[0], 2);
        assert_eq!(h.counts()[9], 1);
    }

    #[test]
    fn test_out_of_range_ignored_by_default() {
        let mut h = Histogram1D::new(mesh(0.0, 1.0, 4));
        h.update(-1.0);
        h.update(2.0);
        h.update(f64::NAN);
        assert_eq!(h.total(), 0);
    }

    #[test]
    fn test_out_of_range_clamped_when_configured() {
        let mut h = Histogram1D::with_policy(mesh(0.0, 1.0, 4), BoundsPolicy::Clamp);
        h.update(-1.0);
        h.update(2.0);
        assert_eq!(h.counts()[0], 1);
        assert_eq!(h.counts()[3], 1);
    }

    #[test]
    fn test_reset_keeps_mesh() {
        let mut h = Histogram1D::new(mesh(0.0, 1.0, 4));
        h.update(0.5);
        h.reset();
        assert_eq!(h.total(), 0);
        assert_eq!(h.mesh().n_cells(), 4);
    }

    #[test]
    fn test_credible_interval_brackets_mass() {
        let mut h = Histogram1D::new(mesh(0.0, 100.0, 100));
        // Mass concentrated between 40 and 60
        for i in 0..2000 {
            h.update(40.0 + 20.0 * (i as f64 / 2000.0));
        }
        let (lo, hi) = h.credible_interval(90.0);
        assert!(lo >= 39.0 && lo <= 45.0, "low bound {}", lo);
        assert!(hi >= 55.0 && hi <= 61.0, "high bound {}", hi);
        assert!(lo < hi);
    }

    #[test]
    fn test_pdf_integrates_to_one() {
        let mut h = Histogram1D::new(mesh(0.0, 10.0, 20));
        for i in 0..500 {
            h.update(10.0 * (i as f64 / 500.0));
        }
        let integral: f64 = h
            .pdf()
            .iter()
            .zip(h.mesh().widths().iter())
            .map(|(p, w)| p * w)
            .sum();
        assert!((integral - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_histogram2d_update_and_marginal() {
        let mut h = Histogram2D::new(mesh(0.0, 1.0, 10), mesh(0.0, 100.0, 50));
        h.update(0.35, 12.0);
        h.update(0.35, 55.0);
        h.update(0.85, 55.0);
        assert_eq!(h.total(), 3);
        assert_eq!(h.count_at(3, 6), 1);

        let mx = h.marginal(0);
        assert_eq!(mx.counts()[3], 2);
        assert_eq!(mx.counts()[8], 1);

        let my = h.marginal(1);
        assert_eq!(my.total(), 3);
    }

    #[test]
    fn test_histogram2d_row_queries() {
        let mut h = Histogram2D::new(mesh(0.0, 10.0, 10), mesh(0.0, 10.0, 2));
        for _ in 0..10 {
            h.update_row(0, 2.5);
        }
        h.update_row(0, 7.5);
        let medians = h.row_medians();
        assert!((medians[0] - 2.5).abs() < 1e-12);

        let (lo, hi) = h.row_credible_interval(0, 90.0);
        assert!(lo <= 2.5 && hi >= 2.5);
    }
}
