//! 1-D rectilinear mesh with fixed edges
//!
//! Backs every histogram in the crate. Edges are chosen once from a
//! prior's support and never change afterwards, so bin lookups are a
//! plain binary search.

use serde::{Deserialize, Serialize};

use super::StatisticsError;

/// A 1-D mesh defined by strictly increasing cell edges.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RectilinearMesh1D {
    edges: Vec<f64>,
}

impl RectilinearMesh1D {
    /// Build a mesh from explicit edges.
    ///
    /// Edges must be finite and strictly increasing, with at least one cell.
    pub fn new(edges: Vec<f64>) -> Result<Self, StatisticsError> {
        if edges.len() < 2 {
            return Err(StatisticsError::InvalidMesh(edges.len()));
        }
        for w in edges.windows(2) {
            if !w[0].is_finite() || !w[1].is_finite() || w[1] <= w[0] {
                return Err(StatisticsError::InvalidMesh(edges.len()));
            }
        }
        Ok(Self { edges })
    }

    /// Build a mesh of `n` equal-width cells spanning `[low, high]`.
    pub fn regular(low: f64, high: f64, n: usize) -> Result<Self, StatisticsError> {
        if n == 0 || !low.is_finite() || !high.is_finite() || high <= low {
            return Err(StatisticsError::InvalidMesh(n));
        }
        let width = (high - low) / n as f64;
        let edges = (0..=n).map(|i| low + i as f64 * width).collect();
        Self::new(edges)
    }

    /// Number of cells (= edges - 1).
    pub fn n_cells(&self) -> usize {
        self.edges.len() - 1
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    pub fn low(&self) -> f64 {
        self.edges[0]
    }

    pub fn high(&self) -> f64 {
        self.edges[self.edges.len() - 1]
    }

    /// Cell centres.
    pub fn centres(&self) -> Vec<f64> {
        self.edges
            .windows(2)
            .map(|w| 0.5 * (w[0] + w[1]))
            .collect()
    }

    /// Cell widths.
    pub fn widths(&self) -> Vec<f64> {
        self.edges.windows(2).map(|w| w[1] - w[0]).collect()
    }

    /// Index of the cell containing `x`, or None when `x` lies outside
    /// the mesh. The right-most edge is inclusive.
    pub fn bin_index(&self, x: f64) -> Option<usize> {
        if !x.is_finite() || x < self.low() || x > self.high() {
            return None;
        }
        Some(self.bin_index_clamped(x))
    }

    /// Index of the cell containing `x`, clamping values outside the
    /// mesh to the first/last cell.
    pub fn bin_index_clamped(&self, x: f64) -> usize {
        let n = self.n_cells();
        if x <= self.low() {
            return 0;
        }
        if x >= self.high() {
            return n - 1;
        }
        // partition_point returns the count of edges <= x, so the cell
        // index is one less.
        let idx = self.edges.partition_point(|&e| e <= x);
        (idx - 1).min(n - 1)
    }

    /// Value at the `p`-th percentile of binned `counts` via cumulative
    /// sum and search. Returns the centre of the first cell whose
    /// cumulative mass reaches `p` percent; the mesh low edge when the
    /// counts are empty.
    pub fn percentile(&self, counts: &[u64], p: f64) -> f64 {
        debug_assert_eq!(counts.len(), self.n_cells());
        let total: u64 = counts.iter().sum();
        if total == 0 {
            return self.low();
        }
        let target = (p / 100.0).clamp(0.0, 1.0) * total as f64;
        let mut cumulative = 0.0;
        for (i, &c) in counts.iter().enumerate() {
            cumulative += c as f64;
            if cumulative >= target {
                return 0.5 * (self.edges[i] + self.edges[i + 1]);
            }
        }
        0.5 * (self.edges[self.n_cells() - 1] + self.edges[self.n_cells()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regular_mesh_construction() {
        let mesh = RectilinearMesh1D::regular(0.0, 10.0, 10).unwrap();
        assert_eq!(mesh.n_cells(), 10);
        assert_eq!(mesh.edges().len(), 11);
        assert!((mesh.centres()[0] - 0.5).abs() < 1e-12);
        assert!((mesh.widths()[9] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_meshes_rejected() {
        assert!(RectilinearMesh1D::new(vec![1.0]).is_err());
        assert!(RectilinearMesh1D::new(vec![0.0, 0.0]).is_err());
        assert!(RectilinearMesh1D::new(vec![0.0, f64::INFINITY]).is_err());
        assert!(RectilinearMesh1D::regular(0.0, 0.0, 5).is_err());
    }

    #[test]
    fn test_bin_index_lookup() {
        let mesh = RectilinearMesh1D::regular(0.0, 10.0, 10).unwrap();
        assert_eq!(mesh.bin_index(0.5), Some(0));
        assert_eq!(mesh.bin_index(9.99), Some(9));
        // Right-most edge is inclusive
        assert_eq!(mesh.bin_index(10.0), Some(9));
        assert_eq!(mesh.bin_index(-0.1), None);
        assert_eq!(mesh.bin_index(10.1), None);
        assert_eq!(mesh.bin_index(f64::NAN), None);

        assert_eq!(mesh.bin_index_clamped(-5.0), 0);
        assert_eq!(mesh.bin_index_clamped(50.0), 9);
    }

    #[test]
    fn test_percentile_median_of_uniform_counts() {
        let mesh = RectilinearMesh1D::regular(0.0, 100.0, 100).unwrap();
        let counts = vec![1u64; 100];
        let median = mesh.percentile(&counts, 50.0);
        assert!(
            (median - 49.5).abs() < 1.01,
            "median of uniform counts should sit mid-mesh, got {}",
            median
        );
    }

    #[test]
    fn test_percentile_empty_counts() {
        let mesh = RectilinearMesh1D::regular(0.0, 1.0, 4).unwrap();
        let counts = vec![0u64; 4];
        assert!((mesh.percentile(&counts, 50.0) - 0.0).abs() < 1e-12);
    }
}
