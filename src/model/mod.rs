//! 1-D layered-earth model and its trans-dimensional proposal kernel
//!
//! A model is a strictly increasing edge sequence `0 = e0 < e1 < ... <
//! e_{K-1} < inf` and one natural-log conductivity per layer. The
//! reversible-jump kernel perturbs geometry through four actions
//! (birth, death, perturb, no-change) and then refreshes all layer
//! values with a Stochastic-Newton proposal whose covariance is the
//! inverse Gauss-Newton Hessian of the data misfit.
//!
//! Proposal bookkeeping returns both `log q(current -> candidate)` and
//! `log q(candidate -> current)` so the sampler can form the full
//! Green acceptance ratio; symmetric terms are carried explicitly and
//! cancel in the difference.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::statistics::{Histogram1D, Histogram2D, RectilinearMesh1D};

const LN_2PI: f64 = 1.837_877_066_409_345_3;

/// Errors raised while constructing models or proposals
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model must have at least one layer")]
    Empty,

    #[error("edges must start at 0, end at infinity, and increase strictly")]
    InvalidEdges,

    #[error("edge/parameter length mismatch: {edges} edges for {parameters} parameters")]
    LengthMismatch { edges: usize, parameters: usize },

    #[error("local covariance is not positive definite")]
    SingularCovariance,
}

// ============================================================================
// Model
// ============================================================================

/// Piecewise-constant 1-D conductivity profile over depth.
#[derive(Debug, Clone, PartialEq)]
pub struct Model1D {
    /// `K + 1` edges: `0, e1, .., e_{K-1}, inf`
    edges: Vec<f64>,
    /// `K` natural-log conductivities
    parameters: Vec<f64>,
}

impl Model1D {
    pub fn new(edges: Vec<f64>, parameters: Vec<f64>) -> Result<Self, ModelError> {
        if parameters.is_empty() {
            return Err(ModelError::Empty);
        }
        if edges.len() != parameters.len() + 1 {
            return Err(ModelError::LengthMismatch {
                edges: edges.len(),
                parameters: parameters.len(),
            });
        }
        if edges[0] != 0.0 || !edges[edges.len() - 1].is_infinite() {
            return Err(ModelError::InvalidEdges);
        }
        for w in edges.windows(2) {
            if !(w[1] > w[0]) {
                return Err(ModelError::InvalidEdges);
            }
        }
        Ok(Self { edges, parameters })
    }

    /// A single-layer halfspace.
    pub fn halfspace(log_conductivity: f64) -> Self {
        Self {
            edges: vec![0.0, f64::INFINITY],
            parameters: vec![log_conductivity],
        }
    }

    pub fn n_layers(&self) -> usize {
        self.parameters.len()
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Interior edges (excluding the surface and the infinite basement).
    pub fn interior_edges(&self) -> &[f64] {
        &self.edges[1..self.edges.len() - 1]
    }

    pub fn n_interior_edges(&self) -> usize {
        self.n_layers() - 1
    }

    /// Natural-log conductivities.
    pub fn parameters(&self) -> &[f64] {
        &self.parameters
    }

    pub fn set_parameters(&mut self, values: &[f64]) {
        debug_assert_eq!(values.len(), self.parameters.len());
        self.parameters.copy_from_slice(values);
    }

    /// Linear conductivities (S/m).
    pub fn conductivities(&self) -> Vec<f64> {
        self.parameters.iter().map(|p| p.exp()).collect()
    }

    /// Finite layer thicknesses (length `K - 1`).
    pub fn thicknesses(&self) -> Vec<f64> {
        self.edges
            .windows(2)
            .take(self.n_layers() - 1)
            .map(|w| w[1] - w[0])
            .collect()
    }

    /// Index of the layer containing `depth`.
    pub fn layer_at(&self, depth: f64) -> usize {
        let mut idx = 0;
        for (i, w) in self.edges.windows(2).enumerate() {
            if depth >= w[0] && depth < w[1] {
                idx = i;
                break;
            }
        }
        idx
    }

    /// Thickness of layer `k` with the basement capped at `cap` for
    /// weighting purposes.
    fn capped_thickness(&self, k: usize, cap: f64) -> f64 {
        let top = self.edges[k];
        let bottom = self.edges[k + 1].min(cap);
        (bottom - top).max(f64::MIN_POSITIVE)
    }

    // ------------------------------------------------------------------
    // Deterministic geometry operations
    // ------------------------------------------------------------------

    /// Insert a new edge at `depth`, splitting the containing layer.
    /// The upper child keeps the parent value; the lower child takes
    /// `value`. Returns the new model and the parent layer index, or
    /// None when `depth` violates the minimum separation to existing
    /// edges.
    pub fn birth_at(&self, depth: f64, value: f64, min_separation: f64) -> Option<(Self, usize)> {
        if !depth.is_finite() || depth <= 0.0 {
            return None;
        }
        for &e in self.interior_edges() {
            if (depth - e).abs() < min_separation {
                return None;
            }
        }
        let parent = self.layer_at(depth);
        let mut edges = self.edges.clone();
        let mut parameters = self.parameters.clone();
        edges.insert(parent + 1, depth);
        parameters.insert(parent + 1, value);
        let model = Self { edges, parameters };
        Some((model, parent))
    }

    /// Delete the interior edge with index `edge_index` (1-based within
    /// the edge vector, so `1..=K-1`), merging its two neighbouring
    /// layers. The merged value is the thickness-weighted mean with the
    /// basement capped at `depth_cap`. Returns the new model, the value
    /// removed from the lower child, and the merged value.
    pub fn death_at(&self, edge_index: usize, depth_cap: f64) -> (Self, f64, f64) {
        debug_assert!(edge_index >= 1 && edge_index <= self.n_interior_edges());
        let upper = edge_index - 1;
        let lower = edge_index;
        let w_upper = self.capped_thickness(upper, depth_cap);
        let w_lower = self.capped_thickness(lower, depth_cap);
        let merged = (w_upper * self.parameters[upper] + w_lower * self.parameters[lower])
            / (w_upper + w_lower);
        let removed = self.parameters[lower];

        let mut edges = self.edges.clone();
        let mut parameters = self.parameters.clone();
        edges.remove(edge_index);
        parameters.remove(lower);
        parameters[upper] = merged;
        (Self { edges, parameters }, removed, merged)
    }

    /// Move interior edge `edge_index` to `new_depth`. Returns None
    /// when the move violates ordering, bounds, or minimum separation.
    pub fn move_edge(
        &self,
        edge_index: usize,
        new_depth: f64,
        depth_range: (f64, f64),
        min_separation: f64,
    ) -> Option<Self> {
        debug_assert!(edge_index >= 1 && edge_index <= self.n_interior_edges());
        if !new_depth.is_finite() || new_depth < depth_range.0 || new_depth > depth_range.1 {
            return None;
        }
        for (i, &e) in self.edges.iter().enumerate() {
            if i == edge_index || e == 0.0 || e.is_infinite() {
                continue;
            }
            if (new_depth - e).abs() < min_separation {
                return None;
            }
        }
        let below = self.edges[edge_index - 1];
        let above = self.edges[edge_index + 1];
        if new_depth <= below || new_depth >= above {
            return None;
        }
        let mut edges = self.edges.clone();
        edges[edge_index] = new_depth;
        Some(Self {
            edges,
            parameters: self.parameters.clone(),
        })
    }
}

// ============================================================================
// Prior
// ============================================================================

/// Trans-dimensional prior configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelPrior {
    pub min_layers: usize,
    pub max_layers: usize,
    pub min_depth: f64,
    pub max_depth: f64,
    /// Minimum separation between interior edges
    pub min_thickness: f64,
    /// Log-conductivity bounds; None disables the parameter prior
    pub parameter_bounds: Option<(f64, f64)>,
    /// Standard deviation of the first-difference gradient penalty;
    /// None selects the independent uniform parameter prior
    pub gradient_std: Option<f64>,
}

impl ModelPrior {
    /// Log prior density of the model: number-of-layers term, ordered
    /// edge density, and parameter term. Returns negative infinity for
    /// any violated constraint rather than failing.
    pub fn log_pdf(&self, model: &Model1D) -> f64 {
        let k = model.n_layers();
        if k < self.min_layers || k > self.max_layers {
            return f64::NEG_INFINITY;
        }
        let mut lp = -((self.max_layers - self.min_layers + 1) as f64).ln();

        // Ordered interior edges with minimum separation
        let interior = model.interior_edges();
        let n_e = interior.len();
        for &e in interior {
            if e < self.min_depth || e > self.max_depth {
                return f64::NEG_INFINITY;
            }
        }
        for w in interior.windows(2) {
            if w[1] - w[0] < self.min_thickness {
                return f64::NEG_INFINITY;
            }
        }
        if n_e > 0 {
            let span = self.max_depth - self.min_depth
                - (n_e.saturating_sub(1)) as f64 * self.min_thickness;
            if span <= 0.0 {
                return f64::NEG_INFINITY;
            }
            lp += ln_factorial(n_e) - n_e as f64 * span.ln();
        }

        // Parameter term
        if let Some((lo, hi)) = self.parameter_bounds {
            for &p in model.parameters() {
                if p < lo || p > hi {
                    return f64::NEG_INFINITY;
                }
            }
            if self.gradient_std.is_none() {
                lp -= k as f64 * (hi - lo).ln();
            }
        }
        if let Some(g) = self.gradient_std {
            for w in model.parameters().windows(2) {
                let d = w[1] - w[0];
                lp += -0.5 * (LN_2PI + 2.0 * g.ln() + (d * d) / (g * g));
            }
        }

        lp
    }

    /// Check the hard invariants, independent of density bookkeeping.
    pub fn check_invariants(&self, model: &Model1D) -> bool {
        self.log_pdf(model) > f64::NEG_INFINITY
    }
}

fn ln_factorial(n: usize) -> f64 {
    (2..=n).map(|i| (i as f64).ln()).sum()
}

// ============================================================================
// Proposal kernel
// ============================================================================

/// The four reversible-jump actions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProposalAction {
    Birth,
    Death,
    Perturb,
    NoChange,
}

/// Kernel tuning parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProposalConfig {
    pub p_birth: f64,
    pub p_death: f64,
    pub p_perturb: f64,
    pub p_no_change: f64,
    /// Gaussian step width for edge moves (m)
    pub edge_std: f64,
    /// Width of the birth value draw around the split layer's value
    pub birth_value_std: f64,
    /// Scaling `c` on the Stochastic-Newton covariance
    pub covariance_scaling: f64,
    /// Gradient regularisation width used in the local covariance
    pub gradient_std: f64,
    /// Whether layer values use the Stochastic-Newton proposal
    pub stochastic_newton: bool,
    /// Random-walk width per layer value when Stochastic-Newton is off
    pub parameter_walk_std: f64,
}

impl ProposalConfig {
    /// Draw one of the four actions. `n_interior == 0` disables death;
    /// `at_max_layers` disables birth. Disabled probabilities fold into
    /// no-change, mirroring a kernel that proposes and instantly
    /// rejects impossible moves.
    pub fn draw_action<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        can_birth: bool,
        can_death: bool,
    ) -> ProposalAction {
        let u: f64 = rng.gen::<f64>() * (self.p_birth + self.p_death + self.p_perturb + self.p_no_change);
        if u < self.p_birth {
            if can_birth {
                ProposalAction::Birth
            } else {
                ProposalAction::NoChange
            }
        } else if u < self.p_birth + self.p_death {
            if can_death {
                ProposalAction::Death
            } else {
                ProposalAction::NoChange
            }
        } else if u < self.p_birth + self.p_death + self.p_perturb {
            ProposalAction::Perturb
        } else {
            ProposalAction::NoChange
        }
    }
}

/// How candidate layers map onto current layers after a geometry step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerMapping {
    Identity,
    /// Layer `parent` split into `parent` and `parent + 1`
    Split { parent: usize },
    /// Layers `first` and `first + 1` merged into `first`
    Merge { first: usize },
}

impl LayerMapping {
    /// The mapping of the reverse move.
    pub fn reverse(&self) -> Self {
        match *self {
            Self::Identity => Self::Identity,
            Self::Split { parent } => Self::Merge { first: parent },
            Self::Merge { first } => Self::Split { parent: first },
        }
    }

    /// Remap a Jacobian across the dimension change: a split copies the
    /// parent column to both children (piecewise-constant prolongation),
    /// a merge sums the two children (restriction).
    pub fn remap_jacobian(&self, j: &DMatrix<f64>) -> DMatrix<f64> {
        match *self {
            Self::Identity => j.clone(),
            Self::Split { parent } => {
                let (rows, cols) = j.shape();
                let mut out = DMatrix::zeros(rows, cols + 1);
                for c in 0..=parent {
                    out.set_column(c, &j.column(c));
                }
                out.set_column(parent + 1, &j.column(parent));
                for c in parent + 1..cols {
                    out.set_column(c + 1, &j.column(c));
                }
                out
            }
            Self::Merge { first } => {
                let (rows, cols) = j.shape();
                let mut out = DMatrix::zeros(rows, cols - 1);
                for c in 0..first {
                    out.set_column(c, &j.column(c));
                }
                let merged = j.column(first) + j.column(first + 1);
                out.set_column(first, &merged);
                for c in first + 2..cols {
                    out.set_column(c - 1, &j.column(c));
                }
                out
            }
        }
    }

    /// Remap a value vector across the dimension change. `weights`
    /// supplies the (upper, lower) merge weights for `Merge`.
    pub fn remap_values(&self, values: &[f64], weights: (f64, f64)) -> Vec<f64> {
        match *self {
            Self::Identity => values.to_vec(),
            Self::Split { parent } => {
                let mut out = Vec::with_capacity(values.len() + 1);
                out.extend_from_slice(&values[..=parent]);
                out.push(values[parent]);
                out.extend_from_slice(&values[parent + 1..]);
                out
            }
            Self::Merge { first } => {
                let (wu, wl) = weights;
                let merged = (wu * values[first] + wl * values[first + 1]) / (wu + wl);
                let mut out = Vec::with_capacity(values.len() - 1);
                out.extend_from_slice(&values[..first]);
                out.push(merged);
                out.extend_from_slice(&values[first + 2..]);
                out
            }
        }
    }
}

/// Outcome of the geometry half of a proposal. Layer values still carry
/// the pre-Stochastic-Newton state.
#[derive(Debug, Clone)]
pub struct GeometryProposal {
    pub model: Model1D,
    pub action: ProposalAction,
    pub mapping: LayerMapping,
    /// Geometry part of `log q(current -> candidate)`
    pub log_q_forward: f64,
    /// Geometry part of `log q(candidate -> current)`
    pub log_q_reverse: f64,
}

impl Model1D {
    /// Draw a geometry proposal. Returns None when the drawn move is
    /// immediately infeasible (separation violation, truncated edge
    /// step, no interior edge to kill); the sampler counts that as a
    /// rejected iteration.
    pub fn propose_geometry<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        prior: &ModelPrior,
        cfg: &ProposalConfig,
    ) -> Option<GeometryProposal> {
        let can_birth = self.n_layers() < prior.max_layers;
        let can_death = self.n_layers() > prior.min_layers && self.n_interior_edges() > 0;
        let action = cfg.draw_action(rng, can_birth, can_death);
        let span = prior.max_depth - prior.min_depth;

        match action {
            ProposalAction::Birth => {
                let depth = rng.gen_range(prior.min_depth..=prior.max_depth);
                let parent_probe = self.layer_at(depth);
                let value = self.parameters[parent_probe]
                    + cfg.birth_value_std * standard_normal(rng);
                let (model, parent) = self.birth_at(depth, value, prior.min_thickness)?;
                debug_assert_eq!(parent, parent_probe);
                let n_interior_new = model.n_interior_edges();
                let log_q_forward = cfg.p_birth.ln() - span.ln()
                    + gaussian_ln_pdf(value, self.parameters[parent], cfg.birth_value_std);
                let log_q_reverse = cfg.p_death.ln() - (n_interior_new as f64).ln();
                Some(GeometryProposal {
                    model,
                    action,
                    mapping: LayerMapping::Split { parent },
                    log_q_forward,
                    log_q_reverse,
                })
            }
            ProposalAction::Death => {
                let n_interior = self.n_interior_edges();
                let edge_index = rng.gen_range(1..=n_interior);
                let (model, removed, merged) = self.death_at(edge_index, prior.max_depth);
                let log_q_forward = cfg.p_death.ln() - (n_interior as f64).ln();
                let log_q_reverse = cfg.p_birth.ln() - span.ln()
                    + gaussian_ln_pdf(removed, merged, cfg.birth_value_std);
                Some(GeometryProposal {
                    model,
                    action,
                    mapping: LayerMapping::Merge {
                        first: edge_index - 1,
                    },
                    log_q_forward,
                    log_q_reverse,
                })
            }
            ProposalAction::Perturb => {
                if self.n_interior_edges() == 0 {
                    // Nothing to move; geometry stays put
                    return Some(GeometryProposal {
                        model: self.clone(),
                        action,
                        mapping: LayerMapping::Identity,
                        log_q_forward: cfg.p_perturb.ln(),
                        log_q_reverse: cfg.p_perturb.ln(),
                    });
                }
                let n_interior = self.n_interior_edges();
                let edge_index = rng.gen_range(1..=n_interior);
                let step = cfg.edge_std * standard_normal(rng);
                let new_depth = self.edges[edge_index] + step;
                let model = self.move_edge(
                    edge_index,
                    new_depth,
                    (prior.min_depth, prior.max_depth),
                    prior.min_thickness,
                )?;
                // The Gaussian step density is symmetric and cancels
                let base = cfg.p_perturb.ln() - (n_interior as f64).ln();
                Some(GeometryProposal {
                    model,
                    action,
                    mapping: LayerMapping::Identity,
                    log_q_forward: base,
                    log_q_reverse: base,
                })
            }
            ProposalAction::NoChange => Some(GeometryProposal {
                model: self.clone(),
                action,
                mapping: LayerMapping::Identity,
                log_q_forward: cfg.p_no_change.ln(),
                log_q_reverse: cfg.p_no_change.ln(),
            }),
        }
    }
}

fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let z: f64 = rand_distr::Distribution::sample(&rand_distr::StandardNormal, rng);
    z
}

fn gaussian_ln_pdf(x: f64, mean: f64, std: f64) -> f64 {
    let z = (x - mean) / std;
    -0.5 * (LN_2PI + z * z) - std.ln()
}

// ============================================================================
// Stochastic-Newton local proposal
// ============================================================================

/// Multivariate Gaussian proposal over layer values, factored from a
/// precision matrix. For the Stochastic-Newton flavour the precision is
/// the Gauss-Newton Hessian `J^T W J` plus the first-difference
/// regulariser `D^T D / gradient_std^2`.
pub struct LocalProposal {
    chol: Cholesky<f64, Dyn>,
    scaling: f64,
    dim: usize,
}

impl LocalProposal {
    /// Build from a Jacobian over active channels (`rows`) and layers
    /// (`cols`), with `weights[i] = 1/sigma_i^2` per active channel.
    /// Returns an error when the assembled precision is not positive
    /// definite; the caller rejects the proposal silently.
    pub fn stochastic_newton(
        jacobian: &DMatrix<f64>,
        weights: &[f64],
        gradient_std: f64,
        scaling: f64,
    ) -> Result<Self, ModelError> {
        let (rows, dim) = jacobian.shape();
        debug_assert_eq!(rows, weights.len());

        let mut weighted = jacobian.clone();
        for (i, &w) in weights.iter().enumerate() {
            weighted.row_mut(i).scale_mut(w);
        }
        let mut precision = jacobian.transpose() * weighted;

        if dim > 1 {
            let g2 = gradient_std * gradient_std;
            for i in 0..dim - 1 {
                precision[(i, i)] += 1.0 / g2;
                precision[(i + 1, i + 1)] += 1.0 / g2;
                precision[(i, i + 1)] -= 1.0 / g2;
                precision[(i + 1, i)] -= 1.0 / g2;
            }
        }

        let chol = Cholesky::new(precision).ok_or(ModelError::SingularCovariance)?;
        Ok(Self {
            chol,
            scaling,
            dim,
        })
    }

    /// Independent random walk with a fixed width per layer, used when
    /// the likelihood (and hence the Jacobian) is ignored.
    pub fn isotropic(dim: usize, std: f64) -> Self {
        let precision = DMatrix::from_diagonal_element(dim, dim, 1.0 / (std * std));
        let chol = Cholesky::new(precision).unwrap_or_else(|| {
            // Identity precision is always positive definite
            Cholesky::new(DMatrix::identity(dim, dim)).expect("identity is SPD")
        });
        Self {
            chol,
            scaling: 1.0,
            dim,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Draw values around `mean` with covariance `scaling * P^-1`.
    pub fn sample<R: Rng + ?Sized>(&self, mean: &[f64], rng: &mut R) -> Vec<f64> {
        let z = DVector::from_iterator(self.dim, (0..self.dim).map(|_| standard_normal(rng)));
        let lt = self.chol.l().transpose();
        let step = lt
            .solve_upper_triangular(&z)
            .unwrap_or_else(|| DVector::zeros(self.dim));
        let s = self.scaling.sqrt();
        mean.iter().zip(step.iter()).map(|(m, d)| m + s * d).collect()
    }

    /// Log density of `x` around `mean`.
    pub fn log_pdf(&self, x: &[f64], mean: &[f64]) -> f64 {
        let q = DVector::from_iterator(
            self.dim,
            x.iter().zip(mean.iter()).map(|(a, b)| a - b),
        );
        let lt_q = self.chol.l().transpose() * q;
        let ln_det_precision: f64 =
            2.0 * self.chol.l().diagonal().iter().map(|d| d.ln()).sum::<f64>();
        -0.5 * (self.dim as f64 * (LN_2PI + self.scaling.ln()) - ln_det_precision
            + lt_q.norm_squared() / self.scaling)
    }
}

// ============================================================================
// Posterior accumulators
// ============================================================================

/// The model-side posteriors: layer count, interior edge depths, and
/// the depth-parameter hitmap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelPosteriors {
    pub n_layers: Histogram1D,
    pub edges: Histogram1D,
    pub hitmap: Histogram2D,
}

impl ModelPosteriors {
    /// Meshes are fixed from the prior support: layer counts get one
    /// bin per admissible K, edges and hitmap depth share the depth
    /// support, hitmap parameters span the log-conductivity bounds.
    pub fn new(prior: &ModelPrior, parameter_cells: usize, depth_cells: usize) -> Self {
        let k_mesh = RectilinearMesh1D::regular(
            prior.min_layers as f64 - 0.5,
            prior.max_layers as f64 + 0.5,
            prior.max_layers - prior.min_layers + 1,
        )
        .expect("layer-count mesh from validated prior");
        let edge_mesh = RectilinearMesh1D::regular(prior.min_depth, prior.max_depth, depth_cells)
            .expect("edge mesh from validated prior");
        let (p_lo, p_hi) = prior.parameter_bounds.unwrap_or((-11.5, 4.6));
        let parameter_mesh = RectilinearMesh1D::regular(p_lo, p_hi, parameter_cells)
            .expect("parameter mesh from validated prior");
        let depth_mesh = RectilinearMesh1D::regular(0.0, prior.max_depth, depth_cells)
            .expect("depth mesh from validated prior");

        Self {
            n_layers: Histogram1D::new(k_mesh),
            edges: Histogram1D::new(edge_mesh),
            hitmap: Histogram2D::new(parameter_mesh, depth_mesh),
        }
    }

    /// Accumulate one accepted model: bin K, bin every interior edge,
    /// and rasterise the profile onto the depth mesh.
    pub fn update(&mut self, model: &Model1D) {
        self.n_layers.update(model.n_layers() as f64);
        for &e in model.interior_edges() {
            self.edges.update(e);
        }
        let centres = self.hitmap.y_mesh().centres();
        for (iy, &depth) in centres.iter().enumerate() {
            let layer = model.layer_at(depth);
            self.hitmap.update_row(iy, model.parameters()[layer]);
        }
    }

    pub fn reset(&mut self) {
        self.n_layers.reset();
        self.edges.reset();
        self.hitmap.reset();
    }
}
