//! Statistics module - posterior accumulators and probability distributions
//!
//! Everything the sampler needs to score and summarise uncertainty:
//! - `RectilinearMesh1D`: fixed bin edges with index/percentile queries
//! - `Histogram1D` / `Histogram2D`: binned posterior accumulators
//! - `Distribution`: tagged union of the probability distributions used
//!   for priors and proposals
//! - `SampledParameter`: a value bundled with optional prior, proposal,
//!   and posterior slots

mod distribution;
mod histogram;
mod mesh;
mod sampled;

pub use distribution::Distribution;
pub use histogram::{BoundsPolicy, Histogram1D, Histogram2D};
pub use mesh::RectilinearMesh1D;
pub use sampled::SampledParameter;

use thiserror::Error;

/// Errors raised while constructing statistical objects
#[derive(Error, Debug)]
pub enum StatisticsError {
    #[error("mesh needs at least 2 strictly increasing finite edges, got {0}")]
    InvalidMesh(usize),

    #[error("covariance matrix is not positive definite")]
    SingularCovariance,

    #[error("invalid distribution parameter: {0}")]
    InvalidParameter(String),

    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}
