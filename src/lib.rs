//! STRATUM-EM: Bayesian airborne EM inversion
//!
//! Trans-dimensional Markov-chain Monte Carlo inversion of airborne
//! frequency-domain electromagnetic soundings into 1-D layered-earth
//! resistivity models with full posterior uncertainty.
//!
//! ## Architecture
//!
//! - **Statistics**: distributions, histograms, and sampled parameters
//! - **System**: acquisition geometry and Hankel filter tables
//! - **Forward**: layered-earth EM responses and analytic Jacobians
//! - **Model**: the trans-dimensional layer model and proposal kernel
//! - **Datapoint**: one sounding's observations and noise model
//! - **Inversion**: the sampler loop and the multi-datapoint driver

pub mod config;
pub mod data;
pub mod datapoint;
pub mod forward;
pub mod inversion;
pub mod model;
pub mod statistics;
pub mod storage;
pub mod system;

// Re-export the working set most callers need
pub use config::{ConfigError, DataType, InversionOptions};
pub use datapoint::{DataError, FdemDataPoint};
pub use inversion::{
    DatapointFilter, Inference1D, Inference3D, InversionRecord, RunControls, RunSummary,
};
pub use model::{Model1D, ModelPrior, ProposalAction, ProposalConfig};
pub use statistics::{Distribution, Histogram1D, Histogram2D, RectilinearMesh1D, SampledParameter};
pub use storage::ResultStore;
pub use system::{CircularLoop, FdemSystem, Orientation};
