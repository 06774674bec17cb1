//! Inversion orchestration
//!
//! - `Inference1D`: the per-datapoint rj-MCMC sampler loop
//! - `Inference3D`: the driver fanning datapoints out over workers
//! - `InversionRecord`: the serialisable per-datapoint result

pub mod driver;
pub mod inference;
pub mod record;

pub use driver::{DatapointFilter, DriverError, Inference3D, RunSummary};
pub use inference::{Inference1D, InferenceError, RunControls};
pub use record::{DatapointRecord, InversionRecord, ModelRecord};
