//! The persisted per-datapoint record
//!
//! The logical result contract of one inversion: chain bookkeeping,
//! best and final states, and every posterior accumulator. Serialised
//! with serde; edges are stored without the infinite basement edge so
//! JSON round-trips stay exact.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::datapoint::FdemDataPoint;
use crate::model::{Model1D, ModelError, ModelPosteriors};
use crate::statistics::SampledParameter;

/// A model snapshot: finite interior edges plus per-layer values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelRecord {
    pub interior_edges: Vec<f64>,
    pub log_conductivity: Vec<f64>,
}

impl ModelRecord {
    pub fn from_model(model: &Model1D) -> Self {
        Self {
            interior_edges: model.interior_edges().to_vec(),
            log_conductivity: model.parameters().to_vec(),
        }
    }

    /// Rebuild the model, restoring the surface and basement edges.
    pub fn to_model(&self) -> Result<Model1D, ModelError> {
        let mut edges = Vec::with_capacity(self.interior_edges.len() + 2);
        edges.push(0.0);
        edges.extend_from_slice(&self.interior_edges);
        edges.push(f64::INFINITY);
        Model1D::new(edges, self.log_conductivity.clone())
    }
}

/// A datapoint snapshot with its nuisance posteriors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatapointRecord {
    pub line_number: f64,
    pub fiducial: f64,
    pub height: SampledParameter,
    pub relative_error: SampledParameter,
    pub additive_error: SampledParameter,
    pub predicted: Vec<f64>,
    pub misfit: f64,
}

impl DatapointRecord {
    pub fn from_datapoint(dp: &FdemDataPoint) -> Self {
        Self {
            line_number: dp.line_number,
            fiducial: dp.fiducial,
            height: dp.height.clone(),
            relative_error: dp.relative_error.clone(),
            additive_error: dp.additive_error.clone(),
            predicted: dp.predicted().to_vec(),
            misfit: dp.data_misfit(),
        }
    }
}

/// The complete result of one datapoint inversion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InversionRecord {
    pub fiducial: f64,
    pub line_number: f64,
    pub completed_at: DateTime<Utc>,

    pub iteration: u64,
    pub burned_in: bool,
    pub burned_in_iteration: Option<u64>,
    pub best_iteration: u64,
    pub failed: bool,

    pub multiplier: f64,
    /// Window acceptance percentages, one entry per window
    pub acceptance_rate: Vec<f64>,
    /// Data misfit at every iteration
    pub misfit_trace: Vec<f64>,
    /// Best-fitting halfspace conductivity used to seed the chain (S/m)
    pub halfspace_conductivity: f64,

    pub best_log_posterior: f64,
    pub best_model: ModelRecord,
    pub best_datapoint: DatapointRecord,
    pub current_model: ModelRecord,
    pub current_datapoint: DatapointRecord,
    pub model_posteriors: ModelPosteriors,
}
