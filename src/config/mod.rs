//! Inversion options
//!
//! Options are read from a TOML key = value file, mirroring the
//! original driver's parameter files. Required keys fail the parse
//! when missing; optional keys carry defaults. A dedicated validation
//! pass reports *every* violated constraint rather than the first.
//!
//! ```toml
//! data_type = "fdem"
//! data_filename = "soundings.csv"
//! system_filename = "system.stm"
//! n_markov_chains = 100000
//! interactive_plot = false
//! update_plot_every = 5000
//! save_png = false
//! save_hdf5 = true
//! solve_parameter = true
//! solve_gradient = false
//! maximum_number_of_layers = 30
//! minimum_depth = 1.0
//! maximum_depth = 150.0
//! probability_of_birth = 0.25
//! probability_of_death = 0.25
//! probability_of_perturb = 0.25
//! probability_of_no_change = 0.25
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{ModelPrior, ProposalConfig};

/// Errors raised while loading or validating options
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read options file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse options file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid options:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),
}

/// Supported datapoint families.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Fdem,
    Tdem,
    Tempest,
}

impl DataType {
    pub fn is_supported(self) -> bool {
        matches!(self, Self::Fdem)
    }
}

fn default_factor() -> f64 {
    10.0
}
fn default_gradient_std() -> f64 {
    1.5
}
fn default_multiplier() -> f64 {
    1.0
}
fn default_covariance_scaling() -> f64 {
    1.0
}
fn default_burn_in_minimum() -> u64 {
    10_000
}
fn default_burn_in_tolerance() -> f64 {
    0.5
}
fn default_burn_in_plateau() -> u64 {
    1_000
}

/// The full option set for one inversion run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InversionOptions {
    // ------------------------------------------------------------------
    // Required
    // ------------------------------------------------------------------
    pub data_type: DataType,
    pub data_filename: PathBuf,
    pub system_filename: PathBuf,
    pub n_markov_chains: u64,
    pub interactive_plot: bool,
    pub update_plot_every: u64,
    pub save_png: bool,
    pub save_hdf5: bool,
    pub solve_parameter: bool,
    pub solve_gradient: bool,
    pub maximum_number_of_layers: usize,
    pub minimum_depth: f64,
    pub maximum_depth: f64,
    pub probability_of_birth: f64,
    pub probability_of_death: f64,
    pub probability_of_perturb: f64,
    pub probability_of_no_change: f64,

    // ------------------------------------------------------------------
    // Optional, with original defaults
    // ------------------------------------------------------------------
    /// Minimum separation between layer interfaces; derived from the
    /// depth range and layer budget when absent
    pub minimum_thickness: Option<f64>,
    /// Width, in factors of conductivity, of the parameter prior around
    /// the best-fitting halfspace
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default = "default_gradient_std")]
    pub gradient_standard_deviation: f64,
    /// Target-misfit multiplier step used before burn-in when the
    /// relative error is not being sampled
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_covariance_scaling")]
    pub covariance_scaling: f64,
    /// Drop the likelihood term and sample the prior alone
    #[serde(default)]
    pub ignore_likelihood: bool,

    // Nuisance parameters: present = sampled, absent = fixed
    pub maximum_height_change: Option<f64>,
    pub height_proposal_standard_deviation: Option<f64>,
    pub initial_relative_error: Option<f64>,
    pub minimum_relative_error: Option<f64>,
    pub maximum_relative_error: Option<f64>,
    pub relative_error_proposal_standard_deviation: Option<f64>,
    pub initial_additive_error: Option<f64>,
    pub minimum_additive_error: Option<f64>,
    pub maximum_additive_error: Option<f64>,
    pub additive_error_proposal_standard_deviation: Option<f64>,

    // Loop attitude changes are accepted for compatibility with the
    // original option files; rigid-boom systems leave them unused
    pub maximum_pitch_change: Option<f64>,
    pub maximum_roll_change: Option<f64>,
    pub maximum_yaw_change: Option<f64>,

    // Kernel step sizes; derived from the prior ranges when absent
    pub edge_proposal_standard_deviation: Option<f64>,
    pub birth_value_standard_deviation: Option<f64>,
    pub parameter_proposal_standard_deviation: Option<f64>,

    // Burn-in detection
    #[serde(default = "default_burn_in_minimum")]
    pub burn_in_minimum_iterations: u64,
    #[serde(default = "default_burn_in_tolerance")]
    pub burn_in_relative_tolerance: f64,
    #[serde(default = "default_burn_in_plateau")]
    pub burn_in_plateau_iterations: u64,

    /// Per-datapoint wallclock limit; None disables the timeout
    pub maximum_seconds_per_datapoint: Option<u64>,
}

impl InversionOptions {
    /// Read and validate an options file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source,
        })?;
        let options: Self = toml::from_str(&text)?;
        options.validate()?;
        Ok(options)
    }

    /// Check every constraint, reporting all violations together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if !self.data_type.is_supported() {
            errors.push(format!(
                "data_type {:?} is not supported by this build (use \"fdem\")",
                self.data_type
            ));
        }
        if self.n_markov_chains == 0 {
            errors.push("n_markov_chains must be positive".to_string());
        }
        if self.update_plot_every == 0 {
            errors.push("update_plot_every must be positive".to_string());
        }
        if self.maximum_number_of_layers == 0 {
            errors.push("maximum_number_of_layers must be positive".to_string());
        }
        if !(self.minimum_depth.is_finite() && self.minimum_depth > 0.0) {
            errors.push("minimum_depth must be positive and finite".to_string());
        }
        if !(self.maximum_depth.is_finite() && self.maximum_depth > self.minimum_depth) {
            errors.push("maximum_depth must exceed minimum_depth".to_string());
        }

        let probabilities = [
            ("probability_of_birth", self.probability_of_birth),
            ("probability_of_death", self.probability_of_death),
            ("probability_of_perturb", self.probability_of_perturb),
            ("probability_of_no_change", self.probability_of_no_change),
        ];
        for (name, p) in probabilities {
            if !(0.0..=1.0).contains(&p) {
                errors.push(format!("{name} must lie in [0, 1], got {p}"));
            }
        }
        let total: f64 = probabilities.iter().map(|(_, p)| p).sum();
        if (total - 1.0).abs() > 1e-6 {
            errors.push(format!("action probabilities must sum to 1, got {total}"));
        }

        if let Some(t) = self.minimum_thickness {
            if !(t.is_finite() && t > 0.0) {
                errors.push("minimum_thickness must be positive".to_string());
            }
        }
        if self.factor <= 1.0 {
            errors.push("factor must exceed 1".to_string());
        }
        if self.gradient_standard_deviation <= 0.0 {
            errors.push("gradient_standard_deviation must be positive".to_string());
        }
        if self.multiplier < 1.0 {
            errors.push("multiplier must be at least 1".to_string());
        }
        if self.covariance_scaling <= 0.0 {
            errors.push("covariance_scaling must be positive".to_string());
        }
        if self.burn_in_relative_tolerance <= 0.0 {
            errors.push("burn_in_relative_tolerance must be positive".to_string());
        }

        // Sampled nuisance parameters need both a prior range and a
        // proposal width
        if self.maximum_height_change.is_some()
            && self.height_proposal_standard_deviation.is_none()
        {
            errors.push(
                "maximum_height_change requires height_proposal_standard_deviation".to_string(),
            );
        }
        if let (Some(lo), Some(hi)) = (self.minimum_relative_error, self.maximum_relative_error) {
            if hi <= lo || lo < 0.0 {
                errors.push("relative error bounds must satisfy 0 <= min < max".to_string());
            }
            if self.relative_error_proposal_standard_deviation.is_none() {
                errors.push(
                    "relative error bounds require relative_error_proposal_standard_deviation"
                        .to_string(),
                );
            }
        }
        if let (Some(lo), Some(hi)) = (self.minimum_additive_error, self.maximum_additive_error) {
            if hi <= lo || lo < 0.0 {
                errors.push("additive error bounds must satisfy 0 <= min < max".to_string());
            }
            if self.additive_error_proposal_standard_deviation.is_none() {
                errors.push(
                    "additive error bounds require additive_error_proposal_standard_deviation"
                        .to_string(),
                );
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    /// Whether the relative error is sampled; the multiplier adaptation
    /// is engaged only when it is not.
    pub fn samples_relative_error(&self) -> bool {
        self.minimum_relative_error.is_some() && self.maximum_relative_error.is_some()
    }

    /// Minimum interface separation, derived from the depth range and
    /// layer budget when not set explicitly.
    pub fn min_thickness(&self) -> f64 {
        self.minimum_thickness.unwrap_or_else(|| {
            (self.maximum_depth - self.minimum_depth) / (2.0 * self.maximum_number_of_layers as f64)
        })
    }

    /// Build the trans-dimensional prior around a halfspace fit. The
    /// parameter support spans `factor^2` either side of the halfspace
    /// conductivity.
    pub fn model_prior(&self, halfspace_log_conductivity: f64) -> ModelPrior {
        let half_width = 2.0 * self.factor.ln();
        let parameter_bounds = if self.solve_parameter {
            Some((
                halfspace_log_conductivity - half_width,
                halfspace_log_conductivity + half_width,
            ))
        } else {
            None
        };
        ModelPrior {
            min_layers: 1,
            max_layers: self.maximum_number_of_layers,
            min_depth: self.minimum_depth,
            max_depth: self.maximum_depth,
            min_thickness: self.min_thickness(),
            parameter_bounds,
            gradient_std: self
                .solve_gradient
                .then_some(self.gradient_standard_deviation),
        }
    }

    /// Build the kernel configuration. Step widths default to a few
    /// percent of the corresponding prior span.
    pub fn proposal_config(&self) -> ProposalConfig {
        let depth_span = self.maximum_depth - self.minimum_depth;
        ProposalConfig {
            p_birth: self.probability_of_birth,
            p_death: self.probability_of_death,
            p_perturb: self.probability_of_perturb,
            p_no_change: self.probability_of_no_change,
            edge_std: self
                .edge_proposal_standard_deviation
                .unwrap_or(0.025 * depth_span),
            birth_value_std: self.birth_value_standard_deviation.unwrap_or(0.5),
            covariance_scaling: self.covariance_scaling,
            gradient_std: self.gradient_standard_deviation,
            stochastic_newton: !self.ignore_likelihood,
            parameter_walk_std: self.parameter_proposal_standard_deviation.unwrap_or(0.25),
        }
    }
}
