//! Frequency-domain EM datapoint
//!
//! One sounding: position, observed in-phase/quadrature channels,
//! per-channel uncertainty, the active-channel mask, and the sampled
//! nuisance parameters (sensor height, relative error, additive
//! error). Scores models through the forward kernel and exposes the
//! misfit/likelihood contract used by the sampler.

use std::sync::Arc;

use nalgebra::DMatrix;
use rand::Rng;
use thiserror::Error;

use crate::forward::{self, ForwardError};
use crate::model::Model1D;
use crate::statistics::{Distribution, SampledParameter};
use crate::system::FdemSystem;

const LN_2PI: f64 = 1.837_877_066_409_345_3;

/// Bins used for nuisance-parameter posterior histograms
const POSTERIOR_BINS: usize = 100;

/// Errors raised while building a datapoint
#[derive(Error, Debug)]
pub enum DataError {
    #[error("data/std length {got} does not match the system's {expected} channels")]
    ChannelMismatch { expected: usize, got: usize },

    #[error("channel {channel}: standard deviation {std} must be positive on active channels")]
    InvalidStd { channel: usize, std: f64 },

    #[error("no active channels: every observation is non-finite")]
    NoActiveChannels,

    #[error("non-finite coordinate or height")]
    NonFiniteGeometry,
}

/// A single airborne FDEM sounding.
#[derive(Debug, Clone)]
pub struct FdemDataPoint {
    pub line_number: f64,
    pub fiducial: f64,
    pub x: f64,
    pub y: f64,
    pub elevation: f64,

    system: Arc<FdemSystem>,
    data: Vec<f64>,
    std: Vec<f64>,
    active: Vec<bool>,
    predicted: Vec<f64>,

    /// Sensor height above ground (m)
    pub height: SampledParameter,
    /// Multiplicative error fraction per subsystem
    pub relative_error: SampledParameter,
    /// Additive error floor per subsystem (ppm)
    pub additive_error: SampledParameter,

    /// Sensitivity of the predicted data to layer conductivities,
    /// refreshed whenever a model is accepted
    jacobian: Option<DMatrix<f64>>,
}

impl FdemDataPoint {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        system: Arc<FdemSystem>,
        line_number: f64,
        fiducial: f64,
        x: f64,
        y: f64,
        height: f64,
        elevation: f64,
        data: Vec<f64>,
        std: Vec<f64>,
    ) -> Result<Self, DataError> {
        let n = system.n_channels();
        if data.len() != n || std.len() != n {
            return Err(DataError::ChannelMismatch {
                expected: n,
                got: data.len().min(std.len()),
            });
        }
        if !(x.is_finite() && y.is_finite() && height.is_finite() && elevation.is_finite()) {
            return Err(DataError::NonFiniteGeometry);
        }

        // A non-finite observation deactivates its channel; a bad
        // standard deviation on a live channel is a data error.
        let active: Vec<bool> = data.iter().map(|d| d.is_finite()).collect();
        if active.iter().all(|a| !a) {
            return Err(DataError::NoActiveChannels);
        }
        for (channel, (&is_active, &s)) in active.iter().zip(&std).enumerate() {
            if is_active && (!s.is_finite() || s <= 0.0) {
                return Err(DataError::InvalidStd { channel, std: s });
            }
        }

        Ok(Self {
            line_number,
            fiducial,
            x,
            y,
            elevation,
            system,
            predicted: vec![0.0; data.len()],
            data,
            std,
            active,
            height: SampledParameter::scalar("Height", "m", height),
            relative_error: SampledParameter::vector("Relative error", "", vec![0.0]),
            additive_error: SampledParameter::vector("Additive error", "ppm", vec![0.0]),
            jacobian: None,
        })
    }

    pub fn system(&self) -> &Arc<FdemSystem> {
        &self.system
    }

    pub fn n_channels(&self) -> usize {
        self.data.len()
    }

    pub fn n_frequencies(&self) -> usize {
        self.system.n_frequencies()
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn std(&self) -> &[f64] {
        &self.std
    }

    pub fn predicted(&self) -> &[f64] {
        &self.predicted
    }

    pub fn active(&self) -> &[bool] {
        &self.active
    }

    pub fn n_active(&self) -> usize {
        self.active.iter().filter(|&&a| a).count()
    }

    pub fn jacobian(&self) -> Option<&DMatrix<f64>> {
        self.jacobian.as_ref()
    }

    // ------------------------------------------------------------------
    // Nuisance parameter setup
    // ------------------------------------------------------------------

    pub fn set_height_prior(&mut self, prior: Distribution, proposal: Distribution) {
        self.height.set_prior(prior, POSTERIOR_BINS);
        self.height.set_proposal(proposal);
    }

    pub fn set_relative_error_prior(&mut self, initial: f64, prior: Distribution, proposal: Distribution) {
        self.relative_error.set_value(&[initial]);
        self.relative_error.set_prior(prior, POSTERIOR_BINS);
        self.relative_error.set_proposal(proposal);
        self.update_errors();
    }

    pub fn set_additive_error_prior(&mut self, initial: f64, prior: Distribution, proposal: Distribution) {
        self.additive_error.set_value(&[initial]);
        self.additive_error.set_prior(prior, POSTERIOR_BINS);
        self.additive_error.set_proposal(proposal);
        self.update_errors();
    }

    /// Recompute per-channel standard deviations from the sampled error
    /// model: `sigma_i^2 = (rel * |d_i|)^2 + add^2`. Channels keep their
    /// file-supplied uncertainty while neither error is sampled.
    pub fn update_errors(&mut self) {
        let rel = self.relative_error.scalar_value();
        let add = self.additive_error.scalar_value();
        if !self.relative_error.has_prior() && !self.additive_error.has_prior() {
            return;
        }
        for (i, s) in self.std.iter_mut().enumerate() {
            if self.active[i] {
                let r = rel * self.data[i].abs();
                *s = (r * r + add * add).sqrt().max(f64::MIN_POSITIVE);
            }
        }
    }

    /// Draw new nuisance values from their proposals, clipped to their
    /// priors, then refresh the error model. Gaussian nuisance
    /// proposals are symmetric so no proposal-ratio terms are returned.
    pub fn perturb<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.height.perturb(rng);
        self.relative_error.perturb(rng);
        self.additive_error.perturb(rng);
        self.update_errors();
    }

    /// Sum of the nuisance log-priors over (height, relative error,
    /// additive error).
    pub fn log_prior(&self) -> f64 {
        self.height.log_prior() + self.relative_error.log_prior() + self.additive_error.log_prior()
    }

    // ------------------------------------------------------------------
    // Forward modelling and scoring
    // ------------------------------------------------------------------

    /// Forward model the sounding: writes the real parts to the
    /// in-phase block and the imaginary parts to the quadrature block.
    pub fn forward(&mut self, model: &Model1D) -> Result<(), ForwardError> {
        let sigma = model.conductivities();
        let thickness = model.thicknesses();
        let response = forward::forward(
            &self.system,
            &sigma,
            &thickness,
            self.height.scalar_value(),
        )?;
        let f = self.n_frequencies();
        for (i, v) in response.iter().enumerate() {
            self.predicted[i] = v.re;
            self.predicted[f + i] = v.im;
        }
        Ok(())
    }

    /// Recompute and store the real-valued sensitivity matrix
    /// (channels x layers, with respect to linear conductivity).
    pub fn update_sensitivity(&mut self, model: &Model1D) -> Result<(), ForwardError> {
        let sigma = model.conductivities();
        let thickness = model.thicknesses();
        let complex_j = forward::sensitivity(
            &self.system,
            &sigma,
            &thickness,
            self.height.scalar_value(),
        )?;
        let f = self.n_frequencies();
        let k = model.n_layers();
        let mut j = DMatrix::zeros(2 * f, k);
        for (i, row) in complex_j.iter().enumerate() {
            for (l, v) in row.iter().enumerate() {
                j[(i, l)] = v.re;
                j[(f + i, l)] = v.im;
            }
        }
        self.jacobian = Some(j);
        Ok(())
    }

    /// Jacobian restricted to active channels and chained to
    /// log-conductivity, with the matching misfit weights `1/sigma^2`.
    /// None until a sensitivity has been computed.
    pub fn active_log_jacobian(&self, model: &Model1D) -> Option<(DMatrix<f64>, Vec<f64>)> {
        let j = self.jacobian.as_ref()?;
        if j.ncols() != model.n_layers() {
            return None;
        }
        let sigma = model.conductivities();
        let rows: Vec<usize> = (0..self.n_channels()).filter(|&i| self.active[i]).collect();
        let mut out = DMatrix::zeros(rows.len(), j.ncols());
        let mut weights = Vec::with_capacity(rows.len());
        for (r, &i) in rows.iter().enumerate() {
            for (c, &s) in sigma.iter().enumerate() {
                out[(r, c)] = j[(i, c)] * s;
            }
            weights.push(1.0 / (self.std[i] * self.std[i]));
        }
        Some((out, weights))
    }

    /// Sum of squared normalised residuals over active channels.
    pub fn data_misfit(&self) -> f64 {
        let mut misfit = 0.0;
        for i in 0..self.data.len() {
            if self.active[i] {
                let r = (self.data[i] - self.predicted[i]) / self.std[i];
                misfit += r * r;
            }
        }
        misfit
    }

    /// Gaussian log likelihood of the observations given the current
    /// predicted data and error model.
    pub fn log_likelihood(&self) -> f64 {
        let mut norm = 0.0;
        for i in 0..self.data.len() {
            if self.active[i] {
                norm += LN_2PI + (self.std[i] * self.std[i]).ln();
            }
        }
        -0.5 * self.data_misfit() - 0.5 * norm
    }

    // ------------------------------------------------------------------
    // Posteriors
    // ------------------------------------------------------------------

    pub fn update_posteriors(&mut self) {
        self.height.update_posterior();
        self.relative_error.update_posterior();
        self.additive_error.update_posterior();
    }

    pub fn reset_posteriors(&mut self) {
        self.height.reset_posterior();
        self.relative_error.reset_posterior();
        self.additive_error.reset_posterior();
    }

    // ------------------------------------------------------------------
    // Best halfspace search
    // ------------------------------------------------------------------

    /// Bisect log10 conductivity for the single-layer model that best
    /// fits the data. Stops when the relative misfit change falls below
    /// `percent_threshold` percent or after `max_iterations`. Returns
    /// the best model seen together with its misfit.
    pub fn find_best_halfspace(
        &mut self,
        min_conductivity: f64,
        max_conductivity: f64,
        percent_threshold: f64,
        max_iterations: usize,
    ) -> Result<(Model1D, f64), ForwardError> {
        let threshold = 0.01 * percent_threshold;
        let mut c0 = min_conductivity.log10();
        let mut c1 = max_conductivity.log10();

        let mut misfit_at = |dp: &mut Self, c: f64| -> Result<f64, ForwardError> {
            let model = Model1D::halfspace(c * std::f64::consts::LN_10);
            dp.forward(&model)?;
            Ok(dp.data_misfit())
        };

        let mut phi0 = misfit_at(self, c0)?;
        let mut phi1 = misfit_at(self, c1)?;
        let (mut best_c, mut best_phi) = if phi0 < phi1 { (c0, phi0) } else { (c1, phi1) };

        let mut delta = ((phi1 - phi0) / phi1).abs();
        let mut i = 1;
        while delta > threshold && i < max_iterations {
            let mid = 0.5 * (c0 + c1);
            let phi_mid = misfit_at(self, mid)?;
            if phi_mid < best_phi {
                best_phi = phi_mid;
                best_c = mid;
            }
            if phi1 > phi_mid {
                c1 = mid;
                phi1 = phi_mid;
            } else if phi0 > phi_mid {
                c0 = mid;
                phi0 = phi_mid;
            } else {
                break;
            }
            delta = ((phi1 - phi0) / phi1).abs();
            i += 1;
        }

        let model = Model1D::halfspace(best_c * std::f64::consts::LN_10);
        self.forward(&model)?;
        Ok((model, best_phi))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::tests::five_frequency_system;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn system() -> Arc<FdemSystem> {
        Arc::new(five_frequency_system())
    }

    /// Datapoint with data synthesised from a known model.
    fn synthetic_datapoint(sigma: &[f64], thickness: &[f64], height: f64) -> FdemDataPoint {
        let sys = system();
        let response = forward::forward(&sys, sigma, thickness, height).unwrap();
        let f = sys.n_frequencies();
        let mut data = vec![0.0; 2 * f];
        for (i, v) in response.iter().enumerate() {
            data[i] = v.re;
            data[f + i] = v.im;
        }
        let std = vec![1.0; 2 * f];
        FdemDataPoint::new(sys, 100.0, 1.0, 0.0, 0.0, height, 0.0, data, std).unwrap()
    }

    #[test]
    fn test_construction_validates_channel_counts() {
        let sys = system();
        let err = FdemDataPoint::new(
            sys.clone(),
            0.0,
            0.0,
            0.0,
            0.0,
            30.0,
            0.0,
            vec![1.0; 4],
            vec![1.0; 4],
        );
        assert!(matches!(err, Err(DataError::ChannelMismatch { .. })));
    }

    #[test]
    fn test_nan_observation_deactivates_channel() {
        let sys = system();
        let mut data = vec![100.0; 10];
        data[3] = f64::NAN;
        let dp = FdemDataPoint::new(
            sys, 0.0, 0.0, 0.0, 0.0, 30.0, 0.0, data, vec![1.0; 10],
        )
        .unwrap();
        assert!(!dp.active()[3]);
        assert_eq!(dp.n_active(), 9);
    }

    #[test]
    fn test_zero_std_on_active_channel_is_error() {
        let sys = system();
        let mut std = vec![1.0; 10];
        std[2] = 0.0;
        let err = FdemDataPoint::new(
            sys, 0.0, 0.0, 0.0, 0.0, 30.0, 0.0, vec![100.0; 10], std,
        );
        assert!(matches!(err, Err(DataError::InvalidStd { channel: 2, .. })));
    }

    #[test]
    fn test_misfit_zero_for_perfect_prediction() {
        let mut dp = synthetic_datapoint(&[0.01], &[], 30.0);
        let model = Model1D::halfspace(0.01f64.ln());
        dp.forward(&model).unwrap();
        assert!(dp.data_misfit() < 1e-18, "misfit {}", dp.data_misfit());
    }

    #[test]
    fn test_misfit_counts_only_active_channels() {
        let sys = system();
        let mut data = vec![0.0; 10];
        data[0] = f64::NAN;
        let mut dp = FdemDataPoint::new(
            sys, 0.0, 0.0, 0.0, 0.0, 30.0, 0.0, data, vec![2.0; 10],
        )
        .unwrap();
        // predicted stays zero; push one residual onto each channel
        dp.predicted = vec![2.0; 10];
        // 9 active channels, each residual (0-2)/2 squared = 1
        assert!((dp.data_misfit() - 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_log_likelihood_decreases_with_worse_fit() {
        let mut dp = synthetic_datapoint(&[0.01], &[], 30.0);
        let good = Model1D::halfspace(0.01f64.ln());
        dp.forward(&good).unwrap();
        let ll_good = dp.log_likelihood();

        let bad = Model1D::halfspace(0.0005f64.ln());
        dp.forward(&bad).unwrap();
        let ll_bad = dp.log_likelihood();
        assert!(ll_good > ll_bad);
    }

    #[test]
    fn test_update_errors_recomputes_std() {
        let mut dp = synthetic_datapoint(&[0.01], &[], 30.0);
        let d0 = dp.data()[0].abs();
        dp.set_relative_error_prior(
            0.05,
            Distribution::uniform(0.01, 0.2).unwrap(),
            Distribution::normal(0.0, 0.01).unwrap(),
        );
        dp.set_additive_error_prior(
            2.0,
            Distribution::uniform(0.1, 10.0).unwrap(),
            Distribution::normal(0.0, 0.2).unwrap(),
        );
        let expected = ((0.05 * d0).powi(2) + 4.0).sqrt();
        assert!((dp.std()[0] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_perturb_respects_priors_and_updates_errors() {
        let mut dp = synthetic_datapoint(&[0.01], &[], 30.0);
        dp.set_height_prior(
            Distribution::uniform(25.0, 35.0).unwrap(),
            Distribution::normal(0.0, 1.0).unwrap(),
        );
        dp.set_relative_error_prior(
            0.05,
            Distribution::uniform(0.01, 0.2).unwrap(),
            Distribution::normal(0.0, 0.005).unwrap(),
        );
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..200 {
            dp.perturb(&mut rng);
            let h = dp.height.scalar_value();
            let r = dp.relative_error.scalar_value();
            assert!((25.0..=35.0).contains(&h), "height {h}");
            assert!((0.01..=0.2).contains(&r), "relative error {r}");
        }
        assert!(dp.log_prior().is_finite());
    }

    #[test]
    fn test_active_log_jacobian_shapes_and_scaling() {
        let mut dp = synthetic_datapoint(&[0.01, 0.1], &[25.0], 30.0);
        let model = Model1D::new(vec![0.0, 25.0, f64::INFINITY], vec![0.01f64.ln(), 0.1f64.ln()])
            .unwrap();
        dp.update_sensitivity(&model).unwrap();
        let (j, w) = dp.active_log_jacobian(&model).unwrap();
        assert_eq!(j.shape(), (10, 2));
        assert_eq!(w.len(), 10);

        // Chain rule: the log-conductivity column equals sigma times the raw one
        let raw = dp.jacobian().unwrap();
        assert!((j[(0, 0)] - raw[(0, 0)] * 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_best_halfspace_recovers_synthetic_conductivity() {
        let mut dp = synthetic_datapoint(&[0.01], &[], 30.0);
        let (model, misfit) = dp.find_best_halfspace(1e-6, 1e2, 1.0, 60).unwrap();
        let sigma = model.conductivities()[0];
        assert!(
            (0.0095..=0.0105).contains(&sigma),
            "recovered {sigma} S/m, misfit {misfit}"
        );
    }

    #[test]
    fn test_forward_writes_inphase_then_quadrature() {
        let mut dp = synthetic_datapoint(&[0.01], &[], 30.0);
        let model = Model1D::halfspace(0.02f64.ln());
        dp.forward(&model).unwrap();
        let direct = forward::forward(dp.system(), &[0.02], &[], 30.0).unwrap();
        assert!((dp.predicted()[0] - direct[0].re).abs() < 1e-12);
        assert!((dp.predicted()[5] - direct[0].im).abs() < 1e-12);
    }
}
