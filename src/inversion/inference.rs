//! The per-datapoint rj-MCMC sampler
//!
//! State machine for one sounding: seed the chain from the best-fitting
//! halfspace, then iterate propose / score / accept-reject while
//! watching the misfit trace for burn-in. Posteriors accumulate only
//! after burn-in; the best-ever state is tracked from the burn-in
//! transition onward.
//!
//! Numerical failures inside a proposal (singular local covariance,
//! non-finite forward response) reject that proposal silently and the
//! chain continues; only a failure to initialise is fatal for the
//! datapoint.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::InversionOptions;
use crate::datapoint::FdemDataPoint;
use crate::forward::ForwardError;
use crate::model::{
    LayerMapping, LocalProposal, Model1D, ModelPosteriors, ModelPrior, ProposalConfig,
};
use crate::statistics::{Distribution, Histogram1D, StatisticsError};

use super::record::{DatapointRecord, InversionRecord, ModelRecord};

/// Bins for model posterior meshes
const POSTERIOR_CELLS: usize = 100;
/// Bins for the misfit-trace histogram compared against the chi-square
/// target
const MISFIT_HIST_CELLS: usize = 50;
/// Normalised L2 threshold between the misfit histogram and the
/// chi-square pdf
const MISFIT_L2_THRESHOLD: f64 = 1.0;
/// Ceiling on the adapted target-misfit multiplier
const MULTIPLIER_CEILING: f64 = 1.0e4;

/// Fatal initialisation failures; anything after initialisation is a
/// silent rejection or a `failed` flag on the record.
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("initial forward model failed: {0}")]
    Forward(#[from] ForwardError),

    #[error("nuisance prior construction failed: {0}")]
    Nuisance(#[from] StatisticsError),

    #[error("datapoint has no active channels to fit")]
    NoActiveChannels,
}

/// External run controls: a cooperative kill flag and a wallclock
/// deadline, both checked at window boundaries.
#[derive(Clone, Copy, Default)]
pub struct RunControls<'a> {
    pub kill: Option<&'a std::sync::atomic::AtomicBool>,
    pub deadline: Option<Instant>,
}

impl RunControls<'_> {
    fn should_stop(&self) -> bool {
        let killed = self
            .kill
            .map(|k| k.load(std::sync::atomic::Ordering::Relaxed))
            .unwrap_or(false);
        let timed_out = self.deadline.map(|d| Instant::now() >= d).unwrap_or(false);
        killed || timed_out
    }
}

/// One datapoint's MCMC inversion.
pub struct Inference1D<'a> {
    options: &'a InversionOptions,
    prior: ModelPrior,
    cfg: ProposalConfig,
    rng: StdRng,

    current_model: Model1D,
    current_dp: FdemDataPoint,
    log_prior: f64,
    log_likelihood: f64,
    log_posterior: f64,

    best_model: Model1D,
    best_dp: FdemDataPoint,
    best_log_posterior: f64,
    best_iteration: u64,

    i: u64,
    burned_in: bool,
    burned_in_iteration: Option<u64>,
    accepted_in_window: u64,
    acceptance_rate: Vec<f64>,
    misfit_trace: Vec<f64>,
    window_hist: Histogram1D,
    chi_target: Distribution,
    target_misfit: f64,
    multiplier: f64,
    plateau_run: u64,
    misfit_hist_matches: bool,
    model_posteriors: ModelPosteriors,
    halfspace_conductivity: f64,
}

impl<'a> Inference1D<'a> {
    /// Initialise the chain: attach nuisance priors, find the best
    /// halfspace, seed the model, and evaluate the starting posterior.
    pub fn new(
        options: &'a InversionOptions,
        mut datapoint: FdemDataPoint,
        seed: u64,
    ) -> Result<Self, InferenceError> {
        let mut rng = StdRng::seed_from_u64(seed);

        if datapoint.n_active() == 0 {
            return Err(InferenceError::NoActiveChannels);
        }
        attach_nuisance_priors(options, &mut datapoint)?;

        // Seed the chain from the halfspace that best fits the data
        let (halfspace, halfspace_misfit) =
            datapoint.find_best_halfspace(1.0e-6, 1.0e2, 1.0, 100)?;
        let halfspace_log_conductivity = halfspace.parameters()[0];
        debug!(
            fiducial = datapoint.fiducial,
            conductivity = halfspace_log_conductivity.exp(),
            misfit = halfspace_misfit,
            "halfspace seed"
        );

        let prior = options.model_prior(halfspace_log_conductivity);
        let cfg = options.proposal_config();

        // Draw starting nuisance values from their priors
        let current_model = halfspace;
        datapoint.height.sample_prior(&mut rng);
        datapoint.relative_error.sample_prior(&mut rng);
        datapoint.additive_error.sample_prior(&mut rng);
        datapoint.update_errors();
        datapoint.forward(&current_model)?;
        if cfg.stochastic_newton {
            datapoint.update_sensitivity(&current_model)?;
        }

        let target_misfit = datapoint.n_active() as f64;
        let chi_target = Distribution::chi_squared(target_misfit)?;
        let window_hist = Histogram1D::new(chi_target.bins(MISFIT_HIST_CELLS)?);

        let log_prior = prior.log_pdf(&current_model) + datapoint.log_prior();
        let log_likelihood = if options.ignore_likelihood {
            0.0
        } else {
            datapoint.log_likelihood()
        };
        let log_posterior = log_prior + log_likelihood;

        let model_posteriors = ModelPosteriors::new(&prior, POSTERIOR_CELLS, POSTERIOR_CELLS);

        Ok(Self {
            options,
            prior,
            cfg,
            rng,
            best_model: current_model.clone(),
            best_dp: datapoint.clone(),
            best_log_posterior: log_posterior,
            best_iteration: 0,
            current_model,
            current_dp: datapoint,
            log_prior,
            log_likelihood,
            log_posterior,
            i: 0,
            burned_in: false,
            burned_in_iteration: None,
            accepted_in_window: 0,
            acceptance_rate: Vec::new(),
            misfit_trace: Vec::new(),
            window_hist,
            chi_target,
            target_misfit,
            multiplier: 1.0,
            plateau_run: 0,
            misfit_hist_matches: false,
            model_posteriors,
            halfspace_conductivity: halfspace_log_conductivity.exp(),
        })
    }

    /// Run the chain to completion and serialise the result. Always
    /// returns a record; interruption and timeout set `failed` and
    /// preserve whatever posterior mass has accumulated.
    pub fn run(&mut self, controls: RunControls) -> InversionRecord {
        let n_mcmc = self.options.n_markov_chains;
        let window = self.options.update_plot_every;
        let mut failed = false;

        loop {
            self.i += 1;
            self.step();

            let misfit = self.current_dp.data_misfit();
            self.misfit_trace.push(misfit);
            self.window_hist.update(misfit);
            self.track_plateau(misfit);

            if self.i % window == 0 {
                self.end_of_window();
                if controls.should_stop() {
                    warn!(
                        fiducial = self.current_dp.fiducial,
                        iteration = self.i,
                        "inversion interrupted; keeping partial posteriors"
                    );
                    failed = true;
                    break;
                }
            }

            self.maybe_declare_burn_in();

            if self.burned_in {
                if let Some(i_burn) = self.burned_in_iteration {
                    self.model_posteriors.update(&self.current_model);
                    self.current_dp.update_posteriors();
                    if self.i - i_burn >= n_mcmc {
                        break;
                    }
                }
            } else if self.i >= 2 * n_mcmc {
                // The chain never settled; stop with what we have
                warn!(
                    fiducial = self.current_dp.fiducial,
                    iteration = self.i,
                    "chain did not burn in"
                );
                break;
            }
        }

        self.build_record(failed)
    }

    // ------------------------------------------------------------------
    // One iteration
    // ------------------------------------------------------------------

    /// Propose a candidate, score it, and accept or reject. Any
    /// numerical failure inside the proposal rejects silently.
    fn step(&mut self) {
        let Some((candidate_model, candidate_dp, log_q_forward, log_q_reverse)) =
            self.propose_candidate()
        else {
            return;
        };

        let candidate_log_prior =
            self.prior.log_pdf(&candidate_model) + candidate_dp.log_prior();
        if candidate_log_prior == f64::NEG_INFINITY {
            return;
        }
        let candidate_log_likelihood = if self.options.ignore_likelihood {
            0.0
        } else {
            candidate_dp.log_likelihood()
        };

        let log_alpha = (candidate_log_prior - self.log_prior)
            + (candidate_log_likelihood - self.log_likelihood)
            + (log_q_reverse - log_q_forward);

        // Saturate numerical overflow: reject on NaN or -inf, accept +inf
        let accept = if log_alpha.is_nan() {
            false
        } else if log_alpha == f64::INFINITY {
            true
        } else if log_alpha == f64::NEG_INFINITY {
            false
        } else if log_alpha >= 0.0 {
            true
        } else {
            self.rng.gen::<f64>().ln() < log_alpha
        };

        if accept {
            self.current_model = candidate_model;
            self.current_dp = candidate_dp;
            self.log_prior = candidate_log_prior;
            self.log_likelihood = candidate_log_likelihood;
            self.log_posterior = candidate_log_prior + candidate_log_likelihood;
            self.accepted_in_window += 1;

            if self.burned_in && self.log_posterior > self.best_log_posterior {
                self.best_log_posterior = self.log_posterior;
                self.best_model = self.current_model.clone();
                self.best_dp = self.current_dp.clone();
                self.best_iteration = self.i;
            }
        }
    }

    /// Build the full candidate: perturbed nuisance state, geometry
    /// move, and the Stochastic-Newton refresh of all layer values.
    /// Returns None when the proposal is infeasible or numerically
    /// unsound.
    fn propose_candidate(&mut self) -> Option<(Model1D, FdemDataPoint, f64, f64)> {
        let mut candidate_dp = self.current_dp.clone();
        candidate_dp.perturb(&mut self.rng);

        let geometry = self
            .current_model
            .propose_geometry(&mut self.rng, &self.prior, &self.cfg)?;
        let mut candidate_model = geometry.model;

        // Forward value proposal around the post-geometry values,
        // shaped by the current Jacobian remapped onto the new layers
        let forward_local = self.local_proposal(
            &self.current_dp,
            &self.current_model,
            &geometry.mapping,
            candidate_model.n_layers(),
        )?;
        let mean_forward = candidate_model.parameters().to_vec();
        let candidate_values = forward_local.sample(&mean_forward, &mut self.rng);
        let log_q_value_forward = forward_local.log_pdf(&candidate_values, &mean_forward);
        candidate_model.set_parameters(&candidate_values);

        if self.options.ignore_likelihood {
            // Prior-only sampling: the reverse walk is symmetric, no
            // forward modelling required
            let reverse_local = LocalProposal::isotropic(
                self.current_model.n_layers(),
                self.cfg.parameter_walk_std,
            );
            let reverse_mean = self.reverse_mean(&candidate_model, &geometry.mapping);
            let log_q_value_reverse =
                reverse_local.log_pdf(self.current_model.parameters(), &reverse_mean);
            return Some((
                candidate_model,
                candidate_dp,
                geometry.log_q_forward + log_q_value_forward,
                geometry.log_q_reverse + log_q_value_reverse,
            ));
        }

        // Score the candidate through the physics
        if candidate_dp.forward(&candidate_model).is_err() {
            return None;
        }
        if candidate_dp.update_sensitivity(&candidate_model).is_err() {
            return None;
        }

        // Reverse value proposal, formed at the candidate state and
        // remapped back onto the current layer count
        let reverse_mapping = geometry.mapping.reverse();
        let reverse_local = self.local_proposal(
            &candidate_dp,
            &candidate_model,
            &reverse_mapping,
            self.current_model.n_layers(),
        )?;
        let reverse_mean = self.reverse_mean(&candidate_model, &geometry.mapping);
        let log_q_value_reverse =
            reverse_local.log_pdf(self.current_model.parameters(), &reverse_mean);

        Some((
            candidate_model,
            candidate_dp,
            geometry.log_q_forward + log_q_value_forward,
            geometry.log_q_reverse + log_q_value_reverse,
        ))
    }

    /// The local value proposal for a state, remapped across a
    /// dimension change. Falls back to the isotropic walk when
    /// Stochastic-Newton is disabled.
    fn local_proposal(
        &self,
        dp: &FdemDataPoint,
        model: &Model1D,
        mapping: &LayerMapping,
        target_dim: usize,
    ) -> Option<LocalProposal> {
        if !self.cfg.stochastic_newton {
            return Some(LocalProposal::isotropic(
                target_dim,
                self.cfg.parameter_walk_std,
            ));
        }
        let (jacobian, weights) = dp.active_log_jacobian(model)?;
        let remapped = mapping.remap_jacobian(&jacobian);
        debug_assert_eq!(remapped.ncols(), target_dim);
        LocalProposal::stochastic_newton(
            &remapped,
            &weights,
            self.cfg.gradient_std,
            self.cfg.covariance_scaling,
        )
        .ok()
    }

    /// Mean of the reverse value proposal: the candidate's values
    /// mapped back onto the current layer count (duplicate on split,
    /// thickness-weighted merge on merge).
    fn reverse_mean(&self, candidate: &Model1D, forward_mapping: &LayerMapping) -> Vec<f64> {
        let reverse = forward_mapping.reverse();
        let weights = match reverse {
            LayerMapping::Merge { first } => {
                let edges = candidate.edges();
                let cap = self.prior.max_depth;
                let upper = (edges[first + 1].min(cap) - edges[first]).max(f64::MIN_POSITIVE);
                let lower =
                    (edges[first + 2].min(cap) - edges[first + 1]).max(f64::MIN_POSITIVE);
                (upper, lower)
            }
            _ => (1.0, 1.0),
        };
        reverse.remap_values(candidate.parameters(), weights)
    }

    // ------------------------------------------------------------------
    // Burn-in and window bookkeeping
    // ------------------------------------------------------------------

    fn track_plateau(&mut self, misfit: f64) {
        let target = self.multiplier * self.target_misfit;
        if ((misfit - target) / target).abs() <= self.options.burn_in_relative_tolerance {
            self.plateau_run += 1;
        } else {
            self.plateau_run = 0;
        }
    }

    /// Window boundary: record the acceptance rate, re-test the misfit
    /// histogram against the chi-square target, and adapt the misfit
    /// multiplier when configured.
    fn end_of_window(&mut self) {
        let window = self.options.update_plot_every;
        let rate = 100.0 * self.accepted_in_window as f64 / window as f64;
        self.acceptance_rate.push(rate);
        self.accepted_in_window = 0;

        // The histogram only speaks for the window when most of its
        // samples landed inside the chi-square support
        let total = self.window_hist.total();
        self.misfit_hist_matches = if total >= window / 2 {
            let masses: Vec<f64> = self
                .window_hist
                .counts()
                .iter()
                .map(|&c| c as f64 / total as f64)
                .collect();
            let widths = self.window_hist.mesh().widths();
            let centres = self.window_hist.mesh().centres();
            let l2: f64 = masses
                .iter()
                .zip(centres.iter().zip(widths.iter()))
                .map(|(&m, (&x, &w))| {
                    let q = self.chi_target.pdf_scalar(x) * w;
                    (m - q) * (m - q)
                })
                .sum::<f64>()
                .sqrt();
            l2 < MISFIT_L2_THRESHOLD
        } else {
            false
        };
        self.window_hist.reset();

        // Multiplier adaptation: only while not burned in and only when
        // the relative error carries no prior. This coupling is
        // deliberate and mirrors the original driver.
        if !self.burned_in
            && !self.options.samples_relative_error()
            && self.options.multiplier > 1.0
        {
            let target = self.multiplier * self.target_misfit;
            let recent = self.misfit_trace[self.misfit_trace.len() - window as usize..]
                .iter()
                .copied()
                .fold(f64::INFINITY, f64::min);
            if recent > target * (1.0 + self.options.burn_in_relative_tolerance)
                && self.multiplier * self.options.multiplier <= MULTIPLIER_CEILING
            {
                self.multiplier *= self.options.multiplier;
                debug!(
                    fiducial = self.current_dp.fiducial,
                    multiplier = self.multiplier,
                    "raised target misfit multiplier"
                );
            }
        }
    }

    /// Burn-in is declared once past the configured minimum iteration
    /// count when either the recent misfit trace looks chi-square
    /// distributed, or the misfit has plateaued at the (possibly
    /// multiplied) target for long enough. The transition happens at
    /// most once: posteriors reset and best tracking starts here.
    fn maybe_declare_burn_in(&mut self) {
        if self.burned_in || self.i <= self.options.burn_in_minimum_iterations {
            return;
        }
        let settled = if self.options.ignore_likelihood {
            // Sampling the prior: the misfit criteria are meaningless
            true
        } else {
            self.misfit_hist_matches
                || self.plateau_run >= self.options.burn_in_plateau_iterations
        };
        if !settled {
            return;
        }

        self.burned_in = true;
        self.burned_in_iteration = Some(self.i);
        self.model_posteriors.reset();
        self.current_dp.reset_posteriors();
        self.best_model = self.current_model.clone();
        self.best_dp = self.current_dp.clone();
        self.best_log_posterior = self.log_posterior;
        self.best_iteration = self.i;
        info!(
            fiducial = self.current_dp.fiducial,
            iteration = self.i,
            misfit = self.current_dp.data_misfit(),
            "burned in"
        );
    }

    fn build_record(&self, failed: bool) -> InversionRecord {
        InversionRecord {
            fiducial: self.current_dp.fiducial,
            line_number: self.current_dp.line_number,
            completed_at: chrono::Utc::now(),
            iteration: self.i,
            burned_in: self.burned_in,
            burned_in_iteration: self.burned_in_iteration,
            best_iteration: self.best_iteration,
            failed,
            multiplier: self.multiplier,
            acceptance_rate: self.acceptance_rate.clone(),
            misfit_trace: self.misfit_trace.clone(),
            halfspace_conductivity: self.halfspace_conductivity,
            best_log_posterior: self.best_log_posterior,
            best_model: ModelRecord::from_model(&self.best_model),
            best_datapoint: DatapointRecord::from_datapoint(&self.best_dp),
            current_model: ModelRecord::from_model(&self.current_model),
            current_datapoint: DatapointRecord::from_datapoint(&self.current_dp),
            model_posteriors: self.model_posteriors.clone(),
        }
    }
}

/// Attach nuisance priors and proposals per the options. A key that is
/// absent leaves the parameter fixed.
fn attach_nuisance_priors(
    options: &InversionOptions,
    datapoint: &mut FdemDataPoint,
) -> Result<(), StatisticsError> {
    if let (Some(dz), Some(std)) = (
        options.maximum_height_change,
        options.height_proposal_standard_deviation,
    ) {
        let h0 = datapoint.height.scalar_value();
        datapoint.set_height_prior(
            Distribution::uniform(h0 - dz, h0 + dz)?,
            Distribution::normal(0.0, std)?,
        );
    }
    if let (Some(lo), Some(hi), Some(std)) = (
        options.minimum_relative_error,
        options.maximum_relative_error,
        options.relative_error_proposal_standard_deviation,
    ) {
        let initial = options.initial_relative_error.unwrap_or(0.5 * (lo + hi));
        datapoint.set_relative_error_prior(
            initial,
            Distribution::uniform(lo, hi)?,
            Distribution::normal(0.0, std)?,
        );
    }
    if let (Some(lo), Some(hi), Some(std)) = (
        options.minimum_additive_error,
        options.maximum_additive_error,
        options.additive_error_proposal_standard_deviation,
    ) {
        let initial = options.initial_additive_error.unwrap_or(0.5 * (lo + hi));
        datapoint.set_additive_error_prior(
            initial,
            Distribution::uniform(lo, hi)?,
            Distribution::normal(0.0, std)?,
        );
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::tests::valid_options;
    use crate::forward;
    use crate::system::tests::five_frequency_system;
    use crate::system::FdemSystem;
    use std::sync::Arc;

    fn system() -> Arc<FdemSystem> {
        Arc::new(five_frequency_system())
    }

    pub(crate) fn synthetic_datapoint(
        sys: &Arc<FdemSystem>,
        sigma: &[f64],
        thickness: &[f64],
        height: f64,
        noise_fraction: f64,
        fiducial: f64,
        seed: u64,
    ) -> FdemDataPoint {
        use rand::rngs::StdRng;
        use rand::SeedableRng;

        let response = forward::forward(sys, sigma, thickness, height).unwrap();
        let f = sys.n_frequencies();
        let mut data = vec![0.0; 2 * f];
        for (i, v) in response.iter().enumerate() {
            data[i] = v.re;
            data[f + i] = v.im;
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let std: Vec<f64> = data
            .iter()
            .map(|d| (noise_fraction * d.abs()).max(1.0))
            .collect();
        if noise_fraction > 0.0 {
            for (d, s) in data.iter_mut().zip(&std) {
                let z: f64 =
                    rand_distr::Distribution::sample(&rand_distr::StandardNormal, &mut rng);
                *d += s * z;
            }
        }
        FdemDataPoint::new(
            sys.clone(),
            100.0,
            fiducial,
            0.0,
            0.0,
            height,
            0.0,
            data,
            std,
        )
        .unwrap()
    }

    #[test]
    fn test_acceptance_rate_window_count() {
        // Prior-only sampling with an immediate burn-in gives an exact
        // iteration budget: 100k iterations, 5k windows, 20 entries.
        let mut options = valid_options();
        options.ignore_likelihood = true;
        options.burn_in_minimum_iterations = 0;
        options.n_markov_chains = 100_000;
        options.update_plot_every = 5_000;
        options.maximum_number_of_layers = 5;

        let dp = synthetic_datapoint(&system(), &[0.01], &[], 30.0, 0.0, 1.0, 9);
        let mut inference = Inference1D::new(&options, dp, 42).unwrap();
        let record = inference.run(RunControls::default());

        assert_eq!(record.acceptance_rate.len(), 20);
        for &rate in &record.acceptance_rate {
            assert!((0.0..=100.0).contains(&rate), "rate {rate}");
        }
        assert!(record.burned_in);
        assert_eq!(record.burned_in_iteration, Some(1));
    }

    #[test]
    fn test_burn_in_never_reverts_and_best_tracks_posterior() {
        let mut options = valid_options();
        options.n_markov_chains = 3_000;
        options.update_plot_every = 500;
        options.burn_in_minimum_iterations = 500;
        options.maximum_number_of_layers = 8;

        let dp = synthetic_datapoint(&system(), &[0.01], &[], 30.0, 0.02, 2.0, 11);
        let mut inference = Inference1D::new(&options, dp, 7).unwrap();
        let record = inference.run(RunControls::default());

        assert!(record.burned_in, "a clean halfspace should burn in");
        let i_burn = record.burned_in_iteration.unwrap();
        assert!(record.best_iteration >= i_burn);
        assert!(record.iteration >= i_burn + options.n_markov_chains);
        assert!(!record.failed);
        assert!(record.best_log_posterior.is_finite());
        // Posteriors reset at the transition, then updated every
        // iteration from the burn-in state onward
        assert_eq!(
            record.model_posteriors.n_layers.total(),
            record.iteration - i_burn + 1
        );
    }

    #[test]
    fn test_misfit_trace_covers_every_iteration() {
        let mut options = valid_options();
        options.n_markov_chains = 1_000;
        options.update_plot_every = 250;
        options.burn_in_minimum_iterations = 100;
        options.maximum_number_of_layers = 5;

        let dp = synthetic_datapoint(&system(), &[0.02], &[], 30.0, 0.02, 3.0, 5);
        let mut inference = Inference1D::new(&options, dp, 1).unwrap();
        let record = inference.run(RunControls::default());
        assert_eq!(record.misfit_trace.len() as u64, record.iteration);
        assert!(record.misfit_trace.iter().all(|m| m.is_finite()));
    }

    #[test]
    fn test_timeout_marks_failed_but_keeps_partial_results() {
        let mut options = valid_options();
        options.n_markov_chains = 5_000_000;
        options.update_plot_every = 200;
        options.burn_in_minimum_iterations = 0;
        options.ignore_likelihood = true;
        options.maximum_number_of_layers = 5;

        let dp = synthetic_datapoint(&system(), &[0.01], &[], 30.0, 0.0, 4.0, 2);
        let mut inference = Inference1D::new(&options, dp, 3).unwrap();
        let controls = RunControls {
            kill: None,
            deadline: Some(Instant::now() + std::time::Duration::from_millis(200)),
        };
        let record = inference.run(controls);
        assert!(record.failed);
        assert!(record.iteration > 0);
        assert_eq!(record.misfit_trace.len() as u64, record.iteration);
    }

    #[test]
    fn test_kill_flag_stops_the_chain() {
        use std::sync::atomic::AtomicBool;

        let mut options = valid_options();
        options.n_markov_chains = 5_000_000;
        options.update_plot_every = 100;
        options.ignore_likelihood = true;
        options.burn_in_minimum_iterations = 0;
        options.maximum_number_of_layers = 5;

        let dp = synthetic_datapoint(&system(), &[0.01], &[], 30.0, 0.0, 5.0, 8);
        let mut inference = Inference1D::new(&options, dp, 3).unwrap();
        let kill = AtomicBool::new(true);
        let record = inference.run(RunControls {
            kill: Some(&kill),
            deadline: None,
        });
        assert!(record.failed);
        // Stopped at the first window boundary
        assert_eq!(record.iteration, 100);
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let mut options = valid_options();
        options.n_markov_chains = 1_500;
        options.update_plot_every = 500;
        options.burn_in_minimum_iterations = 200;
        options.maximum_number_of_layers = 6;

        let make = || synthetic_datapoint(&system(), &[0.01, 0.1], &[30.0], 30.0, 0.02, 6.0, 13);
        let a = Inference1D::new(&options, make(), 99).unwrap().run(RunControls::default());
        let b = Inference1D::new(&options, make(), 99).unwrap().run(RunControls::default());

        assert_eq!(a.iteration, b.iteration);
        assert_eq!(a.best_iteration, b.best_iteration);
        assert_eq!(a.best_log_posterior.to_bits(), b.best_log_posterior.to_bits());
        assert_eq!(a.misfit_trace, b.misfit_trace);
        assert_eq!(a.current_model, b.current_model);
    }
}
