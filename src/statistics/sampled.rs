//! Sampled parameters - a value with optional prior, proposal, posterior
//!
//! The nuisance parameters of a sounding (sensor height, relative and
//! additive noise) all follow the same lifecycle: draw or fix a value,
//! score it under a prior, perturb it with a proposal, and accumulate
//! accepted values into a histogram. This record owns that lifecycle so
//! bulk numeric arrays elsewhere stay free of metadata.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::distribution::Distribution;
use super::histogram::Histogram1D;

/// A named value with optional prior, proposal, and posterior slots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SampledParameter {
    name: String,
    units: String,
    value: Vec<f64>,
    prior: Option<Distribution>,
    proposal: Option<Distribution>,
    posterior: Option<Histogram1D>,
}

impl SampledParameter {
    /// A scalar parameter with no attachments.
    pub fn scalar(name: &str, units: &str, value: f64) -> Self {
        Self::vector(name, units, vec![value])
    }

    /// A vector parameter with no attachments.
    pub fn vector(name: &str, units: &str, value: Vec<f64>) -> Self {
        Self {
            name: name.to_string(),
            units: units.to_string(),
            value,
            prior: None,
            proposal: None,
            posterior: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn units(&self) -> &str {
        &self.units
    }

    pub fn value(&self) -> &[f64] {
        &self.value
    }

    pub fn scalar_value(&self) -> f64 {
        self.value[0]
    }

    pub fn set_value(&mut self, value: &[f64]) {
        debug_assert_eq!(value.len(), self.value.len());
        self.value.copy_from_slice(value);
    }

    pub fn set_scalar(&mut self, value: f64) {
        self.value[0] = value;
    }

    /// Attach a prior and build the posterior histogram over its
    /// support. The mesh is fixed here and never rebuilt.
    pub fn set_prior(&mut self, prior: Distribution, posterior_bins: usize) {
        if let Ok(mesh) = prior.bins(posterior_bins) {
            self.posterior = Some(Histogram1D::new(mesh));
        }
        self.prior = Some(prior);
    }

    pub fn set_proposal(&mut self, proposal: Distribution) {
        self.proposal = Some(proposal);
    }

    pub fn has_prior(&self) -> bool {
        self.prior.is_some()
    }

    pub fn has_proposal(&self) -> bool {
        self.proposal.is_some()
    }

    pub fn prior(&self) -> Option<&Distribution> {
        self.prior.as_ref()
    }

    pub fn posterior(&self) -> Option<&Histogram1D> {
        self.posterior.as_ref()
    }

    /// Replace the current value with a draw from the prior.
    pub fn sample_prior<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        if let Some(prior) = &self.prior {
            let drawn = if prior.dim() == self.value.len() {
                prior.sample(rng)
            } else {
                // Independent scalar prior broadcast across a vector value
                (0..self.value.len())
                    .map(|_| prior.sample_scalar(rng))
                    .collect()
            };
            self.value = drawn;
        }
    }

    /// Log prior density of the current value. Parameters without a
    /// prior contribute zero; out-of-support values score negative
    /// infinity.
    pub fn log_prior(&self) -> f64 {
        match &self.prior {
            None => 0.0,
            Some(prior) if prior.dim() == self.value.len() => prior.log_pdf(&self.value),
            Some(prior) => self
                .value
                .iter()
                .map(|&v| prior.log_pdf_scalar(v))
                .sum(),
        }
    }

    /// Perturb the value by drawing from the proposal re-centred on the
    /// current value, reflecting the draw into the prior support.
    /// Parameters without a proposal stay fixed.
    pub fn perturb<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let Some(proposal) = &self.proposal else {
            return;
        };
        let mut drawn = if proposal.dim() == self.value.len() {
            proposal.propose_from(&self.value, rng)
        } else {
            self.value
                .iter()
                .map(|&v| proposal.propose_from(&[v], rng)[0])
                .collect()
        };
        if let Some(prior) = &self.prior {
            let (low, high) = prior.support();
            for v in &mut drawn {
                *v = reflect_into(*v, low, high);
            }
        }
        self.value = drawn;
    }

    /// Append the current value to the attached posterior.
    pub fn update_posterior(&mut self) {
        if let Some(posterior) = &mut self.posterior {
            for &v in &self.value {
                posterior.update(v);
            }
        }
    }

    pub fn reset_posterior(&mut self) {
        if let Some(posterior) = &mut self.posterior {
            posterior.reset();
        }
    }
}

/// Reflect `x` into `[low, high]` by folding at the boundaries.
///
/// Bounded iteration: each fold strictly shrinks the overshoot, and
/// values further than one span outside are folded modulo-style first.
fn reflect_into(x: f64, low: f64, high: f64) -> f64 {
    if low >= high || !x.is_finite() {
        return x.clamp(low, high);
    }
    let span = high - low;
    let mut v = x;
    for _ in 0..64 {
        if v < low {
            v = low + (low - v);
        } else if v > high {
            v = high - (v - high);
        } else {
            return v;
        }
        // Deep overshoots: fold into the first period
        if (v - low).abs() > 2.0 * span {
            v = low + (v - low).rem_euclid(2.0 * span);
        }
    }
    v.clamp(low, high)
}
