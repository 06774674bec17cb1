//! Probability distributions for priors and proposals
//!
//! A tagged union rather than a trait object: the sampler only ever
//! needs a small, closed set of distributions and the enum keeps them
//! serialisable and comparable. Density math delegates to the statrs
//! crate; sampling goes through rand/rand_distr.
//!
//! Contract: `log_pdf` returns negative infinity outside the support
//! instead of failing, so out-of-support proposals score as certain
//! rejections rather than errors.

use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, Continuous, LogNormal, Normal};

use super::mesh::RectilinearMesh1D;
use super::StatisticsError;

const LN_2PI: f64 = 1.837_877_066_409_345_3;

/// The distributions available to priors and proposals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Distribution {
    /// Continuous uniform on `[low, high]`
    Uniform { low: f64, high: f64 },
    /// Gaussian with standard deviation `std`
    Normal { mean: f64, std: f64 },
    /// Log-normal parameterised in log space
    LogNormal { log_mean: f64, log_std: f64 },
    /// Multivariate Gaussian; covariance stored row-major
    MvNormal { mean: Vec<f64>, covariance: Vec<f64> },
    /// Multivariate log-normal parameterised in log space
    MvLogNormal {
        log_mean: Vec<f64>,
        covariance: Vec<f64>,
    },
    /// Chi-squared with `df` degrees of freedom
    ChiSquared { df: f64 },
    /// Discrete categorical over class indices `0..k`
    Categorical { probabilities: Vec<f64> },
}

impl Distribution {
    // ------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------

    pub fn uniform(low: f64, high: f64) -> Result<Self, StatisticsError> {
        if !low.is_finite() || !high.is_finite() || high <= low {
            return Err(StatisticsError::InvalidParameter(format!(
                "uniform bounds [{low}, {high}]"
            )));
        }
        Ok(Self::Uniform { low, high })
    }

    pub fn normal(mean: f64, std: f64) -> Result<Self, StatisticsError> {
        if !mean.is_finite() || !std.is_finite() || std <= 0.0 {
            return Err(StatisticsError::InvalidParameter(format!(
                "normal(mean={mean}, std={std})"
            )));
        }
        Ok(Self::Normal { mean, std })
    }

    pub fn log_normal(log_mean: f64, log_std: f64) -> Result<Self, StatisticsError> {
        if !log_mean.is_finite() || !log_std.is_finite() || log_std <= 0.0 {
            return Err(StatisticsError::InvalidParameter(format!(
                "log_normal(log_mean={log_mean}, log_std={log_std})"
            )));
        }
        Ok(Self::LogNormal { log_mean, log_std })
    }

    pub fn mv_normal(mean: Vec<f64>, covariance: DMatrix<f64>) -> Result<Self, StatisticsError> {
        let n = mean.len();
        if covariance.nrows() != n || covariance.ncols() != n {
            return Err(StatisticsError::DimensionMismatch {
                expected: n,
                got: covariance.nrows(),
            });
        }
        if Cholesky::new(covariance.clone()).is_none() {
            return Err(StatisticsError::SingularCovariance);
        }
        Ok(Self::MvNormal {
            mean,
            covariance: covariance.as_slice().to_vec(),
        })
    }

    pub fn mv_log_normal(
        log_mean: Vec<f64>,
        covariance: DMatrix<f64>,
    ) -> Result<Self, StatisticsError> {
        let n = log_mean.len();
        if covariance.nrows() != n || covariance.ncols() != n {
            return Err(StatisticsError::DimensionMismatch {
                expected: n,
                got: covariance.nrows(),
            });
        }
        if Cholesky::new(covariance.clone()).is_none() {
            return Err(StatisticsError::SingularCovariance);
        }
        Ok(Self::MvLogNormal {
            log_mean,
            covariance: covariance.as_slice().to_vec(),
        })
    }

    pub fn chi_squared(df: f64) -> Result<Self, StatisticsError> {
        if !df.is_finite() || df <= 0.0 {
            return Err(StatisticsError::InvalidParameter(format!("chi2(df={df})")));
        }
        Ok(Self::ChiSquared { df })
    }

    pub fn categorical(probabilities: Vec<f64>) -> Result<Self, StatisticsError> {
        if probabilities.is_empty() || probabilities.iter().any(|&p| !p.is_finite() || p < 0.0) {
            return Err(StatisticsError::InvalidParameter(
                "categorical probabilities".to_string(),
            ));
        }
        let total: f64 = probabilities.iter().sum();
        if total <= 0.0 {
            return Err(StatisticsError::InvalidParameter(
                "categorical probabilities sum to zero".to_string(),
            ));
        }
        Ok(Self::Categorical {
            probabilities: probabilities.iter().map(|p| p / total).collect(),
        })
    }

    // ------------------------------------------------------------------
    // Shape and support
    // ------------------------------------------------------------------

    /// Dimension of one draw.
    pub fn dim(&self) -> usize {
        match self {
            Self::MvNormal { mean, .. } => mean.len(),
            Self::MvLogNormal { log_mean, .. } => log_mean.len(),
            _ => 1,
        }
    }

    /// Scalar support bounds, conservative for unbounded distributions.
    pub fn support(&self) -> (f64, f64) {
        match self {
            Self::Uniform { low, high } => (*low, *high),
            Self::Normal { .. } | Self::MvNormal { .. } => (f64::NEG_INFINITY, f64::INFINITY),
            Self::LogNormal { .. } | Self::MvLogNormal { .. } | Self::ChiSquared { .. } => {
                (0.0, f64::INFINITY)
            }
            Self::Categorical { probabilities } => (0.0, probabilities.len() as f64 - 1.0),
        }
    }

    /// Mean of the distribution, one entry per dimension.
    pub fn mean(&self) -> Vec<f64> {
        match self {
            Self::Uniform { low, high } => vec![0.5 * (low + high)],
            Self::Normal { mean, .. } => vec![*mean],
            Self::LogNormal { log_mean, log_std } => {
                vec![(log_mean + 0.5 * log_std * log_std).exp()]
            }
            Self::MvNormal { mean, .. } => mean.clone(),
            Self::MvLogNormal { log_mean, .. } => log_mean.iter().map(|m| m.exp()).collect(),
            Self::ChiSquared { df } => vec![*df],
            Self::Categorical { probabilities } => {
                vec![probabilities
                    .iter()
                    .enumerate()
                    .map(|(i, p)| i as f64 * p)
                    .sum()]
            }
        }
    }

    // ------------------------------------------------------------------
    // Density
    // ------------------------------------------------------------------

    /// Log probability density (or mass) of `x`.
    ///
    /// Out-of-support values and dimension mismatches score negative
    /// infinity; this function never fails.
    pub fn log_pdf(&self, x: &[f64]) -> f64 {
        if x.len() != self.dim() || x.iter().any(|v| v.is_nan()) {
            return f64::NEG_INFINITY;
        }
        match self {
            Self::Uniform { low, high } => {
                if x[0] < *low || x[0] > *high {
                    f64::NEG_INFINITY
                } else {
                    -(high - low).ln()
                }
            }
            Self::Normal { mean, std } => match Normal::new(*mean, *std) {
                Ok(d) => d.ln_pdf(x[0]),
                Err(_) => f64::NEG_INFINITY,
            },
            Self::LogNormal { log_mean, log_std } => {
                if x[0] <= 0.0 {
                    return f64::NEG_INFINITY;
                }
                match LogNormal::new(*log_mean, *log_std) {
                    Ok(d) => d.ln_pdf(x[0]),
                    Err(_) => f64::NEG_INFINITY,
                }
            }
            Self::MvNormal { mean, covariance } => {
                mv_normal_ln_pdf(x, mean, covariance).unwrap_or(f64::NEG_INFINITY)
            }
            Self::MvLogNormal {
                log_mean,
                covariance,
            } => {
                if x.iter().any(|&v| v <= 0.0) {
                    return f64::NEG_INFINITY;
                }
                let log_x: Vec<f64> = x.iter().map(|v| v.ln()).collect();
                let jacobian: f64 = log_x.iter().sum();
                mv_normal_ln_pdf(&log_x, log_mean, covariance)
                    .map(|lp| lp - jacobian)
                    .unwrap_or(f64::NEG_INFINITY)
            }
            Self::ChiSquared { df } => {
                if x[0] < 0.0 {
                    return f64::NEG_INFINITY;
                }
                match ChiSquared::new(*df) {
                    Ok(d) => d.ln_pdf(x[0]),
                    Err(_) => f64::NEG_INFINITY,
                }
            }
            Self::Categorical { probabilities } => {
                let idx = x[0].round();
                if idx < 0.0 || idx >= probabilities.len() as f64 || (x[0] - idx).abs() > 1e-9 {
                    return f64::NEG_INFINITY;
                }
                let p = probabilities[idx as usize];
                if p > 0.0 {
                    p.ln()
                } else {
                    f64::NEG_INFINITY
                }
            }
        }
    }

    /// `log_pdf` for a scalar value.
    pub fn log_pdf_scalar(&self, x: f64) -> f64 {
        self.log_pdf(&[x])
    }

    /// Probability density of a scalar value.
    pub fn pdf_scalar(&self, x: f64) -> f64 {
        self.log_pdf_scalar(x).exp()
    }

    // ------------------------------------------------------------------
    // Sampling
    // ------------------------------------------------------------------

    /// Draw one value of the native shape.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        match self {
            Self::Uniform { low, high } => vec![rng.gen_range(*low..=*high)],
            Self::Normal { mean, std } => vec![mean + std * standard_normal(rng)],
            Self::LogNormal { log_mean, log_std } => {
                vec![(log_mean + log_std * standard_normal(rng)).exp()]
            }
            Self::MvNormal { mean, covariance } => mv_normal_sample(rng, mean, covariance),
            Self::MvLogNormal {
                log_mean,
                covariance,
            } => mv_normal_sample(rng, log_mean, covariance)
                .into_iter()
                .map(|v| v.exp())
                .collect(),
            Self::ChiSquared { df } => {
                // Sum-of-squares fallback only applies to integer df;
                // rand_distr covers the general case.
                let d = rand_distr::ChiSquared::new(*df)
                    .map(|d| rand_distr::Distribution::sample(&d, rng))
                    .unwrap_or(*df);
                vec![d]
            }
            Self::Categorical { probabilities } => {
                let u: f64 = rng.gen();
                let mut cumulative = 0.0;
                for (i, &p) in probabilities.iter().enumerate() {
                    cumulative += p;
                    if u <= cumulative {
                        return vec![i as f64];
                    }
                }
                vec![probabilities.len() as f64 - 1.0]
            }
        }
    }

    /// Draw one scalar value.
    pub fn sample_scalar<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        self.sample(rng)[0]
    }

    /// Draw a proposal step from this distribution re-centred on
    /// `current`. Location families shift their mean; bounded and
    /// discrete families sample their absolute support.
    pub fn propose_from<R: Rng + ?Sized>(&self, current: &[f64], rng: &mut R) -> Vec<f64> {
        match self {
            Self::Normal { std, .. } => {
                vec![current[0] + std * standard_normal(rng)]
            }
            Self::LogNormal { log_std, .. } => {
                let centre = current[0].max(f64::MIN_POSITIVE).ln();
                vec![(centre + log_std * standard_normal(rng)).exp()]
            }
            Self::MvNormal { covariance, .. } => mv_normal_sample(rng, current, covariance),
            Self::MvLogNormal { covariance, .. } => {
                let log_current: Vec<f64> = current
                    .iter()
                    .map(|v| v.max(f64::MIN_POSITIVE).ln())
                    .collect();
                mv_normal_sample(rng, &log_current, covariance)
                    .into_iter()
                    .map(|v| v.exp())
                    .collect()
            }
            _ => self.sample(rng),
        }
    }

    // ------------------------------------------------------------------
    // Posterior mesh construction
    // ------------------------------------------------------------------

    /// `n + 1` edges spanning the (truncated) support, used to build
    /// posterior meshes from priors.
    pub fn bins(&self, n: usize) -> Result<RectilinearMesh1D, StatisticsError> {
        match self {
            Self::Uniform { low, high } => RectilinearMesh1D::regular(*low, *high, n),
            Self::Normal { mean, std } => {
                RectilinearMesh1D::regular(mean - 4.0 * std, mean + 4.0 * std, n)
            }
            Self::LogNormal { log_mean, log_std } => {
                let lo = log_mean - 4.0 * log_std;
                let hi = log_mean + 4.0 * log_std;
                let width = (hi - lo) / n as f64;
                let edges = (0..=n).map(|i| (lo + i as f64 * width).exp()).collect();
                RectilinearMesh1D::new(edges)
            }
            Self::ChiSquared { df } => {
                RectilinearMesh1D::regular(0.0, df + 4.0 * (2.0 * df).sqrt(), n)
            }
            Self::Categorical { probabilities } => {
                let k = probabilities.len();
                RectilinearMesh1D::regular(-0.5, k as f64 - 0.5, k)
            }
            Self::MvNormal { .. } | Self::MvLogNormal { .. } => {
                Err(StatisticsError::InvalidParameter(
                    "bins are only defined for scalar distributions".to_string(),
                ))
            }
        }
    }
}

/// One standard normal draw.
fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let z: f64 = rand_distr::Distribution::sample(&rand_distr::StandardNormal, rng);
    z
}

fn cholesky_of(covariance: &[f64], n: usize) -> Option<Cholesky<f64, Dyn>> {
    let cov = DMatrix::from_column_slice(n, n, covariance);
    Cholesky::new(cov)
}

fn mv_normal_ln_pdf(x: &[f64], mean: &[f64], covariance: &[f64]) -> Option<f64> {
    let n = mean.len();
    let chol = cholesky_of(covariance, n)?;
    let diff = DVector::from_iterator(n, x.iter().zip(mean.iter()).map(|(a, b)| a - b));
    // Solve L y = diff; the quadratic form is |y|^2
    let y = chol.l().solve_lower_triangular(&diff)?;
    let ln_det: f64 = chol.l().diagonal().iter().map(|d| d.ln()).sum::<f64>() * 2.0;
    Some(-0.5 * (n as f64 * LN_2PI + ln_det + y.norm_squared()))
}

fn mv_normal_sample<R: Rng + ?Sized>(rng: &mut R, mean: &[f64], covariance: &[f64]) -> Vec<f64> {
    let n = mean.len();
    match cholesky_of(covariance, n) {
        Some(chol) => {
            let z = DVector::from_iterator(n, (0..n).map(|_| standard_normal(rng)));
            let step = chol.l() * z;
            mean.iter().zip(step.iter()).map(|(m, s)| m + s).collect()
        }
        // A covariance that degenerated after construction yields the mean
        None => mean.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn test_uniform_log_pdf() {
        let d = Distribution::uniform(2.0, 6.0).unwrap();
        assert!((d.log_pdf_scalar(3.0) - (-4.0f64.ln())).abs() < 1e-12);
        assert_eq!(d.log_pdf_scalar(1.9), f64::NEG_INFINITY);
        assert_eq!(d.log_pdf_scalar(6.1), f64::NEG_INFINITY);
    }

    #[test]
    fn test_normal_log_pdf_matches_closed_form() {
        let d = Distribution::normal(1.0, 2.0).unwrap();
        let expected = -0.5 * ((2.0f64 * std::f64::consts::PI * 4.0).ln());
        assert!((d.log_pdf_scalar(1.0) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_out_of_support_is_neg_infinity_not_error() {
        let ln = Distribution::log_normal(0.0, 1.0).unwrap();
        assert_eq!(ln.log_pdf_scalar(-1.0), f64::NEG_INFINITY);
        let chi = Distribution::chi_squared(4.0).unwrap();
        assert_eq!(chi.log_pdf_scalar(-0.1), f64::NEG_INFINITY);
        assert_eq!(chi.log_pdf_scalar(f64::NAN), f64::NEG_INFINITY);
    }

    #[test]
    fn test_uniform_samples_stay_in_support() {
        let d = Distribution::uniform(-3.0, 3.0).unwrap();
        let mut r = rng();
        for _ in 0..1000 {
            let x = d.sample_scalar(&mut r);
            assert!((-3.0..=3.0).contains(&x));
        }
    }

    #[test]
    fn test_normal_sample_mean_and_spread() {
        let d = Distribution::normal(5.0, 1.0).unwrap();
        let mut r = rng();
        let n = 20_000;
        let samples: Vec<f64> = (0..n).map(|_| d.sample_scalar(&mut r)).collect();
        let mean = samples.iter().sum::<f64>() / n as f64;
        assert!((mean - 5.0).abs() < 0.05, "sample mean {}", mean);
    }

    #[test]
    fn test_mv_normal_log_pdf_independent_case() {
        // Diagonal covariance must reduce to the product of scalars
        let cov = DMatrix::from_diagonal(&DVector::from_vec(vec![4.0, 9.0]));
        let mv = Distribution::mv_normal(vec![0.0, 1.0], cov).unwrap();
        let a = Distribution::normal(0.0, 2.0).unwrap();
        let b = Distribution::normal(1.0, 3.0).unwrap();
        let x = [0.7, -0.4];
        let expected = a.log_pdf_scalar(x[0]) + b.log_pdf_scalar(x[1]);
        assert!((mv.log_pdf(&x) - expected).abs() < 1e-10);
    }

    #[test]
    fn test_mv_normal_rejects_singular_covariance() {
        let cov = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        assert!(matches!(
            Distribution::mv_normal(vec![0.0, 0.0], cov),
            Err(StatisticsError::SingularCovariance)
        ));
    }

    #[test]
    fn test_mv_log_normal_support() {
        let cov = DMatrix::from_diagonal(&DVector::from_vec(vec![1.0, 1.0]));
        let d = Distribution::mv_log_normal(vec![0.0, 0.0], cov).unwrap();
        assert_eq!(d.log_pdf(&[1.0, -1.0]), f64::NEG_INFINITY);
        assert!(d.log_pdf(&[1.0, 1.0]).is_finite());

        let mut r = rng();
        let s = d.sample(&mut r);
        assert!(s.iter().all(|&v| v > 0.0));
    }

    #[test]
    fn test_categorical_normalised_and_sampled() {
        let d = Distribution::categorical(vec![2.0, 2.0, 4.0]).unwrap();
        assert!((d.log_pdf_scalar(2.0) - 0.5f64.ln()).abs() < 1e-12);
        assert_eq!(d.log_pdf_scalar(3.0), f64::NEG_INFINITY);

        let mut r = rng();
        let mut counts = [0usize; 3];
        for _ in 0..3000 {
            counts[d.sample_scalar(&mut r) as usize] += 1;
        }
        assert!(counts[2] > counts[0], "class 2 should dominate: {counts:?}");
    }

    #[test]
    fn test_bins_span_support() {
        let u = Distribution::uniform(10.0, 20.0).unwrap();
        let mesh = u.bins(50).unwrap();
        assert_eq!(mesh.n_cells(), 50);
        assert!((mesh.low() - 10.0).abs() < 1e-12);
        assert!((mesh.high() - 20.0).abs() < 1e-12);

        let chi = Distribution::chi_squared(10.0).unwrap();
        let mesh = chi.bins(100).unwrap();
        assert!((mesh.low()).abs() < 1e-12);
        assert!(mesh.high() > 10.0);
    }

    #[test]
    fn test_propose_from_recentres_normal() {
        let d = Distribution::normal(0.0, 0.1).unwrap();
        let mut r = rng();
        let n = 5000;
        let mean = (0..n)
            .map(|_| d.propose_from(&[7.0], &mut r)[0])
            .sum::<f64>()
            / n as f64;
        assert!((mean - 7.0).abs() < 0.01, "proposal mean {}", mean);
    }
}
