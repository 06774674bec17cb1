//! Frequency-domain EM forward operator and analytic Jacobian
//!
//! Evaluates the secondary magnetic field of a 1-D layered halfspace in
//! parts-per-million of the free-space primary coupling, at each system
//! frequency, via digital-filter Hankel transforms.
//!
//! The recursion and its derivative:
//! - quasi-static propagation constants `u_k = sqrt(lambda^2 + i w mu0 sigma_k)`
//! - surface impedance propagated upward from the basement,
//!   `R_k = (R_{k+1} + tanh(u_k t_k)/u_k) / (1 + u_k R_{k+1} tanh(u_k t_k))`
//! - reflection kernel `rTE = (lambda R_1 - 1)/(lambda R_1 + 1)`
//! - sensitivities follow the same recursion differentiated in closed
//!   form and chained top-down; no finite differences anywhere.

use num_complex::Complex64;
use thiserror::Error;

use crate::system::{FdemSystem, TensorComponent};

/// Magnetic permeability of free space (H/m)
pub const MU0: f64 = 1.256_637_061_435_917_3e-6;

/// Arguments beyond this saturate tanh to 1 within f64 precision
const TANH_SATURATION: f64 = 20.0;

/// Errors raised by the forward operator
#[derive(Error, Debug)]
pub enum ForwardError {
    #[error("model has no layers")]
    EmptyModel,

    #[error("layer thicknesses must be positive and finite")]
    InvalidThickness,

    #[error("conductivities must be positive and finite")]
    InvalidConductivity,

    #[error("non-finite response at frequency index {0}")]
    NonFiniteResponse(usize),
}

/// Validate a conductivity/thickness stack: `sigma` has K entries,
/// `thickness` the K-1 finite thicknesses above the basement.
fn check_stack(sigma: &[f64], thickness: &[f64]) -> Result<(), ForwardError> {
    if sigma.is_empty() {
        return Err(ForwardError::EmptyModel);
    }
    if thickness.len() + 1 != sigma.len() {
        return Err(ForwardError::InvalidThickness);
    }
    if sigma.iter().any(|&s| !s.is_finite() || s <= 0.0) {
        return Err(ForwardError::InvalidConductivity);
    }
    if thickness.iter().any(|&t| !t.is_finite() || t <= 0.0) {
        return Err(ForwardError::InvalidThickness);
    }
    Ok(())
}

/// tanh with saturation for large real arguments, where cosh would
/// overflow long before the value departs from 1.
fn tanh_saturated(z: Complex64) -> Complex64 {
    if z.re > TANH_SATURATION {
        Complex64::new(1.0, 0.0)
    } else {
        z.tanh()
    }
}

/// Reflection kernel rTE at a single Hankel abscissa.
fn reflection(lambda: f64, lambda_sq: f64, i_omega_mu: Complex64, sigma: &[f64], thickness: &[f64]) -> Complex64 {
    let n = sigma.len();
    let u_basement = (Complex64::new(lambda_sq, 0.0) + i_omega_mu * sigma[n - 1]).sqrt();
    let mut r = u_basement.inv();
    for k in (0..n - 1).rev() {
        let u = (Complex64::new(lambda_sq, 0.0) + i_omega_mu * sigma[k]).sqrt();
        let t = tanh_saturated(u * thickness[k]);
        r = (r + t / u) / (Complex64::new(1.0, 0.0) + u * r * t);
    }
    (lambda * r - 1.0) / (lambda * r + 1.0)
}

/// Reflection kernel and its gradient with respect to each layer
/// conductivity, at a single Hankel abscissa.
///
/// The impedance recursion runs bottom-up; the chain rule then runs
/// top-down, accumulating the product of the partials
/// `dR_k/dR_{k+1}` so each layer's own derivative can be propagated to
/// the surface in one pass.
fn reflection_with_gradient(
    lambda: f64,
    lambda_sq: f64,
    i_omega_mu: Complex64,
    sigma: &[f64],
    thickness: &[f64],
    grad: &mut [Complex64],
) -> Complex64 {
    let n = sigma.len();
    let one = Complex64::new(1.0, 0.0);

    // Bottom-up pass: store per-layer impedance R[k], the derivative of
    // R[k] with respect to sigma[k] holding R[k+1] fixed ("own"), and
    // the partial dR[k]/dR[k+1] ("chain").
    let mut r_stack = vec![Complex64::default(); n];
    let mut own = vec![Complex64::default(); n];
    let mut chain = vec![Complex64::default(); n.saturating_sub(1)];

    let u_base = (Complex64::new(lambda_sq, 0.0) + i_omega_mu * sigma[n - 1]).sqrt();
    let du_base = i_omega_mu / (2.0 * u_base);
    r_stack[n - 1] = u_base.inv();
    own[n - 1] = -du_base / (u_base * u_base);

    for k in (0..n - 1).rev() {
        let u = (Complex64::new(lambda_sq, 0.0) + i_omega_mu * sigma[k]).sqrt();
        let du = i_omega_mu / (2.0 * u);
        let arg = u * thickness[k];
        let t = tanh_saturated(arg);
        let dt_du = if arg.re > TANH_SATURATION {
            Complex64::default()
        } else {
            thickness[k] * (one - t * t)
        };

        let r_next = r_stack[k + 1];
        let numer = r_next + t / u;
        let denom = one + u * r_next * t;
        let r_k = numer / denom;

        let d_numer_du = (dt_du * u - t) / (u * u);
        let d_denom_du = r_next * (t + u * dt_du);
        let dr_du = (d_numer_du * denom - numer * d_denom_du) / (denom * denom);

        r_stack[k] = r_k;
        own[k] = dr_du * du;
        chain[k] = (denom - numer * u * t) / (denom * denom);
    }

    let r0 = r_stack[0];
    let denom_rte = lambda * r0 + 1.0;
    let rte = (lambda * r0 - 1.0) / denom_rte;
    let d_rte_dr0 = 2.0 * lambda / (denom_rte * denom_rte);

    // Top-down chain products
    let mut prefix = one;
    for k in 0..n {
        grad[k] = d_rte_dr0 * prefix * own[k];
        if k < n - 1 {
            prefix *= chain[k];
        }
    }

    rte
}

/// The three filtered sums that every tensor component is assembled
/// from. `a` uses the J0 filter with a lambda^2 kernel, `b` the J1
/// filter with a lambda kernel, `c` the J1 filter with a lambda^2
/// kernel. Each already includes the 1/r of the digital filter.
struct FilteredSums {
    a: Complex64,
    b: Complex64,
    c: Complex64,
}

/// Combine the filtered sums into the ppm response for one component.
///
/// The secondary field and the free-space primary coupling both carry
/// the transmitter moment, so it cancels in the ratio; the receiver
/// moment scales measured and primary voltages alike.
fn assemble_ppm(component: TensorComponent, r: f64, sums: &FilteredSums) -> Complex64 {
    let r2 = r * r;
    let r3 = r2 * r;
    // The equatorial primary coupling is negative, so each ratio picks
    // up a sign flip; a conductive halfspace reads positive quadrature.
    match component {
        // Vertical dipoles, horizontal coplanar loops
        TensorComponent::Zz => -1.0e6 * r3 * sums.a,
        // Horizontal coaxial loops
        TensorComponent::Xx => -0.5e6 * (r3 * sums.a - r2 * sums.b),
        // Vertical coplanar loops
        TensorComponent::Yy => -1.0e6 * r2 * sums.b,
        // Perpendicular pairs
        TensorComponent::Zx | TensorComponent::Xz => -1.0e6 * r3 * sums.c,
        // Rejected at system construction
        _ => Complex64::default(),
    }
}

/// Predicted complex response, one entry per frequency: real part is
/// the in-phase channel, imaginary part the quadrature, both in ppm.
///
/// Deterministic: no internal state survives between calls.
pub fn forward(
    system: &FdemSystem,
    sigma: &[f64],
    thickness: &[f64],
    height: f64,
) -> Result<Vec<Complex64>, ForwardError> {
    check_stack(sigma, thickness)?;

    let mut response = Vec::with_capacity(system.n_frequencies());
    for i in 0..system.n_frequencies() {
        let omega = 2.0 * std::f64::consts::PI * system.frequencies()[i];
        let i_omega_mu = Complex64::new(0.0, omega * MU0);
        let r = system.separation(i);
        let height_sum = (height + system.transmitter(i).z) + (height + system.receiver(i).z);

        let mut a = Complex64::default();
        for (j, (&w, &lam)) in crate::system::hankel::W0
            .iter()
            .zip(system.lambda0(i))
            .enumerate()
        {
            let lam_sq = system.lambda0_sq(i)[j];
            let rte = reflection(lam, lam_sq, i_omega_mu, sigma, thickness);
            a += w * lam_sq * rte * (-lam * height_sum).exp();
        }
        a /= r;

        let mut b = Complex64::default();
        let mut c = Complex64::default();
        for (j, (&w, &lam)) in crate::system::hankel::W1
            .iter()
            .zip(system.lambda1(i))
            .enumerate()
        {
            let lam_sq = system.lambda1_sq(i)[j];
            let rte = reflection(lam, lam_sq, i_omega_mu, sigma, thickness);
            let damped = rte * (-lam * height_sum).exp();
            b += w * lam * damped;
            c += w * lam_sq * damped;
        }
        b /= r;
        c /= r;

        let ppm = assemble_ppm(system.component(i), r, &FilteredSums { a, b, c });
        if !ppm.re.is_finite() || !ppm.im.is_finite() {
            return Err(ForwardError::NonFiniteResponse(i));
        }
        response.push(ppm);
    }
    Ok(response)
}

/// Complex sensitivity of the ppm response to each layer conductivity:
/// `out[frequency][layer] = d ppm / d sigma_layer`.
pub fn sensitivity(
    system: &FdemSystem,
    sigma: &[f64],
    thickness: &[f64],
    height: f64,
) -> Result<Vec<Vec<Complex64>>, ForwardError> {
    check_stack(sigma, thickness)?;
    let n_layers = sigma.len();

    let mut jacobian = Vec::with_capacity(system.n_frequencies());
    let mut grad = vec![Complex64::default(); n_layers];

    for i in 0..system.n_frequencies() {
        let omega = 2.0 * std::f64::consts::PI * system.frequencies()[i];
        let i_omega_mu = Complex64::new(0.0, omega * MU0);
        let r = system.separation(i);
        let height_sum = (height + system.transmitter(i).z) + (height + system.receiver(i).z);

        let mut a = vec![Complex64::default(); n_layers];
        for (j, (&w, &lam)) in crate::system::hankel::W0
            .iter()
            .zip(system.lambda0(i))
            .enumerate()
        {
            let lam_sq = system.lambda0_sq(i)[j];
            reflection_with_gradient(lam, lam_sq, i_omega_mu, sigma, thickness, &mut grad);
            let weight = w * lam_sq * (-lam * height_sum).exp();
            for (slot, g) in a.iter_mut().zip(&grad) {
                *slot += weight * *g;
            }
        }
        for slot in &mut a {
            *slot /= r;
        }

        let mut b = vec![Complex64::default(); n_layers];
        let mut c = vec![Complex64::default(); n_layers];
        for (j, (&w, &lam)) in crate::system::hankel::W1
            .iter()
            .zip(system.lambda1(i))
            .enumerate()
        {
            let lam_sq = system.lambda1_sq(i)[j];
            reflection_with_gradient(lam, lam_sq, i_omega_mu, sigma, thickness, &mut grad);
            let damp = (-lam * height_sum).exp();
            for k in 0..n_layers {
                b[k] += w * lam * damp * grad[k];
                c[k] += w * lam_sq * damp * grad[k];
            }
        }
        for k in 0..n_layers {
            b[k] /= r;
            c[k] /= r;
        }

        let row: Vec<Complex64> = (0..n_layers)
            .map(|k| {
                assemble_ppm(
                    system.component(i),
                    r,
                    &FilteredSums {
                        a: a[k],
                        b: b[k],
                        c: c[k],
                    },
                )
            })
            .collect();
        if row.iter().any(|v| !v.re.is_finite() || !v.im.is_finite()) {
            return Err(ForwardError::NonFiniteResponse(i));
        }
        jacobian.push(row);
    }
    Ok(jacobian)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::tests::five_frequency_system;

    #[test]
    fn test_forward_is_deterministic() {
        let sys = five_frequency_system();
        let sigma = [0.01, 0.1];
        let thk = [25.0];
        let first = forward(&sys, &sigma, &thk, 30.0).unwrap();
        let second = forward(&sys, &sigma, &thk, 30.0).unwrap();
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.re.to_bits(), b.re.to_bits());
            assert_eq!(a.im.to_bits(), b.im.to_bits());
        }
    }

    #[test]
    fn test_forward_rejects_bad_stacks() {
        let sys = five_frequency_system();
        assert!(matches!(
            forward(&sys, &[], &[], 30.0),
            Err(ForwardError::EmptyModel)
        ));
        assert!(forward(&sys, &[0.01, 0.1], &[], 30.0).is_err());
        assert!(forward(&sys, &[0.01, -0.1], &[10.0], 30.0).is_err());
        assert!(forward(&sys, &[0.01, 0.1], &[-5.0], 30.0).is_err());
    }

    #[test]
    fn test_halfspace_response_is_finite_and_conductive_quadrature_positive() {
        let sys = five_frequency_system();
        let response = forward(&sys, &[0.01], &[], 30.0).unwrap();
        assert_eq!(response.len(), 5);
        for (i, v) in response.iter().enumerate() {
            assert!(v.re.is_finite() && v.im.is_finite());
            assert!(
                v.im > 0.0,
                "quadrature should be positive over a conductor (freq {i}: {v})"
            );
        }
    }

    #[test]
    fn test_response_grows_with_conductivity_at_low_induction() {
        let sys = five_frequency_system();
        let weak = forward(&sys, &[0.001], &[], 30.0).unwrap();
        let strong = forward(&sys, &[0.01], &[], 30.0).unwrap();
        // At the lowest frequency the induction number is small and the
        // quadrature scales close to linearly with conductivity.
        assert!(strong[0].im > 5.0 * weak[0].im);
    }

    #[test]
    fn test_sensitivity_matches_finite_differences() {
        let sys = five_frequency_system();
        let sigma = [0.005, 0.05, 0.02];
        let thk = [15.0, 40.0];
        let height = 30.0;

        let analytic = sensitivity(&sys, &sigma, &thk, height).unwrap();
        let base = forward(&sys, &sigma, &thk, height).unwrap();

        for k in 0..sigma.len() {
            let h = sigma[k] * 1e-6;
            let mut bumped = sigma;
            bumped[k] += h;
            let plus = forward(&sys, &bumped, &thk, height).unwrap();
            for i in 0..sys.n_frequencies() {
                let fd = (plus[i] - base[i]) / h;
                let an = analytic[i][k];
                let scale = an.norm().max(fd.norm()).max(1e-8);
                assert!(
                    (an - fd).norm() / scale < 1e-3,
                    "freq {i} layer {k}: analytic {an}, finite difference {fd}"
                );
            }
        }
    }

    #[test]
    fn test_deep_layer_has_weaker_sensitivity() {
        let sys = five_frequency_system();
        let sigma = [0.01, 0.01, 0.01];
        let thk = [20.0, 200.0];
        let j = sensitivity(&sys, &sigma, &thk, 30.0).unwrap();
        // Highest frequency barely sees below 200 m of overburden.
        let i = 4;
        assert!(
            j[i][2].norm() < j[i][0].norm(),
            "basement sensitivity should be weakest at high frequency"
        );
    }

    #[test]
    fn test_thin_buried_layer_perturbs_response() {
        let sys = five_frequency_system();
        let uniform = forward(&sys, &[0.01], &[], 30.0).unwrap();
        let layered = forward(&sys, &[0.01, 0.5, 0.01], &[20.0, 10.0], 30.0).unwrap();
        let delta: f64 = uniform
            .iter()
            .zip(&layered)
            .map(|(a, b)| (a - b).norm())
            .sum();
        assert!(delta > 1.0, "buried conductor should be visible: {delta}");
    }
}
