//! Damped nonlinear least squares (Levenberg–Marquardt).
//!
//! Small-problem engine: a handful of parameters, tens to hundreds of
//! points. The Jacobian is numeric (forward differences), box constraints
//! are enforced by projection, and per-point sigmas weight the residuals.
//! Non-convergence is reported in the result, never raised.

use super::Model;
use crate::error::{AssayError, Result};
use nalgebra::{DMatrix, DVector};

/// Maximum outer iterations.
const MAX_ITER: usize = 200;

/// Convergence tolerance on the relative step and relative cost change.
const TOL: f64 = 1e-9;

/// Relative forward-difference step for the numeric Jacobian.
const JAC_STEP: f64 = 1e-7;

/// Initial damping factor.
const LAMBDA_INIT: f64 = 1e-3;

/// Damping ceiling; beyond this the step search has stalled.
const LAMBDA_MAX: f64 = 1e12;

/// Options for one least-squares run.
#[derive(Debug, Clone, Default)]
pub struct FitOptions {
    /// Per-parameter lower bounds; absent means unbounded.
    pub lower: Option<Vec<f64>>,
    /// Per-parameter upper bounds; absent means unbounded.
    pub upper: Option<Vec<f64>>,
    /// Per-point standard deviations; residuals are scaled by `1/sigma`.
    pub sigma: Option<Vec<f64>>,
}

impl FitOptions {
    /// Box-constrained options.
    pub fn bounded(lower: Vec<f64>, upper: Vec<f64>) -> Self {
        Self {
            lower: Some(lower),
            upper: Some(upper),
            sigma: None,
        }
    }
}

/// Raw engine result.
#[derive(Debug, Clone)]
pub struct LsqFit {
    /// Best parameters found.
    pub pars: Vec<f64>,
    /// Scaled parameter covariance `(JᵀJ)⁻¹·s²`; `None` when singular.
    pub covariance: Option<DMatrix<f64>>,
    /// Weighted residual sum of squares at the solution.
    pub rss: f64,
    /// Points used.
    pub n_points: usize,
    pub iterations: usize,
    pub converged: bool,
}

fn clamp_params(pars: &mut [f64], options: &FitOptions) {
    if let Some(lower) = &options.lower {
        for (p, &lo) in pars.iter_mut().zip(lower.iter()) {
            if *p < lo {
                *p = lo;
            }
        }
    }
    if let Some(upper) = &options.upper {
        for (p, &hi) in pars.iter_mut().zip(upper.iter()) {
            if *p > hi {
                *p = hi;
            }
        }
    }
}

/// Weighted residuals `(f(x;β) − y) / σ` and their squared sum.
fn residuals<M: Model + ?Sized>(
    model: &M,
    xs: &[f64],
    ys: &[f64],
    weights: &[f64],
    pars: &[f64],
) -> (DVector<f64>, f64) {
    let r = DVector::from_iterator(
        xs.len(),
        xs.iter()
            .zip(ys.iter())
            .zip(weights.iter())
            .map(|((&x, &y), &w)| (model.eval(x, pars) - y) * w),
    );
    let cost = r.iter().map(|v| v * v).sum();
    (r, cost)
}

/// Forward-difference Jacobian of the weighted residuals.
fn jacobian<M: Model + ?Sized>(
    model: &M,
    xs: &[f64],
    weights: &[f64],
    pars: &[f64],
    base: &DVector<f64>,
    ys: &[f64],
) -> DMatrix<f64> {
    let m = xs.len();
    let p = pars.len();
    let mut j = DMatrix::zeros(m, p);
    let mut bumped = pars.to_vec();
    for k in 0..p {
        let h = JAC_STEP * pars[k].abs().max(1.0);
        bumped[k] = pars[k] + h;
        for i in 0..m {
            let r = (model.eval(xs[i], &bumped) - ys[i]) * weights[i];
            j[(i, k)] = (r - base[i]) / h;
        }
        bumped[k] = pars[k];
    }
    j
}

/// Run Levenberg–Marquardt from `init`.
///
/// Errors only on malformed input (length mismatches, non-positive sigma);
/// a fit that stalls or fails to converge comes back with
/// `converged = false` so callers can turn it into a failure record.
pub fn fit_least_squares<M: Model + ?Sized>(
    model: &M,
    xs: &[f64],
    ys: &[f64],
    init: &[f64],
    options: &FitOptions,
) -> Result<LsqFit> {
    let m = xs.len();
    let p = model.n_params();
    if ys.len() != m {
        return Err(AssayError::InvalidParameter(format!(
            "x/y length mismatch: {} vs {}",
            m,
            ys.len()
        )));
    }
    if init.len() != p {
        return Err(AssayError::InvalidParameter(format!(
            "initial guess has {} parameters, model takes {}",
            init.len(),
            p
        )));
    }
    if let Some(bounds) = options.lower.as_ref().or(options.upper.as_ref()) {
        if bounds.len() != p {
            return Err(AssayError::InvalidParameter(
                "bounds length does not match parameter count".to_string(),
            ));
        }
    }
    let weights: Vec<f64> = match &options.sigma {
        Some(sigma) => {
            if sigma.len() != m {
                return Err(AssayError::InvalidParameter(
                    "sigma length does not match point count".to_string(),
                ));
            }
            if sigma.iter().any(|&s| !(s > 0.0)) {
                return Err(AssayError::InvalidParameter(
                    "sigma values must be positive".to_string(),
                ));
            }
            sigma.iter().map(|s| 1.0 / s).collect()
        }
        None => vec![1.0; m],
    };

    let mut beta = init.to_vec();
    clamp_params(&mut beta, options);

    let (mut r, mut cost) = residuals(model, xs, ys, &weights, &beta);
    let mut lambda = LAMBDA_INIT;
    let mut converged = false;
    let mut iterations = 0;

    for iter in 0..MAX_ITER {
        iterations = iter + 1;

        let j = jacobian(model, xs, &weights, &beta, &r, ys);
        let jtj = j.transpose() * &j;
        let jtr = j.transpose() * &r;

        // Inner damping search: raise lambda until a step lowers the cost.
        let mut accepted = false;
        while lambda <= LAMBDA_MAX {
            let mut damped = jtj.clone();
            for k in 0..p {
                damped[(k, k)] += lambda * jtj[(k, k)].max(1e-12);
            }
            let step = match damped.try_inverse() {
                Some(inv) => inv * &jtr,
                None => {
                    lambda *= 10.0;
                    continue;
                }
            };

            let mut candidate = beta.clone();
            for k in 0..p {
                candidate[k] -= step[k];
            }
            clamp_params(&mut candidate, options);

            let (r_new, cost_new) = residuals(model, xs, ys, &weights, &candidate);
            if cost_new.is_finite() && cost_new < cost {
                let step_norm: f64 = beta
                    .iter()
                    .zip(candidate.iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f64>()
                    .sqrt();
                let scale: f64 = beta.iter().map(|b| b * b).sum::<f64>().sqrt().max(1.0);
                let cost_drop = (cost - cost_new) / cost.max(1e-300);

                beta = candidate;
                r = r_new;
                cost = cost_new;
                lambda = (lambda * 0.1).max(1e-12);
                accepted = true;

                if step_norm / scale < TOL || cost_drop < TOL {
                    converged = true;
                }
                break;
            }
            lambda *= 10.0;
        }

        if !accepted {
            // Stationary under maximal damping: at a minimum already if the
            // gradient is tiny, otherwise stalled.
            let grad_norm = jtr.iter().map(|v| v.abs()).fold(0.0_f64, f64::max);
            converged = grad_norm < 1e-8 * cost.max(1.0);
            break;
        }
        if converged {
            break;
        }
    }

    let covariance = if cost.is_finite() {
        let (r_final, _) = residuals(model, xs, ys, &weights, &beta);
        let j = jacobian(model, xs, &weights, &beta, &r_final, ys);
        let jtj = j.transpose() * &j;
        jtj.try_inverse().map(|inv| {
            let dof = m.saturating_sub(p);
            let s2 = if dof > 0 { cost / dof as f64 } else { f64::NAN };
            inv * s2
        })
    } else {
        None
    };

    Ok(LsqFit {
        pars: beta,
        covariance,
        rss: cost,
        n_points: m,
        iterations,
        converged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct Exponential;

    impl Model for Exponential {
        fn n_params(&self) -> usize {
            2
        }

        fn names(&self) -> Vec<String> {
            vec!["a".to_string(), "k".to_string()]
        }

        fn eval(&self, x: f64, pars: &[f64]) -> f64 {
            pars[0] * (-pars[1] * x).exp()
        }

        fn initial_guess(&self, _xs: &[f64], ys: &[f64]) -> Vec<f64> {
            vec![ys.first().copied().unwrap_or(1.0), 0.1]
        }
    }

    fn exp_data() -> (Vec<f64>, Vec<f64>) {
        let xs: Vec<f64> = (0..25).map(|i| i as f64 * 0.4).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 5.0 * (-0.7 * x).exp()).collect();
        (xs, ys)
    }

    #[test]
    fn test_converges_on_exponential() {
        let (xs, ys) = exp_data();
        let init = Exponential.initial_guess(&xs, &ys);
        let fit = fit_least_squares(&Exponential, &xs, &ys, &init, &FitOptions::default())
            .unwrap();
        assert!(fit.converged);
        assert_relative_eq!(fit.pars[0], 5.0, epsilon = 1e-5);
        assert_relative_eq!(fit.pars[1], 0.7, epsilon = 1e-5);
        assert!(fit.rss < 1e-10);
    }

    #[test]
    fn test_bounds_are_respected() {
        let (xs, ys) = exp_data();
        let options = FitOptions::bounded(vec![0.0, 1.0], vec![10.0, 5.0]);
        let fit = fit_least_squares(&Exponential, &xs, &ys, &[5.0, 2.0], &options).unwrap();
        // True k = 0.7 sits below the box; the solution pins to the bound.
        assert!(fit.pars[1] >= 1.0 - 1e-12);
    }

    #[test]
    fn test_sigma_weighting() {
        let xs: Vec<f64> = vec![0.0, 1.0, 2.0, 3.0];
        let mut ys: Vec<f64> = xs.iter().map(|x| 5.0 * (-0.5 * x).exp()).collect();
        ys[3] = 40.0;
        // Last point effectively ignored under a huge sigma.
        let options = FitOptions {
            sigma: Some(vec![1.0, 1.0, 1.0, 1e6]),
            ..FitOptions::default()
        };
        let fit = fit_least_squares(&Exponential, &xs, &ys, &[4.0, 0.3], &options).unwrap();
        assert!(fit.converged);
        assert_relative_eq!(fit.pars[1], 0.5, epsilon = 1e-4);
    }

    #[test]
    fn test_length_mismatch_is_an_error() {
        let result = fit_least_squares(
            &Exponential,
            &[1.0, 2.0],
            &[1.0],
            &[1.0, 1.0],
            &FitOptions::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_bad_sigma_is_an_error() {
        let options = FitOptions {
            sigma: Some(vec![1.0, 0.0]),
            ..FitOptions::default()
        };
        let result =
            fit_least_squares(&Exponential, &[1.0, 2.0], &[1.0, 0.5], &[1.0, 1.0], &options);
        assert!(result.is_err());
    }

    #[test]
    fn test_covariance_has_parameter_shape() {
        let (xs, ys) = exp_data();
        let fit =
            fit_least_squares(&Exponential, &xs, &ys, &[4.0, 0.5], &FitOptions::default())
                .unwrap();
        let cov = fit.covariance.unwrap();
        assert_eq!(cov.nrows(), 2);
        assert_eq!(cov.ncols(), 2);
    }
}
