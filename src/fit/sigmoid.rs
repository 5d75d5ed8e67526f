//! Four-parameter dose–response (Hill) curves.
//!
//! Doses arrive in Molar and are converted to micromolar before fitting, so
//! the inflection parameter reads directly in µM.

use super::nlls::FitOptions;
use super::{fit_model, FitOutcome, Model};
use crate::process::moles_to_micromoles;

/// Sigma floor substituted for zero or missing per-point errors.
const SIGMA_FLOOR: f64 = 0.01;

/// `y = ybot + (ytop − ybot) / (1 + (i/x)^h)` with `x` in µM.
pub fn sigmoid4(x: f64, ybot: f64, ytop: f64, inflection: f64, hill: f64) -> f64 {
    ybot + (ytop - ybot) / (1.0 + (inflection / x).powf(hill))
}

/// The four-parameter logistic model: `[ybot, ytop, inflection, hill]`.
pub struct Sigmoid4Model;

impl Model for Sigmoid4Model {
    fn n_params(&self) -> usize {
        4
    }

    fn names(&self) -> Vec<String> {
        ["ybot", "ytop", "inflection", "hill"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn eval(&self, x: f64, pars: &[f64]) -> f64 {
        sigmoid4(x, pars[0], pars[1], pars[2], pars[3])
    }

    fn initial_guess(&self, xs: &[f64], ys: &[f64]) -> Vec<f64> {
        let ybot = ys.iter().copied().fold(f64::INFINITY, f64::min);
        let ytop = ys.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        // Geometric mid-dose; doses are positive after unit conversion.
        let logs: Vec<f64> = xs.iter().filter(|&&x| x > 0.0).map(|x| x.log10()).collect();
        let inflection = if logs.is_empty() {
            1.0
        } else {
            10f64.powf(logs.iter().sum::<f64>() / logs.len() as f64)
        };
        vec![ybot, ytop, inflection, 1.0]
    }
}

/// Unconstrained four-parameter fit. `doses` in Molar.
pub fn fit_sigmoid_free(doses: &[f64], ys: &[f64]) -> FitOutcome {
    let xs: Vec<f64> = doses.iter().map(|&d| moles_to_micromoles(d)).collect();
    fit_model(&Sigmoid4Model, &xs, ys, &FitOptions::default())
}

/// Constrained fit for responses already normalised to 0–100 %:
/// `ytop ∈ [90, 110]`, `ybot ∈ [−10, 10]`, per-point sigma required
/// (zeros and missing values replaced by a small floor).
pub fn fit_sigmoid_constrained(doses: &[f64], ys: &[f64], sems: &[f64]) -> FitOutcome {
    let xs: Vec<f64> = doses.iter().map(|&d| moles_to_micromoles(d)).collect();
    let sigma: Vec<f64> = sems
        .iter()
        .map(|&s| if s.is_finite() && s > 0.0 { s } else { SIGMA_FLOOR })
        .collect();
    let options = FitOptions {
        lower: Some(vec![-10.0, 90.0, f64::NEG_INFINITY, f64::NEG_INFINITY]),
        upper: Some(vec![10.0, 110.0, f64::INFINITY, f64::INFINITY]),
        sigma: Some(sigma),
    };
    fit_model(&Sigmoid4Model, &xs, ys, &options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Ten 2-fold dilutions from 200 µM, in Molar.
    fn dilution_series() -> Vec<f64> {
        (0..10).map(|i| 2e-4 / 2f64.powi(i)).collect()
    }

    fn responses(doses: &[f64], ybot: f64, ytop: f64, i_um: f64, h: f64) -> Vec<f64> {
        doses
            .iter()
            .map(|&d| sigmoid4(moles_to_micromoles(d), ybot, ytop, i_um, h))
            .collect()
    }

    #[test]
    fn test_free_fit_recovers_parameters() {
        let doses = dilution_series();
        let ys = responses(&doses, 0.0, 100.0, 12.5, 1.2);
        let outcome = fit_sigmoid_free(&doses, &ys);
        assert!(outcome.do_fit);
        assert_relative_eq!(outcome.pars[0], 0.0, epsilon = 1e-3);
        assert_relative_eq!(outcome.pars[1], 100.0, epsilon = 1e-3);
        assert_relative_eq!(outcome.pars[2], 12.5, epsilon = 1e-2);
        assert_relative_eq!(outcome.pars[3], 1.2, epsilon = 1e-3);
        assert!(outcome.r_squared > 0.999);
    }

    #[test]
    fn test_inflection_reads_in_micromolar() {
        let doses = dilution_series();
        let ys = responses(&doses, 0.0, 100.0, 5.0, 1.0);
        let outcome = fit_sigmoid_free(&doses, &ys);
        // 5 µM, not 5e-6 M.
        assert_relative_eq!(outcome.pars[2], 5.0, epsilon = 1e-2);
    }

    #[test]
    fn test_constrained_fit_clamps_bottom() {
        let doses = dilution_series();
        // True bottom far below the allowed box.
        let ys = responses(&doses, -30.0, 100.0, 12.5, 1.0);
        let sems = vec![1.0; doses.len()];
        let outcome = fit_sigmoid_constrained(&doses, &ys, &sems);
        assert!(outcome.do_fit);
        assert!(outcome.pars[0] >= -10.0 - 1e-9);
        assert!(outcome.pars[1] <= 110.0 + 1e-9);
    }

    #[test]
    fn test_constrained_fit_replaces_zero_sigma() {
        let doses = dilution_series();
        let ys = responses(&doses, 0.0, 100.0, 12.5, 1.0);
        let sems = vec![0.0; doses.len()];
        let outcome = fit_sigmoid_constrained(&doses, &ys, &sems);
        assert!(outcome.do_fit);
        assert_relative_eq!(outcome.pars[2], 12.5, epsilon = 1e-2);
    }

    #[test]
    fn test_too_few_points_fails_cleanly() {
        let outcome = fit_sigmoid_free(&[1e-6, 1e-7], &[90.0, 10.0]);
        assert!(!outcome.do_fit);
        assert!(outcome.r_squared.is_nan());
        assert_eq!(outcome.curve.len(), 2);
    }
}
