//! Goodness-of-fit and parameter uncertainty.

use nalgebra::DMatrix;
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Coefficient of determination `1 − RSS/TSS`.
///
/// Pairs with a non-finite member are dropped first. A constant observed
/// signal has no variance to explain: the result is 1 when the residuals
/// are zero too, NaN otherwise.
pub fn r_squared(y: &[f64], y_hat: &[f64]) -> f64 {
    let pairs: Vec<(f64, f64)> = y
        .iter()
        .zip(y_hat.iter())
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .map(|(&a, &b)| (a, b))
        .collect();
    if pairs.is_empty() {
        return f64::NAN;
    }
    let mean = pairs.iter().map(|(a, _)| a).sum::<f64>() / pairs.len() as f64;
    let rss: f64 = pairs.iter().map(|(a, b)| (a - b) * (a - b)).sum();
    let tss: f64 = pairs.iter().map(|(a, _)| (a - mean) * (a - mean)).sum();
    if tss == 0.0 {
        return if rss == 0.0 { 1.0 } else { f64::NAN };
    }
    1.0 - rss / tss
}

/// Standard errors `√diag(cov)`; negative or non-finite variances give NaN.
pub fn std_errors(covariance: &DMatrix<f64>) -> Vec<f64> {
    (0..covariance.nrows())
        .map(|k| {
            let var = covariance[(k, k)];
            if var.is_finite() && var >= 0.0 {
                var.sqrt()
            } else {
                f64::NAN
            }
        })
        .collect()
}

/// 95 % confidence half-widths `t(0.975, n−p) · √var_kk`.
///
/// With no residual degrees of freedom, or an infinite variance, the
/// half-width is NaN.
pub fn confidence_intervals(covariance: &DMatrix<f64>, n_points: usize) -> Vec<f64> {
    let p = covariance.nrows();
    let df = n_points.saturating_sub(p);
    if df == 0 {
        return vec![f64::NAN; p];
    }
    let t = StudentsT::new(0.0, 1.0, df as f64)
        .unwrap()
        .inverse_cdf(0.975);
    std_errors(covariance).iter().map(|se| t * se).collect()
}
