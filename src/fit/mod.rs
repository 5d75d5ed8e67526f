//! Curve fitting for plate-based assays.
//!
//! Every model implements [`Model`]; [`fit_model`] runs the damped
//! least-squares engine and packages the result as a [`FitOutcome`].
//! Named models also expose `fit_*` wrappers carrying their pre-processing
//! (trimming, sub-sampling, windowing) so callers never re-implement it.
//!
//! A fit never panics and never aborts a batch: failure comes back as an
//! outcome with NaN fields and `do_fit = false`.

pub mod custom;
mod kinetic;
mod metrics;
mod nlls;
mod sigmoid;
mod smooth;
mod thermal;

pub use custom::{compile_equation, CompiledEquation};
pub use kinetic::{
    fit_linear_rate, fit_log_mm, fit_one_phase, fit_reaction_progress, linear, log_mm, one_phase,
    reaction_progress, LogMmModel, RateFit,
};
pub use metrics::{confidence_intervals, r_squared, std_errors};
pub use nlls::{fit_least_squares, FitOptions, LsqFit};
pub use sigmoid::{fit_sigmoid_constrained, fit_sigmoid_free, sigmoid4, Sigmoid4Model};
pub use smooth::{cubic_spline, moving_parabola_derivative, savitzky_golay};
pub use thermal::{
    boltzmann, fit_boltzmann, fit_derivative_tm, fit_thompson, thompson, BoltzmannModel, Peak,
    ThompsonModel, TmFit,
};

use serde::{Deserialize, Serialize};

/// A parametric curve `y = f(x; pars)`.
pub trait Model: Sync {
    /// Number of free parameters.
    fn n_params(&self) -> usize;

    /// Parameter names, in order.
    fn names(&self) -> Vec<String>;

    /// Evaluate the curve at one point.
    fn eval(&self, x: f64, pars: &[f64]) -> f64;

    /// Starting parameters derived from the data.
    fn initial_guess(&self, xs: &[f64], ys: &[f64]) -> Vec<f64>;
}

/// Result of one fit, in record form.
///
/// `curve` holds the fitted values at the x points the fit was asked about
/// (including points excluded from the fit itself). On failure every numeric
/// field is NaN and `do_fit` is false; the record persists either way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitOutcome {
    pub curve: Vec<f64>,
    pub pars: Vec<f64>,
    /// 95 % confidence half-widths, one per parameter.
    pub ci: Vec<f64>,
    pub stderr: Vec<f64>,
    pub r_squared: f64,
    pub do_fit: bool,
}

impl FitOutcome {
    /// The failure record: NaN everywhere, `do_fit = false`.
    pub fn failure(n_points: usize, n_params: usize) -> Self {
        Self {
            curve: vec![f64::NAN; n_points],
            pars: vec![f64::NAN; n_params],
            ci: vec![f64::NAN; n_params],
            stderr: vec![f64::NAN; n_params],
            r_squared: f64::NAN,
            do_fit: false,
        }
    }
}

/// Evaluate a model over `xs`; non-finite values come back as NaN.
pub fn draw<M: Model + ?Sized>(model: &M, xs: &[f64], pars: &[f64]) -> Vec<f64> {
    xs.iter()
        .map(|&x| {
            let y = model.eval(x, pars);
            if y.is_finite() {
                y
            } else {
                f64::NAN
            }
        })
        .collect()
}

/// Fit a model to `(xs, ys)` and package the result.
///
/// Non-finite pairs are dropped before fitting; the returned curve is still
/// evaluated at every input x, so masked points stay plotted. Fewer finite
/// points than parameters, or a non-converging fit, yields the failure
/// outcome instead of an error.
pub fn fit_model<M: Model + ?Sized>(
    model: &M,
    xs: &[f64],
    ys: &[f64],
    options: &FitOptions,
) -> FitOutcome {
    let n_params = model.n_params();
    if xs.len() != ys.len() {
        return FitOutcome::failure(xs.len(), n_params);
    }
    if let Some(sigma) = &options.sigma {
        if sigma.len() != ys.len() {
            return FitOutcome::failure(xs.len(), n_params);
        }
    }
    let mut xf = Vec::with_capacity(xs.len());
    let mut yf = Vec::with_capacity(ys.len());
    let mut sf = options.sigma.as_ref().map(|_| Vec::with_capacity(ys.len()));
    for (i, (&x, &y)) in xs.iter().zip(ys.iter()).enumerate() {
        if x.is_finite() && y.is_finite() {
            xf.push(x);
            yf.push(y);
            if let (Some(kept), Some(sigma)) = (sf.as_mut(), options.sigma.as_ref()) {
                kept.push(sigma[i]);
            }
        }
    }
    if xf.len() < n_params {
        return FitOutcome::failure(xs.len(), n_params);
    }

    let mut filtered = options.clone();
    filtered.sigma = sf;
    let init = model.initial_guess(&xf, &yf);
    let lsq = match fit_least_squares(model, &xf, &yf, &init, &filtered) {
        Ok(lsq) if lsq.converged => lsq,
        _ => return FitOutcome::failure(xs.len(), n_params),
    };

    let curve = draw(model, xs, &lsq.pars);
    let fitted = draw(model, &xf, &lsq.pars);
    let (ci, stderr) = match &lsq.covariance {
        Some(cov) => (
            confidence_intervals(cov, lsq.n_points),
            std_errors(cov),
        ),
        None => (vec![f64::NAN; n_params], vec![f64::NAN; n_params]),
    };

    FitOutcome {
        curve,
        pars: lsq.pars,
        ci,
        stderr,
        r_squared: r_squared(&yf, &fitted),
        do_fit: true,
    }
}

/// Fit any model, optionally restricted to an x window.
///
/// The window keeps points with `start <= x <= stop` (applied before the
/// finite-pair filter). This is the entry point for compiled custom
/// equations, whose parameter count comes from the declared list.
pub fn fit_any<M: Model + ?Sized>(
    model: &M,
    xs: &[f64],
    ys: &[f64],
    window: Option<(f64, f64)>,
) -> FitOutcome {
    match window {
        None => fit_model(model, xs, ys, &FitOptions::default()),
        Some((start, stop)) => {
            let masked: Vec<f64> = xs
                .iter()
                .zip(ys.iter())
                .map(|(&x, &y)| if x >= start && x <= stop { y } else { f64::NAN })
                .collect();
            fit_model(model, xs, &masked, &FitOptions::default())
        }
    }
}
