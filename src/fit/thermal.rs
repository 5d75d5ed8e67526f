//! Melting-curve analysis: Boltzmann and Thompson fits, derivative Tm.

use super::nlls::FitOptions;
use super::smooth::{cubic_spline, moving_parabola_derivative, savitzky_golay};
use super::{fit_model, FitOutcome, Model};
use serde::{Deserialize, Serialize};

/// Points skipped at each end when scanning for turning points.
const TURNING_POINT_MARGIN: usize = 10;

/// Keep every n-th point of the trimmed transition.
const SUBSAMPLE_STEP: usize = 3;

/// Minimum points a Boltzmann fit needs after trimming and sub-sampling.
const MIN_BOLTZMANN_POINTS: usize = 15;

/// Smoothing window applied to long derivative traces.
const SAVGOL_WINDOW: usize = 99;

/// Polynomial order of the derivative smoother.
const SAVGOL_ORDER: usize = 3;

/// Gas constant, J·mol⁻¹·K⁻¹.
const R_GAS: f64 = 8.314;

const KELVIN_OFFSET: f64 = 273.15;

/// `y = LL + (UL − LL) / (1 + exp((Tm − T)/a))`.
pub fn boltzmann(t: f64, ll: f64, ul: f64, tm: f64, a: f64) -> f64 {
    ll + (ul - ll) / (1.0 + ((tm - t) / a).exp())
}

/// Boltzmann melt with the upper baseline pinned to the observed maximum;
/// free parameters `[ll, tm, a]`.
pub struct BoltzmannModel {
    pub ul: f64,
}

impl Model for BoltzmannModel {
    fn n_params(&self) -> usize {
        3
    }

    fn names(&self) -> Vec<String> {
        ["ll", "tm", "a"].iter().map(|s| s.to_string()).collect()
    }

    fn eval(&self, t: f64, pars: &[f64]) -> f64 {
        boltzmann(t, pars[0], self.ul, pars[1], pars[2])
    }

    fn initial_guess(&self, xs: &[f64], ys: &[f64]) -> Vec<f64> {
        let ll = ys.iter().copied().fold(f64::INFINITY, f64::min);
        // Tm starts at the temperature closest to half amplitude.
        let mid = (ll + self.ul) / 2.0;
        let tm = xs
            .iter()
            .zip(ys.iter())
            .min_by(|(_, a), (_, b)| {
                (*a - mid).abs().partial_cmp(&(*b - mid).abs()).unwrap()
            })
            .map(|(&x, _)| x)
            .unwrap_or(0.0);
        vec![ll, tm, 2.0]
    }
}

/// Trim a melt trace to its unfolding transition.
///
/// The transition runs from the last pre-transition minimum up to the first
/// fluorescence maximum; the scan ignores the outermost points, where edge
/// noise routinely fakes extrema.
fn trim_transition(ys: &[f64]) -> (usize, usize) {
    let n = ys.len();
    let margin = if n > 2 * (TURNING_POINT_MARGIN + 1) {
        TURNING_POINT_MARGIN
    } else {
        0
    };
    let lo = margin;
    let hi = n - margin;

    let mut i_max = lo;
    for i in lo..hi {
        if ys[i] > ys[i_max] {
            i_max = i;
        }
    }
    let mut i_min = lo;
    for i in lo..=i_max {
        if ys[i] <= ys[i_min] {
            i_min = i;
        }
    }
    (i_min, i_max)
}

/// Boltzmann Tm fit.
///
/// The trace is trimmed to its transition, sub-sampled, and refused when
/// fewer than 15 points remain. The upper baseline is fixed to the observed
/// maximum; its confidence slot is zero. Parameters come back in equation
/// order `[ll, ul, tm, a]`, the curve over the full input grid.
pub fn fit_boltzmann(temps: &[f64], ys: &[f64]) -> FitOutcome {
    let n_all = temps.len();
    if ys.len() != n_all || n_all == 0 {
        return FitOutcome::failure(n_all, 4);
    }

    let (i_min, i_max) = trim_transition(ys);
    let mut tx = Vec::new();
    let mut ty = Vec::new();
    let mut i = i_min;
    while i <= i_max {
        if temps[i].is_finite() && ys[i].is_finite() {
            tx.push(temps[i]);
            ty.push(ys[i]);
        }
        i += SUBSAMPLE_STEP;
    }
    if tx.len() < MIN_BOLTZMANN_POINTS {
        return FitOutcome::failure(n_all, 4);
    }

    let ul = ty.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let model = BoltzmannModel { ul };
    let trimmed = fit_model(&model, &tx, &ty, &FitOptions::default());
    if !trimmed.do_fit {
        return FitOutcome::failure(n_all, 4);
    }

    let pars = vec![trimmed.pars[0], ul, trimmed.pars[1], trimmed.pars[2]];
    let curve = temps
        .iter()
        .map(|&t| {
            let y = boltzmann(t, pars[0], pars[1], pars[2], pars[3]);
            if y.is_finite() {
                y
            } else {
                f64::NAN
            }
        })
        .collect();
    FitOutcome {
        curve,
        pars,
        ci: vec![trimmed.ci[0], 0.0, trimmed.ci[1], trimmed.ci[2]],
        stderr: vec![trimmed.stderr[0], 0.0, trimmed.stderr[1], trimmed.stderr[2]],
        r_squared: trimmed.r_squared,
        do_fit: true,
    }
}

/// Which extremum of the derivative trace marks the melting temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Peak {
    Max,
    Min,
    /// Largest magnitude of either sign.
    AbsMax,
}

/// Result of derivative melting-point analysis.
#[derive(Debug, Clone)]
pub struct TmFit {
    /// Smoothed first derivative on the original temperature grid.
    pub derivative: Vec<f64>,
    pub tm: f64,
    pub do_fit: bool,
}

impl TmFit {
    fn failure(n: usize) -> Self {
        Self {
            derivative: vec![f64::NAN; n],
            tm: f64::NAN,
            do_fit: false,
        }
    }

    /// Record form: the derivative trace as the curve, `[tm]` as the
    /// parameter vector.
    pub fn into_outcome(self) -> FitOutcome {
        FitOutcome {
            curve: self.derivative,
            pars: vec![self.tm],
            ci: vec![f64::NAN],
            stderr: vec![f64::NAN],
            r_squared: f64::NAN,
            do_fit: self.do_fit,
        }
    }
}

/// Derivative Tm: moving-parabola derivative, Savitzky–Golay smoothing for
/// long traces, cubic spline back onto the original grid, then the selected
/// extremum. A trace whose extremum lands on the grid edge is monotone and
/// carries no transition; the fit is refused.
pub fn fit_derivative_tm(temps: &[f64], ys: &[f64], peak: Peak) -> TmFit {
    let n = temps.len();
    if ys.len() != n || n == 0 {
        return TmFit::failure(n);
    }

    let (dx, dy) = match moving_parabola_derivative(temps, ys) {
        Ok(pair) => pair,
        Err(_) => return TmFit::failure(n),
    };
    let dy = if dy.len() > 100 {
        match savitzky_golay(&dy, SAVGOL_WINDOW, SAVGOL_ORDER) {
            Ok(smoothed) => smoothed,
            Err(_) => return TmFit::failure(n),
        }
    } else {
        dy
    };
    let derivative = match cubic_spline(&dx, &dy, temps) {
        Ok(values) => values,
        Err(_) => return TmFit::failure(n),
    };

    let mut idx = 0;
    for (i, &v) in derivative.iter().enumerate() {
        let better = match peak {
            Peak::Max => v > derivative[idx],
            Peak::Min => v < derivative[idx],
            Peak::AbsMax => v.abs() > derivative[idx].abs(),
        };
        if better {
            idx = i;
        }
    }
    if idx == 0 || idx == n - 1 {
        return TmFit {
            derivative,
            tm: f64::NAN,
            do_fit: false,
        };
    }
    TmFit {
        derivative,
        tm: temps[idx],
        do_fit: true,
    }
}

/// Thompson unfolding: folded and unfolded linear baselines joined by a
/// van 't Hoff transition. Parameters `[yf, mf, yu, mu, dh, tm]` with `dh`
/// in kJ/mol and temperatures in °C.
pub fn thompson(t: f64, yf: f64, mf: f64, yu: f64, mu: f64, dh: f64, tm: f64) -> f64 {
    let t_k = t + KELVIN_OFFSET;
    let tm_k = tm + KELVIN_OFFSET;
    let k = ((dh * 1000.0 / R_GAS) * (1.0 / tm_k - 1.0 / t_k)).exp();
    let folded = yf + mf * t;
    let unfolded = yu + mu * t;
    folded + (unfolded - folded) * k / (1.0 + k)
}

/// The Thompson model: `[yf, mf, yu, mu, dh, tm]`.
pub struct ThompsonModel;

impl Model for ThompsonModel {
    fn n_params(&self) -> usize {
        6
    }

    fn names(&self) -> Vec<String> {
        ["yf", "mf", "yu", "mu", "dh", "tm"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    fn eval(&self, t: f64, pars: &[f64]) -> f64 {
        thompson(t, pars[0], pars[1], pars[2], pars[3], pars[4], pars[5])
    }

    fn initial_guess(&self, xs: &[f64], ys: &[f64]) -> Vec<f64> {
        let yf = ys.first().copied().unwrap_or(0.0);
        let yu = ys.last().copied().unwrap_or(1.0);
        let mid = (yf + yu) / 2.0;
        let tm = xs
            .iter()
            .zip(ys.iter())
            .min_by(|(_, a), (_, b)| {
                (*a - mid).abs().partial_cmp(&(*b - mid).abs()).unwrap()
            })
            .map(|(&x, _)| x)
            .unwrap_or(50.0);
        vec![yf, 0.0, yu, 0.0, 300.0, tm]
    }
}

/// Fit the Thompson unfolding model over the full trace.
pub fn fit_thompson(temps: &[f64], ys: &[f64]) -> FitOutcome {
    let outcome = fit_model(&ThompsonModel, temps, ys, &FitOptions::default());
    if outcome.do_fit {
        outcome
    } else {
        FitOutcome::failure(temps.len(), 6)
    }
}
