//! Kinetic traces: log-approximated Michaelis–Menten progress, initial-rate
//! windows, single-exponential association, and reaction progress.

use super::nlls::FitOptions;
use super::{fit_model, FitOutcome, Model};

/// Progress data beyond this time is dropped before the log-MM fit; late
/// points are substrate-depleted and bend away from the approximation.
const MAX_TIME: f64 = 110.0;

/// Fraction of the initial slope a point must keep to stay in the
/// automatic rate window.
const RATE_THRESHOLD: f64 = 0.7;

/// Minimum points for a rate fit.
const MIN_RATE_POINTS: usize = 3;

/// `y = y0 + b·ln(1 + t/t0)`.
pub fn log_mm(t: f64, y0: f64, b: f64, t0: f64) -> f64 {
    y0 + b * (1.0 + t / t0).ln()
}

/// Log-approximated Michaelis–Menten progress curve: `[y0, b, t0]`.
pub struct LogMmModel;

impl Model for LogMmModel {
    fn n_params(&self) -> usize {
        3
    }

    fn names(&self) -> Vec<String> {
        ["y0", "b", "t0"].iter().map(|s| s.to_string()).collect()
    }

    fn eval(&self, t: f64, pars: &[f64]) -> f64 {
        log_mm(t, pars[0], pars[1], pars[2])
    }

    fn initial_guess(&self, xs: &[f64], ys: &[f64]) -> Vec<f64> {
        let y0 = ys.first().copied().unwrap_or(0.0);
        let y_end = ys.last().copied().unwrap_or(1.0);
        let t_end = xs.last().copied().unwrap_or(1.0).max(1.0);
        let t0 = (t_end / 10.0).max(1e-3);
        let b = (y_end - y0) / (1.0 + t_end / t0).ln();
        vec![y0, b, t0]
    }
}

/// Fit the log-MM progress curve; data past `t = 110` is excluded from the
/// fit but the returned curve still spans every input time.
pub fn fit_log_mm(ts: &[f64], ys: &[f64]) -> FitOutcome {
    let masked: Vec<f64> = ts
        .iter()
        .zip(ys.iter())
        .map(|(&t, &y)| if t <= MAX_TIME { y } else { f64::NAN })
        .collect();
    fit_model(&LogMmModel, ts, &masked, &FitOptions::default())
}

/// `y = slope·x + intercept`.
pub fn linear(x: f64, slope: f64, intercept: f64) -> f64 {
    slope * x + intercept
}

struct LinearModel;

impl Model for LinearModel {
    fn n_params(&self) -> usize {
        2
    }

    fn names(&self) -> Vec<String> {
        ["slope", "intercept"].iter().map(|s| s.to_string()).collect()
    }

    fn eval(&self, x: f64, pars: &[f64]) -> f64 {
        linear(x, pars[0], pars[1])
    }

    fn initial_guess(&self, xs: &[f64], ys: &[f64]) -> Vec<f64> {
        let slope = match (xs.first(), xs.last(), ys.first(), ys.last()) {
            (Some(&x0), Some(&x1), Some(&y0), Some(&y1)) if x1 != x0 => (y1 - y0) / (x1 - x0),
            _ => 1.0,
        };
        vec![slope, ys.first().copied().unwrap_or(0.0)]
    }
}

/// An initial-rate fit: the linear outcome plus the window it used.
#[derive(Debug, Clone)]
pub struct RateFit {
    /// Linear fit, parameters `[slope, intercept]`. The drawn curve is
    /// clamped at the observed signal maximum.
    pub outcome: FitOutcome,
    /// Time window `[start, stop]` the slope was fitted on.
    pub window: (f64, f64),
}

impl RateFit {
    fn failure(n_points: usize) -> Self {
        Self {
            outcome: FitOutcome::failure(n_points, 2),
            window: (f64::NAN, f64::NAN),
        }
    }
}

/// Initial linear rate of a progress curve.
///
/// With an explicit window, the slope is fitted on points inside it. The
/// automatic window fits the log-MM curve first and keeps the contiguous
/// prefix where the analytic derivative `b/(t0+t)` retains at least 70 % of
/// its starting value. Fewer than 3 window points refuse the fit.
pub fn fit_linear_rate(ts: &[f64], ys: &[f64], window: Option<(f64, f64)>) -> RateFit {
    let n = ts.len();
    if ys.len() != n || n == 0 {
        return RateFit::failure(n);
    }

    let (start, stop) = match window {
        Some(explicit) => explicit,
        None => {
            let progress = fit_log_mm(ts, ys);
            if !progress.do_fit {
                return RateFit::failure(n);
            }
            let t0 = progress.pars[2];
            let t_first = ts
                .iter()
                .copied()
                .filter(|t| t.is_finite())
                .fold(f64::INFINITY, f64::min);
            if !t0.is_finite() || t0 + t_first <= 0.0 {
                return RateFit::failure(n);
            }
            // Normalised derivative (t0 + t_first)/(t0 + t), 1 at the start.
            let mut stop = t_first;
            for &t in ts.iter().filter(|t| t.is_finite()) {
                if (t0 + t_first) / (t0 + t) >= RATE_THRESHOLD {
                    stop = stop.max(t);
                } else {
                    break;
                }
            }
            (t_first, stop)
        }
    };

    let in_window = ts
        .iter()
        .zip(ys.iter())
        .filter(|(&t, &y)| t >= start && t <= stop && t.is_finite() && y.is_finite())
        .count();
    if in_window < MIN_RATE_POINTS {
        return RateFit::failure(n);
    }

    let masked: Vec<f64> = ts
        .iter()
        .zip(ys.iter())
        .map(|(&t, &y)| if t >= start && t <= stop { y } else { f64::NAN })
        .collect();
    let mut outcome = fit_model(&LinearModel, ts, &masked, &FitOptions::default());
    if !outcome.do_fit {
        return RateFit::failure(n);
    }

    // The straight line would overshoot the plateau; cap the drawn curve at
    // the strongest observed signal.
    let y_max = ys
        .iter()
        .copied()
        .filter(|y| y.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);
    for value in &mut outcome.curve {
        if value.is_finite() && *value > y_max {
            *value = y_max;
        }
    }
    RateFit {
        outcome,
        window: (start, stop),
    }
}

/// One-phase association/decay `y = y0 + (plateau − y0)(1 − e^(−kx))`.
pub fn one_phase(x: f64, y0: f64, plateau: f64, k: f64) -> f64 {
    y0 + (plateau - y0) * (1.0 - (-k * x).exp())
}

struct OnePhaseModel;

impl Model for OnePhaseModel {
    fn n_params(&self) -> usize {
        3
    }

    fn names(&self) -> Vec<String> {
        ["y0", "plateau", "k"].iter().map(|s| s.to_string()).collect()
    }

    fn eval(&self, x: f64, pars: &[f64]) -> f64 {
        one_phase(x, pars[0], pars[1], pars[2])
    }

    fn initial_guess(&self, xs: &[f64], ys: &[f64]) -> Vec<f64> {
        let y0 = ys.first().copied().unwrap_or(0.0);
        let plateau = ys.last().copied().unwrap_or(1.0);
        let span = xs.last().copied().unwrap_or(1.0) - xs.first().copied().unwrap_or(0.0);
        let k = if span > 0.0 { 3.0 / span } else { 1.0 };
        vec![y0, plateau, k]
    }
}

/// Fit the one-phase exponential.
pub fn fit_one_phase(xs: &[f64], ys: &[f64]) -> FitOutcome {
    fit_model(&OnePhaseModel, xs, ys, &FitOptions::default())
}

/// Reaction progress with burst: `y = y0 + vs·t + (v0 − vs)(1 − e^(−kt))/k`.
pub fn reaction_progress(t: f64, y0: f64, v0: f64, vs: f64, k: f64) -> f64 {
    y0 + vs * t + (v0 - vs) * (1.0 - (-k * t).exp()) / k
}

struct ReactionProgressModel;

impl Model for ReactionProgressModel {
    fn n_params(&self) -> usize {
        4
    }

    fn names(&self) -> Vec<String> {
        ["y0", "v0", "vs", "k"].iter().map(|s| s.to_string()).collect()
    }

    fn eval(&self, t: f64, pars: &[f64]) -> f64 {
        reaction_progress(t, pars[0], pars[1], pars[2], pars[3])
    }

    fn initial_guess(&self, xs: &[f64], ys: &[f64]) -> Vec<f64> {
        let n = xs.len();
        let y0 = ys.first().copied().unwrap_or(0.0);
        let v0 = if n >= 2 && xs[1] != xs[0] {
            (ys[1] - ys[0]) / (xs[1] - xs[0])
        } else {
            1.0
        };
        let vs = if n >= 2 && xs[n - 1] != xs[n - 2] {
            (ys[n - 1] - ys[n - 2]) / (xs[n - 1] - xs[n - 2])
        } else {
            0.0
        };
        let span = xs.last().copied().unwrap_or(1.0) - xs.first().copied().unwrap_or(0.0);
        let k = if span > 0.0 { 5.0 / span } else { 0.1 };
        vec![y0, v0, vs, k]
    }
}

/// Fit the reaction-progress model.
pub fn fit_reaction_progress(ts: &[f64], ys: &[f64]) -> FitOutcome {
    fit_model(&ReactionProgressModel, ts, ys, &FitOptions::default())
}
