//! Small-sample statistics over well populations.
//!
//! Plate grids carry NaN for missing readings, so every function here
//! filters non-finite values first and returns NaN when nothing is left.

/// MAD to standard-deviation equivalence factor for normal data.
const MAD_SCALE: f64 = 1.4826;

const MICRO_PER_MOLE: f64 = 1e6;

pub fn moles_to_micromoles(moles: f64) -> f64 {
    moles * MICRO_PER_MOLE
}

pub fn micromoles_to_moles(micromoles: f64) -> f64 {
    micromoles / MICRO_PER_MOLE
}

fn finite(values: &[f64]) -> Vec<f64> {
    values.iter().copied().filter(|v| v.is_finite()).collect()
}

pub fn mean(values: &[f64]) -> f64 {
    let kept = finite(values);
    if kept.is_empty() {
        return f64::NAN;
    }
    kept.iter().sum::<f64>() / kept.len() as f64
}

/// Sample standard deviation (n − 1); needs at least two values.
pub fn std_dev(values: &[f64]) -> f64 {
    let kept = finite(values);
    if kept.len() < 2 {
        return f64::NAN;
    }
    let m = kept.iter().sum::<f64>() / kept.len() as f64;
    let ss: f64 = kept.iter().map(|v| (v - m) * (v - m)).sum();
    (ss / (kept.len() - 1) as f64).sqrt()
}

/// Standard error of the mean, `σ/√n`.
pub fn sem(values: &[f64]) -> f64 {
    let kept = finite(values);
    if kept.len() < 2 {
        return f64::NAN;
    }
    std_dev(&kept) / (kept.len() as f64).sqrt()
}

pub fn median(values: &[f64]) -> f64 {
    let mut kept = finite(values);
    if kept.is_empty() {
        return f64::NAN;
    }
    kept.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = kept.len() / 2;
    if kept.len() % 2 == 0 {
        (kept[mid - 1] + kept[mid]) / 2.0
    } else {
        kept[mid]
    }
}

/// Robust spread: median absolute deviation scaled to a normal σ.
pub fn mad_std(values: &[f64]) -> f64 {
    let kept = finite(values);
    if kept.is_empty() {
        return f64::NAN;
    }
    let med = median(&kept);
    let deviations: Vec<f64> = kept.iter().map(|v| (v - med).abs()).collect();
    median(&deviations) * MAD_SCALE
}

/// Pearson correlation over the finite pairs of `a` and `b`.
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let pairs: Vec<(f64, f64)> = a
        .iter()
        .zip(b.iter())
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .map(|(&x, &y)| (x, y))
        .collect();
    if pairs.len() < 2 {
        return f64::NAN;
    }
    let n = pairs.len() as f64;
    let mx = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let my = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (x, y) in &pairs {
        sxy += (x - mx) * (y - my);
        sxx += (x - mx) * (x - mx);
        syy += (y - my) * (y - my);
    }
    if sxx == 0.0 || syy == 0.0 {
        return f64::NAN;
    }
    sxy / (sxx * syy).sqrt()
}
