//! Background subtraction and reference scaling of raw signals.

use crate::process::references::References;
use crate::ruleset::{Normalisation, NormalisationKind};

/// Scale factor mapping background-subtracted signal onto the output range.
fn scale(kind: NormalisationKind, reference: f64, background: f64) -> f64 {
    let span = reference - background;
    match kind {
        NormalisationKind::Percent => 100.0 / span,
        NormalisationKind::Ratio => 1.0 / span,
    }
}

/// Normalises one reading against a reference level.
///
/// `Percent` maps background to 0 and reference to 100; `Ratio` maps them to
/// 0 and 1. Inversion reflects the result so signal loss reads as gain.
pub fn normalise(raw: f64, reference: f64, background: f64, rule: &Normalisation) -> f64 {
    let value = (raw - background) * scale(rule.kind, reference, background);
    if rule.invert {
        match rule.kind {
            NormalisationKind::Percent => 100.0 - value,
            NormalisationKind::Ratio => 1.0 - value,
        }
    } else {
        value
    }
}

/// SEM transforms by the absolute scale factor; subtraction and inversion
/// leave it unchanged.
pub fn normalise_sem(raw_sem: f64, reference: f64, background: f64, rule: &Normalisation) -> f64 {
    raw_sem * scale(rule.kind, reference, background).abs()
}

/// Normalises a series in place against a plate's reference summary, using
/// the control mean as the reference level.
pub fn normalise_series(
    values: &[f64],
    sems: &[f64],
    refs: &References,
    rule: &Normalisation,
) -> (Vec<f64>, Vec<f64>) {
    let background = refs.effective_background();
    let reference = refs.control_mean;
    let norm = values
        .iter()
        .map(|&v| normalise(v, reference, background, rule))
        .collect();
    let norm_sem = sems
        .iter()
        .map(|&s| normalise_sem(s, reference, background, rule))
        .collect();
    (norm, norm_sem)
}
