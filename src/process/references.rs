//! Reference-well summaries and plate quality metrics.

use serde::{Deserialize, Serialize};

use crate::process::stats::{mad_std, mean, median, sem, std_dev};
use crate::ruleset::BackgroundSource;

/// Background population actually used for a plate after fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Background {
    Control,
    Solvent,
    Buffer,
    /// No usable background wells; subtraction is skipped.
    None,
}

/// Per-plate reference summary computed from control, solvent and buffer wells.
///
/// All fields are NaN when the corresponding population is absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct References {
    pub control_mean: f64,
    pub control_sem: f64,
    pub solvent_mean: f64,
    pub solvent_sem: f64,
    pub buffer_mean: f64,
    pub buffer_sem: f64,
    /// Ratio of buffer mean to control mean.
    pub buffer_to_control: f64,
    /// Ratio of solvent mean to control mean.
    pub solvent_to_control: f64,
    /// Z′ from means and standard deviations of control vs solvent wells.
    pub z_prime_mean: f64,
    /// Z′ from medians and MAD-equivalent deviations; robust to outlier wells.
    pub z_prime_median: f64,
    /// Background population selected for normalisation.
    pub background: Background,
    /// Mean of the selected background population, NaN when `background` is `None`.
    pub background_value: f64,
}

impl References {
    /// Background level to subtract; zero when no background was resolved.
    pub fn effective_background(&self) -> f64 {
        if self.background_value.is_finite() {
            self.background_value
        } else {
            0.0
        }
    }
}

/// Z′ = 1 − 3(σ_c + σ_s) / |µ_c − µ_s| over control and solvent wells.
pub fn z_prime(control: &[f64], solvent: &[f64]) -> f64 {
    separation(mean(control), std_dev(control), mean(solvent), std_dev(solvent))
}

/// Z′ with median in place of mean and scaled MAD in place of σ.
pub fn z_prime_median(control: &[f64], solvent: &[f64]) -> f64 {
    separation(
        median(control),
        mad_std(control),
        median(solvent),
        mad_std(solvent),
    )
}

fn separation(center_c: f64, spread_c: f64, center_s: f64, spread_s: f64) -> f64 {
    let gap = (center_c - center_s).abs();
    if !gap.is_finite() || gap == 0.0 || !spread_c.is_finite() || !spread_s.is_finite() {
        return f64::NAN;
    }
    1.0 - 3.0 * (spread_c + spread_s) / gap
}

/// Picks the background population, falling over between solvent and buffer
/// when `backup` is set and the primary has no usable wells. A primary with
/// no fallback resolves to `Background::None`.
fn resolve_background(
    source: BackgroundSource,
    backup: bool,
    control: f64,
    solvent: f64,
    buffer: f64,
) -> (Background, f64) {
    let primary = match source {
        BackgroundSource::Control => (Background::Control, control),
        BackgroundSource::Solvent => (Background::Solvent, solvent),
        BackgroundSource::Buffer => (Background::Buffer, buffer),
    };
    if primary.1.is_finite() {
        return primary;
    }
    if backup {
        let fallback = match source {
            BackgroundSource::Solvent => Some((Background::Buffer, buffer)),
            BackgroundSource::Buffer => Some((Background::Solvent, solvent)),
            BackgroundSource::Control => None,
        };
        if let Some((kind, value)) = fallback {
            if value.is_finite() {
                return (kind, value);
            }
        }
    }
    (Background::None, f64::NAN)
}

/// Summarises the reference wells of one plate.
pub fn compute_references(
    control: &[f64],
    solvent: &[f64],
    buffer: &[f64],
    source: BackgroundSource,
    backup: bool,
) -> References {
    let control_mean = mean(control);
    let solvent_mean = mean(solvent);
    let buffer_mean = mean(buffer);
    let (background, background_value) =
        resolve_background(source, backup, control_mean, solvent_mean, buffer_mean);
    References {
        control_mean,
        control_sem: sem(control),
        solvent_mean,
        solvent_sem: sem(solvent),
        buffer_mean,
        buffer_sem: sem(buffer),
        buffer_to_control: buffer_mean / control_mean,
        solvent_to_control: solvent_mean / control_mean,
        z_prime_mean: z_prime(control, solvent),
        z_prime_median: z_prime_median(control, solvent),
        background,
        background_value,
    }
}
