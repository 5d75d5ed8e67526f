//! Per-sample aggregated series and fit slots.

use crate::error::{AssayError, Result};
use crate::fit::FitOutcome;
use crate::plate::Well;
use crate::ruleset::ShowMode;

/// One fit slot per show mode.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModeFits {
    pub raw: Option<FitOutcome>,
    pub norm_free: Option<FitOutcome>,
    pub norm_const: Option<FitOutcome>,
}

impl ModeFits {
    pub fn get(&self, mode: ShowMode) -> Option<&FitOutcome> {
        match mode {
            ShowMode::Raw => self.raw.as_ref(),
            ShowMode::NormFree => self.norm_free.as_ref(),
            ShowMode::NormConst => self.norm_const.as_ref(),
        }
    }

    pub fn set(&mut self, mode: ShowMode, outcome: FitOutcome) {
        match mode {
            ShowMode::Raw => self.raw = Some(outcome),
            ShowMode::NormFree => self.norm_free = Some(outcome),
            ShowMode::NormConst => self.norm_const = Some(outcome),
        }
    }
}

/// Aggregated series of one sample on one plate (or one across-plate group).
///
/// `concentrations` is the x-axis; the name is kept from the persistence
/// contract although it holds °C for thermal assays and seconds for rates.
/// All parallel vectors share one length, checked at construction and after
/// every pipeline pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    pub sample_id: String,
    /// Wells aggregated into this record, in row-major order of first use.
    pub locations: Vec<Well>,
    pub concentrations: Vec<f64>,
    pub raw: Vec<f64>,
    pub raw_sem: Vec<f64>,
    pub norm: Vec<f64>,
    pub norm_sem: Vec<f64>,
    pub excluded: Vec<bool>,
    pub show: ShowMode,
    pub fits: ModeFits,
}

impl SampleRecord {
    /// Builds a record from the aggregated raw series; normalised fields
    /// start as NaN and nothing is excluded.
    pub fn new(
        sample_id: String,
        locations: Vec<Well>,
        concentrations: Vec<f64>,
        raw: Vec<f64>,
        raw_sem: Vec<f64>,
    ) -> Result<Self> {
        let n = concentrations.len();
        let record = Self {
            sample_id,
            locations,
            norm: vec![f64::NAN; n],
            norm_sem: vec![f64::NAN; n],
            excluded: vec![false; n],
            show: ShowMode::Raw,
            fits: ModeFits::default(),
            concentrations,
            raw,
            raw_sem,
        };
        record.check_lengths()?;
        Ok(record)
    }

    pub fn len(&self) -> usize {
        self.concentrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concentrations.is_empty()
    }

    /// Verifies the parallel-vector invariant.
    pub fn check_lengths(&self) -> Result<()> {
        let n = self.concentrations.len();
        if [
            self.raw.len(),
            self.raw_sem.len(),
            self.norm.len(),
            self.norm_sem.len(),
            self.excluded.len(),
        ]
        .iter()
        .all(|&l| l == n)
        {
            Ok(())
        } else {
            Err(AssayError::InvalidParameter(format!(
                "sample '{}' has unequal series lengths",
                self.sample_id
            )))
        }
    }

    /// Values and SEMs backing the given show mode.
    pub fn values_for(&self, mode: ShowMode) -> (&[f64], &[f64]) {
        match mode {
            ShowMode::Raw => (&self.raw, &self.raw_sem),
            ShowMode::NormFree | ShowMode::NormConst => (&self.norm, &self.norm_sem),
        }
    }

    /// Mode values with excluded points masked to NaN, ready for fitting.
    pub fn masked_values(&self, mode: ShowMode) -> Vec<f64> {
        let (values, _) = self.values_for(mode);
        values
            .iter()
            .zip(self.excluded.iter())
            .map(|(&v, &out)| if out { f64::NAN } else { v })
            .collect()
    }

    /// Points that would take part in a fit.
    pub fn remaining_points(&self) -> usize {
        self.excluded.iter().filter(|&&out| !out).count()
    }

    /// Flips one exclusion flag, returning the new state.
    pub fn toggle_exclusion(&mut self, index: usize) -> Result<bool> {
        let flag = self.excluded.get_mut(index).ok_or_else(|| {
            AssayError::InvalidParameter(format!(
                "point {} out of range for sample '{}'",
                index, self.sample_id
            ))
        })?;
        *flag = !*flag;
        Ok(*flag)
    }
}
