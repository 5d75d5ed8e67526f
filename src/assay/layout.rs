//! Per-plate layout grids reconstructed from a transfer report.

use std::collections::HashSet;

use crate::error::{AssayError, Result};
use crate::plate::{PlateFormat, PlateGrid, Well};

/// Role of a well on the assay plate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WellType {
    /// Compound at a dose; enters a sample record.
    Sample,
    /// Buffer-only reference well, painted by the layout editor.
    Reference,
    /// Control compound well; the 100 % anchor.
    Control,
    /// Solvent-only backfill; the solvent statistics population.
    Backfill,
    #[default]
    Empty,
}

impl WellType {
    /// Persistence code; empty wells persist as the empty string.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Sample => "s",
            Self::Reference => "r",
            Self::Control => "c",
            Self::Backfill => "b",
            Self::Empty => "",
        }
    }

    pub fn from_code(code: &str) -> Result<Self> {
        match code.trim() {
            "s" => Ok(Self::Sample),
            "r" => Ok(Self::Reference),
            "c" => Ok(Self::Control),
            "b" => Ok(Self::Backfill),
            "" => Ok(Self::Empty),
            other => Err(AssayError::ParseFailed(format!(
                "unknown well type code '{}'",
                other
            ))),
        }
    }
}

/// One grid per canonical transfer column, all sharing the plate format.
///
/// Concentrations are Molar. Numeric grids hold NaN where no transfer
/// touched the well. Layouts are not edited after a plate has produced
/// samples; edits rebuild the plate through a fresh pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    format: PlateFormat,
    pub sample_id: PlateGrid<Option<String>>,
    pub concentration: PlateGrid<f64>,
    pub source_concentration: PlateGrid<f64>,
    pub transfer_volume: PlateGrid<f64>,
    pub solvent_volume: PlateGrid<f64>,
    pub well_type: PlateGrid<WellType>,
}

impl Layout {
    pub fn new(format: PlateFormat) -> Self {
        Self {
            format,
            sample_id: PlateGrid::empty(format),
            concentration: PlateGrid::nan(format),
            source_concentration: PlateGrid::nan(format),
            transfer_volume: PlateGrid::nan(format),
            solvent_volume: PlateGrid::nan(format),
            well_type: PlateGrid::filled(format, WellType::Empty),
        }
    }

    pub fn format(&self) -> PlateFormat {
        self.format
    }

    /// Classifies every well from the populated grids.
    ///
    /// A well whose identifier equals the control name (ASCII
    /// case-insensitive) or that carries a control flag becomes `Control`;
    /// any other identified well is `Sample`; an unidentified well with a
    /// solvent volume is `Backfill`. Reference wells are painted separately
    /// and survive reclassification.
    pub fn assign_well_types(&mut self, control_name: Option<&str>, flagged: &HashSet<Well>) {
        let assignments: Vec<(Well, WellType)> = self
            .sample_id
            .iter()
            .map(|(well, id)| {
                let current = *self.well_type.get(well).unwrap_or(&WellType::Empty);
                let kind = if current == WellType::Reference {
                    WellType::Reference
                } else if flagged.contains(&well) {
                    WellType::Control
                } else if let Some(id) = id {
                    match control_name {
                        Some(name) if id.trim().eq_ignore_ascii_case(name.trim()) => {
                            WellType::Control
                        }
                        _ => WellType::Sample,
                    }
                } else if self
                    .solvent_volume
                    .get(well)
                    .map(|v| v.is_finite())
                    .unwrap_or(false)
                {
                    WellType::Backfill
                } else {
                    WellType::Empty
                };
                (well, kind)
            })
            .collect();
        for (well, kind) in assignments {
            let _ = self.well_type.set(well, kind);
        }
    }

    /// Paints a buffer-only reference well.
    pub fn mark_reference(&mut self, well: Well) -> Result<()> {
        self.well_type.set(well, WellType::Reference)
    }

    pub fn wells_of_type(&self, kind: WellType) -> Vec<Well> {
        self.well_type
            .iter()
            .filter(|(_, t)| **t == kind)
            .map(|(w, _)| w)
            .collect()
    }

    /// Identified wells in row-major order with their identifiers.
    pub fn sample_wells(&self) -> Vec<(Well, String)> {
        self.sample_id
            .populated()
            .map(|(w, id)| (w, id.to_string()))
            .collect()
    }
}
