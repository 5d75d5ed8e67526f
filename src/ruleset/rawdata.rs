//! Raw-data ruleset: how an instrument export becomes plate-sized grids.

use super::rules::{Axis, Engine, Separator, StartRule, Verification};
use serde::{Deserialize, Serialize};

/// Sub-dataset scan rules; the axis is orthogonal to the dataset axis by
/// convention but stored explicitly so the wire format is self-describing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SubDatasetRules {
    pub axis: Axis,
    pub separator: Separator,
}

impl Default for SubDatasetRules {
    fn default() -> Self {
        Self {
            axis: Axis::Cols,
            separator: Separator::SameAsMain,
        }
    }
}

/// Ruleset for parsing an instrument raw-data file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RawDataRules {
    pub extension: String,
    pub engine: Engine,
    /// Spreadsheet-engine collaborators only; the delimited engine rejects it.
    pub worksheet: Option<String>,
    pub verification: Verification,
    /// Locates the first dataset anchor.
    pub start: StartRule,
    /// Wells per plate block: 96, 384, or 1536.
    pub assay_plate_format: usize,
    pub multiple_datasets: bool,
    pub dataset_axis: Axis,
    pub dataset_separator: Separator,
    pub sub_datasets: Option<SubDatasetRules>,
    /// `(Δrow, Δcol)` from an anchor cell to its grid origin.
    pub keyword_offset: (i64, i64),
    /// Read a numeric x-scale (temperature, time) from each sub-dataset
    /// anchor label instead of using the running index.
    pub scale_from_anchor: bool,
}

impl Default for RawDataRules {
    fn default() -> Self {
        Self {
            extension: "csv".to_string(),
            engine: Engine::Csv,
            worksheet: None,
            verification: Verification::default(),
            start: StartRule::default(),
            assay_plate_format: 384,
            multiple_datasets: false,
            dataset_axis: Axis::Rows,
            dataset_separator: Separator::SameAsMain,
            sub_datasets: None,
            keyword_offset: (1, 1),
            scale_from_anchor: false,
        }
    }
}
