//! Transfer-report ruleset: how a liquid-handler report becomes a layout.

use super::rules::{Engine, StartRule, StopRule, Verification};
use serde::{Deserialize, Serialize};

/// Canonical column roles a transfer report can map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnRole {
    DestinationPlateName,
    DestinationPlateBarcode,
    DestinationWell,
    DestinationConcentration,
    SourceConcentration,
    #[serde(rename = "SampleID")]
    SampleId,
    SampleName,
    TransferVolume,
    SourcePlateName,
    SourceWell,
    ControlFlag,
}

impl ColumnRole {
    /// Every role, in canonical order (blank templates enumerate all).
    pub fn all() -> [ColumnRole; 11] {
        [
            Self::DestinationPlateName,
            Self::DestinationPlateBarcode,
            Self::DestinationWell,
            Self::DestinationConcentration,
            Self::SourceConcentration,
            Self::SampleId,
            Self::SampleName,
            Self::TransferVolume,
            Self::SourcePlateName,
            Self::SourceWell,
            Self::ControlFlag,
        ]
    }
}

/// One canonical role and the header label it maps to in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ColumnRule {
    pub role: ColumnRole,
    /// Header label in the file; `None` means the role is not present.
    pub mapped: Option<String>,
    pub required: bool,
}

impl ColumnRule {
    pub fn unmapped(role: ColumnRole, required: bool) -> Self {
        Self {
            role,
            mapped: None,
            required,
        }
    }
}

/// Ruleset for parsing a transfer report into per-plate layouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TransferRules {
    pub extension: String,
    pub engine: Engine,
    /// Spreadsheet-engine collaborators only; the delimited engine rejects it.
    pub worksheet: Option<String>,
    pub verification: Verification,
    pub start: StartRule,
    pub stop: StopRule,
    pub columns: Vec<ColumnRule>,
    /// Record transfer volumes of identifier-less rows as solvent backfill.
    pub catch_solvent_transfers: bool,
}

impl Default for TransferRules {
    fn default() -> Self {
        let required = [
            ColumnRole::DestinationPlateName,
            ColumnRole::DestinationWell,
            ColumnRole::DestinationConcentration,
            ColumnRole::SampleId,
            ColumnRole::TransferVolume,
        ];
        Self {
            extension: "csv".to_string(),
            engine: Engine::Csv,
            worksheet: None,
            verification: Verification::default(),
            start: StartRule::default(),
            stop: StopRule::default(),
            columns: ColumnRole::all()
                .into_iter()
                .map(|role| ColumnRule::unmapped(role, required.contains(&role)))
                .collect(),
            catch_solvent_transfers: true,
        }
    }
}

impl TransferRules {
    /// Header label mapped to `role`, if any.
    pub fn mapped_label(&self, role: ColumnRole) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.role == role)
            .and_then(|c| c.mapped.as_deref())
    }

    /// Roles with a mapped label, in ruleset order.
    pub fn mapped_roles(&self) -> Vec<(ColumnRole, &str)> {
        self.columns
            .iter()
            .filter_map(|c| c.mapped.as_deref().map(|label| (c.role, label)))
            .collect()
    }
}
