//! The assay definition: one JSON document driving parsing and processing.

use super::processing::DataProcessing;
use super::rawdata::RawDataRules;
use super::transfer::TransferRules;
use super::validate::validate_definition;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Identity block of an assay definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Meta {
    pub name: String,
    /// Instrument or liquid handler the ruleset was written for.
    pub device: String,
    pub version: String,
    pub description: Option<String>,
}

/// A reagent referenced by the assay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Reagent {
    pub name: String,
    /// Stock concentration in Molar.
    pub stock_concentration: f64,
    pub solvent: String,
}

impl Default for Reagent {
    fn default() -> Self {
        Self {
            name: String::new(),
            stock_concentration: f64::NAN,
            solvent: "DMSO".to_string(),
        }
    }
}

/// Complete assay definition. Typed sections drive the analysis core;
/// the GUI-owned sections (`Tabs`, `Results`, `ResultsTable`, `Database`)
/// pass through untouched so saving a definition never loses them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AssayDefinition {
    pub meta: Meta,
    /// Pre-filled `details.csv` properties for new projects.
    pub default_details: BTreeMap<String, String>,
    pub reagents: Vec<Reagent>,
    pub transfer_rules: TransferRules,
    pub raw_data_rules: RawDataRules,
    pub data_processing: DataProcessing,
    pub tabs: serde_json::Value,
    pub results: serde_json::Value,
    pub results_table: serde_json::Value,
    pub database: serde_json::Value,
}

impl AssayDefinition {
    /// Parse from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load a definition file.
    pub fn load(path: &Path) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    /// Write the definition file.
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Check the definition against every structural rule.
    pub fn validate(&self) -> Result<()> {
        validate_definition(self)
    }

    /// Shorthand code of the configured assay kind.
    pub fn shorthand(&self) -> &'static str {
        self.data_processing.shorthand()
    }
}
