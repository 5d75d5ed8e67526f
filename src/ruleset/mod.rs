//! Declarative rulesets for assay files and processing.
//!
//! An assay definition is a single JSON document that tells the parsers how
//! to read a transfer report and a raw-data export, and tells the pipeline
//! how to process what they produce. Defaults are the blank templates a
//! definition editor starts from.

mod definition;
mod processing;
mod rawdata;
mod rules;
mod transfer;
mod validate;

pub use definition::{AssayDefinition, Meta, Reagent};
pub use processing::{
    AssayKind, BackgroundSource, CustomEquationSpec, DataProcessing, Normalisation,
    NormalisationKind, ReplicatePolicy, ShowMode, SignalSelect, ThermalMethod,
};
pub use rawdata::{RawDataRules, SubDatasetRules};
pub use rules::{
    cell_matches, Axis, Engine, Separator, StartMode, StartRule, StopMode, StopRule, Verification,
};
pub use transfer::{ColumnRole, ColumnRule, TransferRules};
pub use validate::{
    validate_definition, validate_processing, validate_rawdata, validate_transfer,
};
