//! Structural validation of assay definitions.
//!
//! Every check maps a broken rule to [`AssayError::RulesetInvalid`] with a
//! message naming the offending section, so a definition editor can surface
//! it directly.

use super::definition::AssayDefinition;
use super::processing::DataProcessing;
use super::rawdata::RawDataRules;
use super::rules::{Engine, Separator, Verification};
use super::transfer::{ColumnRole, TransferRules};
use crate::error::{AssayError, Result};
use crate::fit::custom::compile_equation;
use crate::plate::PlateFormat;

fn invalid(section: &str, message: &str) -> AssayError {
    AssayError::RulesetInvalid(format!("{}: {}", section, message))
}

fn check_engine(engine: &Engine, worksheet: Option<&str>, section: &str) -> Result<()> {
    engine.delimiter().map_err(|_| {
        invalid(section, "delimited engine needs a non-empty delimiter")
    })?;
    if worksheet.is_some() {
        return Err(invalid(
            section,
            "the delimited engine does not read worksheets",
        ));
    }
    Ok(())
}

fn check_verification(rule: &Verification, section: &str) -> Result<()> {
    if rule.enabled && rule.keyword.is_empty() {
        return Err(invalid(section, "verification is on but no keyword is set"));
    }
    Ok(())
}

fn check_separator(separator: &Separator, section: &str) -> Result<()> {
    match separator {
        Separator::SameAsMain => Ok(()),
        Separator::Keyword { keyword, .. } => {
            if keyword.is_empty() {
                Err(invalid(section, "keyword separator needs a keyword"))
            } else {
                Ok(())
            }
        }
        Separator::SetDistance { offset } => {
            if *offset == 0 {
                Err(invalid(section, "set-distance separator needs offset > 0"))
            } else {
                Ok(())
            }
        }
    }
}

/// Validate the transfer ruleset: engine, verification, start/stop
/// exclusivity, and the minimum column coverage a layout needs.
pub fn validate_transfer(rules: &TransferRules) -> Result<()> {
    const SECTION: &str = "TransferRules";
    check_engine(&rules.engine, rules.worksheet.as_deref(), SECTION)?;
    check_verification(&rules.verification, SECTION)?;
    rules.start.resolve()?;
    rules.stop.resolve()?;

    let has = |role| rules.mapped_label(role).is_some();
    if !has(ColumnRole::DestinationPlateName) && !has(ColumnRole::DestinationPlateBarcode) {
        return Err(invalid(
            SECTION,
            "map DestinationPlateName or DestinationPlateBarcode",
        ));
    }
    if !has(ColumnRole::DestinationWell) {
        return Err(invalid(SECTION, "map DestinationWell"));
    }
    if !has(ColumnRole::DestinationConcentration)
        && !(has(ColumnRole::SourceConcentration) && has(ColumnRole::TransferVolume))
    {
        return Err(invalid(
            SECTION,
            "map DestinationConcentration, or SourceConcentration plus TransferVolume",
        ));
    }
    Ok(())
}

/// Validate the raw-data ruleset: engine, verification, anchor rules,
/// separators, and the plate-format whitelist.
pub fn validate_rawdata(rules: &RawDataRules) -> Result<()> {
    const SECTION: &str = "RawDataRules";
    check_engine(&rules.engine, rules.worksheet.as_deref(), SECTION)?;
    check_verification(&rules.verification, SECTION)?;
    rules.start.resolve()?;
    PlateFormat::from_wells(rules.assay_plate_format)?;

    if rules.multiple_datasets {
        check_separator(&rules.dataset_separator, SECTION)?;
    }
    if let Some(sub) = &rules.sub_datasets {
        check_separator(&sub.separator, SECTION)?;
        if sub.axis != rules.dataset_axis.orthogonal() {
            return Err(invalid(
                SECTION,
                "sub-datasets must scan the axis orthogonal to the dataset axis",
            ));
        }
    }
    Ok(())
}

/// Validate the processing directives, including the custom-equation
/// token whitelist (compiled once, discarded).
pub fn validate_processing(processing: &DataProcessing) -> Result<()> {
    const SECTION: &str = "DataProcessing";
    if processing.enabled_modes.is_empty() {
        return Err(invalid(SECTION, "enable at least one show mode"));
    }
    if !processing.enabled_modes.contains(&processing.default_show) {
        return Err(invalid(SECTION, "default show mode is not enabled"));
    }
    if let Some((start, stop)) = processing.rate_window {
        if !(start < stop) {
            return Err(invalid(SECTION, "rate window needs start < stop"));
        }
    }
    if let Some(spec) = &processing.custom_equation {
        compile_equation(&spec.function, &spec.parameters, &spec.independent)?;
    }
    Ok(())
}

/// Validate a whole definition.
pub fn validate_definition(definition: &AssayDefinition) -> Result<()> {
    validate_transfer(&definition.transfer_rules)?;
    validate_rawdata(&definition.raw_data_rules)?;
    validate_processing(&definition.data_processing)?;
    Ok(())
}
