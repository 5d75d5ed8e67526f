//! Ruleset-driven extraction of liquid-handler transfer reports.
//!
//! A report is a delimited table with an optional preamble, one header row
//! naming the columns the ruleset maps, and data rows terminated by a
//! keyword, a coordinate, or the first empty line. Parsing yields one
//! [`Layout`] per destination plate.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::assay::Layout;
use crate::error::{AssayError, Result};
use crate::plate::{PlateFormat, Well};
use crate::ruleset::{ColumnRole, StartMode, StopMode, TransferRules};
use crate::table::{CellMatrix, CellValue};

/// Parsed transfer report: per-plate layouts keyed by destination name.
///
/// `BTreeMap` keeps plates in stable ascending name order, which downstream
/// enumeration relies on.
#[derive(Debug, Clone)]
pub struct TransferParse {
    pub format: PlateFormat,
    pub plates: BTreeMap<String, Layout>,
}

/// One data row after header resolution, before grid ingestion.
#[derive(Debug, Clone)]
struct TransferRow {
    plate: String,
    well: Well,
    concentration: f64,
    source_concentration: f64,
    transfer_volume: f64,
    sample_id: Option<String>,
    control_flag: bool,
}

/// Parses a transfer report into per-plate layout grids.
///
/// `format` is the assay plate format the destination plates must fit;
/// `control_name` marks wells whose identifier names the control compound.
pub fn parse_transfer(
    rules: &TransferRules,
    path: &Path,
    format: PlateFormat,
    control_name: Option<&str>,
) -> Result<TransferParse> {
    let matrix = CellMatrix::load(path, &rules.engine)?;
    rules.verification.check(&matrix)?;

    let (header_row, first_col) = locate_start(&matrix, &rules.start.resolve()?)?;
    let data_start = header_row + 1;
    let columns = resolve_columns(&matrix, header_row, first_col, rules)?;
    let data_end = locate_stop(&matrix, &rules.stop.resolve()?, data_start, &columns)?;

    let id_col = role_column(&columns, ColumnRole::SampleId)
        .or_else(|| role_column(&columns, ColumnRole::SampleName))
        .ok_or_else(|| {
            AssayError::ParseFailed("no sample identifier column in the header".to_string())
        })?;
    let plate_col = role_column(&columns, ColumnRole::DestinationPlateName)
        .or_else(|| role_column(&columns, ColumnRole::DestinationPlateBarcode))
        .ok_or_else(|| {
            AssayError::ParseFailed("no destination plate column in the header".to_string())
        })?;
    let well_col = role_column(&columns, ColumnRole::DestinationWell)
        .ok_or_else(|| AssayError::MissingColumn("DestinationWell".to_string()))?;

    let mut rows = collect_rows(
        &matrix,
        data_start,
        data_end,
        &columns,
        id_col,
        plate_col,
        well_col,
    )?;
    if rows.is_empty() {
        return Err(AssayError::EmptyData(
            "transfer report contains no data rows".to_string(),
        ));
    }
    check_format(&rows, format)?;

    rows.sort_by(|a, b| {
        a.plate
            .cmp(&b.plate)
            .then_with(|| (a.well.row, a.well.col).cmp(&(b.well.row, b.well.col)))
            .then_with(|| {
                b.concentration
                    .partial_cmp(&a.concentration)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
    });

    let mut plates: BTreeMap<String, Layout> = BTreeMap::new();
    let mut flagged: BTreeMap<String, HashSet<Well>> = BTreeMap::new();
    for row in &rows {
        let layout = plates
            .entry(row.plate.clone())
            .or_insert_with(|| Layout::new(format));
        if row.control_flag {
            flagged.entry(row.plate.clone()).or_default().insert(row.well);
        }
        match &row.sample_id {
            Some(id) => {
                // Duplicate transfers into one well keep the first (highest
                // concentration after the sort above).
                if layout.sample_id.get(row.well)?.is_some() {
                    continue;
                }
                layout.sample_id.set(row.well, Some(id.clone()))?;
                layout.concentration.set(row.well, row.concentration)?;
                layout
                    .source_concentration
                    .set(row.well, row.source_concentration)?;
                layout.transfer_volume.set(row.well, row.transfer_volume)?;
            }
            None => {
                if rules.catch_solvent_transfers {
                    layout.solvent_volume.set(row.well, row.transfer_volume)?;
                }
            }
        }
    }

    let empty = HashSet::new();
    for (name, layout) in plates.iter_mut() {
        layout.assign_well_types(control_name, flagged.get(name).unwrap_or(&empty));
    }

    Ok(TransferParse { format, plates })
}

/// Header row and the first header column under the start rule.
fn locate_start(matrix: &CellMatrix, mode: &StartMode) -> Result<(usize, usize)> {
    match mode {
        StartMode::Keyword {
            keyword,
            column,
            exact,
        } => {
            let row = matrix
                .find_in_column(*column, keyword, *exact, 0)
                .ok_or_else(|| {
                    AssayError::ParseFailed(format!("start keyword '{}' not found", keyword))
                })?;
            Ok((row, 0))
        }
        StartMode::Coordinates { row, col } => Ok((*row, *col)),
    }
}

/// Exclusive end of the data region.
///
/// Keyword and coordinate stops name the terminator row; the empty-line stop
/// is the first row whose mapped cells are all empty, so preamble noise in
/// unmapped columns cannot end the data early.
fn locate_stop(
    matrix: &CellMatrix,
    mode: &StopMode,
    data_start: usize,
    columns: &[(ColumnRole, usize)],
) -> Result<usize> {
    let end = match mode {
        StopMode::Keyword {
            keyword,
            column,
            exact,
        } => matrix
            .find_in_column(*column, keyword, *exact, data_start)
            .ok_or_else(|| {
                AssayError::ParseFailed(format!("stop keyword '{}' not found", keyword))
            })?,
        StopMode::Coordinates { row, .. } => *row,
        StopMode::EmptyLine => (data_start..matrix.n_rows())
            .find(|&r| {
                columns
                    .iter()
                    .all(|(_, c)| *matrix.cell(r, *c) == CellValue::Empty)
            })
            .unwrap_or(matrix.n_rows()),
    };
    if end <= data_start {
        return Err(AssayError::ParseFailed(
            "stop rule ends the data region before it starts".to_string(),
        ));
    }
    Ok(end)
}

/// Maps each rule with a label onto its header column index.
fn resolve_columns(
    matrix: &CellMatrix,
    header_row: usize,
    first_col: usize,
    rules: &TransferRules,
) -> Result<Vec<(ColumnRole, usize)>> {
    let mut columns = Vec::new();
    for rule in &rules.columns {
        let Some(label) = rule.mapped.as_deref() else {
            continue;
        };
        let found = (first_col..matrix.n_cols())
            .find(|&c| matrix.cell(header_row, c).to_text().trim() == label.trim());
        match found {
            Some(c) => columns.push((rule.role, c)),
            None if rule.required => {
                return Err(AssayError::MissingColumn(format!(
                    "'{}' not found in the transfer header",
                    label
                )))
            }
            None => {}
        }
    }
    Ok(columns)
}

fn role_column(columns: &[(ColumnRole, usize)], role: ColumnRole) -> Option<usize> {
    columns.iter().find(|(r, _)| *r == role).map(|(_, c)| *c)
}

fn collect_rows(
    matrix: &CellMatrix,
    data_start: usize,
    data_end: usize,
    columns: &[(ColumnRole, usize)],
    id_col: usize,
    plate_col: usize,
    well_col: usize,
) -> Result<Vec<TransferRow>> {
    let number_at = |row: usize, role: ColumnRole| {
        role_column(columns, role)
            .and_then(|c| matrix.cell(row, c).as_f64())
            .unwrap_or(f64::NAN)
    };

    let mut rows = Vec::new();
    for r in data_start..data_end.min(matrix.n_rows()) {
        let sample_id = match matrix.cell(r, id_col).to_text().trim() {
            "" => None,
            id => Some(id.to_string()),
        };
        let transfer_volume = number_at(r, ColumnRole::TransferVolume);
        // Rows carrying neither an identifier nor a volume are not transfers.
        if sample_id.is_none() && !transfer_volume.is_finite() {
            continue;
        }
        let plate = matrix.cell(r, plate_col).to_text().trim().to_string();
        if plate.is_empty() {
            continue;
        }
        let well = Well::parse(&matrix.cell(r, well_col).to_text())?;
        rows.push(TransferRow {
            plate,
            well,
            concentration: number_at(r, ColumnRole::DestinationConcentration),
            source_concentration: number_at(r, ColumnRole::SourceConcentration),
            transfer_volume,
            sample_id,
            control_flag: role_column(columns, ColumnRole::ControlFlag)
                .map(|c| flag_is_set(matrix.cell(r, c)))
                .unwrap_or(false),
        });
    }
    Ok(rows)
}

/// Every well must fit the assay plate format; a well beyond it means the
/// report addresses a different plate capacity than the ruleset declares.
fn check_format(rows: &[TransferRow], format: PlateFormat) -> Result<()> {
    for row in rows {
        if row.well.row >= format.rows() || row.well.col >= format.columns() {
            let actual = [PlateFormat::W96, PlateFormat::W384, PlateFormat::W1536]
                .into_iter()
                .find(|f| row.well.row < f.rows() && row.well.col < f.columns())
                .map(|f| f.wells())
                .unwrap_or(0);
            return Err(AssayError::PlateFormatMismatch {
                expected: format.wells(),
                actual,
            });
        }
    }
    Ok(())
}

fn flag_is_set(cell: &CellValue) -> bool {
    match cell {
        CellValue::Empty => false,
        CellValue::Number(v) => *v != 0.0,
        CellValue::Text(s) => !matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "" | "0" | "false" | "no"
        ),
    }
}
