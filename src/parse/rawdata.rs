//! Ruleset-driven extraction of plate-reader raw data files.
//!
//! An instrument file carries one or more datasets (wavelengths, channels)
//! anchored along the dataset axis, each holding one or more sub-datasets
//! (time points, temperatures) along the orthogonal axis. Every anchor cell
//! plus the ruleset's keyword offset names the origin of one rows×cols
//! numeric block sized to the assay plate format.
//!
//! For a keyword start rule, `Column` names the scan line: the column
//! scanned downwards when the dataset axis is `Rows`, the row scanned
//! rightwards when it is `Cols`.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{AssayError, Result};
use crate::plate::{PlateFormat, PlateGrid, Well};
use crate::ruleset::{Axis, RawDataRules, Separator, StartMode};
use crate::table::{CellMatrix, CellValue};

/// One dataset: plate blocks indexed by sub-dataset, plus the numeric scale
/// (temperature, time) read from the sub-anchors when the ruleset asks for it.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub blocks: Vec<PlateGrid<f64>>,
    pub scale: Vec<f64>,
}

/// Parsed raw-data file.
#[derive(Debug, Clone)]
pub struct RawData {
    pub format: PlateFormat,
    pub source: PathBuf,
    pub datasets: Vec<Dataset>,
}

impl RawData {
    /// Block at `(dataset, sub)`, if present.
    pub fn block(&self, dataset: usize, sub: usize) -> Option<&PlateGrid<f64>> {
        self.datasets.get(dataset).and_then(|d| d.blocks.get(sub))
    }

    /// Reading of one well at `(dataset, sub)`.
    pub fn reading(&self, dataset: usize, sub: usize, well: Well) -> f64 {
        self.block(dataset, sub)
            .and_then(|b| b.get(well).ok())
            .copied()
            .unwrap_or(f64::NAN)
    }
}

/// Parses an instrument file into datasets of plate blocks.
pub fn parse_rawdata(rules: &RawDataRules, path: &Path) -> Result<RawData> {
    let matrix = CellMatrix::load(path, &rules.engine)?;
    rules.verification.check(&matrix)?;
    let format = PlateFormat::from_wells(rules.assay_plate_format)?;

    let (first, start_keyword) = match rules.start.resolve()? {
        StartMode::Keyword {
            keyword,
            column,
            exact,
        } => {
            let anchor = match rules.dataset_axis {
                Axis::Rows => matrix
                    .find_in_column(column, &keyword, exact, 0)
                    .map(|r| (r, column)),
                Axis::Cols => matrix
                    .find_in_row(column, &keyword, exact, 0)
                    .map(|c| (column, c)),
            }
            .ok_or_else(|| {
                AssayError::ParseFailed(format!("dataset anchor '{}' not found", keyword))
            })?;
            (anchor, Some((keyword, exact)))
        }
        StartMode::Coordinates { row, col } => ((row, col), None),
    };
    let start_keyword = start_keyword
        .as_ref()
        .map(|(kw, exact)| (kw.as_str(), *exact));

    let dataset_anchors = if rules.multiple_datasets {
        anchors_along(
            &matrix,
            first,
            rules.dataset_axis,
            &rules.dataset_separator,
            start_keyword,
            rules.keyword_offset,
            format,
        )?
    } else {
        vec![first]
    };

    let mut datasets = Vec::with_capacity(dataset_anchors.len());
    for &anchor in &dataset_anchors {
        let sub_anchors = match &rules.sub_datasets {
            Some(sub) => anchors_along(
                &matrix,
                anchor,
                sub.axis,
                &sub.separator,
                start_keyword,
                rules.keyword_offset,
                format,
            )?,
            None => vec![anchor],
        };
        let mut blocks = Vec::with_capacity(sub_anchors.len());
        let mut scale = Vec::with_capacity(sub_anchors.len());
        for (k, &sub_anchor) in sub_anchors.iter().enumerate() {
            let origin = block_origin(sub_anchor, rules.keyword_offset)?;
            blocks.push(slice_block(&matrix, origin, format)?);
            scale.push(if rules.scale_from_anchor {
                scale_value(matrix.cell(sub_anchor.0, sub_anchor.1))
            } else {
                k as f64
            });
        }
        datasets.push(Dataset { blocks, scale });
    }

    Ok(RawData {
        format,
        source: path.to_path_buf(),
        datasets,
    })
}

/// All anchors on one scan line, starting with `first`.
fn anchors_along(
    matrix: &CellMatrix,
    first: (usize, usize),
    axis: Axis,
    separator: &Separator,
    start_keyword: Option<(&str, bool)>,
    offset: (i64, i64),
    format: PlateFormat,
) -> Result<Vec<(usize, usize)>> {
    let mut anchors = vec![first];
    match separator {
        Separator::SameAsMain => {
            let (keyword, exact) = start_keyword.ok_or_else(|| {
                AssayError::ParseFailed(
                    "separator repeats the anchor keyword, but the start rule uses coordinates"
                        .to_string(),
                )
            })?;
            anchors.extend(scan_keyword(matrix, first, axis, keyword, exact));
        }
        Separator::Keyword { keyword, exact } => {
            anchors.extend(scan_keyword(matrix, first, axis, keyword, *exact));
        }
        Separator::SetDistance { offset: stride } => {
            let mut k = 1usize;
            loop {
                let anchor = match axis {
                    Axis::Rows => (first.0 + k * stride, first.1),
                    Axis::Cols => (first.0, first.1 + k * stride),
                };
                if !block_fits(matrix, anchor, offset, format) {
                    break;
                }
                anchors.push(anchor);
                k += 1;
            }
        }
    }
    Ok(anchors)
}

/// Keyword matches after `first` on the same scan line.
fn scan_keyword(
    matrix: &CellMatrix,
    first: (usize, usize),
    axis: Axis,
    keyword: &str,
    exact: bool,
) -> Vec<(usize, usize)> {
    let mut found = Vec::new();
    match axis {
        Axis::Rows => {
            let mut from = first.0 + 1;
            while let Some(r) = matrix.find_in_column(first.1, keyword, exact, from) {
                found.push((r, first.1));
                from = r + 1;
            }
        }
        Axis::Cols => {
            let mut from = first.1 + 1;
            while let Some(c) = matrix.find_in_row(first.0, keyword, exact, from) {
                found.push((first.0, c));
                from = c + 1;
            }
        }
    }
    found
}

fn block_origin(anchor: (usize, usize), offset: (i64, i64)) -> Result<(usize, usize)> {
    let row = anchor.0 as i64 + offset.0;
    let col = anchor.1 as i64 + offset.1;
    if row < 0 || col < 0 {
        return Err(AssayError::ParseFailed(format!(
            "keyword offset ({}, {}) leaves the sheet from anchor ({}, {})",
            offset.0, offset.1, anchor.0, anchor.1
        )));
    }
    Ok((row as usize, col as usize))
}

fn block_fits(
    matrix: &CellMatrix,
    anchor: (usize, usize),
    offset: (i64, i64),
    format: PlateFormat,
) -> bool {
    match block_origin(anchor, offset) {
        Ok((r, c)) => r + format.rows() <= matrix.n_rows() && c + format.columns() <= matrix.n_cols(),
        Err(_) => false,
    }
}

/// One rows×cols block with canonical well indexing; unreadable cells → NaN.
fn slice_block(
    matrix: &CellMatrix,
    origin: (usize, usize),
    format: PlateFormat,
) -> Result<PlateGrid<f64>> {
    if origin.0 + format.rows() > matrix.n_rows() || origin.1 + format.columns() > matrix.n_cols()
    {
        return Err(AssayError::ParseFailed(format!(
            "{}-well block at ({}, {}) exceeds the sheet",
            format.wells(),
            origin.0,
            origin.1
        )));
    }
    let mut grid = PlateGrid::nan(format);
    for r in 0..format.rows() {
        for c in 0..format.columns() {
            if let Some(v) = matrix.cell(origin.0 + r, origin.1 + c).as_f64() {
                grid.set(Well { row: r, col: c }, v)?;
            }
        }
    }
    Ok(grid)
}

fn scale_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[-+]?[0-9]*\.?[0-9]+(?:[eE][-+]?[0-9]+)?").unwrap())
}

/// Numeric value of an anchor label (`"T=25.5"` → 25.5).
fn scale_value(cell: &CellValue) -> f64 {
    match cell {
        CellValue::Number(v) => *v,
        CellValue::Text(s) => scale_regex()
            .find(s)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(f64::NAN),
        CellValue::Empty => f64::NAN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plate::row_label;
    use crate::ruleset::{StartRule, SubDatasetRules};
    use approx::assert_relative_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn block_lines(anchor: &str, base: f64) -> Vec<String> {
        let mut lines = vec![anchor.to_string()];
        let header: Vec<String> = (1..=12).map(|c| c.to_string()).collect();
        lines.push(format!(",{}", header.join(",")));
        for r in 0..8 {
            let cells: Vec<String> = (0..12)
                .map(|c| format!("{}", base + (r * 12 + c) as f64))
                .collect();
            lines.push(format!("{},{}", row_label(r), cells.join(",")));
        }
        lines
    }

    fn write_file(lines: &[String]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file.flush().unwrap();
        file
    }

    /// Pads a CSV line to `cols` fields so side-by-side blocks align.
    fn pad_to(line: &str, cols: usize) -> String {
        let have = line.matches(',').count() + 1;
        format!("{}{}", line, ",".repeat(cols - have))
    }

    fn side_by_side() -> NamedTempFile {
        let left = block_lines("T=25", 1.0);
        let right = block_lines("T=30", 201.0);
        let lines: Vec<String> = left
            .iter()
            .zip(right.iter())
            .map(|(l, r)| format!("{},{}", pad_to(l, 14), r))
            .collect();
        write_file(&lines)
    }

    fn keyword_rules() -> RawDataRules {
        RawDataRules {
            assay_plate_format: 96,
            start: StartRule {
                use_keyword: true,
                use_coordinates: false,
                keyword: "Read".to_string(),
                column: 0,
                exact: false,
                ..StartRule::default()
            },
            keyword_offset: (2, 1),
            ..RawDataRules::default()
        }
    }

    #[test]
    fn test_single_dataset() {
        let file = write_file(&block_lines("Read 1", 1.0));
        let raw = parse_rawdata(&keyword_rules(), file.path()).unwrap();
        assert_eq!(raw.datasets.len(), 1);
        assert_eq!(raw.datasets[0].blocks.len(), 1);
        assert_relative_eq!(raw.reading(0, 0, Well::parse("A1").unwrap()), 1.0);
        assert_relative_eq!(raw.reading(0, 0, Well::parse("H12").unwrap()), 96.0);
        assert_relative_eq!(raw.datasets[0].scale[0], 0.0);
    }

    #[test]
    fn test_multiple_datasets_same_keyword() {
        let mut lines = block_lines("Read 1", 1.0);
        lines.extend(block_lines("Read 2", 101.0));
        let file = write_file(&lines);
        let mut rules = keyword_rules();
        rules.multiple_datasets = true;
        let raw = parse_rawdata(&rules, file.path()).unwrap();
        assert_eq!(raw.datasets.len(), 2);
        assert_relative_eq!(raw.reading(0, 0, Well::parse("A1").unwrap()), 1.0);
        assert_relative_eq!(raw.reading(1, 0, Well::parse("A1").unwrap()), 101.0);
    }

    #[test]
    fn test_sub_datasets_by_stride() {
        // Two 96-well blocks side by side, anchors carrying temperatures.
        let file = side_by_side();
        let mut rules = keyword_rules();
        rules.start.keyword = "T=".to_string();
        rules.sub_datasets = Some(SubDatasetRules {
            axis: Axis::Cols,
            separator: Separator::SetDistance { offset: 14 },
        });
        rules.scale_from_anchor = true;
        let raw = parse_rawdata(&rules, file.path()).unwrap();

        assert_eq!(raw.datasets.len(), 1);
        assert_eq!(raw.datasets[0].blocks.len(), 2);
        assert_relative_eq!(raw.datasets[0].scale[0], 25.0);
        assert_relative_eq!(raw.datasets[0].scale[1], 30.0);
        assert_relative_eq!(raw.reading(0, 1, Well::parse("A1").unwrap()), 201.0);
    }

    #[test]
    fn test_sub_datasets_by_keyword() {
        let file = side_by_side();
        let mut rules = keyword_rules();
        rules.start.keyword = "T=".to_string();
        rules.sub_datasets = Some(SubDatasetRules {
            axis: Axis::Cols,
            separator: Separator::Keyword {
                keyword: "T=".to_string(),
                exact: false,
            },
        });
        rules.scale_from_anchor = true;
        let raw = parse_rawdata(&rules, file.path()).unwrap();
        assert_eq!(raw.datasets[0].blocks.len(), 2);
        assert_relative_eq!(raw.datasets[0].scale[1], 30.0);
    }

    #[test]
    fn test_missing_anchor_fails() {
        let file = write_file(&block_lines("Kinetic run", 1.0));
        let err = parse_rawdata(&keyword_rules(), file.path()).unwrap_err();
        assert!(matches!(err, AssayError::ParseFailed(_)));
    }

    #[test]
    fn test_truncated_block_fails() {
        let mut lines = block_lines("Read 1", 1.0);
        lines.truncate(6);
        let file = write_file(&lines);
        let err = parse_rawdata(&keyword_rules(), file.path()).unwrap_err();
        assert!(matches!(err, AssayError::ParseFailed(_)));
    }

    #[test]
    fn test_unreadable_cells_become_nan() {
        let mut lines = block_lines("Read 1", 1.0);
        lines[2] = lines[2].replace("1,2,3", "1,OVER,3");
        let file = write_file(&lines);
        let raw = parse_rawdata(&keyword_rules(), file.path()).unwrap();
        assert!(raw.reading(0, 0, Well::parse("A2").unwrap()).is_nan());
        assert_relative_eq!(raw.reading(0, 0, Well::parse("A3").unwrap()), 3.0);
    }

    #[test]
    fn test_coordinates_with_same_as_main_rejected() {
        let mut lines = block_lines("Read 1", 1.0);
        lines.extend(block_lines("Read 2", 101.0));
        let file = write_file(&lines);
        let mut rules = keyword_rules();
        rules.start = StartRule::default();
        rules.keyword_offset = (2, 1);
        rules.multiple_datasets = true;
        let err = parse_rawdata(&rules, file.path()).unwrap_err();
        assert!(matches!(err, AssayError::ParseFailed(_)));
    }
}
