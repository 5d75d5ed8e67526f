//! Cell matrices: the 2-D, type-classified view of a tabular file.
//!
//! Every parser in this crate consumes a [`CellMatrix`] rather than a file,
//! so the file family is decided by the [`Engine`] alone. The shipped engine
//! reads delimited text with the `csv` crate; an external engine (for
//! spreadsheet formats) only has to produce a `CellMatrix` to participate.

use crate::error::{AssayError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

/// How a file is turned into a 2-D cell matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// Comma-separated text.
    Csv,
    /// Tab-separated text.
    Tsv,
    /// Any single-byte delimiter.
    Delimited { delimiter: String },
}

impl Default for Engine {
    fn default() -> Self {
        Self::Csv
    }
}

impl Engine {
    /// The field delimiter byte for this engine.
    pub fn delimiter(&self) -> Result<u8> {
        match self {
            Self::Csv => Ok(b','),
            Self::Tsv => Ok(b'\t'),
            Self::Delimited { delimiter } => delimiter
                .bytes()
                .next()
                .ok_or_else(|| AssayError::RulesetInvalid("empty delimiter".to_string())),
        }
    }
}

/// One classified cell of a tabular file.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Number(f64),
    Text(String),
}

impl CellValue {
    /// Classify a raw field: empty, numeric, or text.
    pub fn classify(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            Self::Empty
        } else if let Ok(v) = trimmed.parse::<f64>() {
            Self::Number(v)
        } else {
            Self::Text(trimmed.to_string())
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Numeric view (numbers only).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            _ => None,
        }
    }

    /// Text rendering of any cell; empty cells render as `""`.
    pub fn to_text(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Number(v) => {
                if v.fract() == 0.0 && v.abs() < 1e15 {
                    format!("{}", *v as i64)
                } else {
                    format!("{}", v)
                }
            }
            Self::Text(s) => s.clone(),
        }
    }
}

/// Keyword comparison: full case-exact equality when `exact`,
/// case-insensitive substring otherwise.
pub fn keyword_matches(cell: &CellValue, keyword: &str, exact: bool) -> bool {
    let text = cell.to_text();
    if exact {
        text == keyword
    } else {
        text.to_lowercase().contains(&keyword.to_lowercase())
    }
}

/// A rectangular-by-convention grid of classified cells.
///
/// Rows may be ragged in the underlying file; out-of-range reads yield
/// [`CellValue::Empty`] so callers can treat the matrix as rectangular.
#[derive(Debug, Clone)]
pub struct CellMatrix {
    rows: Vec<Vec<CellValue>>,
}

impl CellMatrix {
    /// Wrap pre-classified rows (used by tests and external engines).
    pub fn from_rows(rows: Vec<Vec<CellValue>>) -> Self {
        Self { rows }
    }

    /// Classify a grid of raw strings.
    pub fn from_strings(rows: &[Vec<&str>]) -> Self {
        Self {
            rows: rows
                .iter()
                .map(|r| r.iter().map(|s| CellValue::classify(s)).collect())
                .collect(),
        }
    }

    /// Load a delimited file through an [`Engine`].
    pub fn load(path: &Path, engine: &Engine) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            AssayError::ParseFailed(format!("cannot open '{}': {}", path.display(), e))
        })?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(engine.delimiter()?)
            .from_reader(file);

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(CellValue::classify).collect());
        }
        if rows.is_empty() {
            return Err(AssayError::EmptyData(format!(
                "'{}' holds no rows",
                path.display()
            )));
        }
        Ok(Self { rows })
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    /// Widest row width.
    pub fn n_cols(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Cell at `(row, col)`; out-of-range is `Empty`.
    pub fn cell(&self, row: usize, col: usize) -> &CellValue {
        static EMPTY: CellValue = CellValue::Empty;
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY)
    }

    /// True when every cell of the row is empty (or the row is absent).
    pub fn row_is_empty(&self, row: usize) -> bool {
        self.rows
            .get(row)
            .map_or(true, |r| r.iter().all(CellValue::is_empty))
    }

    /// First match of `keyword` scanning the whole matrix row-major.
    pub fn find_keyword(&self, keyword: &str, exact: bool) -> Option<(usize, usize)> {
        for (r, row) in self.rows.iter().enumerate() {
            for (c, cell) in row.iter().enumerate() {
                if keyword_matches(cell, keyword, exact) {
                    return Some((r, c));
                }
            }
        }
        None
    }

    /// First row at or after `from` whose cell in `col` matches.
    pub fn find_in_column(
        &self,
        col: usize,
        keyword: &str,
        exact: bool,
        from: usize,
    ) -> Option<usize> {
        (from..self.n_rows()).find(|&r| keyword_matches(self.cell(r, col), keyword, exact))
    }

    /// First column at or after `from` whose cell in `row` matches.
    pub fn find_in_row(&self, row: usize, keyword: &str, exact: bool, from: usize) -> Option<usize> {
        (from..self.n_cols()).find(|&c| keyword_matches(self.cell(row, c), keyword, exact))
    }

    /// First fully empty row at or after `from`.
    pub fn first_empty_row(&self, from: usize) -> Option<usize> {
        (from..self.n_rows()).find(|&r| self.row_is_empty(r))
    }
}
