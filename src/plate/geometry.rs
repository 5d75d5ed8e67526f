//! Plate formats and well coordinates.
//!
//! Wells are addressed by a row letter and a 1-based column number
//! (`"A1"`, `"P24"`, `"AF48"`). Row letters wrap past `Z` into `AA`,
//! `AB`, … for the 1536-well format. Internally both axes are 0-based;
//! the row-major well index runs `0..N`.

use crate::error::{AssayError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Standard microplate formats.
///
/// Row and column counts follow the SBS 2:3 aspect ratio, i.e.
/// rows = ⌈√(N·2/3)⌉ for each supported N.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlateFormat {
    /// 96 wells (8 × 12).
    W96,
    /// 384 wells (16 × 24).
    W384,
    /// 1536 wells (32 × 48).
    W1536,
}

impl PlateFormat {
    /// Resolve a well count to a format.
    pub fn from_wells(wells: usize) -> Result<Self> {
        match wells {
            96 => Ok(Self::W96),
            384 => Ok(Self::W384),
            1536 => Ok(Self::W1536),
            other => Err(AssayError::PlateFormatMismatch {
                expected: 96,
                actual: other,
            }),
        }
    }

    /// Total number of wells.
    pub fn wells(&self) -> usize {
        match self {
            Self::W96 => 96,
            Self::W384 => 384,
            Self::W1536 => 1536,
        }
    }

    /// Number of rows (8/16/32).
    pub fn rows(&self) -> usize {
        match self {
            Self::W96 => 8,
            Self::W384 => 16,
            Self::W1536 => 32,
        }
    }

    /// Number of columns (12/24/48).
    pub fn columns(&self) -> usize {
        self.wells() / self.rows()
    }

    /// Canonical row labels for this format (`A`..`H`, `A`..`P`, `A`..`AF`).
    pub fn row_labels(&self) -> Vec<String> {
        (0..self.rows()).map(row_label).collect()
    }
}

impl fmt::Display for PlateFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wells())
    }
}

/// A well position on a plate, 0-based on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Well {
    /// Row index (0 = `A`).
    pub row: usize,
    /// Column index (0 = column `1`).
    pub col: usize,
}

fn coord_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z]{1,2})0*([1-9][0-9]*)$").unwrap())
}

/// Row index → letter label (`0 → A`, `25 → Z`, `26 → AA`, `31 → AF`).
pub fn row_label(row: usize) -> String {
    if row < 26 {
        ((b'A' + row as u8) as char).to_string()
    } else {
        let first = (b'A' + (row / 26 - 1) as u8) as char;
        let second = (b'A' + (row % 26) as u8) as char;
        format!("{}{}", first, second)
    }
}

fn parse_row_label(label: &str) -> Option<usize> {
    let bytes = label.as_bytes();
    match bytes.len() {
        1 => {
            let c = bytes[0].to_ascii_uppercase();
            c.is_ascii_uppercase().then(|| (c - b'A') as usize)
        }
        2 => {
            let a = bytes[0].to_ascii_uppercase();
            let b = bytes[1].to_ascii_uppercase();
            (a.is_ascii_uppercase() && b.is_ascii_uppercase())
                .then(|| ((a - b'A') as usize + 1) * 26 + (b - b'A') as usize)
        }
        _ => None,
    }
}

impl Well {
    /// Parse a coordinate string (`"A1"`, `"a01"`, `"AF48"`).
    ///
    /// The parse is format-free; bounds are checked when the well is
    /// resolved against a [`PlateFormat`].
    pub fn parse(s: &str) -> Result<Self> {
        let caps = coord_regex()
            .captures(s.trim())
            .ok_or_else(|| AssayError::InvalidWell(s.to_string()))?;
        let row = parse_row_label(&caps[1]).ok_or_else(|| AssayError::InvalidWell(s.to_string()))?;
        let col: usize = caps[2]
            .parse()
            .map_err(|_| AssayError::InvalidWell(s.to_string()))?;
        Ok(Self { row, col: col - 1 })
    }

    /// Row-major index on a plate of the given format.
    pub fn index(&self, format: PlateFormat) -> Result<usize> {
        if self.row >= format.rows() || self.col >= format.columns() {
            return Err(AssayError::InvalidWell(self.name()));
        }
        Ok(self.row * format.columns() + self.col)
    }

    /// Build a well from a row-major index.
    pub fn from_index(index: usize, format: PlateFormat) -> Result<Self> {
        if index >= format.wells() {
            return Err(AssayError::InvalidWell(format!("index {}", index)));
        }
        Ok(Self {
            row: index / format.columns(),
            col: index % format.columns(),
        })
    }

    /// Canonical name (`"A1"`).
    pub fn name(&self) -> String {
        format!("{}{}", row_label(self.row), self.col + 1)
    }
}

impl fmt::Display for Well {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Well {
    type Err = AssayError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// `well_to_index("A1", 96) == 0`; ill-formed input fails with `InvalidWell`.
pub fn well_to_index(well: &str, wells: usize) -> Result<usize> {
    let format = PlateFormat::from_wells(wells)?;
    Well::parse(well)?.index(format)
}

/// `index_to_well(0, 96) == "A1"`.
pub fn index_to_well(index: usize, wells: usize) -> Result<String> {
    let format = PlateFormat::from_wells(wells)?;
    Ok(Well::from_index(index, format)?.name())
}

/// Syntactic check: does `s` look like a well coordinate?
pub fn is_well(s: &str) -> bool {
    Well::parse(s).is_ok()
}

/// Split a coordinate into its row letter(s) and 1-based column number.
pub fn split_coord(s: &str) -> Result<(String, usize)> {
    let well = Well::parse(s)?;
    Ok((row_label(well.row), well.col + 1))
}
