//! Shared rule vocabulary used by both parsing rulesets.

use crate::error::{AssayError, Result};
use crate::table::{CellMatrix, keyword_matches};
use serde::{Deserialize, Serialize};

pub use crate::table::Engine;

/// Scan axis inside a cell matrix. On the wire: `0` = rows, `1` = columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Axis {
    Rows,
    Cols,
}

impl Axis {
    /// The other axis (sub-datasets scan orthogonally to datasets).
    pub fn orthogonal(&self) -> Self {
        match self {
            Self::Rows => Self::Cols,
            Self::Cols => Self::Rows,
        }
    }
}

impl Default for Axis {
    fn default() -> Self {
        Self::Rows
    }
}

impl TryFrom<u8> for Axis {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Rows),
            1 => Ok(Self::Cols),
            other => Err(format!("axis must be 0 (rows) or 1 (cols), got {}", other)),
        }
    }
}

impl From<Axis> for u8 {
    fn from(axis: Axis) -> Self {
        match axis {
            Axis::Rows => 0,
            Axis::Cols => 1,
        }
    }
}

/// Optional keyword check that accepts or rejects a file before parsing.
///
/// With `axis = Rows` the keyword is searched along row `row`; with
/// `axis = Cols` it is searched down column `column`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Verification {
    #[serde(rename = "Use")]
    pub enabled: bool,
    pub keyword: String,
    pub axis: Axis,
    pub row: usize,
    pub column: usize,
    pub exact: bool,
}

impl Default for Verification {
    fn default() -> Self {
        Self {
            enabled: false,
            keyword: String::new(),
            axis: Axis::Rows,
            row: 0,
            column: 0,
            exact: false,
        }
    }
}

impl Verification {
    /// Run the check against a loaded matrix. Disabled checks always pass.
    pub fn check(&self, matrix: &CellMatrix) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let found = match self.axis {
            Axis::Rows => matrix
                .find_in_row(self.row, &self.keyword, self.exact, 0)
                .is_some(),
            Axis::Cols => matrix
                .find_in_column(self.column, &self.keyword, self.exact, 0)
                .is_some(),
        };
        if found {
            Ok(())
        } else {
            Err(AssayError::ParseFailed(format!(
                "verification keyword '{}' not found",
                self.keyword
            )))
        }
    }
}

/// Where parsing begins. Boolean switches on the wire; [`StartRule::resolve`]
/// turns them into a single [`StartMode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct StartRule {
    pub use_keyword: bool,
    pub keyword: String,
    /// Column scanned for the keyword.
    pub column: usize,
    pub exact: bool,
    pub use_coordinates: bool,
    pub row: usize,
    pub col: usize,
}

impl Default for StartRule {
    fn default() -> Self {
        Self {
            use_keyword: false,
            keyword: String::new(),
            column: 0,
            exact: false,
            use_coordinates: true,
            row: 0,
            col: 0,
        }
    }
}

/// Resolved start rule.
#[derive(Debug, Clone, PartialEq)]
pub enum StartMode {
    Keyword {
        keyword: String,
        column: usize,
        exact: bool,
    },
    Coordinates {
        row: usize,
        col: usize,
    },
}

impl StartRule {
    pub fn resolve(&self) -> Result<StartMode> {
        match (self.use_keyword, self.use_coordinates) {
            (true, false) => {
                if self.keyword.is_empty() {
                    return Err(AssayError::RulesetInvalid(
                        "start rule uses a keyword but none is set".to_string(),
                    ));
                }
                Ok(StartMode::Keyword {
                    keyword: self.keyword.clone(),
                    column: self.column,
                    exact: self.exact,
                })
            }
            (false, true) => Ok(StartMode::Coordinates {
                row: self.row,
                col: self.col,
            }),
            _ => Err(AssayError::RulesetInvalid(
                "start rule must enable exactly one of keyword or coordinates".to_string(),
            )),
        }
    }
}

/// Where parsing ends. Same switch shape as [`StartRule`] plus the
/// empty-line option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct StopRule {
    pub use_keyword: bool,
    pub keyword: String,
    pub column: usize,
    pub exact: bool,
    pub use_coordinates: bool,
    pub row: usize,
    pub col: usize,
    pub use_empty_line: bool,
}

impl Default for StopRule {
    fn default() -> Self {
        Self {
            use_keyword: false,
            keyword: String::new(),
            column: 0,
            exact: false,
            use_coordinates: false,
            row: 0,
            col: 0,
            use_empty_line: true,
        }
    }
}

/// Resolved stop rule.
#[derive(Debug, Clone, PartialEq)]
pub enum StopMode {
    Keyword {
        keyword: String,
        column: usize,
        exact: bool,
    },
    Coordinates {
        row: usize,
        col: usize,
    },
    EmptyLine,
}

impl StopRule {
    pub fn resolve(&self) -> Result<StopMode> {
        match (self.use_keyword, self.use_coordinates, self.use_empty_line) {
            (true, false, false) => {
                if self.keyword.is_empty() {
                    return Err(AssayError::RulesetInvalid(
                        "stop rule uses a keyword but none is set".to_string(),
                    ));
                }
                Ok(StopMode::Keyword {
                    keyword: self.keyword.clone(),
                    column: self.column,
                    exact: self.exact,
                })
            }
            (false, true, false) => Ok(StopMode::Coordinates {
                row: self.row,
                col: self.col,
            }),
            (false, false, true) => Ok(StopMode::EmptyLine),
            _ => Err(AssayError::RulesetInvalid(
                "stop rule must enable exactly one of keyword, coordinates, or empty line"
                    .to_string(),
            )),
        }
    }
}

/// How consecutive dataset (or sub-dataset) anchors are located.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", rename_all_fields = "PascalCase")]
pub enum Separator {
    /// Repeat the main anchor keyword.
    SameAsMain,
    /// Scan for a different keyword.
    Keyword { keyword: String, exact: bool },
    /// Anchors sit a fixed stride apart.
    SetDistance { offset: usize },
}

impl Default for Separator {
    fn default() -> Self {
        Self::SameAsMain
    }
}

/// True when `cell` matches under the rule's comparison mode.
pub fn cell_matches(matrix: &CellMatrix, row: usize, col: usize, keyword: &str, exact: bool) -> bool {
    keyword_matches(matrix.cell(row, col), keyword, exact)
}
