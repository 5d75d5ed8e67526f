//! Dense per-plate grids.
//!
//! A [`PlateGrid`] holds one value per well in row-major order and is the
//! storage unit behind layouts and raw readings. Numeric grids default to
//! NaN so "no reading" and "no transfer" stay distinguishable from zero.

use crate::error::Result;
use crate::plate::geometry::{row_label, PlateFormat, Well};

/// One value per well of a plate.
#[derive(Debug, Clone, PartialEq)]
pub struct PlateGrid<T> {
    format: PlateFormat,
    cells: Vec<T>,
}

impl<T: Clone> PlateGrid<T> {
    /// Create a grid with every cell set to `fill`.
    pub fn filled(format: PlateFormat, fill: T) -> Self {
        Self {
            format,
            cells: vec![fill; format.wells()],
        }
    }

    /// Plate format of this grid.
    pub fn format(&self) -> PlateFormat {
        self.format
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.format.rows()
    }

    /// Number of columns.
    pub fn columns(&self) -> usize {
        self.format.columns()
    }

    /// Value at a well.
    pub fn get(&self, well: Well) -> Result<&T> {
        let idx = well.index(self.format)?;
        Ok(&self.cells[idx])
    }

    /// Set the value at a well.
    pub fn set(&mut self, well: Well, value: T) -> Result<()> {
        let idx = well.index(self.format)?;
        self.cells[idx] = value;
        Ok(())
    }

    /// Iterate wells in row-major order with their values.
    pub fn iter(&self) -> impl Iterator<Item = (Well, &T)> + '_ {
        let cols = self.format.columns();
        self.cells.iter().enumerate().map(move |(i, v)| {
            (
                Well {
                    row: i / cols,
                    col: i % cols,
                },
                v,
            )
        })
    }

    /// All cells in row-major order.
    pub fn cells(&self) -> &[T] {
        &self.cells
    }

    /// One row of cells.
    pub fn row(&self, row: usize) -> &[T] {
        let cols = self.format.columns();
        &self.cells[row * cols..(row + 1) * cols]
    }

    /// Map every cell to a new grid of the same shape.
    pub fn map<U: Clone, F: Fn(&T) -> U>(&self, f: F) -> PlateGrid<U> {
        PlateGrid {
            format: self.format,
            cells: self.cells.iter().map(f).collect(),
        }
    }
}

impl PlateGrid<f64> {
    /// A numeric grid initialised to NaN.
    pub fn nan(format: PlateFormat) -> Self {
        Self::filled(format, f64::NAN)
    }

    /// Wells holding a finite value.
    pub fn populated(&self) -> impl Iterator<Item = (Well, f64)> + '_ {
        self.iter()
            .filter(|(_, v)| v.is_finite())
            .map(|(w, v)| (w, *v))
    }
}

impl PlateGrid<Option<String>> {
    /// An identifier grid initialised to empty.
    pub fn empty(format: PlateFormat) -> Self {
        Self::filled(format, None)
    }

    /// Wells holding an identifier.
    pub fn populated(&self) -> impl Iterator<Item = (Well, &str)> + '_ {
        self.iter()
            .filter_map(|(w, v)| v.as_deref().map(|s| (w, s)))
    }
}

/// Header used when a grid is dumped as a table: `""`, `1`, `2`, ….
pub fn grid_header(format: PlateFormat) -> Vec<String> {
    let mut header = Vec::with_capacity(format.columns() + 1);
    header.push(String::new());
    header.extend((1..=format.columns()).map(|c| c.to_string()));
    header
}

/// Row labels paired with stringified cell values, ready for a CSV writer.
pub fn grid_rows<T, F: Fn(&T) -> String>(grid: &PlateGrid<T>, fmt: F) -> Vec<Vec<String>>
where
    T: Clone,
{
    (0..grid.rows())
        .map(|r| {
            let mut record = Vec::with_capacity(grid.columns() + 1);
            record.push(row_label(r));
            record.extend(grid.row(r).iter().map(&fmt));
            record
        })
        .collect()
}
