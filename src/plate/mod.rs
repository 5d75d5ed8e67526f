//! Plate formats, well coordinates and dense per-plate grids.

mod geometry;
mod grid;

pub use geometry::{
    index_to_well, is_well, row_label, split_coord, well_to_index, PlateFormat, Well,
};
pub use grid::{grid_header, grid_rows, PlateGrid};
