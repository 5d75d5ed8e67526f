//! Assay records: per-plate layouts, sample series, the assembled assay, and
//! its flat-file persistence.

mod layout;
mod plate;
pub mod project;
pub mod recent;
mod sample;

pub use layout::{Layout, WellType};
pub use plate::{processed_view, AssayData, PlateRecord, ProcessedPoint};
pub use project::{read_project, write_project, ProjectPaths};
pub use recent::{
    read_pinned, read_recent, record_recent, write_pinned, write_recent, RecentEntry,
};
pub use sample::{ModeFits, SampleRecord};
