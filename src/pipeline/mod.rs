//! Orchestration of the full analysis: parsing, references, normalisation,
//! fitting and point-exclusion refits, with cooperative cancellation.

mod cancel;
mod runner;

pub use cancel::CancelToken;
pub use runner::{apply_refit, process_assay, process_plate, refit_sample, MIN_FIT_POINTS};
