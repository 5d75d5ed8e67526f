//! Analysis core for plate-based biophysical and biochemical assays.
//!
//! This library turns liquid-handler transfer reports and instrument raw-data
//! exports into normalised, fitted and quality-controlled assay records,
//! driven entirely by declarative rulesets.
//!
//! # Overview
//!
//! The library is organized into composable modules:
//!
//! - **plate**: Plate formats, well coordinates and dense per-plate grids
//! - **table**: Cell matrices loaded from delimited text files
//! - **ruleset**: Declarative parsing and processing rules (one JSON document)
//! - **parse**: Ruleset-driven transfer-report and raw-data parsers
//! - **process**: Reference summaries, background subtraction, normalisation,
//!   replicate aggregation
//! - **fit**: Curve models and the damped least-squares engine
//! - **assay**: Layout, sample, plate and assay records plus flat-file
//!   project persistence
//! - **pipeline**: The orchestrator, point-exclusion refits and cancellation
//!
//! # Example
//!
//! ```no_run
//! use std::path::{Path, PathBuf};
//!
//! use platequant::prelude::*;
//!
//! // Load the assay definition and run the full pipeline
//! let definition = AssayDefinition::load(Path::new("ic50.json")).unwrap();
//! let raws = vec![PathBuf::from("plate1.csv")];
//! let data = process_assay(
//!     &definition,
//!     Path::new("transfer.csv"),
//!     &raws,
//!     &CancelToken::new(),
//! )
//! .unwrap();
//!
//! // Persist the project directory
//! let paths = ProjectPaths {
//!     transfer: Some(PathBuf::from("transfer.csv")),
//!     raw: raws,
//! };
//! write_project("ic50-run", &data, &paths).unwrap();
//! ```

pub mod assay;
pub mod error;
pub mod fit;
pub mod parse;
pub mod pipeline;
pub mod plate;
pub mod process;
pub mod ruleset;
pub mod table;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::assay::{
        processed_view, read_pinned, read_project, read_recent, record_recent, write_pinned,
        write_project, write_recent, AssayData, Layout, ModeFits, PlateRecord, ProcessedPoint,
        ProjectPaths, RecentEntry, SampleRecord, WellType,
    };
    pub use crate::error::{AssayError, Result};
    pub use crate::fit::{
        compile_equation, fit_any, fit_boltzmann, fit_derivative_tm, fit_linear_rate,
        fit_sigmoid_constrained, fit_sigmoid_free, fit_thompson, CompiledEquation, FitOutcome,
        Model, Peak, RateFit, TmFit,
    };
    pub use crate::parse::{parse_rawdata, parse_transfer, Dataset, RawData, TransferParse};
    pub use crate::pipeline::{
        apply_refit, process_assay, process_plate, refit_sample, CancelToken, MIN_FIT_POINTS,
    };
    pub use crate::plate::{PlateFormat, PlateGrid, Well};
    pub use crate::process::{
        aggregate_doses, aggregate_pointwise, compute_references, normalise, normalise_series,
        replicate_correlation, z_prime, z_prime_median, AggregatedPoint, Background,
        CorrelationFit, DoseReading, References, SampleSeries,
    };
    pub use crate::ruleset::{
        validate_definition, AssayDefinition, AssayKind, BackgroundSource, CustomEquationSpec,
        DataProcessing, Normalisation, NormalisationKind, RawDataRules, ReplicatePolicy, ShowMode,
        SignalSelect, ThermalMethod, TransferRules,
    };
}
