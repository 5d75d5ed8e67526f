//! The central per-plate record and the per-file assembly.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::assay::layout::Layout;
use crate::assay::sample::SampleRecord;
use crate::parse::RawData;
use crate::process::References;

/// One row of the processed long-form view: a sample at one x position.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedPoint {
    pub sample_id: String,
    pub x: f64,
    pub value: f64,
    pub sem: f64,
    pub excluded: bool,
    /// Fitted curve value at `x`; NaN when the mode has no successful fit.
    pub fitted: f64,
}

/// Everything known about one destination plate.
#[derive(Debug, Clone)]
pub struct PlateRecord {
    pub destination: String,
    /// Plate capacity (96/384/1536); capillary devices count capillaries.
    pub wells: usize,
    pub data_file: PathBuf,
    pub plate_id: String,
    pub layout: Layout,
    pub raw_data: Option<RawData>,
    pub samples: Vec<SampleRecord>,
    pub processed: Vec<ProcessedPoint>,
    pub references: Option<References>,
}

impl PlateRecord {
    pub fn new(destination: String, layout: Layout) -> Self {
        let wells = layout.format().wells();
        Self {
            destination,
            wells,
            data_file: PathBuf::new(),
            plate_id: String::new(),
            layout,
            raw_data: None,
            samples: Vec::new(),
            processed: Vec::new(),
            references: None,
        }
    }

    pub fn sample(&self, sample_id: &str) -> Option<&SampleRecord> {
        self.samples.iter().find(|s| s.sample_id == sample_id)
    }
}

/// Ordered plate records plus assay-level metadata.
#[derive(Debug, Clone, Default)]
pub struct AssayData {
    pub plates: Vec<PlateRecord>,
    /// Assay details (property → value) persisted alongside the plates.
    pub details: BTreeMap<String, String>,
    /// Workflow state flags (details-completed, data-assigned, ...).
    pub booleans: BTreeMap<String, bool>,
}

impl AssayData {
    pub fn plate(&self, destination: &str) -> Option<&PlateRecord> {
        self.plates.iter().find(|p| p.destination == destination)
    }

    pub fn plate_mut(&mut self, destination: &str) -> Option<&mut PlateRecord> {
        self.plates
            .iter_mut()
            .find(|p| p.destination == destination)
    }
}

/// Derives the long-form view, each sample rendered in its own show mode.
pub fn processed_view(samples: &[SampleRecord]) -> Vec<ProcessedPoint> {
    let mut view = Vec::new();
    for sample in samples {
        let (values, sems) = sample.values_for(sample.show);
        let curve = sample.fits.get(sample.show).map(|f| f.curve.as_slice());
        for i in 0..sample.len() {
            view.push(ProcessedPoint {
                sample_id: sample.sample_id.clone(),
                x: sample.concentrations[i],
                value: values[i],
                sem: sems[i],
                excluded: sample.excluded[i],
                fitted: curve.and_then(|c| c.get(i)).copied().unwrap_or(f64::NAN),
            });
        }
    }
    view
}
