//! End-to-end runs over real transfer reports and instrument exports.

use std::io::Write;
use std::path::PathBuf;

use approx::assert_relative_eq;
use platequant::plate::row_label;
use platequant::prelude::*;
use platequant::ruleset::{Axis, ColumnRole, Separator, StartRule, SubDatasetRules};
use tempfile::NamedTempFile;

/// Two-fold dilution series in Molar, highest dose first.
const DOSES: [f64; 10] = [
    2e-4, 1e-4, 5e-5, 2.5e-5, 1.25e-5, 6.25e-6, 3.125e-6, 1.5625e-6, 7.8125e-7, 3.90625e-7,
];

/// Clean sigmoid response fractions matching `DOSES`, midpoint at 12.5 µM.
const FRACTIONS: [f64; 10] = [1.0, 1.0, 0.95, 0.8, 0.5, 0.2, 0.05, 0.0, 0.0, 0.0];

fn write_lines(lines: &[String]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
    file.flush().unwrap();
    file
}

/// One 96-well block as an instrument export writes it: an anchor line,
/// a column-number header, then eight rows of readings. Wells the closure
/// declines stay empty.
fn grid_lines(anchor: &str, value: &dyn Fn(Well) -> Option<f64>) -> Vec<String> {
    let mut lines = vec![anchor.to_string()];
    let header: Vec<String> = (1..=12).map(|c| c.to_string()).collect();
    lines.push(format!(",{}", header.join(",")));
    for row in 0..8 {
        let cells: Vec<String> = (0..12)
            .map(|col| {
                value(Well { row, col })
                    .map(|v| v.to_string())
                    .unwrap_or_default()
            })
            .collect();
        lines.push(format!("{},{}", row_label(row), cells.join(",")));
    }
    lines
}

fn transfer_header() -> Vec<String> {
    vec![
        "Echo Transfer Report,,,,,".to_string(),
        "Run Date,2026-03-01,,,,".to_string(),
        "[DETAILS],Destination Plate Name,Destination Well,Destination Conc,Sample ID,Transfer Volume"
            .to_string(),
    ]
}

fn transfer_trailer() -> Vec<String> {
    vec![",,,,,".to_string(), "Instrument,Echo 650,,,,".to_string()]
}

/// Dose-response transfer report: ten CMPD-1 doses in row A, eight DMSO
/// controls in row B, eight identifier-less solvent transfers in row C.
fn dose_transfer(plates: &[&str]) -> NamedTempFile {
    let mut lines = transfer_header();
    for plate in plates {
        for (i, dose) in DOSES.iter().enumerate() {
            lines.push(format!(",{},A{},{},CMPD-1,100", plate, i + 1, dose));
        }
        for col in 1..=8 {
            lines.push(format!(",{},B{},0,DMSO,100", plate, col));
        }
        for col in 1..=8 {
            lines.push(format!(",{},C{},,,50", plate, col));
        }
    }
    lines.extend(transfer_trailer());
    write_lines(&lines)
}

/// Matching endpoint export: responses spanning 10 (solvent floor) to 1000
/// (control ceiling), controls and solvent wells alternating around their
/// means so the plate statistics stay exact.
fn dose_raw(gain: f64) -> NamedTempFile {
    write_lines(&grid_lines("Read 1", &|well| match (well.row, well.col) {
        (0, c) if c < DOSES.len() => Some(gain * (10.0 + 990.0 * FRACTIONS[c])),
        (1, c) if c < 8 => Some(gain * if c % 2 == 0 { 995.0 } else { 1005.0 }),
        (2, c) if c < 8 => Some(gain * if c % 2 == 0 { 9.0 } else { 11.0 }),
        _ => None,
    }))
}

/// A definition wired for the files above: keyword-anchored transfer report,
/// keyword-anchored 96-well raw blocks, DMSO controls, solvent background.
fn dose_definition() -> AssayDefinition {
    let mut definition = AssayDefinition::default();
    definition.meta.name = "Kinase inhibition IC50".to_string();
    definition.meta.device = "Echo 650 + EnVision".to_string();
    for rule in definition.transfer_rules.columns.iter_mut() {
        rule.mapped = match rule.role {
            ColumnRole::DestinationPlateName => Some("Destination Plate Name".to_string()),
            ColumnRole::DestinationWell => Some("Destination Well".to_string()),
            ColumnRole::DestinationConcentration => Some("Destination Conc".to_string()),
            ColumnRole::SampleId => Some("Sample ID".to_string()),
            ColumnRole::TransferVolume => Some("Transfer Volume".to_string()),
            _ => None,
        };
    }
    definition.transfer_rules.start = StartRule {
        use_keyword: true,
        use_coordinates: false,
        keyword: "[DETAILS]".to_string(),
        column: 0,
        exact: false,
        ..StartRule::default()
    };
    definition.raw_data_rules.assay_plate_format = 96;
    definition.raw_data_rules.start = StartRule {
        use_keyword: true,
        use_coordinates: false,
        keyword: "Read".to_string(),
        column: 0,
        exact: false,
        ..StartRule::default()
    };
    definition.raw_data_rules.keyword_offset = (2, 1);
    definition.data_processing.control_name = Some("DMSO".to_string());
    definition.data_processing.background = BackgroundSource::Solvent;
    definition
}

/// Rewire the raw rules for a trace export: blocks stacked down the sheet,
/// one per anchor, with the x-scale read from the anchor labels.
fn trace_rules(definition: &mut AssayDefinition, anchor: &str) {
    definition.raw_data_rules.dataset_axis = Axis::Cols;
    definition.raw_data_rules.start.keyword = anchor.to_string();
    definition.raw_data_rules.scale_from_anchor = true;
    definition.raw_data_rules.sub_datasets = Some(SubDatasetRules {
        axis: Axis::Rows,
        separator: Separator::Keyword {
            keyword: anchor.to_string(),
            exact: false,
        },
    });
}

fn melt(t: f64) -> f64 {
    10.0 + 90.0 / (1.0 + ((55.0 - t) / 3.0).exp())
}

#[test]
fn test_dose_response_run_from_files() {
    // Round-trip the definition through disk first; runs start from a file.
    let saved = NamedTempFile::new().unwrap();
    dose_definition().save(saved.path()).unwrap();
    let definition = AssayDefinition::load(saved.path()).unwrap();
    definition.validate().unwrap();

    let transfer = dose_transfer(&["P1"]);
    let raw = dose_raw(1.0);
    let data = process_assay(
        &definition,
        transfer.path(),
        &[raw.path().to_path_buf()],
        &CancelToken::new(),
    )
    .unwrap();

    assert_eq!(data.details["Shorthand"], "EPDR");
    assert!(data.booleans["data-assigned"]);
    assert!(data.booleans["data-analysed"]);
    assert!(!data.booleans["details-completed"]);

    assert_eq!(data.plates.len(), 1);
    let plate = &data.plates[0];
    assert_eq!(plate.destination, "P1");
    assert_eq!(plate.wells, 96);
    assert_eq!(plate.data_file, raw.path());

    let refs = plate.references.as_ref().unwrap();
    assert_relative_eq!(refs.control_mean, 1000.0, epsilon = 1e-9);
    assert_relative_eq!(refs.solvent_mean, 10.0, epsilon = 1e-9);
    assert!(
        refs.z_prime_mean > 0.95,
        "clean plate should score high: {}",
        refs.z_prime_mean
    );

    assert_eq!(plate.samples.len(), 1);
    let sample = &plate.samples[0];
    assert_eq!(sample.sample_id, "CMPD-1");
    assert_eq!(sample.locations.len(), 10);
    assert_eq!(sample.concentrations, DOSES.to_vec());
    assert_relative_eq!(sample.raw[0], 1000.0, epsilon = 1e-9);
    assert_relative_eq!(sample.norm[0], 100.0, epsilon = 1e-9);
    assert_relative_eq!(sample.norm[9], 0.0, epsilon = 1e-9);

    // Free four-parameter fit on the normalised series; inflection in µM.
    let fit = sample.fits.get(ShowMode::NormFree).unwrap();
    assert!(fit.do_fit);
    assert_relative_eq!(fit.pars[2], 12.5, epsilon = 2.0);
    assert!(fit.pars[3] > 0.5, "hill slope: {}", fit.pars[3]);
    assert!(fit.r_squared > 0.98, "r-squared: {}", fit.r_squared);
    assert_eq!(fit.curve.len(), DOSES.len());
    assert_eq!(fit.ci.len(), 4);
    assert!(fit.ci[2].is_finite());

    assert_eq!(plate.processed.len(), DOSES.len());
}

#[test]
fn test_layout_only_run_keeps_wells_and_flags() {
    let definition = dose_definition();
    let transfer = dose_transfer(&["P1"]);
    let data =
        process_assay(&definition, transfer.path(), &[], &CancelToken::new()).unwrap();

    assert!(!data.booleans["data-assigned"]);
    assert!(!data.booleans["data-analysed"]);
    let plate = &data.plates[0];
    assert!(plate.raw_data.is_none());
    assert!(plate.references.is_none());
    assert!(plate.samples.is_empty());

    // Only the rows between the anchor and the blank line reached the
    // layout; the report trailer did not.
    let layout = &plate.layout;
    assert_eq!(layout.sample_id.populated().count(), 18);

    let a1 = Well::parse("A1").unwrap();
    assert_relative_eq!(*layout.concentration.get(a1).unwrap(), 2e-4);
    assert_eq!(*layout.well_type.get(a1).unwrap(), WellType::Sample);
    let b1 = Well::parse("B1").unwrap();
    assert_eq!(*layout.well_type.get(b1).unwrap(), WellType::Control);
    let c1 = Well::parse("C1").unwrap();
    assert_eq!(*layout.well_type.get(c1).unwrap(), WellType::Backfill);
    assert_relative_eq!(*layout.solvent_volume.get(c1).unwrap(), 50.0);
}

#[test]
fn test_constrained_fit_respects_baseline_bounds() {
    // Responses shifted down by 30: the true floor sits far below the
    // constrained box, the true ceiling far below its window.
    const SHIFTED: [f64; 10] = [0.7, 0.7, 0.65, 0.5, 0.2, -0.1, -0.25, -0.3, -0.3, -0.3];
    let definition = dose_definition();
    let transfer = dose_transfer(&["P1"]);
    let raw = write_lines(&grid_lines("Read 1", &|well| match (well.row, well.col) {
        (0, c) if c < SHIFTED.len() => Some(10.0 + 990.0 * SHIFTED[c]),
        (1, c) if c < 8 => Some(if c % 2 == 0 { 995.0 } else { 1005.0 }),
        (2, c) if c < 8 => Some(if c % 2 == 0 { 9.0 } else { 11.0 }),
        _ => None,
    }));
    let data = process_assay(
        &definition,
        transfer.path(),
        &[raw.path().to_path_buf()],
        &CancelToken::new(),
    )
    .unwrap();

    let sample = &data.plates[0].samples[0];
    assert_relative_eq!(sample.norm[0], 70.0, epsilon = 1e-9);
    assert_relative_eq!(sample.norm[9], -30.0, epsilon = 1e-9);

    let constrained = sample.fits.get(ShowMode::NormConst).unwrap();
    assert!(constrained.do_fit);
    assert!(
        constrained.pars[0] >= -10.0 - 1e-6,
        "floor escaped the box: {}",
        constrained.pars[0]
    );
    assert!(
        constrained.pars[0] < -5.0,
        "floor should be pulled towards the bound: {}",
        constrained.pars[0]
    );
    assert!(constrained.pars[1] >= 90.0 - 1e-6);
    assert!(constrained.pars[1] <= 110.0 + 1e-6);

    // The free fit is allowed to find the real plateaus.
    let free = sample.fits.get(ShowMode::NormFree).unwrap();
    assert_relative_eq!(free.pars[0], -30.0, epsilon = 2.0);
    assert_relative_eq!(free.pars[1], 70.0, epsilon = 3.0);
}

#[test]
fn test_point_exclusion_refit_updates_plate() {
    let definition = dose_definition();
    let transfer = dose_transfer(&["P1"]);
    let raw = dose_raw(1.0);
    let mut data = process_assay(
        &definition,
        transfer.path(),
        &[raw.path().to_path_buf()],
        &CancelToken::new(),
    )
    .unwrap();
    let plate = &mut data.plates[0];
    let before = plate.samples[0].fits.get(ShowMode::Raw).unwrap().pars[2];

    // Drop the mid-curve point; nine points remain, so the refit runs.
    let refit = refit_sample(&definition, plate, 0, 4)
        .unwrap()
        .expect("nine points remain");
    assert!(refit.excluded[4]);
    assert_eq!(refit.remaining_points(), 9);
    assert_eq!(refit.concentrations.len(), DOSES.len());
    let after = refit.fits.get(ShowMode::Raw).unwrap().pars[2];
    assert!(after.is_finite());
    assert_ne!(before, after);

    // The stored record is untouched until the refit is applied.
    assert!(!plate.samples[0].excluded[4]);
    apply_refit(plate, 0, refit).unwrap();
    assert!(plate.samples[0].excluded[4]);
    let point = plate
        .processed
        .iter()
        .find(|p| p.x == DOSES[4])
        .unwrap();
    assert!(point.excluded);
}

#[test]
fn test_boltzmann_tm_from_instrument_file() {
    let mut definition = dose_definition();
    definition.meta.name = "Protein melt panel".to_string();
    definition.data_processing.assay_kind = AssayKind::ThermalShift;
    definition.data_processing.assay_category = "nanoDSF".to_string();
    trace_rules(&mut definition, "T=");
    definition.validate().unwrap();

    let mut lines = transfer_header();
    lines.push(",P1,A1,0.000002,PROT-1,2000".to_string());
    lines.push(",P1,A2,0.000002,PROT-1,2000".to_string());
    lines.push(",P1,B1,0,DMSO,2000".to_string());
    lines.push(",P1,B2,0,DMSO,2000".to_string());
    lines.push(",P1,C1,,,2000".to_string());
    lines.push(",P1,C2,,,2000".to_string());
    lines.extend(transfer_trailer());
    let transfer = write_lines(&lines);

    // One block per degree from 20 to 90; two replicate melt traces.
    let mut raw_lines = Vec::new();
    for t in 20..=90 {
        let t = t as f64;
        raw_lines.extend(grid_lines(
            &format!("T={}", t),
            &|well| match (well.row, well.col) {
                (0, 0) => Some(melt(t)),
                (0, 1) => Some(1.02 * melt(t)),
                (1, c) if c < 2 => Some(100.0),
                (2, c) if c < 2 => Some(15.0),
                _ => None,
            },
        ));
    }
    let raw = write_lines(&raw_lines);

    let data = process_assay(
        &definition,
        transfer.path(),
        &[raw.path().to_path_buf()],
        &CancelToken::new(),
    )
    .unwrap();
    assert_eq!(data.details["Shorthand"], "NDSF");
    assert_eq!(data.details["AssayCategory"], "nanoDSF");

    let plate = &data.plates[0];
    assert_eq!(plate.samples.len(), 1);
    let sample = &plate.samples[0];
    assert_eq!(sample.sample_id, "PROT-1");
    assert_eq!(sample.locations.len(), 2);
    assert_eq!(sample.concentrations.len(), 71);
    assert_relative_eq!(sample.concentrations[0], 20.0);
    assert_relative_eq!(sample.concentrations[70], 90.0);
    assert_relative_eq!(sample.raw[0], 1.01 * melt(20.0), epsilon = 1e-9);

    // QC references come from the endpoint block the signal names.
    let refs = plate.references.as_ref().unwrap();
    assert_relative_eq!(refs.control_mean, 100.0, epsilon = 1e-9);
    assert_relative_eq!(refs.solvent_mean, 15.0, epsilon = 1e-9);

    let fit = sample.fits.get(ShowMode::Raw).unwrap();
    assert!(fit.do_fit);
    assert_relative_eq!(fit.pars[2], 55.0, epsilon = 0.5);
    assert!(fit.r_squared > 0.99, "r-squared: {}", fit.r_squared);
    assert_eq!(fit.curve.len(), 71);
}

#[test]
fn test_derivative_tm_from_instrument_file() {
    let mut definition = dose_definition();
    definition.data_processing.assay_kind = AssayKind::ThermalShift;
    definition.data_processing.thermal_method = ThermalMethod::Derivative;
    trace_rules(&mut definition, "T=");

    let mut lines = transfer_header();
    lines.push(",P1,A1,0.000002,PROT-1,2000".to_string());
    lines.push(",P1,B1,0,DMSO,2000".to_string());
    lines.push(",P1,C1,,,2000".to_string());
    lines.extend(transfer_trailer());
    let transfer = write_lines(&lines);

    let mut raw_lines = Vec::new();
    for t in 20..=90 {
        let t = t as f64;
        raw_lines.extend(grid_lines(
            &format!("T={}", t),
            &|well| match (well.row, well.col) {
                (0, 0) => Some(melt(t)),
                (1, 0) => Some(100.0),
                (2, 0) => Some(15.0),
                _ => None,
            },
        ));
    }
    let raw = write_lines(&raw_lines);

    let data = process_assay(
        &definition,
        transfer.path(),
        &[raw.path().to_path_buf()],
        &CancelToken::new(),
    )
    .unwrap();
    assert_eq!(data.details["Shorthand"], "DSF");

    let sample = &data.plates[0].samples[0];
    let fit = sample.fits.get(ShowMode::Raw).unwrap();
    assert!(fit.do_fit);
    assert_eq!(fit.pars.len(), 1);
    assert_relative_eq!(fit.pars[0], 55.0, epsilon = 1.0);
    // The derivative trace is drawn on the original temperature grid.
    assert_eq!(fit.curve.len(), 71);
}

#[test]
fn test_rate_slope_from_timecourse_file() {
    let mut definition = dose_definition();
    definition.data_processing.assay_kind = AssayKind::Rate;
    definition.data_processing.rate_window = Some((0.0, 100.0));
    trace_rules(&mut definition, "Time=");
    definition.validate().unwrap();

    let mut lines = transfer_header();
    lines.push(",P1,A1,0.00001,ENZ-1,100".to_string());
    lines.push(",P1,B1,0,DMSO,100".to_string());
    lines.push(",P1,B2,0,DMSO,100".to_string());
    lines.push(",P1,C1,,,100".to_string());
    lines.push(",P1,C2,,,100".to_string());
    lines.extend(transfer_trailer());
    let transfer = write_lines(&lines);

    // Progress readings every 10 s out to 200 s, rising at 2 units/s.
    let mut raw_lines = Vec::new();
    for k in 0..=20 {
        let t = (k * 10) as f64;
        raw_lines.extend(grid_lines(
            &format!("Time={}", t),
            &|well| match (well.row, well.col) {
                (0, 0) => Some(5.0 + 2.0 * t),
                (1, c) if c < 2 => Some(500.0),
                (2, c) if c < 2 => Some(5.0),
                _ => None,
            },
        ));
    }
    let raw = write_lines(&raw_lines);

    let data = process_assay(
        &definition,
        transfer.path(),
        &[raw.path().to_path_buf()],
        &CancelToken::new(),
    )
    .unwrap();
    assert_eq!(data.details["Shorthand"], "RATE");

    let sample = &data.plates[0].samples[0];
    assert_eq!(sample.concentrations.len(), 21);
    assert_relative_eq!(sample.concentrations[1], 10.0);
    assert_relative_eq!(sample.concentrations[20], 200.0);

    let fit = sample.fits.get(ShowMode::Raw).unwrap();
    assert!(fit.do_fit);
    assert_relative_eq!(fit.pars[0], 2.0, epsilon = 1e-6);
    assert_relative_eq!(fit.pars[1], 5.0, epsilon = 1e-4);
    assert!(fit.r_squared > 0.999);
}

#[test]
fn test_z_prime_from_control_and_solvent_wells() {
    // 32 control and 32 solvent wells alternating ±d around their means,
    // with d chosen so both standard deviations come out at exactly 10.
    // Gap 600 and spreads 10 + 10 put the mean-based Z′ at 0.9.
    let d = 10.0 * (31.0_f64 / 32.0).sqrt();
    let definition = dose_definition();

    let mut lines = transfer_header();
    for (i, dose) in DOSES.iter().enumerate() {
        lines.push(format!(",P1,A{},{},CMPD-1,100", i + 1, dose));
    }
    for row in ["B", "C"] {
        for col in 1..=12 {
            lines.push(format!(",P1,{}{},0,DMSO,100", row, col));
        }
    }
    for col in 1..=8 {
        lines.push(format!(",P1,D{},0,DMSO,100", col));
    }
    for row in ["E", "F"] {
        for col in 1..=12 {
            lines.push(format!(",P1,{}{},,,100", row, col));
        }
    }
    for col in 1..=8 {
        lines.push(format!(",P1,G{},,,100", col));
    }
    lines.extend(transfer_trailer());
    let transfer = write_lines(&lines);

    let raw = write_lines(&grid_lines("Read 1", &|well| {
        let sign = if well.col % 2 == 0 { 1.0 } else { -1.0 };
        match well.row {
            0 if well.col < 10 => Some(100.0 + 600.0 * FRACTIONS[well.col]),
            1 | 2 => Some(700.0 + sign * d),
            3 if well.col < 8 => Some(700.0 + sign * d),
            4 | 5 => Some(100.0 + sign * d),
            6 if well.col < 8 => Some(100.0 + sign * d),
            _ => None,
        }
    }));

    let data = process_assay(
        &definition,
        transfer.path(),
        &[raw.path().to_path_buf()],
        &CancelToken::new(),
    )
    .unwrap();

    let refs = data.plates[0].references.as_ref().unwrap();
    assert_relative_eq!(refs.control_mean, 700.0, epsilon = 1e-9);
    assert_relative_eq!(refs.solvent_mean, 100.0, epsilon = 1e-9);
    assert_relative_eq!(refs.z_prime_mean, 0.9, epsilon = 1e-9);
    // The alternating pattern spreads the MADs wider than the σs, so the
    // median-based score lands below the mean-based one.
    assert!(refs.z_prime_median.is_finite());
    assert!(refs.z_prime_median < refs.z_prime_mean);

    // Normalisation against these references maps the sample row onto 0-100.
    let sample = &data.plates[0].samples[0];
    assert_relative_eq!(sample.norm[0], 100.0, epsilon = 1e-9);
    assert_relative_eq!(sample.norm[9], 0.0, epsilon = 1e-9);
}

#[test]
fn test_across_plate_replicates_pool_once() {
    let mut definition = dose_definition();
    definition.data_processing.replicates = ReplicatePolicy::AcrossPlates;

    let transfer = dose_transfer(&["P1", "P2"]);
    let raw_a = dose_raw(1.0);
    let raw_b = dose_raw(2.0);
    let data = process_assay(
        &definition,
        transfer.path(),
        &[raw_a.path().to_path_buf(), raw_b.path().to_path_buf()],
        &CancelToken::new(),
    )
    .unwrap();

    assert_eq!(data.plates.len(), 2);
    let lead = &data.plates[0];
    assert_eq!(lead.destination, "P1");
    assert_eq!(lead.samples.len(), 1);

    let pooled = &lead.samples[0];
    assert_eq!(pooled.locations.len(), 20);
    assert_relative_eq!(pooled.raw[0], 1500.0, epsilon = 1e-9);
    // Each plate is normalised against its own references before pooling,
    // so the two-fold gain cancels and the replicates agree exactly.
    assert_relative_eq!(pooled.norm[0], 100.0, epsilon = 1e-9);
    assert_relative_eq!(pooled.norm[4], 50.0, epsilon = 1e-9);
    assert!(pooled.norm_sem[4] < 1e-9);

    let follower = &data.plates[1];
    assert_eq!(follower.destination, "P2");
    assert!(follower.samples.is_empty());
    let refs = follower.references.as_ref().unwrap();
    assert_relative_eq!(refs.control_mean, 2000.0, epsilon = 1e-9);
}

#[test]
fn test_cancellation_aborts_processing() {
    let definition = dose_definition();
    let transfer = dose_transfer(&["P1"]);
    let raw = dose_raw(1.0);
    let raws: Vec<PathBuf> = vec![raw.path().to_path_buf()];

    let cancel = CancelToken::new();
    cancel.cancel();
    let err = process_assay(&definition, transfer.path(), &raws, &cancel).unwrap_err();
    assert!(matches!(err, AssayError::Cancelled));
}
