//! Project persistence: flat-file round trips and the recent-project lists.

use std::fs;
use std::io::Write;

use approx::assert_relative_eq;
use platequant::plate::row_label;
use platequant::prelude::*;
use platequant::ruleset::{ColumnRole, StartRule};
use tempfile::{tempdir, NamedTempFile};

const DOSES: [f64; 10] = [
    2e-4, 1e-4, 5e-5, 2.5e-5, 1.25e-5, 6.25e-6, 3.125e-6, 1.5625e-6, 7.8125e-7, 3.90625e-7,
];

const FRACTIONS: [f64; 10] = [1.0, 1.0, 0.95, 0.8, 0.5, 0.2, 0.05, 0.0, 0.0, 0.0];

fn write_lines(lines: &[String]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
    file.flush().unwrap();
    file
}

fn dose_definition() -> AssayDefinition {
    let mut definition = AssayDefinition::default();
    definition.meta.name = "Kinase inhibition IC50".to_string();
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

fn dose_transfer() -> NamedTempFile {
    let mut lines = vec![
        "Echo Transfer Report,,,,,".to_string(),
        "[DETAILS],Destination Plate Name,Destination Well,Destination Conc,Sample ID,Transfer Volume"
            .to_string(),
    ];
    for (i, dose) in DOSES.iter().enumerate() {
        lines.push(format!(",P1,A{},{},CMPD-1,100", i + 1, dose));
    }
    for col in 1..=8 {
        lines.push(format!(",P1,B{},0,DMSO,100", col));
    }
    for col in 1..=8 {
        lines.push(format!(",P1,C{},,,50", col));
    }
    lines.push(",,,,,".to_string());
    write_lines(&lines)
}

fn dose_raw() -> NamedTempFile {
    let mut lines = vec![
        "Read 1".to_string(),
        format!(
            ",{}",
            (1..=12).map(|c| c.to_string()).collect::<Vec<_>>().join(",")
        ),
    ];
    for row in 0..8 {
        let cells: Vec<String> = (0..12)
            .map(|col| match (row, col) {
                (0, c) if c < DOSES.len() => (10.0 + 990.0 * FRACTIONS[c]).to_string(),
                (1, c) if c < 8 => if c % 2 == 0 { "995" } else { "1005" }.to_string(),
                (2, c) if c < 8 => if c % 2 == 0 { "9" } else { "11" }.to_string(),
                _ => String::new(),
            })
            .collect();
        lines.push(format!("{},{}", row_label(row), cells.join(",")));
    }
    write_lines(&lines)
}

/// One fully analysed single-plate run plus the input files that fed it.
fn analysed_run() -> (AssayData, NamedTempFile, NamedTempFile) {
    let definition = dose_definition();
    let transfer = dose_transfer();
    let raw = dose_raw();
    let data = process_assay(
        &definition,
        transfer.path(),
        &[raw.path().to_path_buf()],
        &CancelToken::new(),
    )
    .unwrap();
    (data, transfer, raw)
}

#[test]
fn test_project_round_trip() {
    let (data, transfer, raw) = analysed_run();
    let dir = tempdir().unwrap();
    let project = dir.path().join("ic50-run");
    let paths = ProjectPaths {
        transfer: Some(transfer.path().to_path_buf()),
        raw: vec![raw.path().to_path_buf()],
    };
    write_project(&project, &data, &paths).unwrap();

    let (back, back_paths) = read_project(&project).unwrap();
    assert_eq!(back.details, data.details);
    assert_eq!(back.booleans, data.booleans);
    assert_eq!(back_paths.transfer, paths.transfer);
    assert_eq!(back_paths.raw, paths.raw);

    assert_eq!(back.plates.len(), 1);
    let orig = &data.plates[0];
    let read = &back.plates[0];
    assert_eq!(read.destination, orig.destination);
    assert_eq!(read.wells, orig.wells);
    assert_eq!(read.data_file, orig.data_file);

    // Sample series come back value for value; JSON cells round-trip floats
    // exactly and spell missing sems as null.
    let stored = &orig.samples[0];
    let loaded = &read.samples[0];
    assert_eq!(loaded.sample_id, stored.sample_id);
    assert_eq!(loaded.locations, stored.locations);
    assert_eq!(loaded.concentrations, stored.concentrations);
    assert_eq!(loaded.raw, stored.raw);
    assert_eq!(loaded.norm, stored.norm);
    assert!(loaded.raw_sem.iter().all(|v| v.is_nan()));
    assert_eq!(loaded.excluded, stored.excluded);
    assert_eq!(loaded.show, stored.show);

    let fit = stored.fits.get(ShowMode::NormFree).unwrap();
    let fit_back = loaded.fits.get(ShowMode::NormFree).unwrap();
    assert_eq!(fit_back.pars, fit.pars);
    assert_eq!(fit_back.curve, fit.curve);
    assert_eq!(fit_back.ci, fit.ci);
    assert_eq!(fit_back.stderr, fit.stderr);
    assert_eq!(fit_back.r_squared, fit.r_squared);
    assert!(fit_back.do_fit);

    let refs = orig.references.as_ref().unwrap();
    let refs_back = read.references.as_ref().unwrap();
    assert_eq!(refs_back.control_mean, refs.control_mean);
    assert_eq!(refs_back.solvent_mean, refs.solvent_mean);
    assert_eq!(refs_back.z_prime_mean, refs.z_prime_mean);
    assert_eq!(refs_back.z_prime_median, refs.z_prime_median);
    assert_eq!(refs_back.background, refs.background);
    assert_eq!(refs_back.background_value, refs.background_value);
    assert!(refs_back.buffer_mean.is_nan());

    let a1 = Well::parse("A1").unwrap();
    assert_eq!(read.layout.sample_id.populated().count(), 18);
    assert_relative_eq!(*read.layout.concentration.get(a1).unwrap(), 2e-4);
    assert_eq!(
        *read.layout.well_type.get(Well::parse("C1").unwrap()).unwrap(),
        WellType::Backfill
    );

    let raw_back = read.raw_data.as_ref().unwrap();
    assert_relative_eq!(raw_back.reading(0, 0, a1), 1000.0);

    assert_eq!(read.processed.len(), orig.processed.len());
    assert_eq!(read.processed[0].sample_id, orig.processed[0].sample_id);
    assert_eq!(read.processed[0].x, orig.processed[0].x);
    assert_eq!(read.processed[0].value, orig.processed[0].value);
}

#[test]
fn test_point_exclusion_survives_round_trip() {
    let (mut data, _transfer, _raw) = analysed_run();
    let definition = dose_definition();
    let plate = &mut data.plates[0];
    let refit = refit_sample(&definition, plate, 0, 4)
        .unwrap()
        .expect("nine points remain");
    let pars = refit.fits.get(ShowMode::Raw).unwrap().pars.clone();
    apply_refit(plate, 0, refit).unwrap();

    let dir = tempdir().unwrap();
    let project = dir.path().join("excluded-run");
    write_project(&project, &data, &ProjectPaths::default()).unwrap();

    let (back, _) = read_project(&project).unwrap();
    let sample = &back.plates[0].samples[0];
    assert!(sample.excluded[4]);
    assert_eq!(sample.remaining_points(), 9);
    assert_eq!(sample.fits.get(ShowMode::Raw).unwrap().pars, pars);
    let point = back.plates[0]
        .processed
        .iter()
        .find(|p| p.x == DOSES[4])
        .unwrap();
    assert!(point.excluded);
}

#[test]
fn test_layout_only_plate_round_trip() {
    let definition = dose_definition();
    let transfer = dose_transfer();
    let data =
        process_assay(&definition, transfer.path(), &[], &CancelToken::new()).unwrap();

    let dir = tempdir().unwrap();
    let project = dir.path().join("layout-only");
    write_project(&project, &data, &ProjectPaths::default()).unwrap();

    let (back, paths) = read_project(&project).unwrap();
    let plate = &back.plates[0];
    assert!(plate.samples.is_empty());
    assert!(plate.raw_data.is_none());
    assert!(plate.references.is_none());
    assert_eq!(plate.layout.sample_id.populated().count(), 18);
    assert!(paths.transfer.is_none());
    assert!(!back.booleans["data-assigned"]);
}

#[test]
fn test_legacy_details_upgraded_on_project_read() {
    // Old projects carry a single AssayDetails column and no Shorthand row;
    // reading one infers the code from the long-form assay type.
    let dir = tempdir().unwrap();
    let project = dir.path().join("legacy-run");
    fs::create_dir_all(&project).unwrap();

    let mut meta = fs::File::create(project.join("meta.csv")).unwrap();
    writeln!(meta, "Destination,Wells,DataFile,PlateID").unwrap();
    writeln!(meta, "P1,96,,").unwrap();
    drop(meta);

    let mut details = fs::File::create(project.join("details.csv")).unwrap();
    writeln!(details, ",AssayDetails").unwrap();
    writeln!(details, "AssayName,Kinase panel 7").unwrap();
    writeln!(details, "AssayType,thermal_shift").unwrap();
    writeln!(details, "AssayCategory,nanoDSF").unwrap();
    drop(details);

    let (back, paths) = read_project(&project).unwrap();
    assert_eq!(back.details["Shorthand"], "NDSF");
    assert_eq!(back.details["AssayName"], "Kinase panel 7");
    assert!(back.booleans.is_empty());
    assert!(paths.transfer.is_none());

    // The plate listed in meta.csv comes back as an empty 96-well record.
    assert_eq!(back.plates.len(), 1);
    assert_eq!(back.plates[0].destination, "P1");
    assert_eq!(back.plates[0].wells, 96);
    assert!(back.plates[0].samples.is_empty());
}

#[test]
fn test_recent_list_prunes_deleted_projects() {
    let dir = tempdir().unwrap();
    let list = dir.path().join("recent.csv");

    let entry = |name: &str, project: &std::path::Path, stamp: &str| RecentEntry {
        file_name: name.to_string(),
        assay_category: "Kinase".to_string(),
        shorthand: "EPDR".to_string(),
        full_path: project.to_path_buf(),
        date_time: stamp.to_string(),
    };

    let (data, _transfer, _raw) = analysed_run();
    let first = dir.path().join("run-a");
    let second = dir.path().join("run-b");
    write_project(&first, &data, &ProjectPaths::default()).unwrap();
    write_project(&second, &data, &ProjectPaths::default()).unwrap();

    record_recent(&list, entry("run-a", &first, "2026-08-01T10:00:00")).unwrap();
    record_recent(&list, entry("run-b", &second, "2026-08-02T09:00:00")).unwrap();

    let entries = read_recent(&list).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].file_name, "run-b");

    // A project deleted on disk silently drops off the list.
    fs::remove_dir_all(&second).unwrap();
    let entries = read_recent(&list).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].file_name, "run-a");
    assert_eq!(entries[0].shorthand, "EPDR");
}

#[test]
fn test_pinned_codes_round_trip() {
    let dir = tempdir().unwrap();
    let file = dir.path().join("pinned.csv");
    assert!(read_pinned(&file).unwrap().is_empty());

    let codes = vec!["EPDR".to_string(), "NDSF".to_string()];
    write_pinned(&file, &codes).unwrap();
    assert_eq!(read_pinned(&file).unwrap(), codes);
}
