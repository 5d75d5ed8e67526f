//! Flat-file persistence of an assay project.
//!
//! A project directory holds `meta.csv`, `details.csv`, `boolean.csv` and
//! `paths.csv` at the top level, plus one subdirectory per plate with
//! `samples.csv`, `rawdata.csv`, `processed.csv`, `layout.csv` and
//! `references.csv`. Vector-valued cells are JSON arrays with `null`
//! standing in for NaN; everything else is plain text. The archive zip
//! around this directory belongs to the caller.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use serde_json::Value;

use crate::assay::layout::{Layout, WellType};
use crate::assay::plate::{AssayData, PlateRecord, ProcessedPoint};
use crate::assay::sample::SampleRecord;
use crate::error::{AssayError, Result};
use crate::fit::FitOutcome;
use crate::parse::{Dataset, RawData};
use crate::plate::{grid_rows, PlateFormat, PlateGrid, Well};
use crate::process::{Background, References};
use crate::ruleset::{AssayKind, ShowMode};

const MODE_ORDER: [ShowMode; 3] = [ShowMode::Raw, ShowMode::NormFree, ShowMode::NormConst];

/// Source files the project was built from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectPaths {
    pub transfer: Option<PathBuf>,
    pub raw: Vec<PathBuf>,
}

/// Writes a project directory in the persisted flat-file shape.
pub fn write_project<P: AsRef<Path>>(dir: P, data: &AssayData, paths: &ProjectPaths) -> Result<()> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    write_meta(dir, data)?;
    write_details(dir, &data.details)?;
    write_booleans(dir, &data.booleans)?;
    write_paths(dir, paths)?;
    for plate in &data.plates {
        let plate_dir = dir.join(plate_dir_name(&plate.destination));
        fs::create_dir_all(&plate_dir)?;
        write_samples(&plate_dir, &plate.samples)?;
        write_layout(&plate_dir, &plate.layout)?;
        write_processed(&plate_dir, &plate.processed)?;
        if let Some(raw) = &plate.raw_data {
            write_rawdata(&plate_dir, raw)?;
        }
        if let Some(refs) = &plate.references {
            write_references(&plate_dir, refs)?;
        }
    }
    Ok(())
}

/// Reconstructs the in-memory assay from a project directory.
pub fn read_project<P: AsRef<Path>>(dir: P) -> Result<(AssayData, ProjectPaths)> {
    let dir = dir.as_ref();
    let mut data = AssayData {
        details: read_details(dir)?,
        booleans: read_booleans(dir)?,
        ..AssayData::default()
    };
    let paths = read_paths(dir)?;
    for meta in read_meta(dir)? {
        let plate_dir = dir.join(plate_dir_name(&meta.destination));
        let format = PlateFormat::from_wells(meta.wells)?;
        let layout_path = plate_dir.join("layout.csv");
        let layout = if layout_path.exists() {
            read_layout(&layout_path, format)?
        } else {
            Layout::new(format)
        };
        let mut plate = PlateRecord::new(meta.destination, layout);
        plate.data_file = meta.data_file;
        plate.plate_id = meta.plate_id;
        plate.samples = read_samples(&plate_dir.join("samples.csv"))?;
        plate.processed = read_processed(&plate_dir.join("processed.csv"))?;
        plate.raw_data = read_rawdata(&plate_dir.join("rawdata.csv"), format, &plate.data_file)?;
        plate.references = read_references(&plate_dir.join("references.csv"))?;
        data.plates.push(plate);
    }
    Ok((data, paths))
}

fn plate_dir_name(destination: &str) -> String {
    destination.replace(['/', '\\'], "_")
}

// --- cell codecs ------------------------------------------------------

/// Scalar cell; NaN keeps its spelling so `str::parse::<f64>` reads it back.
fn number_cell(v: f64) -> String {
    if v.is_finite() {
        v.to_string()
    } else {
        "NaN".to_string()
    }
}

/// Empty and malformed cells read as NaN.
fn parse_number(cell: &str) -> f64 {
    let t = cell.trim();
    if t.is_empty() {
        f64::NAN
    } else {
        t.parse().unwrap_or(f64::NAN)
    }
}

/// Numeric vector as a JSON array cell, `null` in place of non-finite values.
fn vec_to_json(values: &[f64]) -> String {
    let items: Vec<Value> = values
        .iter()
        .map(|&v| {
            if v.is_finite() {
                serde_json::json!(v)
            } else {
                Value::Null
            }
        })
        .collect();
    Value::Array(items).to_string()
}

fn json_to_vec(cell: &str) -> Result<Vec<f64>> {
    if cell.trim().is_empty() {
        return Ok(Vec::new());
    }
    let value: Value = serde_json::from_str(cell)?;
    let Value::Array(items) = value else {
        return Err(AssayError::ParseFailed(format!(
            "expected a JSON array cell, got '{}'",
            cell
        )));
    };
    items
        .iter()
        .map(|item| match item {
            Value::Null => Ok(f64::NAN),
            Value::Number(n) => n.as_f64().ok_or_else(|| {
                AssayError::ParseFailed(format!("number out of range in '{}'", cell))
            }),
            other => Err(AssayError::ParseFailed(format!(
                "unexpected JSON value {} in a numeric cell",
                other
            ))),
        })
        .collect()
}

fn wells_to_json(wells: &[Well]) -> String {
    let items: Vec<Value> = wells.iter().map(|w| Value::String(w.name())).collect();
    Value::Array(items).to_string()
}

fn json_to_wells(cell: &str) -> Result<Vec<Well>> {
    if cell.trim().is_empty() {
        return Ok(Vec::new());
    }
    let names: Vec<String> = serde_json::from_str(cell)?;
    names.iter().map(|n| Well::parse(n)).collect()
}

fn row_from_label(label: &str) -> Result<usize> {
    Ok(Well::parse(&format!("{}1", label.trim()))?.row)
}

fn background_name(background: Background) -> &'static str {
    match background {
        Background::Control => "Control",
        Background::Solvent => "Solvent",
        Background::Buffer => "Buffer",
        Background::None => "None",
    }
}

fn background_from_name(name: &str) -> Result<Background> {
    match name.trim() {
        "Control" => Ok(Background::Control),
        "Solvent" => Ok(Background::Solvent),
        "Buffer" => Ok(Background::Buffer),
        "None" | "" => Ok(Background::None),
        other => Err(AssayError::ParseFailed(format!(
            "unknown background population '{}'",
            other
        ))),
    }
}

// --- top-level files --------------------------------------------------

struct MetaRow {
    destination: String,
    wells: usize,
    data_file: PathBuf,
    plate_id: String,
}

fn write_meta(dir: &Path, data: &AssayData) -> Result<()> {
    let mut w = csv::Writer::from_path(dir.join("meta.csv"))?;
    w.write_record(["Destination", "Wells", "DataFile", "PlateID"])?;
    for plate in &data.plates {
        w.write_record(&[
            plate.destination.clone(),
            plate.wells.to_string(),
            plate.data_file.to_string_lossy().to_string(),
            plate.plate_id.clone(),
        ])?;
    }
    w.flush()?;
    Ok(())
}

fn read_meta(dir: &Path) -> Result<Vec<MetaRow>> {
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .from_path(dir.join("meta.csv"))?;
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let get = |i: usize| record.get(i).unwrap_or("").trim();
        let wells = get(1).parse::<usize>().map_err(|_| {
            AssayError::ParseFailed(format!("plate capacity '{}' is not an integer", get(1)))
        })?;
        rows.push(MetaRow {
            destination: get(0).to_string(),
            wells,
            data_file: PathBuf::from(get(2)),
            plate_id: get(3).to_string(),
        });
    }
    Ok(rows)
}

/// Shorthand inferred from the long-form assay type plus category.
fn inferred_shorthand(details: &BTreeMap<String, String>) -> Option<&'static str> {
    let kind = AssayKind::parse_legacy(details.get("AssayType")?)?;
    let category = details
        .get("AssayCategory")
        .map(String::as_str)
        .unwrap_or("");
    Some(kind.shorthand(category))
}

fn write_details(dir: &Path, details: &BTreeMap<String, String>) -> Result<()> {
    let mut w = csv::Writer::from_path(dir.join("details.csv"))?;
    w.write_record(["Property", "Value"])?;
    for (key, value) in details {
        w.write_record([key.as_str(), value.as_str()])?;
    }
    // New projects always persist the shorthand explicitly.
    if !details.contains_key("Shorthand") {
        if let Some(code) = inferred_shorthand(details) {
            w.write_record(["Shorthand", code])?;
        }
    }
    w.flush()?;
    Ok(())
}

/// Reads `details.csv`, upgrading the legacy single-column schema.
///
/// Legacy files carry an `AssayDetails` value column and no `Shorthand`
/// entry; the shorthand is inferred from `AssayType` and `AssayCategory`
/// on the way in.
fn read_details(dir: &Path) -> Result<BTreeMap<String, String>> {
    let path = dir.join("details.csv");
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut rows: Vec<(String, String)> = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push((
            record.get(0).unwrap_or("").trim().to_string(),
            record.get(1).unwrap_or("").trim().to_string(),
        ));
    }
    let Some((_, header_value)) = rows.first() else {
        return Ok(BTreeMap::new());
    };
    let legacy = header_value == "AssayDetails";
    let mut details: BTreeMap<String, String> = rows
        .into_iter()
        .skip(1)
        .filter(|(k, _)| !k.is_empty())
        .collect();
    if legacy && !details.contains_key("Shorthand") {
        if let Some(code) = inferred_shorthand(&details) {
            details.insert("Shorthand".to_string(), code.to_string());
        }
    }
    Ok(details)
}

fn write_booleans(dir: &Path, booleans: &BTreeMap<String, bool>) -> Result<()> {
    let mut w = csv::Writer::from_path(dir.join("boolean.csv"))?;
    w.write_record(["Property", "Value"])?;
    for (key, value) in booleans {
        w.write_record([key.as_str(), if *value { "true" } else { "false" }])?;
    }
    w.flush()?;
    Ok(())
}

fn read_booleans(dir: &Path) -> Result<BTreeMap<String, bool>> {
    let path = dir.join("boolean.csv");
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let mut reader = ReaderBuilder::new().flexible(true).from_path(path)?;
    let mut booleans = BTreeMap::new();
    for record in reader.records() {
        let record = record?;
        let key = record.get(0).unwrap_or("").trim().to_string();
        let value = record.get(1).unwrap_or("").trim();
        if !key.is_empty() {
            booleans.insert(key, value.eq_ignore_ascii_case("true") || value == "1");
        }
    }
    Ok(booleans)
}

fn write_paths(dir: &Path, paths: &ProjectPaths) -> Result<()> {
    let mut w = csv::Writer::from_path(dir.join("paths.csv"))?;
    w.write_record(["Kind", "Path"])?;
    if let Some(transfer) = &paths.transfer {
        w.write_record(["Transfer", transfer.to_string_lossy().as_ref()])?;
    }
    for raw in &paths.raw {
        w.write_record(["RawData", raw.to_string_lossy().as_ref()])?;
    }
    w.flush()?;
    Ok(())
}

fn read_paths(dir: &Path) -> Result<ProjectPaths> {
    let path = dir.join("paths.csv");
    if !path.exists() {
        return Ok(ProjectPaths::default());
    }
    let mut reader = ReaderBuilder::new().flexible(true).from_path(path)?;
    let mut paths = ProjectPaths::default();
    for record in reader.records() {
        let record = record?;
        let kind = record.get(0).unwrap_or("").trim();
        let value = PathBuf::from(record.get(1).unwrap_or("").trim());
        match kind {
            "Transfer" => paths.transfer = Some(value),
            "RawData" => paths.raw.push(value),
            _ => {}
        }
    }
    Ok(paths)
}

// --- per-plate files --------------------------------------------------

fn sample_header() -> Vec<String> {
    let mut header: Vec<String> = [
        "SampleID",
        "Locations",
        "Concentrations",
        "Raw",
        "RawSEM",
        "Norm",
        "NormSEM",
        "Excluded",
        "Show",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    for m in 0..MODE_ORDER.len() {
        for field in ["Fit", "Pars", "CI", "StdErr", "RSquare", "DoFit"] {
            header.push(format!("{}{}", field, m));
        }
    }
    header
}

fn fit_cells(outcome: Option<&FitOutcome>) -> [String; 6] {
    match outcome {
        Some(f) => [
            vec_to_json(&f.curve),
            vec_to_json(&f.pars),
            vec_to_json(&f.ci),
            vec_to_json(&f.stderr),
            number_cell(f.r_squared),
            f.do_fit.to_string(),
        ],
        None => Default::default(),
    }
}

fn write_samples(dir: &Path, samples: &[SampleRecord]) -> Result<()> {
    let mut w = csv::Writer::from_path(dir.join("samples.csv"))?;
    w.write_record(&sample_header())?;
    for sample in samples {
        let mut row = vec![
            sample.sample_id.clone(),
            wells_to_json(&sample.locations),
            vec_to_json(&sample.concentrations),
            vec_to_json(&sample.raw),
            vec_to_json(&sample.raw_sem),
            vec_to_json(&sample.norm),
            vec_to_json(&sample.norm_sem),
            serde_json::to_string(&sample.excluded)?,
            u8::from(sample.show).to_string(),
        ];
        for mode in MODE_ORDER {
            row.extend(fit_cells(sample.fits.get(mode)));
        }
        w.write_record(&row)?;
    }
    w.flush()?;
    Ok(())
}

fn read_samples(path: &Path) -> Result<Vec<SampleRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = ReaderBuilder::new().flexible(true).from_path(path)?;
    let mut samples = Vec::new();
    for record in reader.records() {
        let record = record?;
        let get = |i: usize| record.get(i).unwrap_or("");
        let mut sample = SampleRecord::new(
            get(0).trim().to_string(),
            json_to_wells(get(1))?,
            json_to_vec(get(2))?,
            json_to_vec(get(3))?,
            json_to_vec(get(4))?,
        )?;
        sample.norm = json_to_vec(get(5))?;
        sample.norm_sem = json_to_vec(get(6))?;
        if !get(7).trim().is_empty() {
            sample.excluded = serde_json::from_str(get(7))?;
        }
        let show = get(8).trim().parse::<u8>().map_err(|_| {
            AssayError::ParseFailed(format!("show mode '{}' is not an integer", get(8)))
        })?;
        sample.show = ShowMode::try_from(show).map_err(AssayError::ParseFailed)?;
        for (m, mode) in MODE_ORDER.iter().enumerate() {
            let base = 9 + m * 6;
            if get(base).trim().is_empty() {
                continue;
            }
            sample.fits.set(
                *mode,
                FitOutcome {
                    curve: json_to_vec(get(base))?,
                    pars: json_to_vec(get(base + 1))?,
                    ci: json_to_vec(get(base + 2))?,
                    stderr: json_to_vec(get(base + 3))?,
                    r_squared: parse_number(get(base + 4)),
                    do_fit: get(base + 5).trim() == "true",
                },
            );
        }
        sample.check_lengths()?;
        samples.push(sample);
    }
    Ok(samples)
}

fn write_layout(dir: &Path, layout: &Layout) -> Result<()> {
    let mut w = csv::Writer::from_path(dir.join("layout.csv"))?;
    let format = layout.format();
    let mut header = vec!["Grid".to_string(), "Row".to_string()];
    header.extend((1..=format.columns()).map(|c| c.to_string()));
    w.write_record(&header)?;

    let mut write_grid = |name: &str, rows: Vec<Vec<String>>| -> Result<()> {
        for mut row in rows {
            row.insert(0, name.to_string());
            w.write_record(&row)?;
        }
        Ok(())
    };
    let number = |v: &f64| {
        if v.is_finite() {
            v.to_string()
        } else {
            String::new()
        }
    };
    write_grid(
        "SampleID",
        grid_rows(&layout.sample_id, |id| id.clone().unwrap_or_default()),
    )?;
    write_grid("Concentration", grid_rows(&layout.concentration, number))?;
    write_grid(
        "SourceConcentration",
        grid_rows(&layout.source_concentration, number),
    )?;
    write_grid(
        "TransferVolume",
        grid_rows(&layout.transfer_volume, number),
    )?;
    write_grid(
        "SolventVolume",
        grid_rows(&layout.solvent_volume, number),
    )?;
    write_grid(
        "WellType",
        grid_rows(&layout.well_type, |t| t.code().to_string()),
    )?;
    w.flush()?;
    Ok(())
}

fn read_layout(path: &Path, format: PlateFormat) -> Result<Layout> {
    let mut layout = Layout::new(format);
    let mut reader = ReaderBuilder::new().flexible(true).from_path(path)?;
    for record in reader.records() {
        let record = record?;
        let grid = record.get(0).unwrap_or("");
        let row = row_from_label(record.get(1).unwrap_or(""))?;
        for col in 0..format.columns() {
            let well = Well { row, col };
            let cell = record.get(2 + col).unwrap_or("").trim();
            match grid {
                "SampleID" => {
                    if !cell.is_empty() {
                        layout.sample_id.set(well, Some(cell.to_string()))?;
                    }
                }
                "Concentration" => layout.concentration.set(well, parse_number(cell))?,
                "SourceConcentration" => {
                    layout.source_concentration.set(well, parse_number(cell))?
                }
                "TransferVolume" => layout.transfer_volume.set(well, parse_number(cell))?,
                "SolventVolume" => layout.solvent_volume.set(well, parse_number(cell))?,
                "WellType" => layout.well_type.set(well, WellType::from_code(cell)?)?,
                _ => {}
            }
        }
    }
    Ok(layout)
}

fn write_processed(dir: &Path, processed: &[ProcessedPoint]) -> Result<()> {
    let mut w = csv::Writer::from_path(dir.join("processed.csv"))?;
    w.write_record(["SampleID", "X", "Value", "SEM", "Excluded", "Fitted"])?;
    for point in processed {
        w.write_record(&[
            point.sample_id.clone(),
            number_cell(point.x),
            number_cell(point.value),
            number_cell(point.sem),
            point.excluded.to_string(),
            number_cell(point.fitted),
        ])?;
    }
    w.flush()?;
    Ok(())
}

fn read_processed(path: &Path) -> Result<Vec<ProcessedPoint>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = ReaderBuilder::new().flexible(true).from_path(path)?;
    let mut points = Vec::new();
    for record in reader.records() {
        let record = record?;
        let get = |i: usize| record.get(i).unwrap_or("");
        points.push(ProcessedPoint {
            sample_id: get(0).trim().to_string(),
            x: parse_number(get(1)),
            value: parse_number(get(2)),
            sem: parse_number(get(3)),
            excluded: get(4).trim() == "true",
            fitted: parse_number(get(5)),
        });
    }
    Ok(points)
}

fn write_rawdata(dir: &Path, raw: &RawData) -> Result<()> {
    let mut w = csv::Writer::from_path(dir.join("rawdata.csv"))?;
    let format = raw.format;
    let mut header = vec![
        "Dataset".to_string(),
        "Sub".to_string(),
        "Scale".to_string(),
        "Row".to_string(),
    ];
    header.extend((1..=format.columns()).map(|c| c.to_string()));
    w.write_record(&header)?;
    for (d, dataset) in raw.datasets.iter().enumerate() {
        for (s, block) in dataset.blocks.iter().enumerate() {
            let scale = dataset.scale.get(s).copied().unwrap_or(f64::NAN);
            for mut row in grid_rows(block, |v| number_cell(*v)) {
                let mut record = vec![d.to_string(), s.to_string(), number_cell(scale)];
                record.append(&mut row);
                w.write_record(&record)?;
            }
        }
    }
    w.flush()?;
    Ok(())
}

fn read_rawdata(path: &Path, format: PlateFormat, source: &Path) -> Result<Option<RawData>> {
    if !path.exists() {
        return Ok(None);
    }
    let mut reader = ReaderBuilder::new().flexible(true).from_path(path)?;
    let mut blocks: BTreeMap<(usize, usize), (f64, PlateGrid<f64>)> = BTreeMap::new();
    for record in reader.records() {
        let record = record?;
        let get = |i: usize| record.get(i).unwrap_or("");
        let index = |i: usize| {
            get(i).trim().parse::<usize>().map_err(|_| {
                AssayError::ParseFailed(format!("dataset index '{}' is not an integer", get(i)))
            })
        };
        let key = (index(0)?, index(1)?);
        let scale = parse_number(get(2));
        let row = row_from_label(get(3))?;
        let entry = blocks
            .entry(key)
            .or_insert_with(|| (scale, PlateGrid::nan(format)));
        for col in 0..format.columns() {
            entry.1.set(Well { row, col }, parse_number(get(4 + col)))?;
        }
    }
    if blocks.is_empty() {
        return Ok(None);
    }
    let n_datasets = blocks.keys().map(|(d, _)| d + 1).max().unwrap_or(0);
    let mut datasets = Vec::with_capacity(n_datasets);
    for d in 0..n_datasets {
        let mut dataset = Dataset {
            blocks: Vec::new(),
            scale: Vec::new(),
        };
        for ((_, _), (scale, grid)) in blocks.range((d, 0)..=(d, usize::MAX)) {
            dataset.scale.push(*scale);
            dataset.blocks.push(grid.clone());
        }
        datasets.push(dataset);
    }
    Ok(Some(RawData {
        format,
        source: source.to_path_buf(),
        datasets,
    }))
}

fn write_references(dir: &Path, refs: &References) -> Result<()> {
    let mut w = csv::Writer::from_path(dir.join("references.csv"))?;
    w.write_record(["Property", "Value"])?;
    let rows = [
        ("ControlMean", refs.control_mean),
        ("ControlSEM", refs.control_sem),
        ("SolventMean", refs.solvent_mean),
        ("SolventSEM", refs.solvent_sem),
        ("BufferMean", refs.buffer_mean),
        ("BufferSEM", refs.buffer_sem),
        ("BufferToControl", refs.buffer_to_control),
        ("SolventToControl", refs.solvent_to_control),
        ("ZPrimeMean", refs.z_prime_mean),
        ("ZPrimeMedian", refs.z_prime_median),
        ("BackgroundValue", refs.background_value),
    ];
    for (key, value) in rows {
        w.write_record([key, number_cell(value).as_str()])?;
    }
    w.write_record(["Background", background_name(refs.background)])?;
    w.flush()?;
    Ok(())
}

fn read_references(path: &Path) -> Result<Option<References>> {
    if !path.exists() {
        return Ok(None);
    }
    let mut reader = ReaderBuilder::new().flexible(true).from_path(path)?;
    let mut map: BTreeMap<String, String> = BTreeMap::new();
    for record in reader.records() {
        let record = record?;
        map.insert(
            record.get(0).unwrap_or("").trim().to_string(),
            record.get(1).unwrap_or("").trim().to_string(),
        );
    }
    if map.is_empty() {
        return Ok(None);
    }
    let number = |key: &str| map.get(key).map(|v| parse_number(v)).unwrap_or(f64::NAN);
    Ok(Some(References {
        control_mean: number("ControlMean"),
        control_sem: number("ControlSEM"),
        solvent_mean: number("SolventMean"),
        solvent_sem: number("SolventSEM"),
        buffer_mean: number("BufferMean"),
        buffer_sem: number("BufferSEM"),
        buffer_to_control: number("BufferToControl"),
        solvent_to_control: number("SolventToControl"),
        z_prime_mean: number("ZPrimeMean"),
        z_prime_median: number("ZPrimeMedian"),
        background: background_from_name(map.get("Background").map(String::as_str).unwrap_or(""))?,
        background_value: number("BackgroundValue"),
    }))
}
