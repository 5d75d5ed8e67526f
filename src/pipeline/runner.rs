//! The orchestrator: parsed layouts and raw readings in, fitted records out.
//!
//! [`process_assay`] drives whole files; [`process_plate`] is the per-plate
//! unit underneath it. Both are pure functions of their inputs and produce
//! bit-identical numbers on identical inputs. Point exclusion re-enters
//! through [`refit_sample`], which rebuilds one record aside so the caller
//! can swap it in atomically with [`apply_refit`].

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::assay::{processed_view, AssayData, Layout, PlateRecord, SampleRecord, WellType};
use crate::error::{AssayError, Result};
use crate::fit::{
    compile_equation, fit_any, fit_boltzmann, fit_derivative_tm, fit_linear_rate,
    fit_sigmoid_constrained, fit_sigmoid_free, fit_thompson, CompiledEquation, FitOutcome,
};
use crate::parse::{parse_rawdata, parse_transfer, RawData};
use crate::pipeline::CancelToken;
use crate::plate::{PlateFormat, Well};
use crate::process::{
    aggregate_doses, aggregate_pointwise, compute_references, normalise, normalise_series,
    DoseReading, References, SampleSeries,
};
use crate::ruleset::{
    AssayDefinition, AssayKind, DataProcessing, Normalisation, ReplicatePolicy, ShowMode,
    SignalSelect, ThermalMethod,
};

/// Fewest unexcluded points a refit will run on.
pub const MIN_FIT_POINTS: usize = 5;

/// Runs the full pipeline over one transfer report and its raw-data files.
///
/// Plates come back in the transfer's destination order (ascending by name);
/// raw files pair with plates by position, so a plate past the end of `raws`
/// stays layout-only. Replicate pooling follows the definition's policy.
/// Cancellation is honoured at plate boundaries and between sample fits; a
/// cancelled run discards everything built so far and returns
/// [`AssayError::Cancelled`].
pub fn process_assay(
    definition: &AssayDefinition,
    transfer: &Path,
    raws: &[PathBuf],
    cancel: &CancelToken,
) -> Result<AssayData> {
    definition.validate()?;
    cancel.checkpoint()?;

    let processing = &definition.data_processing;
    let format = PlateFormat::from_wells(definition.raw_data_rules.assay_plate_format)?;
    let parsed = parse_transfer(
        &definition.transfer_rules,
        transfer,
        format,
        processing.control_name.as_deref(),
    )?;

    let mut plates = Vec::with_capacity(parsed.plates.len());
    match processing.replicates {
        ReplicatePolicy::SamePlate => {
            for (i, (destination, layout)) in parsed.plates.into_iter().enumerate() {
                let raw = load_raw(definition, raws, i)?;
                plates.push(process_plate(definition, &destination, layout, raw, cancel)?);
            }
        }
        ReplicatePolicy::AcrossPlates => {
            for (i, (destination, layout)) in parsed.plates.into_iter().enumerate() {
                cancel.checkpoint()?;
                let raw = load_raw(definition, raws, i)?;
                plates.push(prepare_plate(processing, &destination, layout, raw)?);
            }
            pool_across_plates(processing, &mut plates, cancel)?;
        }
    }

    let mut details = definition.default_details.clone();
    details.insert("Shorthand".to_string(), definition.shorthand().to_string());
    if !processing.assay_category.is_empty() {
        details.insert(
            "AssayCategory".to_string(),
            processing.assay_category.clone(),
        );
    }

    let assigned = plates.iter().any(|p| p.raw_data.is_some());
    let analysed = plates.iter().any(|p| !p.samples.is_empty());
    let mut booleans = BTreeMap::new();
    booleans.insert("details-completed".to_string(), false);
    booleans.insert("data-assigned".to_string(), assigned);
    booleans.insert("data-analysed".to_string(), analysed);

    Ok(AssayData {
        plates,
        details,
        booleans,
    })
}

/// Processes one destination plate end to end.
///
/// With no raw data the record stays layout-only. Otherwise: references from
/// the control/solvent/buffer wells, replicate grouping, normalisation, one
/// fit per enabled show mode (failures become records with `do_fit = false`),
/// and the processed view for the default mode.
pub fn process_plate(
    definition: &AssayDefinition,
    destination: &str,
    layout: Layout,
    raw: Option<RawData>,
    cancel: &CancelToken,
) -> Result<PlateRecord> {
    cancel.checkpoint()?;
    let processing = &definition.data_processing;
    let mut plate = prepare_plate(processing, destination, layout, raw)?;

    let custom = compile_custom(processing)?;
    let samples = build_plate_samples(processing, &plate)?;
    let samples = fit_samples(processing, custom.as_ref(), samples, cancel)?;

    plate.processed = processed_view(&samples);
    plate.samples = samples;
    Ok(plate)
}

/// Toggles one point's exclusion and re-runs the current mode's fit.
///
/// The stored record is never touched: the updated copy comes back for the
/// caller to swap in. Returns `Ok(None)` without fitting when fewer than
/// [`MIN_FIT_POINTS`] points would remain.
pub fn refit_sample(
    definition: &AssayDefinition,
    plate: &PlateRecord,
    sample_idx: usize,
    toggle_point: usize,
) -> Result<Option<SampleRecord>> {
    let processing = &definition.data_processing;
    let sample = plate
        .samples
        .get(sample_idx)
        .ok_or_else(|| bad_sample_index(&plate.destination, sample_idx))?;

    let mut updated = sample.clone();
    updated.toggle_exclusion(toggle_point)?;
    if updated.remaining_points() < MIN_FIT_POINTS {
        return Ok(None);
    }

    let custom = compile_custom(processing)?;
    if let Some(outcome) = mode_fit(processing, custom.as_ref(), &updated, updated.show) {
        updated.fits.set(updated.show, outcome);
    }
    updated.check_lengths()?;
    Ok(Some(updated))
}

/// Swaps a refit record into its plate and re-derives the processed view.
pub fn apply_refit(
    plate: &mut PlateRecord,
    sample_idx: usize,
    record: SampleRecord,
) -> Result<()> {
    let destination = plate.destination.clone();
    let slot = plate
        .samples
        .get_mut(sample_idx)
        .ok_or_else(|| bad_sample_index(&destination, sample_idx))?;
    if slot.sample_id != record.sample_id {
        return Err(AssayError::InvalidParameter(format!(
            "refit record is for '{}' but slot {} holds '{}'",
            record.sample_id, sample_idx, slot.sample_id
        )));
    }
    *slot = record;
    plate.processed = processed_view(&plate.samples);
    Ok(())
}

fn bad_sample_index(destination: &str, sample_idx: usize) -> AssayError {
    AssayError::InvalidParameter(format!(
        "plate '{}' has no sample index {}",
        destination, sample_idx
    ))
}

fn load_raw(
    definition: &AssayDefinition,
    raws: &[PathBuf],
    index: usize,
) -> Result<Option<RawData>> {
    match raws.get(index) {
        Some(path) => Ok(Some(parse_rawdata(&definition.raw_data_rules, path)?)),
        None => Ok(None),
    }
}

/// Builds the bare record: format and signal checks, then references.
fn prepare_plate(
    processing: &DataProcessing,
    destination: &str,
    layout: Layout,
    raw: Option<RawData>,
) -> Result<PlateRecord> {
    let mut plate = PlateRecord::new(destination.to_string(), layout);
    let raw = match raw {
        Some(raw) => raw,
        None => return Ok(plate),
    };

    if raw.format != plate.layout.format() {
        return Err(AssayError::PlateFormatMismatch {
            expected: plate.layout.format().wells(),
            actual: raw.format.wells(),
        });
    }
    check_signal(&raw, &processing.signal)?;

    plate.references = Some(plate_references(&plate.layout, &raw, processing));
    plate.data_file = raw.source.clone();
    plate.raw_data = Some(raw);
    Ok(plate)
}

/// Aggregated and normalised records for one plate, not yet fitted.
fn build_plate_samples(
    processing: &DataProcessing,
    plate: &PlateRecord,
) -> Result<Vec<SampleRecord>> {
    let (raw, refs) = match (&plate.raw_data, &plate.references) {
        (Some(raw), Some(refs)) => (raw, refs),
        _ => return Ok(Vec::new()),
    };

    let mut samples = if is_trace(processing.assay_kind) {
        trace_samples(&plate.layout, raw, &processing.signal)?
    } else {
        endpoint_samples(&endpoint_readings(&plate.layout, raw, &processing.signal)?)?
    };
    normalise_samples(&mut samples, refs, &processing.normalisation);
    Ok(samples)
}

/// Runs every enabled mode's fit on every record.
///
/// Records are fitted in parallel; a cancel request makes the remaining
/// closures fall through unfitted and the checkpoint afterwards throws the
/// batch away.
fn fit_samples(
    processing: &DataProcessing,
    custom: Option<&CompiledEquation>,
    samples: Vec<SampleRecord>,
    cancel: &CancelToken,
) -> Result<Vec<SampleRecord>> {
    let fitted: Vec<SampleRecord> = samples
        .into_par_iter()
        .map(|mut sample| {
            if cancel.is_cancelled() {
                return sample;
            }
            sample.show = processing.default_show;
            for &mode in &processing.enabled_modes {
                if let Some(outcome) = mode_fit(processing, custom, &sample, mode) {
                    sample.fits.set(mode, outcome);
                }
            }
            sample
        })
        .collect();
    cancel.checkpoint()?;

    for sample in &fitted {
        sample.check_lengths()?;
    }
    Ok(fitted)
}

/// The mode-appropriate fit for one record, or `None` where the assay kind
/// has no fit. A compiled custom equation replaces the kind dispatch for
/// every mode.
fn mode_fit(
    processing: &DataProcessing,
    custom: Option<&CompiledEquation>,
    sample: &SampleRecord,
    mode: ShowMode,
) -> Option<FitOutcome> {
    let xs = &sample.concentrations;
    let ys = sample.masked_values(mode);
    if let Some(equation) = custom {
        return Some(fit_any(equation, xs, &ys, processing.rate_window));
    }

    match processing.assay_kind {
        AssayKind::SingleDose => None,
        AssayKind::DoseResponse | AssayKind::DoseResponseTimeCourse => Some(match mode {
            ShowMode::NormConst => {
                let (_, sems) = sample.values_for(mode);
                fit_sigmoid_constrained(xs, &ys, sems)
            }
            _ => fit_sigmoid_free(xs, &ys),
        }),
        AssayKind::ThermalShift => Some(match processing.thermal_method {
            ThermalMethod::Boltzmann => fit_boltzmann(xs, &ys),
            ThermalMethod::Derivative => {
                fit_derivative_tm(xs, &ys, processing.tm_peak).into_outcome()
            }
            ThermalMethod::Thompson => fit_thompson(xs, &ys),
        }),
        AssayKind::Rate => Some(fit_linear_rate(xs, &ys, processing.rate_window).outcome),
    }
}

fn compile_custom(processing: &DataProcessing) -> Result<Option<CompiledEquation>> {
    processing
        .custom_equation
        .as_ref()
        .map(|spec| compile_equation(&spec.function, &spec.parameters, &spec.independent))
        .transpose()
}

fn normalise_samples(samples: &mut [SampleRecord], refs: &References, rule: &Normalisation) {
    for sample in samples {
        let (norm, norm_sem) = normalise_series(&sample.raw, &sample.raw_sem, refs, rule);
        sample.norm = norm;
        sample.norm_sem = norm_sem;
    }
}

/// Trace kinds read every sub-dataset per well; endpoint kinds read one.
fn is_trace(kind: AssayKind) -> bool {
    matches!(kind, AssayKind::ThermalShift | AssayKind::Rate)
}

/// Fails when the configured signal points at blocks the file does not have.
fn check_signal(raw: &RawData, signal: &SignalSelect) -> Result<()> {
    let missing = |dataset: usize, sub: usize| {
        AssayError::ParseFailed(format!(
            "raw data file '{}' has no block at dataset {}, sub-dataset {}",
            raw.source.display(),
            dataset,
            sub
        ))
    };
    match *signal {
        SignalSelect::Single { dataset, sub } => {
            raw.block(dataset, sub).ok_or_else(|| missing(dataset, sub))?;
        }
        SignalSelect::Ratio {
            numerator,
            denominator,
            sub,
        } => {
            raw.block(numerator, sub)
                .ok_or_else(|| missing(numerator, sub))?;
            raw.block(denominator, sub)
                .ok_or_else(|| missing(denominator, sub))?;
        }
    }
    Ok(())
}

/// One well's reading at the signal's endpoint block. For trace kinds this
/// is the block the QC populations are read from.
fn endpoint_value(raw: &RawData, signal: &SignalSelect, well: Well) -> f64 {
    match *signal {
        SignalSelect::Single { dataset, sub } => raw.reading(dataset, sub, well),
        SignalSelect::Ratio {
            numerator,
            denominator,
            sub,
        } => raw.reading(numerator, sub, well) / raw.reading(denominator, sub, well),
    }
}

/// Sub-dataset count available to a trace signal.
fn n_subs(raw: &RawData, signal: &SignalSelect) -> usize {
    let blocks = |dataset: usize| {
        raw.datasets
            .get(dataset)
            .map(|d| d.blocks.len())
            .unwrap_or(0)
    };
    match *signal {
        SignalSelect::Single { dataset, .. } => blocks(dataset),
        SignalSelect::Ratio {
            numerator,
            denominator,
            ..
        } => blocks(numerator).min(blocks(denominator)),
    }
}

/// One well's full trace across the signal's sub-datasets.
fn trace_values(raw: &RawData, signal: &SignalSelect, well: Well) -> Vec<f64> {
    (0..n_subs(raw, signal))
        .map(|sub| match *signal {
            SignalSelect::Single { dataset, .. } => raw.reading(dataset, sub, well),
            SignalSelect::Ratio {
                numerator,
                denominator,
                ..
            } => raw.reading(numerator, sub, well) / raw.reading(denominator, sub, well),
        })
        .collect()
}

/// The trace x-axis: the signal dataset's scale (temperature, time). Ratio
/// signals take the numerator's scale.
fn trace_scale(raw: &RawData, signal: &SignalSelect) -> Vec<f64> {
    let count = n_subs(raw, signal);
    let dataset = match *signal {
        SignalSelect::Single { dataset, .. } => dataset,
        SignalSelect::Ratio { numerator, .. } => numerator,
    };
    let scale = raw
        .datasets
        .get(dataset)
        .map(|d| d.scale.as_slice())
        .unwrap_or(&[]);
    (0..count)
        .map(|sub| scale.get(sub).copied().unwrap_or(sub as f64))
        .collect()
}

/// Finite endpoint readings of one well population.
fn population_values(
    layout: &Layout,
    raw: &RawData,
    signal: &SignalSelect,
    kind: WellType,
) -> Vec<f64> {
    layout
        .wells_of_type(kind)
        .into_iter()
        .map(|well| endpoint_value(raw, signal, well))
        .filter(|v| v.is_finite())
        .collect()
}

/// Reference summary from the plate's control, backfill and buffer wells.
fn plate_references(layout: &Layout, raw: &RawData, processing: &DataProcessing) -> References {
    let control = population_values(layout, raw, &processing.signal, WellType::Control);
    let solvent = population_values(layout, raw, &processing.signal, WellType::Backfill);
    let buffer = population_values(layout, raw, &processing.signal, WellType::Reference);
    compute_references(
        &control,
        &solvent,
        &buffer,
        processing.background,
        processing.background_backup,
    )
}

/// Long-form readings of every identified sample well, row-major.
fn endpoint_readings(
    layout: &Layout,
    raw: &RawData,
    signal: &SignalSelect,
) -> Result<Vec<DoseReading>> {
    let mut readings = Vec::new();
    for well in layout.wells_of_type(WellType::Sample) {
        let id = match layout.sample_id.get(well)? {
            Some(id) => id.clone(),
            None => continue,
        };
        readings.push(DoseReading {
            sample_id: id,
            well,
            concentration: *layout.concentration.get(well)?,
            value: endpoint_value(raw, signal, well),
        });
    }
    Ok(readings)
}

fn wells_by_sample(readings: &[DoseReading]) -> HashMap<String, Vec<Well>> {
    let mut wells: HashMap<String, Vec<Well>> = HashMap::new();
    for reading in readings {
        wells
            .entry(reading.sample_id.clone())
            .or_default()
            .push(reading.well);
    }
    wells
}

/// One aggregated series to one record; `wells` keeps row-major well order.
fn series_record(
    series: SampleSeries,
    wells: &mut HashMap<String, Vec<Well>>,
) -> Result<SampleRecord> {
    let locations = wells.remove(&series.sample_id).unwrap_or_default();
    let n = series.points.len();
    let mut concentrations = Vec::with_capacity(n);
    let mut raw = Vec::with_capacity(n);
    let mut raw_sem = Vec::with_capacity(n);
    for point in &series.points {
        concentrations.push(point.concentration);
        raw.push(point.mean);
        raw_sem.push(point.sem);
    }
    SampleRecord::new(series.sample_id, locations, concentrations, raw, raw_sem)
}

fn endpoint_samples(readings: &[DoseReading]) -> Result<Vec<SampleRecord>> {
    let mut wells = wells_by_sample(readings);
    aggregate_doses(readings)
        .into_iter()
        .map(|series| series_record(series, &mut wells))
        .collect()
}

/// Sample-well traces with their identifiers, row-major.
fn well_traces(
    layout: &Layout,
    raw: &RawData,
    signal: &SignalSelect,
) -> Result<Vec<(Well, String, Vec<f64>)>> {
    let mut traces = Vec::new();
    for well in layout.wells_of_type(WellType::Sample) {
        let id = match layout.sample_id.get(well)? {
            Some(id) => id.clone(),
            None => continue,
        };
        traces.push((well, id, trace_values(raw, signal, well)));
    }
    Ok(traces)
}

/// Per-sample records for trace kinds: replicate wells pooled pointwise,
/// x-axis from the sub-dataset scale.
fn trace_samples(
    layout: &Layout,
    raw: &RawData,
    signal: &SignalSelect,
) -> Result<Vec<SampleRecord>> {
    let xs = trace_scale(raw, signal);
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, (Vec<Well>, Vec<Vec<f64>>)> = HashMap::new();
    for (well, id, trace) in well_traces(layout, raw, signal)? {
        let entry = groups.entry(id.clone()).or_insert_with(|| {
            order.push(id);
            (Vec::new(), Vec::new())
        });
        entry.0.push(well);
        entry.1.push(trace);
    }

    order
        .into_iter()
        .map(|sample_id| {
            let (wells, traces) = groups.remove(&sample_id).unwrap_or_default();
            let views: Vec<&[f64]> = traces.iter().map(|t| t.as_slice()).collect();
            let (means, sems) = aggregate_pointwise(&views);
            SampleRecord::new(sample_id, wells, xs[..means.len()].to_vec(), means, sems)
        })
        .collect()
}

/// Pools replicate plates sharing one layout block.
///
/// Plates group by their identified-well grid; each block's pooled records
/// land on its first plate, the other members stay layout-plus-references.
/// Wells are normalised against their own plate's references before pooling,
/// so plate-to-plate gain differences cancel.
fn pool_across_plates(
    processing: &DataProcessing,
    plates: &mut [PlateRecord],
    cancel: &CancelToken,
) -> Result<()> {
    let custom = compile_custom(processing)?;

    let mut blocks: Vec<(Vec<(Well, String)>, Vec<usize>)> = Vec::new();
    for (i, plate) in plates.iter().enumerate() {
        if plate.raw_data.is_none() {
            continue;
        }
        let key = plate.layout.sample_wells();
        match blocks.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(i),
            None => blocks.push((key, vec![i])),
        }
    }

    for (_, members) in blocks {
        cancel.checkpoint()?;
        let records = if is_trace(processing.assay_kind) {
            pooled_trace_records(plates, &members, &processing.signal, &processing.normalisation)?
        } else {
            pooled_endpoint_records(
                plates,
                &members,
                &processing.signal,
                &processing.normalisation,
            )?
        };
        let records = fit_samples(processing, custom.as_ref(), records, cancel)?;
        let lead = members[0];
        plates[lead].processed = processed_view(&records);
        plates[lead].samples = records;
    }
    Ok(())
}

fn pooled_endpoint_records(
    plates: &[PlateRecord],
    members: &[usize],
    signal: &SignalSelect,
    rule: &Normalisation,
) -> Result<Vec<SampleRecord>> {
    let mut raw_readings = Vec::new();
    let mut norm_readings = Vec::new();
    for &index in members {
        let plate = &plates[index];
        let (raw, refs) = match (&plate.raw_data, &plate.references) {
            (Some(raw), Some(refs)) => (raw, refs),
            _ => continue,
        };
        let background = refs.effective_background();
        for reading in endpoint_readings(&plate.layout, raw, signal)? {
            let mut normalised = reading.clone();
            normalised.value = normalise(reading.value, refs.control_mean, background, rule);
            norm_readings.push(normalised);
            raw_readings.push(reading);
        }
    }

    // Both reading sets share (sample, concentration) structure, so the two
    // aggregations zip point for point.
    let mut wells = wells_by_sample(&raw_readings);
    aggregate_doses(&raw_readings)
        .into_iter()
        .zip(aggregate_doses(&norm_readings))
        .map(|(raw_series, norm_series)| {
            let mut record = series_record(raw_series, &mut wells)?;
            record.norm = norm_series.points.iter().map(|p| p.mean).collect();
            record.norm_sem = norm_series.points.iter().map(|p| p.sem).collect();
            record.check_lengths()?;
            Ok(record)
        })
        .collect()
}

fn pooled_trace_records(
    plates: &[PlateRecord],
    members: &[usize],
    signal: &SignalSelect,
    rule: &Normalisation,
) -> Result<Vec<SampleRecord>> {
    let mut xs: Option<Vec<f64>> = None;
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, (Vec<Well>, Vec<Vec<f64>>, Vec<Vec<f64>>)> = HashMap::new();

    for &index in members {
        let plate = &plates[index];
        let (raw, refs) = match (&plate.raw_data, &plate.references) {
            (Some(raw), Some(refs)) => (raw, refs),
            _ => continue,
        };
        if xs.is_none() {
            xs = Some(trace_scale(raw, signal));
        }
        let background = refs.effective_background();
        for (well, id, trace) in well_traces(&plate.layout, raw, signal)? {
            let norm: Vec<f64> = trace
                .iter()
                .map(|&v| normalise(v, refs.control_mean, background, rule))
                .collect();
            let entry = groups.entry(id.clone()).or_insert_with(|| {
                order.push(id);
                (Vec::new(), Vec::new(), Vec::new())
            });
            entry.0.push(well);
            entry.1.push(trace);
            entry.2.push(norm);
        }
    }

    let xs = xs.unwrap_or_default();
    order
        .into_iter()
        .map(|sample_id| {
            let (wells, raw_traces, norm_traces) = groups.remove(&sample_id).unwrap_or_default();
            let raw_views: Vec<&[f64]> = raw_traces.iter().map(|t| t.as_slice()).collect();
            let (raw_means, raw_sems) = aggregate_pointwise(&raw_views);
            let mut record = SampleRecord::new(
                sample_id,
                wells,
                xs[..raw_means.len()].to_vec(),
                raw_means,
                raw_sems,
            )?;
            let norm_views: Vec<&[f64]> = norm_traces.iter().map(|t| t.as_slice()).collect();
            let (norm_means, norm_sems) = aggregate_pointwise(&norm_views);
            record.norm = norm_means;
            record.norm_sem = norm_sems;
            record.check_lengths()?;
            Ok(record)
        })
        .collect()
}
