//! platequant - plate-assay analysis CLI
//!
//! Command-line interface for ruleset-driven analysis of liquid-handler
//! transfer reports and instrument raw-data files.

use clap::{Parser, Subcommand};
use platequant::assay::{read_project, write_project, ProjectPaths};
use platequant::error::Result;
use platequant::pipeline::{process_assay, CancelToken};
use platequant::ruleset::AssayDefinition;
use std::path::PathBuf;

/// Plate-assay analysis from declarative rulesets
#[derive(Parser)]
#[command(name = "platequant")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate an assay definition file
    Validate {
        /// Path to the assay definition JSON
        #[arg(short, long)]
        definition: PathBuf,
    },

    /// Analyse a transfer report and its raw-data files
    Analyze {
        /// Path to the assay definition JSON
        #[arg(short, long)]
        definition: PathBuf,

        /// Path to the transfer report
        #[arg(short, long)]
        transfer: PathBuf,

        /// Raw-data file, one per destination plate (repeatable)
        #[arg(short, long)]
        raw: Vec<PathBuf>,

        /// Output project directory
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Summarise a saved project directory
    Report {
        /// Path to the project directory
        #[arg(short, long)]
        project: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { definition } => cmd_validate(&definition),

        Commands::Analyze {
            definition,
            transfer,
            raw,
            out,
        } => cmd_analyze(&definition, &transfer, &raw, &out),

        Commands::Report { project } => cmd_report(&project),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Validate an assay definition
fn cmd_validate(definition_path: &PathBuf) -> Result<()> {
    eprintln!("Loading assay definition from {:?}...", definition_path);
    let definition = AssayDefinition::load(definition_path)?;
    definition.validate()?;

    println!("Definition is valid");
    println!(
        "  Assay: {} ({})",
        definition.meta.name,
        definition.shorthand()
    );
    println!("  Device: {}", definition.meta.device);
    println!(
        "  Plate format: {} wells",
        definition.raw_data_rules.assay_plate_format
    );
    Ok(())
}

/// Run the full pipeline and write a project directory
fn cmd_analyze(
    definition_path: &PathBuf,
    transfer_path: &PathBuf,
    raw_paths: &[PathBuf],
    out_dir: &PathBuf,
) -> Result<()> {
    eprintln!("Loading assay definition from {:?}...", definition_path);
    let definition = AssayDefinition::load(definition_path)?;
    definition.validate()?;

    eprintln!(
        "Running {} analysis on {:?} with {} raw file(s)...",
        definition.shorthand(),
        transfer_path,
        raw_paths.len()
    );
    let data = process_assay(&definition, transfer_path, raw_paths, &CancelToken::new())?;

    for plate in &data.plates {
        match &plate.references {
            Some(refs) => println!(
                "  {}: {} samples, Z' {:.3} (median {:.3}), control {:.1}, solvent {:.1}",
                plate.destination,
                plate.samples.len(),
                refs.z_prime_mean,
                refs.z_prime_median,
                refs.control_mean,
                refs.solvent_mean
            ),
            None => println!("  {}: layout only, no raw data assigned", plate.destination),
        }
    }

    eprintln!("Writing project to {:?}...", out_dir);
    let paths = ProjectPaths {
        transfer: Some(transfer_path.clone()),
        raw: raw_paths.to_vec(),
    };
    write_project(out_dir, &data, &paths)?;

    eprintln!("Done! {} plate(s) analysed", data.plates.len());
    Ok(())
}

/// Reload a project and print references and fit summaries
fn cmd_report(project_dir: &PathBuf) -> Result<()> {
    eprintln!("Reading project from {:?}...", project_dir);
    let (data, paths) = read_project(project_dir)?;

    if let Some(shorthand) = data.details.get("Shorthand") {
        println!("Assay: {}", shorthand);
    }
    if let Some(transfer) = &paths.transfer {
        println!("Transfer report: {}", transfer.display());
    }

    for plate in &data.plates {
        println!();
        println!("{} ({} wells)", plate.destination, plate.wells);
        if !plate.data_file.as_os_str().is_empty() {
            println!("  data file: {}", plate.data_file.display());
        }
        if let Some(refs) = &plate.references {
            println!(
                "  references: control {:.1} (sem {:.1}), solvent {:.1}, buffer {:.1}",
                refs.control_mean, refs.control_sem, refs.solvent_mean, refs.buffer_mean
            );
            println!(
                "  Z': mean {:.3}, median {:.3}",
                refs.z_prime_mean, refs.z_prime_median
            );
        }
        for sample in &plate.samples {
            let excluded = sample.excluded.iter().filter(|&&e| e).count();
            match sample.fits.get(sample.show) {
                Some(fit) if fit.do_fit => {
                    let pars: Vec<String> =
                        fit.pars.iter().map(|p| format!("{:.4}", p)).collect();
                    println!(
                        "    {:<20} {:>3} points ({} excluded)  r2 {:.4}  [{}]",
                        sample.sample_id,
                        sample.len(),
                        excluded,
                        fit.r_squared,
                        pars.join(", ")
                    );
                }
                Some(_) => println!(
                    "    {:<20} {:>3} points ({} excluded)  fit failed",
                    sample.sample_id,
                    sample.len(),
                    excluded
                ),
                None => println!(
                    "    {:<20} {:>3} points ({} excluded)",
                    sample.sample_id,
                    sample.len(),
                    excluded
                ),
            }
        }
    }
    Ok(())
}
