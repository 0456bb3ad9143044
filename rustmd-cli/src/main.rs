//! rustmd CLI: convert event workspaces into MD event workspaces.
//!
//! Inputs are JSON files: an event workspace, a target description and an
//! optional run configuration. Command-line flags override the run
//! configuration.
#![allow(clippy::cast_precision_loss, clippy::too_many_lines)]

use clap::{Parser, Subcommand};
use log::{info, warn};
use rustmd_algorithms::{ConversionDriver, MDEventWorkspace};
use rustmd_core::{CancellationToken, EventWorkspace, PreprocessedDetectors, ProgressReporter};
use rustmd_io::{read_event_workspace, read_run_config, read_target_description, DataFileWriter, RunConfig};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    RustmdIo(#[from] rustmd_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] rustmd_core::Error),
}

/// Converts neutron event data into multidimensional event workspaces.
#[derive(Parser)]
#[command(name = "rustmd")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose logging (debug level unless RUST_LOG is set)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert an event workspace into an MD event workspace
    Convert {
        /// Event workspace (JSON)
        input: PathBuf,

        /// Target description (JSON)
        #[arg(short, long)]
        target: PathBuf,

        /// Run configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Box table output (CSV)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Conversion report output (JSON)
        #[arg(long)]
        report: Option<PathBuf>,

        /// Write every box instead of leaves only
        #[arg(long)]
        all_boxes: bool,

        /// Children per dimension when a box splits
        #[arg(long)]
        split_into: Option<usize>,

        /// Events per leaf above which it splits
        #[arg(long)]
        split_threshold: Option<usize>,

        /// Maximum tree depth
        #[arg(long)]
        max_depth: Option<usize>,

        /// Split the output uniformly to this depth before converting
        #[arg(long)]
        min_recursion_depth: Option<usize>,

        /// Worker threads (defaults to all cores)
        #[arg(short = 'j', long)]
        threads: Option<usize>,

        /// Spectra converted between split checks
        #[arg(long)]
        spectra_per_block: Option<usize>,

        /// Convert on the calling thread only
        #[arg(long)]
        serial: bool,
    },

    /// Show information about an event workspace
    Info {
        /// Event workspace (JSON)
        input: PathBuf,
    },
}

/// Logs conversion progress at every tenth of the spectra.
#[derive(Default)]
struct LogProgress {
    last_decile: AtomicUsize,
}

impl ProgressReporter for LogProgress {
    fn report(&self, done: usize, total: usize) {
        if total == 0 {
            return;
        }
        let decile = done * 10 / total;
        if self.last_decile.fetch_max(decile, Ordering::Relaxed) < decile {
            info!("{}% of spectra converted", decile * 10);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_config(
    path: Option<&Path>,
    split_into: Option<usize>,
    split_threshold: Option<usize>,
    max_depth: Option<usize>,
    min_recursion_depth: Option<usize>,
    threads: Option<usize>,
    spectra_per_block: Option<usize>,
    serial: bool,
) -> Result<RunConfig> {
    let mut config = match path {
        Some(path) => read_run_config(path)?,
        None => RunConfig::default(),
    };
    let mut bc = config.box_controller;
    if let Some(split) = split_into {
        bc = bc.with_split_into(split);
    }
    if let Some(threshold) = split_threshold {
        bc = bc.try_with_split_threshold(threshold)?;
    }
    if let Some(depth) = max_depth {
        bc = bc.with_max_depth(depth);
    }
    config.box_controller = bc;

    let mut conversion = config.conversion;
    if let Some(n) = threads {
        conversion = conversion.with_num_threads(n);
    }
    if let Some(n) = spectra_per_block {
        conversion = conversion.try_with_spectra_per_block(n)?;
    }
    if serial {
        conversion = conversion.with_parallel(false);
    }
    config.conversion = conversion;

    if min_recursion_depth.is_some() {
        config.min_recursion_depth = min_recursion_depth;
    }
    Ok(config)
}

fn print_workspace_info(path: &Path, ws: &EventWorkspace) {
    let detectors = PreprocessedDetectors::build(&ws.instrument, ws.number_histograms());
    println!("File: {}", path.display());
    println!("Instrument: {}", ws.instrument.name);
    println!("Run: {} {}", ws.run.run_number, ws.run.title);
    println!("Unit: {}", ws.x_unit);
    println!("L1: {:.4} m", detectors.l1());
    println!(
        "Spectra: {} ({} usable, {} skipped)",
        ws.number_histograms(),
        detectors.len(),
        detectors.skipped()
    );
    println!("Events: {}", ws.number_events());

    let range = ws
        .spectra
        .iter()
        .filter_map(rustmd_core::EventList::tof_range)
        .reduce(|a, b| (a.0.min(b.0), a.1.max(b.1)));
    if let Some((min, max)) = range {
        println!("X range: {min} - {max}");
    }
    let weight: f64 = ws
        .spectra
        .iter()
        .map(rustmd_core::EventList::total_weight)
        .sum();
    println!("Total weight: {weight}");
}

fn print_box_stats(ws: &MDEventWorkspace) {
    for line in ws.box_controller_stats() {
        println!("  {line}");
    }
    for (dim, [min, max]) in ws.dimensions().iter().zip(ws.minimum_extents(usize::MAX)) {
        println!("  {} extent: [{min}, {max}] {}", dim.name, dim.units);
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match cli.command {
        Commands::Convert {
            input,
            target,
            config,
            output,
            report,
            all_boxes,
            split_into,
            split_threshold,
            max_depth,
            min_recursion_depth,
            threads,
            spectra_per_block,
            serial,
        } => {
            let config = run_config(
                config.as_deref(),
                split_into,
                split_threshold,
                max_depth,
                min_recursion_depth,
                threads,
                spectra_per_block,
                serial,
            )?;
            let workspace = read_event_workspace(&input)?;
            let description = read_target_description(&target)?;

            let start = Instant::now();
            let mut driver = ConversionDriver::new(&workspace, description, config.conversion);
            driver.initialize()?;
            let mut md = driver.create_output_workspace(&config.box_controller)?;
            if let Some(depth) = config.min_recursion_depth {
                md.set_min_recursion_depth(depth)?;
            }

            let progress = LogProgress::default();
            let result = driver.run(&mut md, &progress, &CancellationToken::new());
            let elapsed = start.elapsed();

            // Partial results are still written before reporting the error.
            if let Some(path) = &output {
                let mut writer = DataFileWriter::create(path)?;
                writer.write_workspace_boxes_csv(&md, !all_boxes)?;
                info!("wrote box table to {}", path.display());
            }

            let conversion = match result {
                Ok(conversion) => conversion,
                Err(e) => {
                    warn!("workspace status: {}", md.status());
                    return Err(e.into());
                }
            };
            if let Some(path) = &report {
                DataFileWriter::create(path)?.write_json(&conversion)?;
            }

            println!(
                "Converted {} events from {} spectra in {:.2}s",
                conversion.events_added,
                conversion.spectra_converted,
                elapsed.as_secs_f64()
            );
            println!("Skipped spectra: {}", conversion.spectra_skipped);
            println!("Split passes: {}", conversion.split_passes);
            print_box_stats(&md);
        }

        Commands::Info { input } => {
            let workspace = read_event_workspace(&input)?;
            print_workspace_info(&input, &workspace);
        }
    }

    Ok(())
}
