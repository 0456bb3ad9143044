//! Conversion driver: event workspace in, MD event workspace out.
//!
//! Valid spectra are converted in blocks. Within a block, spectra run in
//! parallel and insert into the shared box tree; between blocks the split
//! heuristic decides whether the tree is split. A final split pass and a
//! cache refresh always run, also after a failure.

use crate::converter::EventListConverter;
use crate::md_workspace::{MDEventWorkspace, WorkspaceStatus};
use crate::transform::{create_transform, CoordTransform};
use log::{debug, info, warn};
use rayon::prelude::*;
use rustmd_core::{
    BoxControllerConfig, CancellationToken, ConversionConfig, CoordT, Error, EventWorkspace,
    MDEventBatch, PreprocessedDetectors, ProgressReporter, Result, TargetDescription,
    UnitsConversionHelper,
};
use std::fmt;
use std::ops::Range;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Lifecycle of a [`ConversionDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Constructed, nothing prepared yet.
    Created,
    /// Detectors, units and transform are ready.
    Initialized,
    /// Spectra are being converted.
    Running,
    /// Final split pass and cache refresh.
    Finalizing,
    /// Finished successfully.
    Done,
    /// Stopped by an error or cancellation.
    Failed,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Summary of one conversion run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConversionReport {
    /// Run index of the events added.
    pub run_index: u16,
    /// Events inserted into the output.
    pub events_added: usize,
    /// Spectra in the input workspace.
    pub spectra_total: usize,
    /// Spectra whose events were converted.
    pub spectra_converted: usize,
    /// Spectra skipped for lack of a usable detector.
    pub spectra_skipped: usize,
    /// Split passes run while converting, including the final one.
    pub split_passes: usize,
    /// Leaves in the output after the run.
    pub num_boxes: usize,
    /// Grid boxes in the output after the run.
    pub num_grid_boxes: usize,
}

struct Prepared {
    detectors: PreprocessedDetectors,
    units: UnitsConversionHelper,
    transform: Box<dyn CoordTransform>,
    generic_coord: Vec<CoordT>,
    generic_in_range: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct BlockStats {
    events: usize,
    spectra: usize,
}

impl BlockStats {
    fn merge(self, other: Self) -> Self {
        Self {
            events: self.events + other.events,
            spectra: self.spectra + other.spectra,
        }
    }
}

/// Orchestrates the conversion of one event workspace.
pub struct ConversionDriver<'a> {
    input: &'a EventWorkspace,
    description: TargetDescription,
    config: ConversionConfig,
    state: DriverState,
    prepared: Option<Prepared>,
}

impl<'a> ConversionDriver<'a> {
    /// Creates a driver for `input` and the target space `description`.
    #[must_use]
    pub fn new(
        input: &'a EventWorkspace,
        description: TargetDescription,
        config: ConversionConfig,
    ) -> Self {
        Self {
            input,
            description,
            config,
            state: DriverState::Created,
            prepared: None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Target-space description.
    #[must_use]
    pub fn description(&self) -> &TargetDescription {
        &self.description
    }

    /// Preprocessed detectors, once initialised.
    #[must_use]
    pub fn detectors(&self) -> Option<&PreprocessedDetectors> {
        self.prepared.as_ref().map(|p| &p.detectors)
    }

    /// Creates an empty output workspace matching the description, with its
    /// root box already split once.
    ///
    /// # Errors
    /// Returns an error for invalid dimensions or box controller settings.
    pub fn create_output_workspace(&self, config: &BoxControllerConfig) -> Result<MDEventWorkspace> {
        let mut ws = MDEventWorkspace::new(self.description.dimensions.clone(), config)?;
        ws.split_box();
        Ok(ws)
    }

    /// Builds the detector table, units helper, transform and the fixed
    /// additional coordinates.
    ///
    /// # Errors
    /// Returns a configuration error if the description, the units or the
    /// transform parameters are inconsistent. The driver is then `Failed`.
    pub fn initialize(&mut self) -> Result<()> {
        if self.state != DriverState::Created {
            return Err(Error::Config(format!(
                "driver cannot be initialised in state {}",
                self.state
            )));
        }
        match self.prepare() {
            Ok(prepared) => {
                self.prepared = Some(prepared);
                self.state = DriverState::Initialized;
                Ok(())
            }
            Err(e) => {
                self.state = DriverState::Failed;
                Err(e)
            }
        }
    }

    fn prepare(&self) -> Result<Prepared> {
        self.description.validate()?;
        let transform = create_transform(&self.description)?;
        let detectors = PreprocessedDetectors::build(
            &self.input.instrument,
            self.input.number_histograms(),
        );
        let units = UnitsConversionHelper::initialize(
            &self.input.x_unit,
            &transform.input_unit(),
            self.description.energy_mode,
            self.description.incident_energy,
            detectors.l1(),
        )?;
        let mut generic_coord = vec![0.0; self.description.n_dims()];
        let generic_in_range = transform.calc_generic_variables(&mut generic_coord)?;

        debug!(
            "{} with {} of {} spectra, converting {} to {}",
            transform.name(),
            detectors.len(),
            self.input.number_histograms(),
            self.input.x_unit,
            transform.input_unit()
        );
        Ok(Prepared {
            detectors,
            units,
            transform,
            generic_coord,
            generic_in_range,
        })
    }

    /// Converts every valid spectrum into `output`.
    ///
    /// # Errors
    /// Returns a configuration error if the driver is not initialised or the
    /// output does not match the description. Once conversion has started,
    /// failures return [`Error::Cancelled`] or [`Error::Aborted`], and the
    /// output keeps the events inserted so far with a refreshed cache.
    pub fn run(
        &mut self,
        output: &mut MDEventWorkspace,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<ConversionReport> {
        if self.state != DriverState::Initialized {
            return Err(Error::Config(format!(
                "driver must be initialised before running, state is {}",
                self.state
            )));
        }
        let Some(prepared) = self.prepared.as_ref() else {
            return Err(Error::Config("driver has no prepared conversion".to_string()));
        };
        if output.nd() != self.description.n_dims() {
            self.state = DriverState::Failed;
            return Err(Error::Config(format!(
                "output workspace has {} dimensions, description has {}",
                output.nd(),
                self.description.n_dims()
            )));
        }
        #[allow(clippy::float_cmp)]
        let mismatch = output
            .dimensions()
            .iter()
            .zip(&self.description.dimensions)
            .find(|(out, desc)| out.name != desc.name || out.min != desc.min || out.max != desc.max);
        if let Some((out, desc)) = mismatch {
            self.state = DriverState::Failed;
            return Err(Error::Config(format!(
                "output dimension {} [{}, {}) does not match target dimension {} [{}, {})",
                out.name, out.min, out.max, desc.name, desc.min, desc.max
            )));
        }
        let run_index = match output.add_experiment_info(self.description.experiment.clone()) {
            Ok(index) => index,
            Err(e) => {
                self.state = DriverState::Failed;
                return Err(e);
            }
        };

        self.state = DriverState::Running;
        output.set_status(WorkspaceStatus::Pending);
        let n_before = output.count_events();
        let mut report = ConversionReport {
            run_index,
            spectra_total: self.input.number_histograms(),
            spectra_skipped: prepared.detectors.skipped(),
            ..ConversionReport::default()
        };

        let result = if prepared.generic_in_range {
            Self::convert_all(
                self.input,
                prepared,
                &self.config,
                run_index,
                output,
                progress,
                cancel,
                &mut report,
            )
        } else {
            debug!("additional coordinates outside the target ranges, no spectrum converted");
            progress.report(prepared.detectors.len(), prepared.detectors.len());
            Ok(())
        };

        self.state = DriverState::Finalizing;
        if output.split_all_if_needed() > 0 {
            report.split_passes += 1;
        }
        output.refresh_cache();
        report.events_added = output.n_points().saturating_sub(n_before);
        report.num_boxes = output.box_controller().total_num_md_boxes();
        report.num_grid_boxes = output.box_controller().total_num_grid_boxes();

        match result {
            Ok(()) => {
                output.set_status(WorkspaceStatus::Complete);
                self.state = DriverState::Done;
                info!(
                    "converted {} events from {} spectra into {} boxes",
                    report.events_added, report.spectra_converted, report.num_boxes
                );
                Ok(report)
            }
            Err(e) => {
                self.state = DriverState::Failed;
                let events_added = report.events_added;
                if e.is_cancelled() {
                    output.set_status(WorkspaceStatus::Cancelled);
                    warn!("conversion cancelled after {events_added} events");
                    Err(Error::Cancelled { events_added })
                } else {
                    output.set_status(WorkspaceStatus::Failed(e.to_string()));
                    warn!("conversion failed after {events_added} events: {e}");
                    Err(Error::Aborted {
                        events_added,
                        source: Box::new(e),
                    })
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn convert_all(
        input: &EventWorkspace,
        prepared: &Prepared,
        config: &ConversionConfig,
        run_index: u16,
        output: &mut MDEventWorkspace,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
        report: &mut ConversionReport,
    ) -> Result<()> {
        let converter = EventListConverter::new(
            input,
            &prepared.detectors,
            prepared.units.clone(),
            prepared.transform.clone_box(),
            prepared.generic_coord.clone(),
            run_index,
        );
        let pool = match (config.parallel, config.num_threads) {
            (true, Some(threads)) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| Error::Config(format!("cannot build thread pool: {e}")))?,
            ),
            _ => None,
        };

        let n_valid = prepared.detectors.len();
        let block = config.spectra_per_block.max(1);
        let mut n_events_in_ws = output.count_events();
        let mut events_since_split = 0;

        let mut start = 0;
        while start < n_valid {
            let range = start..(start + block).min(n_valid);
            start = range.end;

            let shared: &MDEventWorkspace = output;
            let stats = match (&pool, config.parallel) {
                (Some(pool), _) => {
                    pool.install(|| convert_block_parallel(&converter, shared, range.clone(), cancel))
                }
                (None, true) => convert_block_parallel(&converter, shared, range.clone(), cancel),
                (None, false) => convert_block_serial(&converter, shared, range.clone(), cancel),
            }?;

            report.spectra_converted += stats.spectra;
            n_events_in_ws += stats.events;
            events_since_split += stats.events;
            progress.report(range.end, n_valid);

            let controller = output.box_controller();
            if controller.should_split_boxes(
                n_events_in_ws,
                events_since_split,
                controller.total_num_md_boxes(),
            ) {
                output.split_all_if_needed();
                report.split_passes += 1;
                events_since_split = 0;
            }
        }
        Ok(())
    }
}

fn convert_block_parallel(
    converter: &EventListConverter<'_>,
    output: &MDEventWorkspace,
    range: Range<usize>,
    cancel: &CancellationToken,
) -> Result<BlockStats> {
    let nd = converter.nd();
    range
        .into_par_iter()
        .map_init(
            || (converter.task(), MDEventBatch::new(nd)),
            |(task, buffer), index| {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled { events_added: 0 });
                }
                buffer.clear();
                let n = converter.convert_with(task, index, buffer)?;
                if n > 0 {
                    output.add_events(buffer)?;
                }
                Ok(BlockStats { events: n, spectra: 1 })
            },
        )
        .try_reduce(BlockStats::default, |a, b| Ok(a.merge(b)))
}

fn convert_block_serial(
    converter: &EventListConverter<'_>,
    output: &MDEventWorkspace,
    range: Range<usize>,
    cancel: &CancellationToken,
) -> Result<BlockStats> {
    let mut task = converter.task();
    let mut buffer = MDEventBatch::new(converter.nd());
    let mut stats = BlockStats::default();
    for index in range {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled { events_added: 0 });
        }
        buffer.clear();
        let n = converter.convert_with(&mut task, index, &mut buffer)?;
        if n > 0 {
            output.add_events(&buffer)?;
        }
        stats = stats.merge(BlockStats { events: n, spectra: 1 });
    }
    Ok(stats)
}
