//! Per-spectrum conversion of raw event lists into MD events.

use crate::transform::CoordTransform;
use rustmd_core::{
    CoordT, Error, Event, EventList, EventWorkspace, MDEventBatch, PreprocessedDetectors, Result,
    UnitsConversionHelper,
};

/// Per-task working state: private copies of the units helper, the transform
/// and the coordinate template.
#[derive(Clone)]
pub struct ConversionTask {
    units: UnitsConversionHelper,
    transform: Box<dyn CoordTransform>,
    coord: Vec<CoordT>,
}

/// Converts the event list of one valid spectrum at a time.
///
/// The converter itself is read-only, so one instance is shared by every
/// worker; each worker owns a [`ConversionTask`] and an output buffer.
pub struct EventListConverter<'a> {
    input: &'a EventWorkspace,
    detectors: &'a PreprocessedDetectors,
    prototype: ConversionTask,
    run_index: u16,
}

impl<'a> EventListConverter<'a> {
    /// Creates a converter.
    ///
    /// `generic_coord` holds one value per output dimension with the
    /// additional coordinates already filled in.
    #[must_use]
    pub fn new(
        input: &'a EventWorkspace,
        detectors: &'a PreprocessedDetectors,
        units: UnitsConversionHelper,
        transform: Box<dyn CoordTransform>,
        generic_coord: Vec<CoordT>,
        run_index: u16,
    ) -> Self {
        Self {
            input,
            detectors,
            prototype: ConversionTask {
                units,
                transform,
                coord: generic_coord,
            },
            run_index,
        }
    }

    /// Number of output dimensions.
    #[must_use]
    pub fn nd(&self) -> usize {
        self.prototype.coord.len()
    }

    /// Fresh working state for one worker.
    #[must_use]
    pub fn task(&self) -> ConversionTask {
        self.prototype.clone()
    }

    /// Converts the spectrum of detector `detector_index` into `out`.
    ///
    /// Returns the number of events appended.
    ///
    /// # Errors
    /// Returns [`Error::MissingEventList`] if the input has no events for the
    /// detector's spectrum, or a configuration error for a mismatched buffer.
    pub fn convert(&self, detector_index: usize, out: &mut MDEventBatch) -> Result<usize> {
        let mut task = self.task();
        self.convert_with(&mut task, detector_index, out)
    }

    /// Same as [`convert`](Self::convert), reusing a worker's task.
    ///
    /// # Errors
    /// See [`convert`](Self::convert).
    pub fn convert_with(
        &self,
        task: &mut ConversionTask,
        detector_index: usize,
        out: &mut MDEventBatch,
    ) -> Result<usize> {
        if out.nd() != task.coord.len() {
            return Err(Error::Config(format!(
                "output buffer holds {}-dimensional events, expected {}",
                out.nd(),
                task.coord.len()
            )));
        }
        let detector = self.detectors.get(detector_index).ok_or_else(|| {
            Error::Config(format!("detector index {detector_index} is out of range"))
        })?;
        let events = self
            .input
            .event_list(detector.spectrum_index)
            .ok_or(Error::MissingEventList(detector.spectrum_index))?;

        if !task
            .transform
            .calc_ydep_coordinates(&mut task.coord, detector)
        {
            return Ok(0);
        }
        task.units.update_conversion(detector);

        let detector_id = detector.detector_id;
        Ok(match events {
            EventList::Tof(list) => convert_events(list, task, detector_id, self.run_index, out),
            EventList::Weighted(list) => {
                convert_events(list, task, detector_id, self.run_index, out)
            }
            EventList::WeightedNoTime(list) => {
                convert_events(list, task, detector_id, self.run_index, out)
            }
        })
    }
}

fn convert_events<E: Event>(
    events: &[E],
    task: &mut ConversionTask,
    detector_id: i32,
    run_index: u16,
    out: &mut MDEventBatch,
) -> usize {
    out.reserve(events.len());
    let mut added = 0;
    for event in events {
        let x = task.units.convert_units(event.tof());
        if !task.transform.calc_matrix_coord(x, &mut task.coord) {
            continue;
        }
        out.push(
            &task.coord,
            event.weight(),
            event.error_squared(),
            run_index,
            detector_id,
        );
        added += 1;
    }
    added
}
