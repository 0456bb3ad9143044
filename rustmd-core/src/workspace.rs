//! In-memory event workspace consumed by the conversion.

use crate::event::EventList;
use crate::geometry::Instrument;
use crate::units::Unit;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Run metadata copied into the output workspace.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RunInfo {
    /// Run number.
    pub run_number: u32,
    /// Free-form run title.
    pub title: String,
}

/// Per-detector event lists plus the instrument they were recorded on.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EventWorkspace {
    /// Instrument geometry.
    pub instrument: Instrument,
    /// Event list per workspace index.
    pub spectra: Vec<EventList>,
    /// Unit of the event time values.
    #[cfg_attr(feature = "serde", serde(default))]
    pub x_unit: Unit,
    /// Run metadata.
    #[cfg_attr(feature = "serde", serde(default))]
    pub run: RunInfo,
}

impl EventWorkspace {
    /// Creates an empty workspace on the given instrument.
    #[must_use]
    pub fn new(instrument: Instrument) -> Self {
        Self {
            instrument,
            spectra: Vec::new(),
            x_unit: Unit::Tof,
            run: RunInfo::default(),
        }
    }

    /// Sets the unit of the event time values.
    #[must_use]
    pub fn with_x_unit(mut self, unit: Unit) -> Self {
        self.x_unit = unit;
        self
    }

    /// Sets the run metadata.
    #[must_use]
    pub fn with_run(mut self, run: RunInfo) -> Self {
        self.run = run;
        self
    }

    /// Appends an event list for the next workspace index.
    pub fn push_spectrum(&mut self, events: EventList) {
        self.spectra.push(events);
    }

    /// Number of spectra.
    #[must_use]
    pub fn number_histograms(&self) -> usize {
        self.spectra.len()
    }

    /// Event list for a workspace index.
    #[must_use]
    pub fn event_list(&self, index: usize) -> Option<&EventList> {
        self.spectra.get(index)
    }

    /// Total number of events across all spectra.
    #[must_use]
    pub fn number_events(&self) -> usize {
        self.spectra.iter().map(EventList::len).sum()
    }
}
