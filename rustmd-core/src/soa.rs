//! Structure of Arrays (`SoA`) storage for MD events.
//!
//! `MDEventBatch` is used both as the per-task conversion buffer and as the
//! event storage inside leaf boxes. Coordinates are stored flat with a stride
//! of `nd`.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Coordinate type of MD events.
pub type CoordT = f32;

/// Borrowed view of one event in a batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MDEventRecord<'a> {
    /// Coordinates, one per dimension.
    pub coordinates: &'a [CoordT],
    /// Signal (event weight).
    pub signal: f32,
    /// Squared error of the signal.
    pub error_squared: f32,
    /// Index of the experiment info the event came from.
    pub run_index: u16,
    /// Detector that recorded the event.
    pub detector_id: i32,
}

/// A batch of MD events stored in `SoA` format.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MDEventBatch {
    nd: usize,
    /// Flat coordinates, `nd` values per event.
    pub coords: Vec<CoordT>,
    /// Columnar storage for signals.
    pub signal: Vec<f32>,
    /// Columnar storage for squared errors.
    pub error_squared: Vec<f32>,
    /// Columnar storage for run indices.
    pub run_index: Vec<u16>,
    /// Columnar storage for detector IDs.
    pub detector_id: Vec<i32>,
}

impl MDEventBatch {
    /// Creates an empty batch for `nd`-dimensional events.
    #[must_use]
    pub fn new(nd: usize) -> Self {
        Self::with_capacity(nd, 0)
    }

    /// Creates a new empty batch with specified capacity (in events).
    #[must_use]
    pub fn with_capacity(nd: usize, capacity: usize) -> Self {
        Self {
            nd,
            coords: Vec::with_capacity(nd * capacity),
            signal: Vec::with_capacity(capacity),
            error_squared: Vec::with_capacity(capacity),
            run_index: Vec::with_capacity(capacity),
            detector_id: Vec::with_capacity(capacity),
        }
    }

    /// Number of dimensions per event.
    #[must_use]
    pub fn nd(&self) -> usize {
        self.nd
    }

    /// Returns the number of events in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.signal.len()
    }

    /// Returns true if the batch is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.signal.is_empty()
    }

    /// Clears all vectors in the batch, keeping their capacity.
    pub fn clear(&mut self) {
        self.coords.clear();
        self.signal.clear();
        self.error_squared.clear();
        self.run_index.clear();
        self.detector_id.clear();
    }

    /// Reserves room for `additional` more events.
    pub fn reserve(&mut self, additional: usize) {
        self.coords.reserve(additional * self.nd);
        self.signal.reserve(additional);
        self.error_squared.reserve(additional);
        self.run_index.reserve(additional);
        self.detector_id.reserve(additional);
    }

    /// Appends all events from another batch of the same dimensionality.
    pub fn append(&mut self, other: &MDEventBatch) {
        debug_assert_eq!(self.nd, other.nd);
        self.coords.extend_from_slice(&other.coords);
        self.signal.extend_from_slice(&other.signal);
        self.error_squared.extend_from_slice(&other.error_squared);
        self.run_index.extend_from_slice(&other.run_index);
        self.detector_id.extend_from_slice(&other.detector_id);
    }

    /// Pushes a single event. `coords` must hold `nd` values.
    pub fn push(
        &mut self,
        coords: &[CoordT],
        signal: f32,
        error_squared: f32,
        run_index: u16,
        detector_id: i32,
    ) {
        debug_assert_eq!(coords.len(), self.nd);
        self.coords.extend_from_slice(coords);
        self.signal.push(signal);
        self.error_squared.push(error_squared);
        self.run_index.push(run_index);
        self.detector_id.push(detector_id);
    }

    /// Copies event `index` of `other` into this batch.
    pub fn push_from(&mut self, other: &MDEventBatch, index: usize) {
        self.push(
            other.coords_of(index),
            other.signal[index],
            other.error_squared[index],
            other.run_index[index],
            other.detector_id[index],
        );
    }

    /// Coordinates of event `index`.
    #[inline]
    #[must_use]
    pub fn coords_of(&self, index: usize) -> &[CoordT] {
        &self.coords[index * self.nd..(index + 1) * self.nd]
    }

    /// Borrowed view of event `index`, if present.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<MDEventRecord<'_>> {
        if index >= self.len() {
            return None;
        }
        Some(MDEventRecord {
            coordinates: self.coords_of(index),
            signal: self.signal[index],
            error_squared: self.error_squared[index],
            run_index: self.run_index[index],
            detector_id: self.detector_id[index],
        })
    }

    /// Iterates over all events.
    pub fn iter(&self) -> impl Iterator<Item = MDEventRecord<'_>> + '_ {
        (0..self.len()).filter_map(move |i| self.get(i))
    }

    /// Sum of signals.
    #[must_use]
    pub fn total_signal(&self) -> f64 {
        self.signal.iter().map(|&s| f64::from(s)).sum()
    }

    /// Sum of squared errors.
    #[must_use]
    pub fn total_error_squared(&self) -> f64 {
        self.error_squared.iter().map(|&e| f64::from(e)).sum()
    }
}
