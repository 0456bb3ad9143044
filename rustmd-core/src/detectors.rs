//! Preprocessed detector table.
//!
//! Built once per input workspace so the per-event hot path never touches
//! the geometry service.

use crate::geometry::{norm, sub, InstrumentGeometry, V3};
use log::debug;
use std::collections::HashMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Cached geometry of one valid spectrum.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DetectorRecord {
    /// Workspace index of the spectrum.
    pub spectrum_index: usize,
    /// Detector ID.
    pub detector_id: i32,
    /// Unit vector from the sample to the detector.
    pub direction: V3,
    /// Secondary flight path (metres).
    pub l2: f64,
    /// Scattering angle (radians).
    pub two_theta: f64,
    /// Per-detector analyser energy (meV).
    pub efixed: Option<f64>,
}

/// Flat lookup table of all valid detectors.
#[derive(Debug, Clone, Default)]
pub struct PreprocessedDetectors {
    records: Vec<DetectorRecord>,
    by_id: HashMap<i32, usize>,
    by_spectrum: HashMap<usize, usize>,
    l1: f64,
    n_spectra: usize,
}

impl PreprocessedDetectors {
    /// Builds the table for the first `n_spectra` workspace indices.
    ///
    /// Monitors, masked detectors, spectra without a detector and detectors
    /// sitting on the sample are skipped.
    pub fn build<G: InstrumentGeometry + ?Sized>(geometry: &G, n_spectra: usize) -> Self {
        let sample = geometry.sample_position();
        let beam = sub(sample, geometry.source_position());
        let l1 = norm(beam);
        let beam_dir = if l1 > 0.0 {
            [beam[0] / l1, beam[1] / l1, beam[2] / l1]
        } else {
            [0.0, 0.0, 1.0]
        };

        let mut records = Vec::with_capacity(n_spectra);
        let mut by_id = HashMap::with_capacity(n_spectra);
        let mut by_spectrum = HashMap::with_capacity(n_spectra);

        for spectrum_index in 0..n_spectra {
            let Some(det) = geometry.detector(spectrum_index) else {
                continue;
            };
            if det.is_monitor || det.is_masked {
                continue;
            }
            let offset = sub(det.position, sample);
            let l2 = norm(offset);
            if l2.is_nan() || l2 <= 0.0 {
                continue;
            }
            let direction = [offset[0] / l2, offset[1] / l2, offset[2] / l2];
            let cos_2theta = (direction[0] * beam_dir[0]
                + direction[1] * beam_dir[1]
                + direction[2] * beam_dir[2])
                .clamp(-1.0, 1.0);

            let idx = records.len();
            by_id.entry(det.id).or_insert(idx);
            by_spectrum.insert(spectrum_index, idx);
            records.push(DetectorRecord {
                spectrum_index,
                detector_id: det.id,
                direction,
                l2,
                two_theta: cos_2theta.acos(),
                efixed: det.efixed,
            });
        }

        debug!(
            "preprocessed {} detectors, skipped {} spectra",
            records.len(),
            n_spectra - records.len()
        );

        Self {
            records,
            by_id,
            by_spectrum,
            l1,
            n_spectra,
        }
    }

    /// Number of valid detectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no spectrum has a usable detector.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of spectra that were skipped.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.n_spectra - self.records.len()
    }

    /// Primary flight path (metres).
    #[must_use]
    pub fn l1(&self) -> f64 {
        self.l1
    }

    /// All records, ordered by workspace index.
    #[must_use]
    pub fn records(&self) -> &[DetectorRecord] {
        &self.records
    }

    /// Record at a table position.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&DetectorRecord> {
        self.records.get(index)
    }

    /// Record for a workspace index.
    #[must_use]
    pub fn by_spectrum(&self, spectrum_index: usize) -> Option<&DetectorRecord> {
        self.by_spectrum
            .get(&spectrum_index)
            .map(|&idx| &self.records[idx])
    }

    /// Record for a detector ID.
    #[must_use]
    pub fn by_detector_id(&self, detector_id: i32) -> Option<&DetectorRecord> {
        self.by_id.get(&detector_id).map(|&idx| &self.records[idx])
    }
}
