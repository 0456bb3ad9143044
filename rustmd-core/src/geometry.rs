//! Read-only instrument geometry service.
//!
//! The full instrument model lives outside this crate; conversion only needs
//! detector positions, flags and the sample/source positions.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Cartesian position in metres.
pub type V3 = [f64; 3];

/// Difference `a - b`.
#[inline]
#[must_use]
pub fn sub(a: V3, b: V3) -> V3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

/// Euclidean norm.
#[inline]
#[must_use]
pub fn norm(v: V3) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

/// Detector attached to a spectrum.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DetectorInfo {
    /// Detector ID.
    pub id: i32,
    /// Absolute position (metres).
    pub position: V3,
    /// Beam monitor rather than a scattering detector.
    #[cfg_attr(feature = "serde", serde(default))]
    pub is_monitor: bool,
    /// Masked out of the analysis.
    #[cfg_attr(feature = "serde", serde(default))]
    pub is_masked: bool,
    /// Analyser energy for indirect geometry (meV), if set per detector.
    #[cfg_attr(feature = "serde", serde(default))]
    pub efixed: Option<f64>,
}

impl DetectorInfo {
    /// Creates an unmasked scattering detector.
    #[must_use]
    pub fn new(id: i32, position: V3) -> Self {
        Self {
            id,
            position,
            is_monitor: false,
            is_masked: false,
            efixed: None,
        }
    }

    /// Marks the detector as a monitor.
    #[must_use]
    pub fn monitor(mut self) -> Self {
        self.is_monitor = true;
        self
    }

    /// Marks the detector as masked.
    #[must_use]
    pub fn masked(mut self) -> Self {
        self.is_masked = true;
        self
    }

    /// Sets a per-detector fixed energy.
    #[must_use]
    pub fn with_efixed(mut self, efixed: f64) -> Self {
        self.efixed = Some(efixed);
        self
    }
}

/// Geometry lookup consumed by the conversion.
pub trait InstrumentGeometry: Send + Sync {
    /// Detector for a workspace index, if the spectrum has one.
    fn detector(&self, spectrum_index: usize) -> Option<&DetectorInfo>;

    /// Sample position.
    fn sample_position(&self) -> V3;

    /// Neutron source (moderator) position.
    fn source_position(&self) -> V3;
}

/// In-memory instrument: one optional detector per spectrum.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Instrument {
    /// Instrument name.
    #[cfg_attr(feature = "serde", serde(default))]
    pub name: String,
    /// Source position.
    pub source: V3,
    /// Sample position.
    pub sample: V3,
    /// Detector per workspace index.
    pub detectors: Vec<Option<DetectorInfo>>,
}

impl Instrument {
    /// Creates an instrument with the beam along +z and the sample at the origin.
    #[must_use]
    pub fn new(name: impl Into<String>, l1: f64) -> Self {
        Self {
            name: name.into(),
            source: [0.0, 0.0, -l1],
            sample: [0.0, 0.0, 0.0],
            detectors: Vec::new(),
        }
    }

    /// Appends the detector for the next workspace index.
    pub fn push_detector(&mut self, detector: Option<DetectorInfo>) {
        self.detectors.push(detector);
    }

    /// Primary flight path (source to sample).
    #[must_use]
    pub fn l1(&self) -> f64 {
        norm(sub(self.sample, self.source))
    }
}

impl InstrumentGeometry for Instrument {
    fn detector(&self, spectrum_index: usize) -> Option<&DetectorInfo> {
        self.detectors.get(spectrum_index).and_then(Option::as_ref)
    }

    fn sample_position(&self) -> V3 {
        self.sample
    }

    fn source_position(&self) -> V3 {
        self.source
    }
}
