//! Description of the target MD space: dimensions, energy mode and the
//! experiment the events come from.

use crate::error::{Error, Result};
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identity rotation, row-major.
pub const IDENTITY_ROTATION: [f64; 9] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

/// Energy analysis mode of the instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum EnergyMode {
    /// No energy analysis; only |Q| is produced.
    #[default]
    Elastic,
    /// Fixed incident energy (chopper spectrometers).
    Direct,
    /// Fixed final energy (crystal analyser spectrometers).
    Indirect,
}

impl EnergyMode {
    /// Parses a mode name as used by the CLI.
    ///
    /// # Errors
    /// Returns a configuration error for unknown names.
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "elastic" => Ok(Self::Elastic),
            "direct" => Ok(Self::Direct),
            "indirect" => Ok(Self::Indirect),
            other => Err(Error::Config(format!("unknown energy mode '{other}'"))),
        }
    }

    /// Returns true for the two inelastic modes.
    #[must_use]
    pub fn is_inelastic(self) -> bool {
        !matches!(self, Self::Elastic)
    }
}

impl fmt::Display for EnergyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Elastic => "Elastic",
            Self::Direct => "Direct",
            Self::Indirect => "Indirect",
        })
    }
}

/// One axis of the output space.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Dimension {
    /// Dimension ID, e.g. `|Q|`.
    pub name: String,
    /// Unit label.
    pub units: String,
    /// Lower bound (inclusive).
    pub min: f64,
    /// Upper bound (exclusive).
    pub max: f64,
}

impl Dimension {
    /// Creates a dimension, checking the bounds.
    ///
    /// # Errors
    /// Returns [`Error::InvalidDimension`] if a bound is not finite or
    /// `min >= max`.
    pub fn new(name: impl Into<String>, units: impl Into<String>, min: f64, max: f64) -> Result<Self> {
        let dim = Self {
            name: name.into(),
            units: units.into(),
            min,
            max,
        };
        dim.validate()?;
        Ok(dim)
    }

    /// Checks the bounds.
    ///
    /// # Errors
    /// Returns [`Error::InvalidDimension`] if a bound is not finite or
    /// `min >= max`.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Error::InvalidDimension {
            name: self.name.clone(),
            reason,
        };
        if !self.min.is_finite() || !self.max.is_finite() {
            return Err(invalid(format!(
                "bounds must be finite, got [{}, {})",
                self.min, self.max
            )));
        }
        if self.min >= self.max {
            return Err(invalid(format!(
                "min {} must be below max {}",
                self.min, self.max
            )));
        }
        Ok(())
    }

    /// Half-open containment test. NaN is never contained.
    #[inline]
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value < self.max
    }

    /// Width of the dimension.
    #[must_use]
    pub fn width(&self) -> f64 {
        self.max - self.min
    }
}

/// Experiment metadata attached to the output workspace.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ExperimentInfo {
    /// Instrument or experiment name.
    pub name: String,
    /// Run number.
    pub run_number: u32,
    /// Energy mode used for the conversion.
    pub energy_mode: EnergyMode,
    /// Fixed energy (meV), if any.
    pub incident_energy: Option<f64>,
    /// Goniometer rotation, row-major.
    pub goniometer: [f64; 9],
}

impl Default for ExperimentInfo {
    fn default() -> Self {
        Self {
            name: String::new(),
            run_number: 0,
            energy_mode: EnergyMode::Elastic,
            incident_energy: None,
            goniometer: IDENTITY_ROTATION,
        }
    }
}

/// Everything the coordinate transform needs to know about the target space.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TargetDescription {
    /// Matrix dimensions first, then one per additional coordinate.
    pub dimensions: Vec<Dimension>,
    /// Energy analysis mode.
    pub energy_mode: EnergyMode,
    /// Ei for direct mode, EFixed for indirect mode (meV).
    #[cfg_attr(feature = "serde", serde(default))]
    pub incident_energy: Option<f64>,
    /// Rotation applied to the momentum transfer, row-major.
    #[cfg_attr(feature = "serde", serde(default = "identity_rotation"))]
    pub rotation: [f64; 9],
    /// Fixed per-run values for the dimensions after the matrix ones.
    #[cfg_attr(feature = "serde", serde(default))]
    pub additional_coordinates: Vec<f64>,
    /// Experiment metadata.
    #[cfg_attr(feature = "serde", serde(default))]
    pub experiment: ExperimentInfo,
}

#[cfg(feature = "serde")]
fn identity_rotation() -> [f64; 9] {
    IDENTITY_ROTATION
}

impl TargetDescription {
    /// Creates a description with identity rotation and no extra coordinates.
    #[must_use]
    pub fn new(dimensions: Vec<Dimension>, energy_mode: EnergyMode) -> Self {
        Self {
            dimensions,
            energy_mode,
            incident_energy: None,
            rotation: IDENTITY_ROTATION,
            additional_coordinates: Vec::new(),
            experiment: ExperimentInfo {
                energy_mode,
                ..ExperimentInfo::default()
            },
        }
    }

    /// Sets the fixed energy (meV).
    #[must_use]
    pub fn with_incident_energy(mut self, energy: f64) -> Self {
        self.incident_energy = Some(energy);
        self.experiment.incident_energy = Some(energy);
        self
    }

    /// Sets the rotation matrix (row-major).
    #[must_use]
    pub fn with_rotation(mut self, rotation: [f64; 9]) -> Self {
        self.rotation = rotation;
        self
    }

    /// Appends an additional coordinate together with its dimension.
    #[must_use]
    pub fn with_additional_coordinate(mut self, dimension: Dimension, value: f64) -> Self {
        self.dimensions.push(dimension);
        self.additional_coordinates.push(value);
        self
    }

    /// Sets the experiment metadata.
    #[must_use]
    pub fn with_experiment(mut self, experiment: ExperimentInfo) -> Self {
        self.experiment = experiment;
        self
    }

    /// Total dimensionality of the output.
    #[must_use]
    pub fn n_dims(&self) -> usize {
        self.dimensions.len()
    }

    /// Validates every dimension.
    ///
    /// # Errors
    /// Returns the first dimension error, or a configuration error when
    /// no dimension is given.
    pub fn validate(&self) -> Result<()> {
        if self.dimensions.is_empty() {
            return Err(Error::Config("target space has no dimensions".to_string()));
        }
        self.dimensions.iter().try_for_each(Dimension::validate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_open_containment() {
        let dim = Dimension::new("|Q|", "MomentumTransfer", 0.0, 10.0).unwrap();
        assert!(dim.contains(0.0));
        assert!(dim.contains(9.999_999));
        assert!(!dim.contains(10.0));
        assert!(!dim.contains(-1e-12));
        assert!(!dim.contains(f64::NAN));
    }

    #[test]
    fn test_invalid_dimensions() {
        assert!(matches!(
            Dimension::new("x", "", 1.0, 1.0),
            Err(Error::InvalidDimension { .. })
        ));
        assert!(Dimension::new("x", "", 0.0, f64::INFINITY).is_err());
        assert!(Dimension::new("x", "", f64::NAN, 1.0).is_err());
    }

    #[test]
    fn test_description_builder() {
        let q = Dimension::new("|Q|", "MomentumTransfer", 0.0, 5.0).unwrap();
        let t = Dimension::new("T", "K", 0.0, 300.0).unwrap();
        let desc = TargetDescription::new(vec![q], EnergyMode::Direct)
            .with_incident_energy(25.0)
            .with_additional_coordinate(t, 10.0);

        assert_eq!(desc.n_dims(), 2);
        assert_eq!(desc.additional_coordinates, vec![10.0]);
        assert_eq!(desc.experiment.incident_energy, Some(25.0));
        assert_eq!(desc.experiment.energy_mode, EnergyMode::Direct);
        assert!(desc.validate().is_ok());
        assert!(TargetDescription::new(Vec::new(), EnergyMode::Elastic)
            .validate()
            .is_err());
    }

    #[test]
    fn test_energy_mode_parse() {
        assert_eq!(EnergyMode::parse("Indirect").unwrap(), EnergyMode::Indirect);
        assert!(EnergyMode::parse("quasi").is_err());
        assert!(EnergyMode::Direct.is_inelastic());
        assert!(!EnergyMode::Elastic.is_inelastic());
    }
}
