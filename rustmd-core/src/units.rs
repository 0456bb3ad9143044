//! Units conversion from raw time-of-flight to the units a transform needs.
//!
//! All conversions go through time of flight. Times are in microseconds,
//! flight paths in metres, energies in meV, wavelengths in Angstrom and
//! wavevectors in inverse Angstrom.
#![allow(clippy::doc_markdown)]

use crate::description::EnergyMode;
use crate::detectors::DetectorRecord;
use crate::error::{Error, Result};
use std::f64::consts::PI;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Planck constant (J s).
pub const PLANCK: f64 = 6.626_068_96e-34;
/// Neutron mass (kg).
pub const NEUTRON_MASS: f64 = 1.674_927_211e-27;
/// One meV in joules.
pub const MEV: f64 = 1.602_176_487e-22;
/// Energy (meV) of a neutron with unit wavenumber (1/Angstrom): E = c k^2.
pub const E_MEV_TO_NEUTRON_WAVENUMBER_SQ: f64 = 2.072_142_0;

/// Wavelength (A) = `tof` (us) * `WAVELENGTH_FACTOR` / L (m).
const WAVELENGTH_FACTOR: f64 = PLANCK * 1e4 / NEUTRON_MASS;
/// Energy (meV) = `ENERGY_FACTOR` * L^2 (m^2) / `tof`^2 (us^2).
const ENERGY_FACTOR: f64 = 0.5 * NEUTRON_MASS / MEV * 1e12;

/// Physical unit of a workspace axis or event value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Unit {
    /// Time of flight (microseconds).
    #[default]
    Tof,
    /// Neutron wavelength (Angstrom).
    Wavelength,
    /// Neutron wavevector k = 2 pi / lambda (1/Angstrom).
    Momentum,
    /// Neutron kinetic energy (meV).
    Energy,
    /// Energy transfer (meV).
    DeltaE,
    /// Any other quantity (temperature, labels, ...). Converts only to itself.
    Named(String),
}

impl Unit {
    /// Parses a unit identifier as used in configuration files and the CLI.
    #[must_use]
    pub fn from_id(id: &str) -> Self {
        match id.to_ascii_lowercase().as_str() {
            "tof" => Self::Tof,
            "wavelength" => Self::Wavelength,
            "momentum" => Self::Momentum,
            "energy" => Self::Energy,
            "deltae" => Self::DeltaE,
            _ => Self::Named(id.to_string()),
        }
    }

    /// Identifier of the unit.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Tof => "TOF",
            Self::Wavelength => "Wavelength",
            Self::Momentum => "Momentum",
            Self::Energy => "Energy",
            Self::DeltaE => "DeltaE",
            Self::Named(name) => name,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// One side of a conversion through time of flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Tof,
    Wavelength,
    Momentum,
    Energy,
    DeltaEDirect,
    DeltaEIndirect,
}

impl Stage {
    fn for_unit(unit: &Unit, mode: EnergyMode) -> Option<Self> {
        Some(match unit {
            Unit::Tof => Self::Tof,
            Unit::Wavelength => Self::Wavelength,
            Unit::Momentum => Self::Momentum,
            Unit::Energy => Self::Energy,
            Unit::DeltaE => match mode {
                EnergyMode::Direct => Self::DeltaEDirect,
                EnergyMode::Indirect => Self::DeltaEIndirect,
                EnergyMode::Elastic => return None,
            },
            Unit::Named(_) => return None,
        })
    }

    fn is_delta_e(self) -> bool {
        matches!(self, Self::DeltaEDirect | Self::DeltaEIndirect)
    }
}

/// Per-spectrum cached flight-path factors.
#[derive(Debug, Clone, Copy, Default)]
struct SpectrumFactors {
    /// Total flight path L1 + L2.
    l_total: f64,
    /// `ENERGY_FACTOR` * L1^2.
    c_l1: f64,
    /// `ENERGY_FACTOR` * L2^2.
    c_l2: f64,
    /// Flight time over the leg with fixed energy (t1 direct, t2 indirect).
    t_fixed: f64,
    /// Fixed energy for this spectrum.
    efixed: f64,
}

/// Stateful converter from raw event time values to a target unit.
///
/// Built once per run with [`UnitsConversionHelper::initialize`], then
/// cloned per task and updated per spectrum.
#[derive(Debug, Clone)]
pub struct UnitsConversionHelper {
    source: Unit,
    target: Unit,
    source_stage: Stage,
    target_stage: Stage,
    identity: bool,
    l1: f64,
    efixed: f64,
    factors: SpectrumFactors,
}

impl UnitsConversionHelper {
    /// Validates the unit pair and prepares the conversion.
    ///
    /// `efixed` is the incident energy in direct mode and the analyser energy
    /// in indirect mode.
    ///
    /// # Errors
    /// Returns an error if the units cannot be converted into each other, or a
    /// parameter needed by the conversion is missing.
    pub fn initialize(
        source: &Unit,
        target: &Unit,
        mode: EnergyMode,
        efixed: Option<f64>,
        l1: f64,
    ) -> Result<Self> {
        let mut helper = Self {
            source: source.clone(),
            target: target.clone(),
            source_stage: Stage::Tof,
            target_stage: Stage::Tof,
            identity: source == target,
            l1,
            efixed: 0.0,
            factors: SpectrumFactors::default(),
        };
        if helper.identity {
            return Ok(helper);
        }

        let incompatible = || Error::IncompatibleUnits {
            from: source.to_string(),
            to: target.to_string(),
        };
        let source_stage = Stage::for_unit(source, mode).ok_or_else(incompatible)?;
        let target_stage = Stage::for_unit(target, mode).ok_or_else(incompatible)?;

        if source_stage.is_delta_e() || target_stage.is_delta_e() {
            helper.efixed = match efixed {
                Some(e) if e > 0.0 && e.is_finite() => e,
                _ => {
                    return Err(Error::MissingParameter(match mode {
                        EnergyMode::Indirect => "fixed analyser energy (EFixed)",
                        _ => "incident energy (Ei)",
                    }))
                }
            };
        }
        if !(l1 > 0.0 && l1.is_finite()) {
            return Err(Error::Config(format!(
                "primary flight path must be positive, got {l1}"
            )));
        }

        helper.source_stage = source_stage;
        helper.target_stage = target_stage;
        Ok(helper)
    }

    /// Source unit.
    #[must_use]
    pub fn source(&self) -> &Unit {
        &self.source
    }

    /// Target unit.
    #[must_use]
    pub fn target(&self) -> &Unit {
        &self.target
    }

    /// Returns true when values pass through unchanged.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.identity
    }

    /// Recomputes the cached factors for one spectrum.
    pub fn update_conversion(&mut self, detector: &DetectorRecord) {
        if self.identity {
            return;
        }
        let l2 = detector.l2;
        let efixed = match self.source_stage.max_delta(self.target_stage) {
            Some(Stage::DeltaEIndirect) => detector.efixed.unwrap_or(self.efixed),
            _ => self.efixed,
        };
        let c_l1 = ENERGY_FACTOR * self.l1 * self.l1;
        let c_l2 = ENERGY_FACTOR * l2 * l2;
        let t_fixed = match self.source_stage.max_delta(self.target_stage) {
            Some(Stage::DeltaEDirect) => (c_l1 / efixed).sqrt(),
            Some(Stage::DeltaEIndirect) => (c_l2 / efixed).sqrt(),
            _ => 0.0,
        };
        self.factors = SpectrumFactors {
            l_total: self.l1 + l2,
            c_l1,
            c_l2,
            t_fixed,
            efixed,
        };
    }

    /// Converts one raw value. Unphysical inputs yield NaN.
    #[inline]
    #[must_use]
    pub fn convert_units(&self, value: f64) -> f64 {
        if self.identity {
            return value;
        }
        let tof = self.to_tof(value);
        self.from_tof(tof)
    }

    fn to_tof(&self, x: f64) -> f64 {
        let f = &self.factors;
        match self.source_stage {
            Stage::Tof => x,
            Stage::Wavelength => positive_or_nan(x) * f.l_total / WAVELENGTH_FACTOR,
            Stage::Momentum => 2.0 * PI * f.l_total / (positive_or_nan(x) * WAVELENGTH_FACTOR),
            Stage::Energy => (ENERGY_FACTOR * f.l_total * f.l_total / positive_or_nan(x)).sqrt(),
            Stage::DeltaEDirect => {
                let e_final = positive_or_nan(f.efixed - x);
                f.t_fixed + (f.c_l2 / e_final).sqrt()
            }
            Stage::DeltaEIndirect => {
                let e_initial = positive_or_nan(x + f.efixed);
                (f.c_l1 / e_initial).sqrt() + f.t_fixed
            }
        }
    }

    fn from_tof(&self, tof: f64) -> f64 {
        let f = &self.factors;
        match self.target_stage {
            Stage::Tof => tof,
            Stage::Wavelength => positive_or_nan(tof) * WAVELENGTH_FACTOR / f.l_total,
            Stage::Momentum => 2.0 * PI * f.l_total / (positive_or_nan(tof) * WAVELENGTH_FACTOR),
            Stage::Energy => {
                let t = positive_or_nan(tof);
                ENERGY_FACTOR * f.l_total * f.l_total / (t * t)
            }
            Stage::DeltaEDirect => {
                let t2 = positive_or_nan(tof - f.t_fixed);
                f.efixed - f.c_l2 / (t2 * t2)
            }
            Stage::DeltaEIndirect => {
                let t1 = positive_or_nan(tof - f.t_fixed);
                f.c_l1 / (t1 * t1) - f.efixed
            }
        }
    }
}

impl Stage {
    /// The energy-transfer stage on either side, if any.
    fn max_delta(self, other: Self) -> Option<Self> {
        if self.is_delta_e() {
            Some(self)
        } else if other.is_delta_e() {
            Some(other)
        } else {
            None
        }
    }
}

#[inline]
fn positive_or_nan(x: f64) -> f64 {
    if x > 0.0 {
        x
    } else {
        f64::NAN
    }
}
