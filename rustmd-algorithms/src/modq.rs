//! |Q| transforms for elastic, direct and indirect geometry.
//!
//! All three compute the momentum transfer Q = R * (k_i - k_f) from the
//! cached detector direction and reject events by |Q|^2 against the squared
//! bounds of the first dimension. The inelastic variants additionally emit
//! the energy transfer as the second coordinate.
#![allow(clippy::cast_possible_truncation, clippy::doc_markdown)]

use crate::transform::CoordTransform;
use log::warn;
use rustmd_core::{
    CoordT, DetectorRecord, EnergyMode, Error, Result, TargetDescription, Unit, V3,
    E_MEV_TO_NEUTRON_WAVENUMBER_SQ,
};
use std::marker::PhantomData;

/// State shared by every |Q| transform.
#[derive(Debug, Clone)]
struct ModQCommon {
    rotation: [f64; 9],
    q2_min: f64,
    q2_max: f64,
    additional: Vec<f64>,
    additional_bounds: Vec<(f64, f64)>,
    n_matrix_dims: usize,
    n_dims: usize,
    direction: V3,
}

impl ModQCommon {
    fn new(description: &TargetDescription, n_matrix_dims: usize) -> Result<Self> {
        description.validate()?;
        let dims = &description.dimensions;
        let n_additional = description.additional_coordinates.len();
        if dims.len() != n_matrix_dims + n_additional {
            return Err(Error::Config(format!(
                "{n_matrix_dims} matrix dimensions plus {n_additional} additional coordinates \
                 do not match {} output dimensions",
                dims.len()
            )));
        }

        let q = &dims[0];
        let (mut q_min, mut q_max) = (q.min, q.max);
        if q_min < 0.0 || q_max < 0.0 {
            warn!(
                "negative |Q| bound in [{}, {}) clamped to zero",
                q.min, q.max
            );
            q_min = q_min.max(0.0);
            q_max = q_max.max(0.0);
        }
        let (q2_min, q2_max) = (q_min * q_min, q_max * q_max);
        if (q2_min - q2_max).abs() < f64::from(f32::EPSILON) || q2_max < q2_min {
            return Err(Error::Config(format!(
                "min Q^2 {q2_min} must be below max Q^2 {q2_max}"
            )));
        }

        Ok(Self {
            rotation: description.rotation,
            q2_min,
            q2_max,
            additional: description.additional_coordinates.clone(),
            additional_bounds: dims[n_matrix_dims..]
                .iter()
                .map(|d| (d.min, d.max))
                .collect(),
            n_matrix_dims,
            n_dims: dims.len(),
            direction: [0.0, 0.0, 1.0],
        })
    }

    fn generic_variables(&self, coord: &mut [CoordT]) -> Result<bool> {
        if coord.len() != self.n_dims {
            return Err(Error::Config(format!(
                "coordinate buffer has {} slots for {} dimensions",
                coord.len(),
                self.n_dims
            )));
        }
        for (i, (&value, &(min, max))) in self
            .additional
            .iter()
            .zip(&self.additional_bounds)
            .enumerate()
        {
            if !(value >= min && value < max) {
                return Ok(false);
            }
            coord[self.n_matrix_dims + i] = value as CoordT;
        }
        Ok(true)
    }

    fn update_direction(&mut self, detector: &DetectorRecord) -> bool {
        self.direction = detector.direction;
        self.direction.iter().all(|c| c.is_finite())
    }

    /// |R q|^2.
    #[inline]
    fn rotated_norm_sq(&self, qx: f64, qy: f64, qz: f64) -> f64 {
        let r = &self.rotation;
        let x = r[0] * qx + r[1] * qy + r[2] * qz;
        let y = r[3] * qx + r[4] * qy + r[5] * qz;
        let z = r[6] * qx + r[7] * qy + r[8] * qz;
        x * x + y * y + z * z
    }

    #[inline]
    fn accepts_q2(&self, q2: f64) -> bool {
        q2 >= self.q2_min && q2 < self.q2_max
    }
}

/// Elastic |Q|: one matrix coordinate from the neutron wavevector k.
#[derive(Debug, Clone)]
pub struct ModQElastic {
    common: ModQCommon,
}

impl ModQElastic {
    /// Initialises the transform.
    ///
    /// # Errors
    /// Returns a configuration error for inconsistent dimensions or empty
    /// |Q| ranges.
    pub fn new(description: &TargetDescription) -> Result<Self> {
        Ok(Self {
            common: ModQCommon::new(description, 1)?,
        })
    }
}

impl CoordTransform for ModQElastic {
    fn name(&self) -> &'static str {
        "ModQElastic"
    }

    fn energy_mode(&self) -> EnergyMode {
        EnergyMode::Elastic
    }

    fn n_matrix_dims(&self) -> usize {
        1
    }

    fn input_unit(&self) -> Unit {
        Unit::Momentum
    }

    fn default_dim_ids(&self) -> Vec<String> {
        vec!["|Q|".to_string()]
    }

    fn output_units(&self) -> Vec<String> {
        vec!["Momentum".to_string()]
    }

    fn calc_generic_variables(&self, coord: &mut [CoordT]) -> Result<bool> {
        self.common.generic_variables(coord)
    }

    fn calc_ydep_coordinates(&mut self, _coord: &mut [CoordT], detector: &DetectorRecord) -> bool {
        self.common.update_direction(detector)
    }

    #[inline]
    fn calc_matrix_coord(&self, k: f64, coord: &mut [CoordT]) -> bool {
        let [ex, ey, ez] = self.common.direction;
        let q2 = self
            .common
            .rotated_norm_sq(-ex * k, -ey * k, (1.0 - ez) * k);
        if !self.common.accepts_q2(q2) {
            return false;
        }
        coord[0] = q2.sqrt() as CoordT;
        true
    }

    fn clone_box(&self) -> Box<dyn CoordTransform> {
        Box::new(self.clone())
    }
}

/// Energy bookkeeping that differs between direct and indirect geometry.
pub trait InelasticKind: Clone + Send + Sync + 'static {
    /// Energy mode handled by this kind.
    const MODE: EnergyMode;
    /// Transform name.
    const NAME: &'static str;

    /// Magnitude of the variable wavevector for energy transfer `e_tr`.
    fn k_transfer(fixed_energy: f64, e_tr: f64) -> f64;
}

/// Direct geometry: fixed incident energy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Direct;

/// Indirect geometry: fixed final energy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Indirect;

impl InelasticKind for Direct {
    const MODE: EnergyMode = EnergyMode::Direct;
    const NAME: &'static str = "ModQDirect";

    #[inline]
    fn k_transfer(fixed_energy: f64, e_tr: f64) -> f64 {
        ((fixed_energy - e_tr) / E_MEV_TO_NEUTRON_WAVENUMBER_SQ).sqrt()
    }
}

impl InelasticKind for Indirect {
    const MODE: EnergyMode = EnergyMode::Indirect;
    const NAME: &'static str = "ModQIndirect";

    #[inline]
    fn k_transfer(fixed_energy: f64, e_tr: f64) -> f64 {
        ((fixed_energy + e_tr) / E_MEV_TO_NEUTRON_WAVENUMBER_SQ).sqrt()
    }
}

/// Inelastic |Q| and energy transfer.
#[derive(Debug, Clone)]
pub struct ModQInelastic<K: InelasticKind> {
    common: ModQCommon,
    e_min: f64,
    e_max: f64,
    fixed_energy: f64,
    k_fixed: f64,
    kind: PhantomData<K>,
}

/// |Q| and energy transfer for direct geometry.
pub type ModQDirect = ModQInelastic<Direct>;
/// |Q| and energy transfer for indirect geometry.
pub type ModQIndirect = ModQInelastic<Indirect>;

impl<K: InelasticKind> ModQInelastic<K> {
    /// Initialises the transform.
    ///
    /// # Errors
    /// Returns a configuration error for inconsistent dimensions, empty |Q|
    /// ranges or a missing or non-positive fixed energy.
    pub fn new(description: &TargetDescription) -> Result<Self> {
        let common = ModQCommon::new(description, 2)?;
        let fixed_energy = match description.incident_energy {
            None => {
                return Err(Error::MissingParameter(match K::MODE {
                    EnergyMode::Indirect => "fixed analyser energy (EFixed)",
                    _ => "incident energy (Ei)",
                }))
            }
            Some(e) if e > 0.0 && e.is_finite() => e,
            Some(e) => {
                return Err(Error::Config(format!(
                    "{} needs a positive fixed energy, got {e}",
                    K::NAME
                )))
            }
        };
        let energy = &description.dimensions[1];
        Ok(Self {
            common,
            e_min: energy.min,
            e_max: energy.max,
            fixed_energy,
            k_fixed: (fixed_energy / E_MEV_TO_NEUTRON_WAVENUMBER_SQ).sqrt(),
            kind: PhantomData,
        })
    }
}

impl<K: InelasticKind> CoordTransform for ModQInelastic<K> {
    fn name(&self) -> &'static str {
        K::NAME
    }

    fn energy_mode(&self) -> EnergyMode {
        K::MODE
    }

    fn n_matrix_dims(&self) -> usize {
        2
    }

    fn input_unit(&self) -> Unit {
        Unit::DeltaE
    }

    fn default_dim_ids(&self) -> Vec<String> {
        vec!["|Q|".to_string(), "DeltaE".to_string()]
    }

    fn output_units(&self) -> Vec<String> {
        vec!["MomentumTransfer".to_string(), "DeltaE".to_string()]
    }

    fn calc_generic_variables(&self, coord: &mut [CoordT]) -> Result<bool> {
        self.common.generic_variables(coord)
    }

    fn calc_ydep_coordinates(&mut self, _coord: &mut [CoordT], detector: &DetectorRecord) -> bool {
        self.common.update_direction(detector)
    }

    #[inline]
    fn calc_matrix_coord(&self, e_tr: f64, coord: &mut [CoordT]) -> bool {
        if !(e_tr >= self.e_min && e_tr < self.e_max) {
            return false;
        }
        let k_tr = K::k_transfer(self.fixed_energy, e_tr);
        let [ex, ey, ez] = self.common.direction;
        let q2 = self
            .common
            .rotated_norm_sq(-ex * k_tr, -ey * k_tr, self.k_fixed - ez * k_tr);
        if !self.common.accepts_q2(q2) {
            return false;
        }
        coord[0] = q2.sqrt() as CoordT;
        coord[1] = e_tr as CoordT;
        true
    }

    fn clone_box(&self) -> Box<dyn CoordTransform> {
        Box::new(self.clone())
    }
}
