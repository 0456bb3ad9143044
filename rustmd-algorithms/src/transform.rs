//! Coordinate transform interface and factory.
//!
//! A transform is initialised once per run from a [`TargetDescription`],
//! cloned per worker task, updated once per spectrum and then evaluated once
//! per event.

use crate::modq::{ModQDirect, ModQElastic, ModQIndirect};
use rustmd_core::{CoordT, DetectorRecord, EnergyMode, Result, TargetDescription, Unit};

/// Maps one converted event value to matrix coordinates of the MD space.
pub trait CoordTransform: Send + Sync {
    /// Transform name.
    fn name(&self) -> &'static str;

    /// Energy mode the transform was built for.
    fn energy_mode(&self) -> EnergyMode;

    /// Number of coordinates computed from the event value.
    fn n_matrix_dims(&self) -> usize;

    /// Unit the event values must be converted to before `calc_matrix_coord`.
    fn input_unit(&self) -> Unit;

    /// Default dimension IDs for the matrix coordinates.
    fn default_dim_ids(&self) -> Vec<String>;

    /// Unit IDs of the matrix coordinates.
    fn output_units(&self) -> Vec<String>;

    /// Writes the fixed additional coordinates after the matrix ones.
    ///
    /// Returns `Ok(false)` if any additional coordinate lies outside its
    /// dimension, in which case no event of the run can be accepted.
    ///
    /// # Errors
    /// Returns a configuration error if `coord` does not have one slot per
    /// output dimension.
    fn calc_generic_variables(&self, coord: &mut [CoordT]) -> Result<bool>;

    /// Caches the per-spectrum quantities for `detector`.
    ///
    /// Returns false if the whole spectrum can be skipped.
    fn calc_ydep_coordinates(&mut self, coord: &mut [CoordT], detector: &DetectorRecord) -> bool;

    /// Computes the matrix coordinates for one event value.
    ///
    /// Returns false if the event falls outside the target ranges; `coord` is
    /// then left in an unspecified state.
    fn calc_matrix_coord(&self, x: f64, coord: &mut [CoordT]) -> bool;

    /// Copy with independent per-spectrum state.
    fn clone_box(&self) -> Box<dyn CoordTransform>;
}

impl Clone for Box<dyn CoordTransform> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Selects and initialises the transform for the description's energy mode.
///
/// # Errors
/// Returns a configuration error if the description is inconsistent with the
/// selected transform.
pub fn create_transform(description: &TargetDescription) -> Result<Box<dyn CoordTransform>> {
    Ok(match description.energy_mode {
        EnergyMode::Elastic => Box::new(ModQElastic::new(description)?),
        EnergyMode::Direct => Box::new(ModQDirect::new(description)?),
        EnergyMode::Indirect => Box::new(ModQIndirect::new(description)?),
    })
}
