//! rustmd-core: Core types for converting neutron event data into MD events.
//!
//! This crate provides the data model shared by the conversion pipeline:
//! raw events and event workspaces, instrument geometry, preprocessed
//! detectors, target-space descriptions, units conversion and the `SoA`
//! storage used for MD events.

pub mod config;
pub mod description;
pub mod detectors;
pub mod error;
pub mod event;
pub mod geometry;
pub mod progress;
pub mod soa;
pub mod units;
pub mod workspace;

pub use config::{BoxControllerConfig, ConversionConfig, SplitHeuristic};
pub use description::{Dimension, EnergyMode, ExperimentInfo, TargetDescription, IDENTITY_ROTATION};
pub use detectors::{DetectorRecord, PreprocessedDetectors};
pub use error::{Error, Result};
pub use event::{Event, EventList, EventType, TofEvent, WeightedEvent, WeightedEventNoTime};
pub use geometry::{DetectorInfo, Instrument, InstrumentGeometry, V3};
pub use progress::{CancellationToken, NoProgress, ProgressReporter};
pub use soa::{CoordT, MDEventBatch, MDEventRecord};
pub use units::{Unit, UnitsConversionHelper, E_MEV_TO_NEUTRON_WAVENUMBER_SQ};
pub use workspace::{EventWorkspace, RunInfo};
