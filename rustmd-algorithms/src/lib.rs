//! rustmd-algorithms: Conversion of event workspaces into MD event workspaces.
//!
//! This crate provides the conversion pipeline:
//! - **`ModQ` transforms** - |Q| (elastic) and |Q|, ΔE (direct, indirect)
//! - **Box tree** - recursively split boxes driven by a box controller
//! - **Event list converter** - per-spectrum conversion into `SoA` batches
//! - **Driver** - block-wise parallel conversion with incremental splitting
//!
#![warn(missing_docs)]

mod box_controller;
mod converter;
mod driver;
mod md_box;
mod md_workspace;
mod modq;
pub mod transform;

pub use box_controller::BoxController;
pub use converter::{ConversionTask, EventListConverter};
pub use driver::{ConversionDriver, ConversionReport, DriverState};
pub use md_box::{BoxCache, BoxExtent, BoxSummary, MDBox, RegionSummary};
pub use md_workspace::{MDEventWorkspace, WorkspaceStatus, MAX_RUNS};
pub use modq::{Direct, Indirect, InelasticKind, ModQDirect, ModQElastic, ModQIndirect, ModQInelastic};
pub use transform::{create_transform, CoordTransform};

// Re-export the core types used in this crate's public API
pub use rustmd_core::{
    BoxControllerConfig, CancellationToken, ConversionConfig, NoProgress, ProgressReporter,
    TargetDescription,
};
