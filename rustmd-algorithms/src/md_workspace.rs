//! MD event workspace: dimensions, experiment infos and the box tree.
#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]

use crate::box_controller::BoxController;
use crate::md_box::{BoxExtent, BoxSummary, MDBox, RegionSummary, SplitStats};
use log::{debug, warn};
use rustmd_core::{
    BoxControllerConfig, CoordT, Dimension, Error, ExperimentInfo, MDEventBatch, Result,
};
use std::fmt;
use sysinfo::System;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Largest number of experiment infos a u16 run index can address.
pub const MAX_RUNS: usize = 65_536;

/// Completion state of an output workspace.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum WorkspaceStatus {
    /// No conversion has finished yet.
    #[default]
    Pending,
    /// The last conversion finished.
    Complete,
    /// The last conversion was cancelled; the content is partial.
    Cancelled,
    /// The last conversion failed; the content is partial.
    Failed(String),
}

impl fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Complete => f.write_str("complete"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Sparse N-dimensional event workspace backed by a recursively split box tree.
///
/// Events can be added concurrently through `&self`; splitting and cache
/// refreshes need `&mut self` and therefore never overlap with inserts.
#[derive(Debug)]
pub struct MDEventWorkspace {
    dimensions: Vec<Dimension>,
    controller: BoxController,
    root: MDBox,
    experiments: Vec<ExperimentInfo>,
    status: WorkspaceStatus,
}

impl MDEventWorkspace {
    /// Creates an empty workspace whose root box spans the dimensions.
    ///
    /// # Errors
    /// Returns an error for invalid dimensions or box controller settings.
    pub fn new(dimensions: Vec<Dimension>, config: &BoxControllerConfig) -> Result<Self> {
        if dimensions.is_empty() {
            return Err(Error::Config("workspace needs at least one dimension".to_string()));
        }
        dimensions.iter().try_for_each(Dimension::validate)?;
        let controller = BoxController::new(dimensions.len(), config)?;
        let extents = dimensions
            .iter()
            .map(|d| BoxExtent::new(d.min as CoordT, d.max as CoordT))
            .collect();
        Ok(Self {
            dimensions,
            controller,
            root: MDBox::new_root(extents),
            experiments: Vec::new(),
            status: WorkspaceStatus::Pending,
        })
    }

    /// Number of dimensions.
    #[must_use]
    pub fn nd(&self) -> usize {
        self.dimensions.len()
    }

    /// Dimensions of the workspace.
    #[must_use]
    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    /// Box controller.
    #[must_use]
    pub fn box_controller(&self) -> &BoxController {
        &self.controller
    }

    /// Root box.
    #[must_use]
    pub fn root(&self) -> &MDBox {
        &self.root
    }

    /// Completion state.
    #[must_use]
    pub fn status(&self) -> &WorkspaceStatus {
        &self.status
    }

    /// Sets the completion state.
    pub fn set_status(&mut self, status: WorkspaceStatus) {
        self.status = status;
    }

    /// Attaches experiment metadata and returns its run index.
    ///
    /// # Errors
    /// Returns [`Error::TooManyRuns`] once the run index space is exhausted.
    pub fn add_experiment_info(&mut self, info: ExperimentInfo) -> Result<u16> {
        let index = u16::try_from(self.experiments.len())
            .map_err(|_| Error::TooManyRuns { max: MAX_RUNS })?;
        self.experiments.push(info);
        Ok(index)
    }

    /// Experiment metadata for a run index.
    #[must_use]
    pub fn experiment_info(&self, run_index: u16) -> Option<&ExperimentInfo> {
        self.experiments.get(usize::from(run_index))
    }

    /// Number of attached experiment infos.
    #[must_use]
    pub fn num_experiment_info(&self) -> usize {
        self.experiments.len()
    }

    /// Inserts a batch of events and returns how many were added.
    ///
    /// Safe to call from several threads at once.
    ///
    /// # Errors
    /// Returns [`Error::BoxTreeInvariant`] if the batch has the wrong
    /// dimensionality or an event lies outside the workspace.
    pub fn add_events(&self, batch: &MDEventBatch) -> Result<usize> {
        if batch.nd() != self.nd() {
            return Err(Error::BoxTreeInvariant(format!(
                "{}-dimensional events added to a {}-dimensional workspace",
                batch.nd(),
                self.nd()
            )));
        }
        let extents = self.root.extents();
        for i in 0..batch.len() {
            let coords = batch.coords_of(i);
            if !coords.iter().zip(extents).all(|(&c, e)| e.contains(c)) {
                return Err(Error::BoxTreeInvariant(format!(
                    "event at {coords:?} lies outside the workspace extents"
                )));
            }
        }
        let indices: Vec<usize> = (0..batch.len()).collect();
        self.root.insert(batch, &indices)?;
        Ok(batch.len())
    }

    /// Splits the root box once, whatever it holds.
    pub fn split_box(&mut self) {
        if !self.root.is_leaf() {
            return;
        }
        let mut stats = SplitStats::default();
        self.root.split_leaf(&self.controller, &mut stats);
        self.apply_split_stats(&stats);
    }

    /// Splits every leaf holding more events than the split threshold, then
    /// their new children, and so on. Returns the number of boxes split.
    pub fn split_all_if_needed(&mut self) -> usize {
        let stats = self.root.split_if_needed(&self.controller);
        self.apply_split_stats(&stats);
        let n = stats.total();
        if n > 0 {
            debug!(
                "split {n} boxes, {} leaves in {} grid boxes",
                self.controller.total_num_md_boxes(),
                self.controller.total_num_grid_boxes()
            );
        }
        n
    }

    /// Splits the tree uniformly down to `depth` before events are added.
    ///
    /// # Errors
    /// Returns [`Error::InsufficientMemory`] if the boxes would not fit in the
    /// available memory, or a configuration error if `depth` exceeds the
    /// maximum depth.
    pub fn set_min_recursion_depth(&mut self, depth: usize) -> Result<()> {
        let num_boxes =
            (self.controller.num_split() as f64).powi(i32::try_from(depth).unwrap_or(i32::MAX));
        let required_kb = num_boxes * std::mem::size_of::<MDBox>() as f64 / 1024.0;
        let mut system = System::new();
        system.refresh_memory();
        let available_kb = system.available_memory() / 1024;
        if available_kb == 0 {
            warn!("available memory unknown, skipping the box memory check");
        } else if (available_kb as f64) < required_kb {
            return Err(Error::InsufficientMemory {
                required_kb,
                available_kb,
            });
        }
        if depth > self.controller.max_depth() {
            return Err(Error::Config(format!(
                "minimum recursion depth {depth} exceeds maximum depth {}",
                self.controller.max_depth()
            )));
        }
        let stats = self.root.split_to_depth(depth, &self.controller);
        self.apply_split_stats(&stats);
        Ok(())
    }

    fn apply_split_stats(&mut self, stats: &SplitStats) {
        for (depth, count) in stats.per_depth() {
            self.controller.track_num_boxes(depth, count);
        }
    }

    /// Recomputes the cached aggregates of every box.
    pub fn refresh_cache(&mut self) {
        self.root.refresh_cache();
    }

    /// Current number of events, bypassing the cache.
    #[must_use]
    pub fn count_events(&self) -> usize {
        self.root.event_count()
    }

    /// Cached number of events.
    #[must_use]
    pub fn n_points(&self) -> usize {
        self.root.cache().n_points
    }

    /// Cached total signal.
    #[must_use]
    pub fn total_signal(&self) -> f64 {
        self.root.cache().signal
    }

    /// Cached total squared error.
    #[must_use]
    pub fn total_error_squared(&self) -> f64 {
        self.root.cache().error_squared
    }

    /// Cached signal-weighted centroid.
    #[must_use]
    pub fn centroid(&self) -> Option<&[f64]> {
        self.root.cache().centroid.as_deref()
    }

    /// Cached exact bounding box of all events.
    #[must_use]
    pub fn data_bounds(&self) -> Option<&[[f64; 2]]> {
        self.root.cache().data_bounds.as_deref()
    }

    /// Smallest union of box extents, down to `depth`, that holds every event.
    ///
    /// Dimensions without any event fall back to the full dimension range.
    #[must_use]
    pub fn minimum_extents(&self, depth: usize) -> Vec<[f64; 2]> {
        let mut out = vec![[f64::INFINITY, f64::NEG_INFINITY]; self.nd()];
        self.root.for_each_box(depth, true, &mut |b| {
            if b.n_points() == 0 {
                return;
            }
            for (o, e) in out.iter_mut().zip(b.extents()) {
                o[0] = o[0].min(f64::from(e.min));
                o[1] = o[1].max(f64::from(e.max));
            }
        });
        for (o, d) in out.iter_mut().zip(&self.dimensions) {
            if o[0] > o[1] {
                *o = [d.min, d.max];
            }
        }
        out
    }

    /// Width of the finest possible box in each dimension.
    #[must_use]
    pub fn estimate_resolution(&self) -> Vec<f64> {
        let depth = i32::try_from(self.controller.max_depth()).unwrap_or(i32::MAX);
        self.dimensions
            .iter()
            .zip(self.controller.split_into())
            .map(|(d, &n)| d.width() / (n as f64).powi(depth))
            .collect()
    }

    /// Box with the given ID.
    #[must_use]
    pub fn get_box(&self, id: usize) -> Option<&MDBox> {
        self.root.find(id)
    }

    /// Summaries of every leaf, in tree order.
    #[must_use]
    pub fn leaf_summaries(&self) -> Vec<BoxSummary> {
        let mut out = Vec::new();
        self.root
            .for_each_box(usize::MAX, true, &mut |b| out.push(b.summary()));
        out
    }

    /// Summaries of every box, in tree order.
    #[must_use]
    pub fn box_summaries(&self) -> Vec<BoxSummary> {
        let mut out = Vec::new();
        self.root
            .for_each_box(usize::MAX, false, &mut |b| out.push(b.summary()));
        out
    }

    /// Count and signal of the events in the half-open region `[min, max)`.
    ///
    /// # Errors
    /// Returns a configuration error if the bounds do not have one value per
    /// dimension.
    pub fn events_in_region(&self, min: &[f64], max: &[f64]) -> Result<RegionSummary> {
        if min.len() != self.nd() || max.len() != self.nd() {
            return Err(Error::Config(format!(
                "region needs {} bounds per side, got {} and {}",
                self.nd(),
                min.len(),
                max.len()
            )));
        }
        let mut acc = RegionSummary::default();
        self.root.region_summary(min, max, &mut acc);
        Ok(acc)
    }

    /// Human-readable box statistics.
    #[must_use]
    pub fn box_controller_stats(&self) -> Vec<String> {
        let bc = &self.controller;
        let kb = |n: usize| n * std::mem::size_of::<MDBox>() / 1024;
        vec![
            format!(
                "{} MDBoxes ({} kB)",
                bc.total_num_md_boxes(),
                kb(bc.total_num_md_boxes())
            ),
            format!(
                "{} MDGridBoxes ({} kB)",
                bc.total_num_grid_boxes(),
                kb(bc.total_num_grid_boxes())
            ),
            format!("Avg recursion depth: {:.3}", bc.average_depth()),
            format!("Split threshold: {}", bc.split_threshold()),
            format!("Max depth: {}", bc.max_depth()),
        ]
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]
    use super::*;
    use approx::assert_abs_diff_eq;

    fn workspace(threshold: usize) -> MDEventWorkspace {
        let dims = vec![
            Dimension::new("x", "m", 0.0, 10.0).unwrap(),
            Dimension::new("y", "m", -5.0, 5.0).unwrap(),
        ];
        let config = BoxControllerConfig::default()
            .with_split_into(2)
            .with_split_threshold(threshold)
            .with_max_depth(6);
        MDEventWorkspace::new(dims, &config).unwrap()
    }

    fn grid_batch(n: usize) -> MDEventBatch {
        let mut batch = MDEventBatch::new(2);
        for i in 0..n {
            let x = (i % 10) as f32 + 0.5;
            let y = (i / 10 % 10) as f32 - 4.5;
            batch.push(&[x, y], 1.0, 1.0, 0, 7);
        }
        batch
    }

    #[test]
    fn test_add_events_and_cache() {
        let mut ws = workspace(1000);
        assert_eq!(ws.add_events(&grid_batch(100)).unwrap(), 100);
        assert_eq!(ws.count_events(), 100);
        assert_eq!(ws.n_points(), 0);

        ws.refresh_cache();
        assert_eq!(ws.n_points(), 100);
        assert_eq!(ws.total_signal(), 100.0);
        assert_eq!(ws.total_error_squared(), 100.0);
        let centroid = ws.centroid().unwrap();
        assert_abs_diff_eq!(centroid[0], 5.0, epsilon = 1e-9);
        assert_abs_diff_eq!(centroid[1], 0.0, epsilon = 1e-9);
        assert_eq!(ws.data_bounds().unwrap(), &[[0.5, 9.5], [-4.5, 4.5]]);
    }

    #[test]
    fn test_rejects_events_outside_or_nan() {
        let ws = workspace(10);
        let mut outside = MDEventBatch::new(2);
        outside.push(&[11.0, 0.0], 1.0, 1.0, 0, 1);
        assert!(matches!(
            ws.add_events(&outside),
            Err(Error::BoxTreeInvariant(_))
        ));

        let mut nan = MDEventBatch::new(2);
        nan.push(&[f32::NAN, 0.0], 1.0, 1.0, 0, 1);
        assert!(ws.add_events(&nan).is_err());

        assert!(ws.add_events(&MDEventBatch::new(3)).is_err());
        assert_eq!(ws.count_events(), 0);
    }

    #[test]
    fn test_split_all_is_idempotent() {
        let mut ws = workspace(10);
        ws.add_events(&grid_batch(100)).unwrap();
        assert!(ws.split_all_if_needed() > 0);
        ws.refresh_cache();
        let before = ws.box_summaries();
        let boxes = ws.box_controller().total_num_md_boxes();

        assert_eq!(ws.split_all_if_needed(), 0);
        ws.refresh_cache();
        assert_eq!(ws.box_summaries(), before);
        assert_eq!(ws.box_controller().total_num_md_boxes(), boxes);
        assert_eq!(ws.n_points(), 100);

        for leaf in ws.leaf_summaries() {
            assert!(leaf.cache.n_points <= 10 || leaf.depth == 6);
        }
        let total: usize = ws.leaf_summaries().iter().map(|l| l.cache.n_points).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn test_box_counts_match_tree() {
        let mut ws = workspace(5);
        ws.split_box();
        ws.add_events(&grid_batch(100)).unwrap();
        ws.split_all_if_needed();
        let leaves = ws.leaf_summaries().len();
        let grids = ws.box_summaries().len() - leaves;
        assert_eq!(ws.box_controller().total_num_md_boxes(), leaves);
        assert_eq!(ws.box_controller().total_num_grid_boxes(), grids);
        assert!(ws.get_box(0).is_some());
        assert_eq!(ws.get_box(1).and_then(|b| b.parent()), Some(0));
    }

    #[test]
    fn test_experiment_infos() {
        let mut ws = workspace(10);
        assert_eq!(ws.add_experiment_info(ExperimentInfo::default()).unwrap(), 0);
        let info = ExperimentInfo {
            run_number: 42,
            ..ExperimentInfo::default()
        };
        assert_eq!(ws.add_experiment_info(info).unwrap(), 1);
        assert_eq!(ws.experiment_info(1).map(|e| e.run_number), Some(42));
        assert_eq!(ws.num_experiment_info(), 2);
    }

    #[test]
    fn test_minimum_extents() {
        let mut ws = workspace(1);
        // Empty workspace: full range.
        assert_eq!(ws.minimum_extents(3), vec![[0.0, 10.0], [-5.0, 5.0]]);

        let mut batch = MDEventBatch::new(2);
        batch.push(&[1.0, -4.0], 1.0, 1.0, 0, 1);
        batch.push(&[2.0, -3.0], 1.0, 1.0, 0, 1);
        ws.add_events(&batch).unwrap();
        ws.split_all_if_needed();
        ws.refresh_cache();

        let ext = ws.minimum_extents(1);
        assert_eq!(ext, vec![[0.0, 5.0], [-5.0, 0.0]]);
        let fine = ws.minimum_extents(10);
        assert!(fine[0][1] <= 5.0 && fine[0][0] >= 0.0);
    }

    #[test]
    fn test_events_in_region() {
        let mut ws = workspace(10);
        ws.add_events(&grid_batch(100)).unwrap();
        ws.split_all_if_needed();
        let region = ws.events_in_region(&[0.0, -5.0], &[5.0, 5.0]).unwrap();
        assert_eq!(region.n_points, 50);
        assert_eq!(region.signal, 50.0);
        assert!(ws.events_in_region(&[0.0], &[1.0]).is_err());
    }

    #[test]
    fn test_min_recursion_depth() {
        let mut ws = workspace(1000);
        ws.set_min_recursion_depth(2).unwrap();
        assert_eq!(ws.box_controller().total_num_md_boxes(), 16);
        assert_eq!(ws.leaf_summaries().len(), 16);
        assert!(ws.leaf_summaries().iter().all(|l| l.depth == 2));

        assert!(matches!(
            ws.set_min_recursion_depth(7),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_min_recursion_depth_memory_check() {
        let mut system = System::new();
        system.refresh_memory();
        if system.available_memory() == 0 {
            return;
        }
        let dims = vec![Dimension::new("x", "m", 0.0, 1.0).unwrap(); 3];
        let config = BoxControllerConfig::default().with_max_depth(64);
        let mut ws = MDEventWorkspace::new(dims, &config).unwrap();
        assert!(matches!(
            ws.set_min_recursion_depth(40),
            Err(Error::InsufficientMemory { .. })
        ));
        assert!(ws.root().is_leaf());
    }

    #[test]
    fn test_estimate_resolution_and_stats() {
        let ws = workspace(10);
        let res = ws.estimate_resolution();
        assert_abs_diff_eq!(res[0], 10.0 / 64.0);
        assert_eq!(ws.box_controller_stats().len(), 5);
        assert_eq!(ws.status(), &WorkspaceStatus::Pending);
    }
}
