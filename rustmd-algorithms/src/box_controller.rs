//! Box splitting policy and per-depth box bookkeeping.
#![allow(clippy::cast_precision_loss)]

use rustmd_core::{BoxControllerConfig, Result, SplitHeuristic};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Controls how the box tree of an MD workspace grows.
///
/// Box counts are only updated under `&mut self`, while IDs can be claimed
/// concurrently by parallel split tasks.
#[derive(Debug)]
pub struct BoxController {
    nd: usize,
    split_into: Vec<usize>,
    num_split: usize,
    split_threshold: usize,
    max_depth: usize,
    heuristic: SplitHeuristic,
    num_md_boxes: Vec<usize>,
    num_grid_boxes: Vec<usize>,
    max_num_md_boxes: Vec<f64>,
    next_id: AtomicUsize,
}

impl BoxController {
    /// Creates a controller for `nd` dimensions with a single root leaf.
    ///
    /// # Errors
    /// Returns a configuration error if `config` is invalid for `nd`.
    pub fn new(nd: usize, config: &BoxControllerConfig) -> Result<Self> {
        config.validate(nd)?;
        let split_into = config.split_into_for(nd)?;
        let num_split = split_into.iter().product();
        let mut controller = Self {
            nd,
            split_into,
            num_split,
            split_threshold: config.split_threshold,
            max_depth: config.max_depth,
            heuristic: config.heuristic.clone(),
            num_md_boxes: Vec::new(),
            num_grid_boxes: Vec::new(),
            max_num_md_boxes: Vec::new(),
            // The root box takes ID 0.
            next_id: AtomicUsize::new(1),
        };
        controller.reset_num_boxes();
        Ok(controller)
    }

    /// Number of dimensions.
    #[must_use]
    pub fn nd(&self) -> usize {
        self.nd
    }

    /// Children per dimension when a box splits.
    #[must_use]
    pub fn split_into(&self) -> &[usize] {
        &self.split_into
    }

    /// Total number of children created by one split.
    #[must_use]
    pub fn num_split(&self) -> usize {
        self.num_split
    }

    /// Leaf size above which a box splits.
    #[must_use]
    pub fn split_threshold(&self) -> usize {
        self.split_threshold
    }

    /// Depth at which leaves stop splitting.
    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Incremental split heuristic.
    #[must_use]
    pub fn heuristic(&self) -> &SplitHeuristic {
        &self.heuristic
    }

    /// Changes the maximum depth, keeping the counts collected so far.
    pub fn set_max_depth(&mut self, depth: usize) {
        self.max_depth = depth;
        self.num_md_boxes.resize(depth + 1, 0);
        self.num_grid_boxes.resize(depth + 1, 0);
        self.reset_max_num_boxes();
    }

    /// Returns true if a leaf holding `n_points` events at `depth` should split.
    #[inline]
    #[must_use]
    pub fn will_split(&self, n_points: usize, depth: usize) -> bool {
        n_points > self.split_threshold && depth < self.max_depth
    }

    /// Decides whether enough events arrived since the last split pass.
    ///
    /// `n_events_in_output` is the workspace total, `events_added` the count
    /// since the last pass and `num_md_boxes` the current number of leaves.
    #[must_use]
    pub fn should_split_boxes(
        &self,
        n_events_in_output: usize,
        events_added: usize,
        num_md_boxes: usize,
    ) -> bool {
        if num_md_boxes == 0 {
            return false;
        }
        let comparison_point = (n_events_in_output / self.heuristic.output_fraction_divisor)
            .max(self.heuristic.min_events_between_splits);
        if events_added > comparison_point {
            return true;
        }
        events_added / num_md_boxes > self.split_threshold
    }

    /// Claims a contiguous block of `count` box IDs and returns the first.
    pub fn claim_ids(&self, count: usize) -> usize {
        self.next_id.fetch_add(count, Ordering::Relaxed)
    }

    /// One past the largest ID handed out so far.
    #[must_use]
    pub fn max_id(&self) -> usize {
        self.next_id.load(Ordering::Relaxed)
    }

    /// Records that `count` leaves at `depth` were turned into grid boxes.
    pub fn track_num_boxes(&mut self, depth: usize, count: usize) {
        if depth + 1 >= self.num_md_boxes.len() {
            self.num_md_boxes.resize(depth + 2, 0);
            self.num_grid_boxes.resize(depth + 2, 0);
        }
        self.num_md_boxes[depth] = self.num_md_boxes[depth].saturating_sub(count);
        self.num_grid_boxes[depth] += count;
        self.num_md_boxes[depth + 1] += count * self.num_split;
    }

    /// Leaves per depth.
    #[must_use]
    pub fn num_md_boxes(&self) -> &[usize] {
        &self.num_md_boxes
    }

    /// Grid boxes per depth.
    #[must_use]
    pub fn num_grid_boxes(&self) -> &[usize] {
        &self.num_grid_boxes
    }

    /// Largest possible number of boxes per depth.
    #[must_use]
    pub fn max_num_md_boxes(&self) -> &[f64] {
        &self.max_num_md_boxes
    }

    /// Total number of leaves.
    #[must_use]
    pub fn total_num_md_boxes(&self) -> usize {
        self.num_md_boxes.iter().sum()
    }

    /// Total number of grid boxes.
    #[must_use]
    pub fn total_num_grid_boxes(&self) -> usize {
        self.num_grid_boxes.iter().sum()
    }

    /// Average leaf depth, weighted by leaf volume.
    #[must_use]
    pub fn average_depth(&self) -> f64 {
        let Some(&finest) = self.max_num_md_boxes.last() else {
            return 0.0;
        };
        let total: f64 = self
            .num_md_boxes
            .iter()
            .zip(&self.max_num_md_boxes)
            .enumerate()
            .map(|(depth, (&n, &max_n))| (depth * n) as f64 * (finest / max_n))
            .sum();
        total / finest
    }

    /// Resets the counts to a single root leaf.
    pub fn reset_num_boxes(&mut self) {
        self.num_md_boxes = vec![0; self.max_depth + 1];
        self.num_grid_boxes = vec![0; self.max_depth + 1];
        self.num_md_boxes[0] = 1;
        self.reset_max_num_boxes();
    }

    fn reset_max_num_boxes(&mut self) {
        let per_split = self.num_split as f64;
        self.max_num_md_boxes = (0..=self.max_depth)
            .map(|depth| per_split.powi(i32::try_from(depth).unwrap_or(i32::MAX)))
            .collect();
    }
}
