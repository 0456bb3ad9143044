//! Recursive box tree holding MD events.
//!
//! A box is either a leaf owning an event batch behind its own lock, or a
//! grid box owning the children that tile its extents. Leaves only ever turn
//! into grid boxes; boxes are never merged.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

use crate::box_controller::BoxController;
use rayon::prelude::*;
use rustmd_core::{CoordT, Error, MDEventBatch, Result};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Closed interval covered by a box along one dimension.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BoxExtent {
    /// Lower edge.
    pub min: CoordT,
    /// Upper edge.
    pub max: CoordT,
}

impl BoxExtent {
    /// Creates an extent.
    #[must_use]
    pub fn new(min: CoordT, max: CoordT) -> Self {
        Self { min, max }
    }

    /// Width of the extent.
    #[must_use]
    pub fn width(&self) -> CoordT {
        self.max - self.min
    }

    /// Closed containment test. NaN is never contained.
    #[inline]
    #[must_use]
    pub fn contains(&self, x: CoordT) -> bool {
        x >= self.min && x <= self.max
    }

    fn overlaps_half_open(&self, min: f64, max: f64) -> bool {
        f64::from(self.max) >= min && f64::from(self.min) < max
    }
}

/// Aggregates cached per box by [`MDBox::refresh_cache`].
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BoxCache {
    /// Number of events in the box and its children.
    pub n_points: usize,
    /// Total signal.
    pub signal: f64,
    /// Total squared error.
    pub error_squared: f64,
    /// Signal-weighted centroid; `None` when the total signal is zero.
    pub centroid: Option<Vec<f64>>,
    /// Exact bounding box of the events; `None` when the box is empty.
    pub data_bounds: Option<Vec<[f64; 2]>>,
}

impl BoxCache {
    fn from_events(events: &MDEventBatch, nd: usize) -> Self {
        let mut signal = 0.0;
        let mut error_squared = 0.0;
        let mut weighted = vec![0.0; nd];
        let mut bounds = vec![[f64::INFINITY, f64::NEG_INFINITY]; nd];
        for i in 0..events.len() {
            let s = f64::from(events.signal[i]);
            signal += s;
            error_squared += f64::from(events.error_squared[i]);
            for (d, &c) in events.coords_of(i).iter().enumerate() {
                let c = f64::from(c);
                weighted[d] += s * c;
                bounds[d][0] = bounds[d][0].min(c);
                bounds[d][1] = bounds[d][1].max(c);
            }
        }
        Self::finish(events.len(), signal, error_squared, weighted, bounds)
    }

    fn from_children<'a>(children: impl Iterator<Item = &'a BoxCache>, nd: usize) -> Self {
        let mut n_points = 0;
        let mut signal = 0.0;
        let mut error_squared = 0.0;
        let mut weighted = vec![0.0; nd];
        let mut bounds = vec![[f64::INFINITY, f64::NEG_INFINITY]; nd];
        for child in children {
            n_points += child.n_points;
            signal += child.signal;
            error_squared += child.error_squared;
            if let Some(centroid) = &child.centroid {
                for (w, c) in weighted.iter_mut().zip(centroid) {
                    *w += child.signal * c;
                }
            }
            if let Some(child_bounds) = &child.data_bounds {
                for (b, cb) in bounds.iter_mut().zip(child_bounds) {
                    b[0] = b[0].min(cb[0]);
                    b[1] = b[1].max(cb[1]);
                }
            }
        }
        Self::finish(n_points, signal, error_squared, weighted, bounds)
    }

    fn finish(
        n_points: usize,
        signal: f64,
        error_squared: f64,
        weighted: Vec<f64>,
        bounds: Vec<[f64; 2]>,
    ) -> Self {
        let centroid = (signal != 0.0).then(|| weighted.iter().map(|w| w / signal).collect());
        Self {
            n_points,
            signal,
            error_squared,
            centroid,
            data_bounds: (n_points > 0).then_some(bounds),
        }
    }
}

/// Count and signal of the events inside a query region.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RegionSummary {
    /// Number of events.
    pub n_points: usize,
    /// Total signal.
    pub signal: f64,
    /// Total squared error.
    pub error_squared: f64,
}

/// Flat description of one box, for tables and reports.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BoxSummary {
    /// Box ID.
    pub id: usize,
    /// Parent box ID.
    pub parent: Option<usize>,
    /// Depth in the tree (root is 0).
    pub depth: usize,
    /// True for leaves.
    pub is_leaf: bool,
    /// Box extents.
    pub extents: Vec<BoxExtent>,
    /// Cached aggregates.
    pub cache: BoxCache,
}

/// Per-depth split counts collected during one split pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SplitStats {
    per_depth: Vec<usize>,
}

impl SplitStats {
    fn record(&mut self, depth: usize) {
        if self.per_depth.len() <= depth {
            self.per_depth.resize(depth + 1, 0);
        }
        self.per_depth[depth] += 1;
    }

    fn merge(mut self, other: Self) -> Self {
        if self.per_depth.len() < other.per_depth.len() {
            self.per_depth.resize(other.per_depth.len(), 0);
        }
        for (a, b) in self.per_depth.iter_mut().zip(other.per_depth) {
            *a += b;
        }
        self
    }

    pub(crate) fn total(&self) -> usize {
        self.per_depth.iter().sum()
    }

    pub(crate) fn per_depth(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.per_depth
            .iter()
            .copied()
            .enumerate()
            .filter(|&(_, n)| n > 0)
    }
}

#[derive(Debug)]
enum BoxContent {
    Leaf(Mutex<MDEventBatch>),
    Grid {
        split: Vec<usize>,
        children: Vec<MDBox>,
    },
}

/// One node of the box tree.
#[derive(Debug)]
pub struct MDBox {
    id: usize,
    parent: Option<usize>,
    depth: usize,
    extents: Vec<BoxExtent>,
    content: BoxContent,
    cache: BoxCache,
}

impl MDBox {
    pub(crate) fn new_root(extents: Vec<BoxExtent>) -> Self {
        Self::new_leaf(0, None, 0, extents)
    }

    fn new_leaf(id: usize, parent: Option<usize>, depth: usize, extents: Vec<BoxExtent>) -> Self {
        let nd = extents.len();
        Self {
            id,
            parent,
            depth,
            extents,
            content: BoxContent::Leaf(Mutex::new(MDEventBatch::new(nd))),
            cache: BoxCache::default(),
        }
    }

    /// Box ID, unique within the workspace.
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// ID of the parent box; `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    /// Depth in the tree.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Extents per dimension.
    #[must_use]
    pub fn extents(&self) -> &[BoxExtent] {
        &self.extents
    }

    /// Returns true for leaves.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        matches!(self.content, BoxContent::Leaf(_))
    }

    /// Children of a grid box; empty for leaves.
    #[must_use]
    pub fn children(&self) -> &[MDBox] {
        match &self.content {
            BoxContent::Leaf(_) => &[],
            BoxContent::Grid { children, .. } => children,
        }
    }

    /// Cached aggregates as of the last refresh.
    #[must_use]
    pub fn cache(&self) -> &BoxCache {
        &self.cache
    }

    /// Cached number of events.
    #[must_use]
    pub fn n_points(&self) -> usize {
        self.cache.n_points
    }

    /// Current number of events, bypassing the cache.
    #[must_use]
    pub fn event_count(&self) -> usize {
        match &self.content {
            BoxContent::Leaf(lock) => read_lock(lock).len(),
            BoxContent::Grid { children, .. } => children.iter().map(MDBox::event_count).sum(),
        }
    }

    /// Runs `f` on the events of a leaf. Returns `None` for grid boxes.
    pub fn with_events<R>(&self, f: impl FnOnce(&MDEventBatch) -> R) -> Option<R> {
        match &self.content {
            BoxContent::Leaf(lock) => Some(f(&read_lock(lock))),
            BoxContent::Grid { .. } => None,
        }
    }

    /// Flat summary of this box.
    #[must_use]
    pub fn summary(&self) -> BoxSummary {
        BoxSummary {
            id: self.id,
            parent: self.parent,
            depth: self.depth,
            is_leaf: self.is_leaf(),
            extents: self.extents.clone(),
            cache: self.cache.clone(),
        }
    }

    /// Finds a box by ID in this subtree.
    #[must_use]
    pub fn find(&self, id: usize) -> Option<&MDBox> {
        if self.id == id {
            return Some(self);
        }
        self.children().iter().find_map(|c| c.find(id))
    }

    /// Visits boxes down to `max_depth`.
    ///
    /// With `leaf_only`, only leaves and boxes at `max_depth` are visited.
    pub fn for_each_box<F: FnMut(&MDBox)>(&self, max_depth: usize, leaf_only: bool, f: &mut F) {
        if self.is_leaf() || self.depth >= max_depth {
            f(self);
            return;
        }
        if !leaf_only {
            f(self);
        }
        for child in self.children() {
            child.for_each_box(max_depth, leaf_only, f);
        }
    }

    /// Appends the events at `indices` of `batch`, descending to leaves.
    ///
    /// Each leaf lock is taken once per call.
    pub(crate) fn insert(&self, batch: &MDEventBatch, indices: &[usize]) -> Result<()> {
        match &self.content {
            BoxContent::Leaf(lock) => {
                let mut events = lock.lock().map_err(|_| {
                    Error::BoxTreeInvariant(format!("lock of box {} is poisoned", self.id))
                })?;
                events.reserve(indices.len());
                for &i in indices {
                    events.push_from(batch, i);
                }
                Ok(())
            }
            BoxContent::Grid { split, children } => {
                let mut buckets = vec![Vec::new(); children.len()];
                for &i in indices {
                    buckets[child_index(&self.extents, split, batch.coords_of(i))].push(i);
                }
                children
                    .iter()
                    .zip(&buckets)
                    .filter(|(_, bucket)| !bucket.is_empty())
                    .try_for_each(|(child, bucket)| child.insert(batch, bucket))
            }
        }
    }

    /// Splits every leaf of this subtree the controller says should split,
    /// recursing into newly created children.
    pub(crate) fn split_if_needed(&mut self, controller: &BoxController) -> SplitStats {
        let mut stats = SplitStats::default();
        if let BoxContent::Leaf(lock) = &mut self.content {
            let n = lock.get_mut().unwrap_or_else(PoisonError::into_inner).len();
            if !controller.will_split(n, self.depth) {
                return stats;
            }
            self.split_leaf(controller, &mut stats);
        }
        if let BoxContent::Grid { children, .. } = &mut self.content {
            let child_stats = children
                .par_iter_mut()
                .map(|child| child.split_if_needed(controller))
                .reduce(SplitStats::default, SplitStats::merge);
            stats = stats.merge(child_stats);
        }
        stats
    }

    /// Splits every leaf shallower than `depth`, regardless of its content.
    pub(crate) fn split_to_depth(&mut self, depth: usize, controller: &BoxController) -> SplitStats {
        let mut stats = SplitStats::default();
        if self.depth >= depth || self.depth >= controller.max_depth() {
            return stats;
        }
        if self.is_leaf() {
            self.split_leaf(controller, &mut stats);
        }
        if let BoxContent::Grid { children, .. } = &mut self.content {
            let child_stats = children
                .par_iter_mut()
                .map(|child| child.split_to_depth(depth, controller))
                .reduce(SplitStats::default, SplitStats::merge);
            stats = stats.merge(child_stats);
        }
        stats
    }

    /// Turns a leaf into a grid box and redistributes its events.
    pub(crate) fn split_leaf(&mut self, controller: &BoxController, stats: &mut SplitStats) {
        let nd = self.extents.len();
        let BoxContent::Leaf(lock) = &mut self.content else {
            return;
        };
        let events = std::mem::replace(
            lock.get_mut().unwrap_or_else(PoisonError::into_inner),
            MDEventBatch::new(nd),
        );

        let split = controller.split_into().to_vec();
        let n_children = controller.num_split();
        let first_id = controller.claim_ids(n_children);
        let mut children: Vec<MDBox> = (0..n_children)
            .map(|i| {
                MDBox::new_leaf(
                    first_id + i,
                    Some(self.id),
                    self.depth + 1,
                    child_extents(&self.extents, &split, i),
                )
            })
            .collect();

        for i in 0..events.len() {
            let c = child_index(&self.extents, &split, events.coords_of(i));
            if let BoxContent::Leaf(child) = &mut children[c].content {
                child
                    .get_mut()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push_from(&events, i);
            }
        }

        self.content = BoxContent::Grid { split, children };
        stats.record(self.depth);
    }

    /// Recomputes the cached aggregates of this subtree.
    pub(crate) fn refresh_cache(&mut self) {
        let nd = self.extents.len();
        self.cache = match &mut self.content {
            BoxContent::Leaf(lock) => {
                BoxCache::from_events(lock.get_mut().unwrap_or_else(PoisonError::into_inner), nd)
            }
            BoxContent::Grid { children, .. } => {
                children.par_iter_mut().for_each(MDBox::refresh_cache);
                BoxCache::from_children(children.iter().map(|c| &c.cache), nd)
            }
        };
    }

    /// Adds the events inside the half-open region `[min, max)` to `acc`.
    pub(crate) fn region_summary(&self, min: &[f64], max: &[f64], acc: &mut RegionSummary) {
        let overlaps = self
            .extents
            .iter()
            .zip(min.iter().zip(max))
            .all(|(e, (&lo, &hi))| e.overlaps_half_open(lo, hi));
        if !overlaps {
            return;
        }
        match &self.content {
            BoxContent::Leaf(lock) => {
                let events = read_lock(lock);
                for i in 0..events.len() {
                    let inside = events
                        .coords_of(i)
                        .iter()
                        .zip(min.iter().zip(max))
                        .all(|(&c, (&lo, &hi))| {
                            let c = f64::from(c);
                            c >= lo && c < hi
                        });
                    if inside {
                        acc.n_points += 1;
                        acc.signal += f64::from(events.signal[i]);
                        acc.error_squared += f64::from(events.error_squared[i]);
                    }
                }
            }
            BoxContent::Grid { children, .. } => {
                for child in children {
                    child.region_summary(min, max, acc);
                }
            }
        }
    }
}

fn read_lock(lock: &Mutex<MDEventBatch>) -> MutexGuard<'_, MDEventBatch> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Extents of child `index`; the first dimension varies fastest.
fn child_extents(parent: &[BoxExtent], split: &[usize], index: usize) -> Vec<BoxExtent> {
    let mut rest = index;
    parent
        .iter()
        .zip(split)
        .map(|(e, &n)| {
            let k = rest % n;
            rest /= n;
            let width = f64::from(e.width()) / n as f64;
            let lo = f64::from(e.min) + k as f64 * width;
            let hi = if k + 1 == n {
                e.max
            } else {
                (f64::from(e.min) + (k + 1) as f64 * width) as CoordT
            };
            BoxExtent::new(if k == 0 { e.min } else { lo as CoordT }, hi)
        })
        .collect()
}

/// Index of the child containing `coords`, clamped to the grid.
#[inline]
fn child_index(parent: &[BoxExtent], split: &[usize], coords: &[CoordT]) -> usize {
    let mut index = 0;
    let mut stride = 1;
    for ((e, &n), &c) in parent.iter().zip(split).zip(coords) {
        let width = f64::from(e.width()) / n as f64;
        let k = ((f64::from(c) - f64::from(e.min)) / width).floor();
        let k = if k > 0.0 { (k as usize).min(n - 1) } else { 0 };
        index += k * stride;
        stride *= n;
    }
    index
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]
    use super::*;
    use rustmd_core::BoxControllerConfig;

    fn controller(threshold: usize) -> BoxController {
        let config = BoxControllerConfig::default()
            .with_split_into(2)
            .with_split_threshold(threshold)
            .with_max_depth(4);
        BoxController::new(2, &config).unwrap()
    }

    fn root() -> MDBox {
        MDBox::new_root(vec![BoxExtent::new(0.0, 8.0), BoxExtent::new(0.0, 4.0)])
    }

    fn batch(points: &[[f32; 2]]) -> MDEventBatch {
        let mut b = MDEventBatch::new(2);
        for (i, p) in points.iter().enumerate() {
            b.push(p, 1.0 + i as f32, 0.5, 0, i32::try_from(i).unwrap());
        }
        b
    }

    fn insert_all(root: &MDBox, b: &MDEventBatch) {
        let indices: Vec<usize> = (0..b.len()).collect();
        root.insert(b, &indices).unwrap();
    }

    #[test]
    fn test_child_geometry() {
        let parent = [BoxExtent::new(0.0, 8.0), BoxExtent::new(0.0, 4.0)];
        let split = [2, 2];
        assert_eq!(child_index(&parent, &split, &[1.0, 1.0]), 0);
        assert_eq!(child_index(&parent, &split, &[5.0, 1.0]), 1);
        assert_eq!(child_index(&parent, &split, &[1.0, 3.0]), 2);
        assert_eq!(child_index(&parent, &split, &[8.0, 4.0]), 3);
        assert_eq!(child_index(&parent, &split, &[4.0, 2.0]), 3);

        assert_eq!(
            child_extents(&parent, &split, 1),
            vec![BoxExtent::new(4.0, 8.0), BoxExtent::new(0.0, 2.0)]
        );
        assert_eq!(
            child_extents(&parent, &split, 2),
            vec![BoxExtent::new(0.0, 4.0), BoxExtent::new(2.0, 4.0)]
        );
    }

    #[test]
    fn test_split_redistributes_events() {
        let bc = controller(2);
        let mut root = root();
        let b = batch(&[[1.0, 1.0], [5.0, 1.0], [1.0, 3.0], [7.0, 3.5]]);
        insert_all(&root, &b);

        let stats = root.split_if_needed(&bc);
        assert_eq!(stats.total(), 1);
        assert!(!root.is_leaf());
        assert_eq!(root.children().len(), 4);
        assert_eq!(root.event_count(), 4);
        for child in root.children() {
            assert_eq!(child.parent(), Some(0));
            assert_eq!(child.depth(), 1);
            assert_eq!(child.event_count(), 1);
            child
                .with_events(|events| {
                    for e in events.iter() {
                        for (c, ext) in e.coordinates.iter().zip(child.extents()) {
                            assert!(ext.contains(*c));
                        }
                    }
                })
                .unwrap();
        }
        let ids: Vec<usize> = root.children().iter().map(MDBox::id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert!(root.find(3).is_some());
        assert!(root.find(9).is_none());
    }

    #[test]
    fn test_split_recurses_into_new_children() {
        let bc = controller(2);
        let mut root = root();
        // All events in the first quadrant of the first quadrant.
        let b = batch(&[[0.1, 0.1], [0.2, 0.2], [0.3, 0.3], [0.4, 0.4]]);
        insert_all(&root, &b);

        let stats = root.split_if_needed(&bc);
        // Depths 0..3 each split once; depth 4 is the limit.
        assert_eq!(stats.per_depth().collect::<Vec<_>>(), vec![(0, 1), (1, 1), (2, 1), (3, 1)]);
        let again = root.split_if_needed(&bc);
        assert_eq!(again.total(), 0);
    }

    #[test]
    fn test_refresh_cache_aggregates() {
        let bc = controller(1);
        let mut root = root();
        let b = batch(&[[1.0, 1.0], [5.0, 3.0], [2.0, 2.0]]);
        insert_all(&root, &b);
        root.split_if_needed(&bc);
        root.refresh_cache();

        let cache = root.cache();
        assert_eq!(cache.n_points, 3);
        assert_eq!(cache.signal, 6.0);
        assert_eq!(cache.error_squared, 1.5);
        let centroid = cache.centroid.as_ref().unwrap();
        assert!((centroid[0] - (1.0 + 10.0 + 6.0) / 6.0).abs() < 1e-12);
        assert!((centroid[1] - (1.0 + 6.0 + 6.0) / 6.0).abs() < 1e-12);
        assert_eq!(cache.data_bounds.as_ref().unwrap(), &vec![[1.0, 5.0], [1.0, 3.0]]);

        let empty = MDBox::new_root(vec![BoxExtent::new(0.0, 1.0)]);
        assert_eq!(empty.cache().data_bounds, None);
    }

    #[test]
    fn test_region_summary_half_open() {
        let bc = controller(1);
        let mut root = root();
        let b = batch(&[[1.0, 1.0], [4.0, 1.0], [6.0, 3.0]]);
        insert_all(&root, &b);
        root.split_if_needed(&bc);

        let mut acc = RegionSummary::default();
        root.region_summary(&[0.0, 0.0], &[4.0, 4.0], &mut acc);
        assert_eq!(acc.n_points, 1);
        assert_eq!(acc.signal, 1.0);

        let mut acc = RegionSummary::default();
        root.region_summary(&[0.0, 0.0], &[8.0, 4.0], &mut acc);
        assert_eq!(acc.n_points, 3);
        assert_eq!(acc.signal, 6.0);
    }

    #[test]
    fn test_split_to_depth_and_visitors() {
        let bc = controller(1000);
        let mut root = root();
        let stats = root.split_to_depth(2, &bc);
        assert_eq!(stats.total(), 1 + 4);

        let mut leaves = 0;
        root.for_each_box(usize::MAX, true, &mut |b| {
            assert!(b.is_leaf());
            assert_eq!(b.depth(), 2);
            leaves += 1;
        });
        assert_eq!(leaves, 16);

        let mut shallow = 0;
        root.for_each_box(1, false, &mut |_| shallow += 1);
        assert_eq!(shallow, 5);
    }
}
