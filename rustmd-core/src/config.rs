//! Box controller and conversion configuration.
#![allow(clippy::doc_markdown)]

use crate::error::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// When to run a split pass while events are still arriving.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SplitHeuristic {
    /// Split once `events_added` exceeds `n_events_in_output / divisor`.
    pub output_fraction_divisor: usize,
    /// Never split on volume alone before this many events have been added.
    pub min_events_between_splits: usize,
}

impl Default for SplitHeuristic {
    fn default() -> Self {
        Self {
            output_fraction_divisor: 16,
            min_events_between_splits: 10_000_000,
        }
    }
}

/// Configuration of the box tree.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BoxControllerConfig {
    /// Number of children per dimension when a box splits. A single value
    /// applies to every dimension.
    pub split_into: Vec<usize>,
    /// A leaf holding more events than this splits.
    pub split_threshold: usize,
    /// Leaves at this depth never split.
    pub max_depth: usize,
    /// Incremental split heuristic.
    pub heuristic: SplitHeuristic,
}

impl Default for BoxControllerConfig {
    fn default() -> Self {
        Self {
            split_into: vec![5],
            split_threshold: 1000,
            max_depth: 5,
            heuristic: SplitHeuristic::default(),
        }
    }
}

impl BoxControllerConfig {
    /// Set a uniform split factor for every dimension.
    #[must_use]
    pub fn with_split_into(mut self, split: usize) -> Self {
        self.split_into = vec![split];
        self
    }

    /// Set the split factor per dimension.
    ///
    /// # Errors
    /// Returns an error if any factor is below 2.
    pub fn try_with_split_into_per_dim(mut self, split: Vec<usize>) -> Result<Self> {
        if split.is_empty() || split.iter().any(|&s| s < 2) {
            return Err(Error::Config(format!(
                "split_into must be at least 2 in every dimension, got {split:?}"
            )));
        }
        self.split_into = split;
        Ok(self)
    }

    /// Set the split threshold.
    #[must_use]
    pub fn with_split_threshold(mut self, threshold: usize) -> Self {
        self.split_threshold = threshold;
        self
    }

    /// Set the split threshold, rejecting zero.
    ///
    /// # Errors
    /// Returns an error if `threshold` is zero.
    pub fn try_with_split_threshold(self, threshold: usize) -> Result<Self> {
        if threshold == 0 {
            return Err(Error::Config("split_threshold must be positive".to_string()));
        }
        Ok(self.with_split_threshold(threshold))
    }

    /// Set the maximum tree depth.
    #[must_use]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Set the incremental split heuristic.
    #[must_use]
    pub fn with_heuristic(mut self, heuristic: SplitHeuristic) -> Self {
        self.heuristic = heuristic;
        self
    }

    /// Split factor for each of `nd` dimensions.
    ///
    /// # Errors
    /// Returns an error if the factors do not match `nd` or are below 2.
    pub fn split_into_for(&self, nd: usize) -> Result<Vec<usize>> {
        let split = match self.split_into.as_slice() {
            [single] => vec![*single; nd],
            many if many.len() == nd => many.to_vec(),
            many => {
                return Err(Error::Config(format!(
                    "split_into has {} entries for {nd} dimensions",
                    many.len()
                )))
            }
        };
        if split.iter().any(|&s| s < 2) {
            return Err(Error::Config(format!(
                "split_into must be at least 2 in every dimension, got {split:?}"
            )));
        }
        Ok(split)
    }

    /// Checks the whole configuration.
    ///
    /// # Errors
    /// Returns the first invalid setting.
    pub fn validate(&self, nd: usize) -> Result<()> {
        self.split_into_for(nd)?;
        if self.split_threshold == 0 {
            return Err(Error::Config("split_threshold must be positive".to_string()));
        }
        if self.heuristic.output_fraction_divisor == 0 {
            return Err(Error::Config(
                "output_fraction_divisor must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration of the conversion driver.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ConversionConfig {
    /// Convert spectra in parallel.
    pub parallel: bool,
    /// Worker threads; `None` uses the global rayon pool.
    pub num_threads: Option<usize>,
    /// Spectra converted between two split checks.
    pub spectra_per_block: usize,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            num_threads: None,
            spectra_per_block: 256,
        }
    }
}

impl ConversionConfig {
    /// Set whether to use parallel processing.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Set a fixed number of worker threads.
    #[must_use]
    pub fn with_num_threads(mut self, threads: usize) -> Self {
        self.num_threads = Some(threads);
        self
    }

    /// Set the block size.
    ///
    /// # Errors
    /// Returns an error if `spectra` is zero.
    pub fn try_with_spectra_per_block(mut self, spectra: usize) -> Result<Self> {
        if spectra == 0 {
            return Err(Error::Config("spectra_per_block must be positive".to_string()));
        }
        self.spectra_per_block = spectra;
        Ok(self)
    }
}
