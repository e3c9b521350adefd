//! Merge and finalize engines
//!
//! [`merge_blocks`] folds an ordered sequence of block aggregates into one
//! [`GlobalAggregate`](crate::aggregate::GlobalAggregate);
//! [`finalize`] derives the requested statistics from the result. Both are
//! synchronous, allocation-light and mask-driven: statistics that were not
//! requested cost neither computation nor bandwidth.
//!
//! # Example
//!
//! ```
//! use shardstats::aggregate::{GlobalAggregate, PartialAggregate};
//! use shardstats::mask::{Statistic, StatisticMask};
//! use shardstats::moments::{finalize, merge_blocks, DegenerateMode};
//!
//! let mask = StatisticMask::MEAN | StatisticMask::VARIANCE;
//!
//! // One feature, split over two workers: [1, 2, 3] and [4, 5].
//! let blocks = [
//!     PartialAggregate::new(1, 3)
//!         .with_sum(vec![6.0])
//!         .with_sum2_cent(vec![2.0]),
//!     PartialAggregate::new(1, 2)
//!         .with_sum(vec![9.0])
//!         .with_sum2_cent(vec![0.5]),
//! ];
//!
//! let mut global = GlobalAggregate::new(1, mask);
//! merge_blocks(&mut global, &blocks, mask).unwrap();
//!
//! let stats = finalize(&global, 5, mask, DegenerateMode::Error).unwrap();
//! assert_eq!(stats.get(Statistic::Mean).unwrap()[0], 3.0);
//! assert_eq!(stats.get(Statistic::Variance).unwrap()[0], 2.5);
//! ```

mod finalize;
mod merge;

pub use finalize::{finalize, DegenerateMode};
pub use merge::merge_blocks;

use thiserror::Error;

use crate::mask::{Statistic, StatisticMask};

/// Failure in the merge or finalize engines.
///
/// Configuration errors (`MissingColumn`, `MissingBlockColumn`,
/// `FeatureMismatch`, `MaskMismatch`) are reported before any state is
/// touched. The degenerate-statistics variants are only produced under
/// [`DegenerateMode::Error`]; with [`DegenerateMode::Sentinel`] the affected
/// entries come back as NaN instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MomentsError {
    /// The merged aggregate lacks a column the requested mask derives from.
    #[error("aggregate is missing the {0} column required by the mask")]
    MissingColumn(Statistic),
    /// A block in the merge sequence lacks a required column.
    #[error("block {block} is missing the {column} column required by the mask")]
    MissingBlockColumn { column: Statistic, block: usize },
    /// A block's feature count differs from the aggregate's.
    #[error("feature count mismatch: aggregate has {expected}, block {block} has {found}")]
    FeatureMismatch {
        expected: usize,
        found: usize,
        block: usize,
    },
    /// The aggregate was allocated for a different mask than the merge was
    /// invoked with.
    #[error("aggregate was allocated for {allocated:?}, merge requested {requested:?}")]
    MaskMismatch {
        allocated: StatisticMask,
        requested: StatisticMask,
    },
    /// Finalize was invoked with a zero observation count.
    #[error("no observations: statistics are undefined")]
    NoObservations,
    /// Variance-family statistics need at least two observations.
    #[error("variance requires at least 2 observations, got {total}")]
    InsufficientObservations { total: u64 },
    /// Variation (stdev / mean) is undefined where the mean is zero.
    #[error("variation undefined for feature {feature}: mean is zero")]
    ZeroMeanVariation { feature: usize },
}
