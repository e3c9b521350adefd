//! # Shardstats
//!
//! Per-feature descriptive statistics over datasets partitioned across
//! independent compute units.
//!
//! No single worker ever holds the whole dataset: each block (a rank's
//! shard, a CPU thread's slice, a device work-group's tile) reduces its own
//! data to a [`PartialAggregate`], and shardstats combines those aggregates
//! into the statistics a single pass over the union would have produced:
//! min, max, sums, mean, variance, standard deviation, coefficient of
//! variation and the second-order raw moment, selected per call through a
//! [`StatisticMask`].
//!
//! ## Quick start
//!
//! ```
//! use shardstats::aggregate::{GlobalAggregate, PartialAggregate};
//! use shardstats::mask::{Statistic, StatisticMask};
//! use shardstats::moments::{finalize, merge_blocks, DegenerateMode};
//!
//! let mask = StatisticMask::MEAN | StatisticMask::VARIANCE;
//!
//! // One feature split over two workers: [1, 2, 3] and [4, 5].
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
//! let stats = finalize(&global, 5, mask, DegenerateMode::Error).unwrap();
//!
//! assert_eq!(stats.get(Statistic::Mean).unwrap()[0], 3.0);
//! assert_eq!(stats.get(Statistic::Variance).unwrap()[0], 2.5);
//! ```
//!
//! ## How the merge stays stable
//!
//! Each block's centered sum of squares is taken against the block's *own*
//! mean. Folding block `(n₂, m₂, s₂)` into the running `(n₁, m₁, s₁)` uses
//! the pairwise combination
//!
//! ```text
//! s ← s₁ + s₂ + (m₂ − m₁)² · n₁n₂/(n₁+n₂)
//! m ← (m₁n₁ + m₂n₂)/(n₁+n₂)
//! ```
//!
//! which never revisits raw data and avoids the catastrophic cancellation a
//! recompute against the global mean would suffer when block sizes differ
//! wildly. Features are independent and merge in parallel; blocks fold
//! sequentially within a feature.
//!
//! ## Distributed use
//!
//! The [`comm`] module defines the collective contract (broadcast,
//! all-reduce and variable all-gather over a flat rank topology, with
//! explicit completion handles) and [`distributed`] wires it to the
//! engines so every rank obtains the global statistics from its local
//! block. The in-process [`comm::LocalCommunicator`] backs tests and
//! single-machine deployments; the same trait fronts transport-backed
//! groups.
//!
//! ## Feature flags
//!
//! - `serde`: `Serialize`/`Deserialize` on masks, aggregates and results.
//!
//! [`PartialAggregate`]: aggregate::PartialAggregate
//! [`StatisticMask`]: mask::StatisticMask

pub mod aggregate;
pub mod comm;
pub mod distributed;
pub mod mask;
pub mod moments;

pub use aggregate::{CodecError, FinalStatistics, GlobalAggregate, PartialAggregate};
pub use mask::{Statistic, StatisticMask};
pub use moments::{finalize, merge_blocks, DegenerateMode, MomentsError};

pub mod prelude {
    pub use crate::aggregate::{FinalStatistics, GlobalAggregate, PartialAggregate};
    pub use crate::comm::{Communicator, LocalCommunicator, ReduceOp, SingleRank};
    pub use crate::distributed::{compute, compute_at_root};
    pub use crate::mask::{Statistic, StatisticMask};
    pub use crate::moments::{finalize, merge_blocks, DegenerateMode};
}
