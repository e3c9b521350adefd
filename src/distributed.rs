//! Distributed orchestration
//!
//! The thin layer where the communicator and the engines meet: each rank
//! packs its local [`PartialAggregate`], the group exchanges the flat
//! buffers, and every rank (or just a root) folds and finalizes them. The
//! same exchange shape carries other mergeable partial results: anything
//! that packs into the communicator's element type rides the identical
//! contract.
//!
//! # Example
//!
//! ```
//! use std::thread;
//! use shardstats::aggregate::PartialAggregate;
//! use shardstats::comm::LocalCommunicator;
//! use shardstats::distributed;
//! use shardstats::mask::{Statistic, StatisticMask};
//! use shardstats::moments::DegenerateMode;
//!
//! let mask = StatisticMask::MEAN;
//! let comms = LocalCommunicator::<f64>::group(2);
//!
//! thread::scope(|scope| {
//!     for (rank, comm) in comms.iter().enumerate() {
//!         scope.spawn(move || {
//!             // Rank 0 holds [1, 2, 3]; rank 1 holds [4, 5].
//!             let block = if rank == 0 {
//!                 PartialAggregate::new(1, 3).with_sum(vec![6.0])
//!             } else {
//!                 PartialAggregate::new(1, 2).with_sum(vec![9.0])
//!             };
//!             let stats =
//!                 distributed::compute(comm, &block, mask, DegenerateMode::Error).unwrap();
//!             assert_eq!(stats.get(Statistic::Mean).unwrap()[0], 3.0);
//!         });
//!     }
//! });
//! ```

use num_traits::Float;
use thiserror::Error;

use crate::aggregate::{CodecError, FinalStatistics, GlobalAggregate, PartialAggregate};
use crate::comm::{CommError, Communicator};
use crate::mask::StatisticMask;
use crate::moments::{finalize, merge_blocks, DegenerateMode, MomentsError};

/// Failure anywhere in the distributed pipeline.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DistributedError {
    #[error(transparent)]
    Comm(#[from] CommError),
    #[error(transparent)]
    Moments(#[from] MomentsError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Compute global statistics over every rank's block, on every rank.
///
/// All ranks gather all blocks and fold them locally in rank order, so each
/// arrives at the same result without a second communication round. All
/// ranks must pass the same mask and feature count.
pub fn compute<T, C>(
    comm: &C,
    local: &PartialAggregate<T>,
    mask: StatisticMask,
    degenerate: DegenerateMode,
) -> Result<FinalStatistics<T>, DistributedError>
where
    T: Float + Send + Sync + 'static,
    C: Communicator<T> + ?Sized,
{
    let blocks = exchange(comm, local, mask)?;
    let mut global = GlobalAggregate::new(local.features(), mask);
    merge_blocks(&mut global, &blocks, mask)?;
    let total = global.merged_count();
    Ok(finalize(&global, total, mask, degenerate)?)
}

/// Compute global statistics on `root` and broadcast them to every rank.
///
/// Ranks other than the root skip the merge and finalize work and receive
/// the root's finished statistics bit-for-bit. Degenerate conditions under
/// [`DegenerateMode::Error`] surface on the root; the broadcast then fails
/// group-wide with a communicator error, since the root never reaches it.
pub fn compute_at_root<T, C>(
    comm: &C,
    local: &PartialAggregate<T>,
    mask: StatisticMask,
    degenerate: DegenerateMode,
    root: usize,
) -> Result<FinalStatistics<T>, DistributedError>
where
    T: Float + Send + Sync + 'static,
    C: Communicator<T> + ?Sized,
{
    let features = local.features();
    let blocks = exchange(comm, local, mask)?;

    let stats_len = FinalStatistics::<T>::packed_len(features, mask);
    let mut wire = if comm.rank() == root {
        let mut global = GlobalAggregate::new(features, mask);
        merge_blocks(&mut global, &blocks, mask)?;
        let total = global.merged_count();
        let stats = finalize(&global, total, mask, degenerate)?;
        stats.pack(mask)?
    } else {
        vec![T::zero(); stats_len]
    };

    comm.broadcast(&mut wire, root).wait()?;
    Ok(FinalStatistics::unpack(&wire, features, mask)?)
}

/// Gather every rank's packed block onto every rank.
fn exchange<T, C>(
    comm: &C,
    local: &PartialAggregate<T>,
    mask: StatisticMask,
) -> Result<Vec<PartialAggregate<T>>, DistributedError>
where
    T: Float + Send + Sync + 'static,
    C: Communicator<T> + ?Sized,
{
    let features = local.features();
    let rank_count = comm.rank_count();
    let block_len = PartialAggregate::<T>::packed_len(features, mask);

    let send = local.pack(mask)?;
    let recv_counts = vec![block_len; rank_count];
    let displs: Vec<usize> = (0..rank_count).map(|r| r * block_len).collect();
    let mut recv = vec![T::zero(); block_len * rank_count];
    comm.all_gather_v(&send, &mut recv, &recv_counts, &displs)
        .wait()?;

    let mut blocks = Vec::with_capacity(rank_count);
    for r in 0..rank_count {
        let segment = &recv[r * block_len..(r + 1) * block_len];
        blocks.push(PartialAggregate::unpack(segment, features, mask)?);
    }
    Ok(blocks)
}
