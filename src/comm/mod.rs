//! Collective communication
//!
//! Ranks form a flat topology addressed `0..rank_count`; statistics move
//! between them through three collectives, [`broadcast`], [`all_reduce`]
//! and [`all_gather_v`], each returning a [`Request`] handle. Nothing is
//! guaranteed written until [`Request::wait`] returns `Ok`; a failed wait
//! means the destination buffer has indeterminate, possibly partial content.
//!
//! The supported usage pattern is issue-then-wait: issue one collective,
//! wait on its handle, then issue the next. Every rank must call the same
//! collectives in the same order with matching element counts; mismatches
//! are a caller error that debug builds of the in-process backend detect and
//! fail fast on, while release builds leave undefined.
//!
//! Buffers may be host- or device-resident depending on the backend's
//! [`MemoryAccess`] capability; the protocol is the same either way. The
//! backends shipped here ([`LocalCommunicator`], [`SingleRank`]) are
//! host-only. Device-capable backends implement the same trait and leave
//! host/device staging to the caller; the collectives never synchronize
//! the two views implicitly.
//!
//! [`broadcast`]: Communicator::broadcast
//! [`all_reduce`]: Communicator::all_reduce
//! [`all_gather_v`]: Communicator::all_gather_v

mod local;
mod single;

pub use local::LocalCommunicator;
pub use single::SingleRank;

use core::fmt;
use core::ops::Add;

use thiserror::Error;

/// Element types the collectives can move: plain copyable values with the
/// comparison and addition the reduction operations fold with.
pub trait Element: Copy + Send + Sync + PartialOrd + Add<Output = Self> + 'static {}

impl<T> Element for T where T: Copy + Send + Sync + PartialOrd + Add<Output = T> + 'static {}

/// Element-wise reduction applied by [`Communicator::all_reduce`].
///
/// The moments pipeline reduces with [`Sum`](ReduceOp::Sum); min and max are
/// there for callers folding other quantities through the same contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Min,
    Max,
}

impl ReduceOp {
    /// Fold two elements.
    pub fn apply<T: Element>(self, a: T, b: T) -> T {
        match self {
            ReduceOp::Sum => a + b,
            ReduceOp::Min => {
                if b < a {
                    b
                } else {
                    a
                }
            }
            ReduceOp::Max => {
                if b > a {
                    b
                } else {
                    a
                }
            }
        }
    }
}

/// Where a communicator's buffers may live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryAccess {
    /// Buffers must be host-resident.
    HostOnly,
    /// The backend also accepts device-resident buffers.
    Device,
}

/// Failure surfaced by [`Request::wait`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommError {
    /// A debug-mode consistency check tripped: ranks disagreed on element
    /// counts, operation kind or parameters.
    #[error("collective contract violated: {0}")]
    ContractViolation(String),
    /// The root rank passed to a broadcast does not exist.
    #[error("root rank {root} out of range for group of {rank_count} ranks")]
    RootOutOfRange { root: usize, rank_count: usize },
    /// A peer left the group (or panicked) before the collective completed.
    #[error("a peer rank left the group before the collective completed")]
    PeerLost,
}

/// Completion handle for an issued collective.
///
/// The operation may make progress as soon as it is issued, but its effect on
/// the receive buffer is observable only after [`wait`](Self::wait) returns
/// `Ok`. Dropping a request without waiting abandons the local view of the
/// operation; peers are unaffected.
#[must_use = "a collective completes only when its request is waited on"]
pub struct Request<'a> {
    complete: Box<dyn FnOnce() -> Result<(), CommError> + Send + 'a>,
}

impl<'a> Request<'a> {
    pub(crate) fn new(complete: impl FnOnce() -> Result<(), CommError> + Send + 'a) -> Self {
        Self {
            complete: Box::new(complete),
        }
    }

    /// A request that is already complete.
    pub(crate) fn completed() -> Self {
        Self::new(|| Ok(()))
    }

    /// A request that fails without having communicated.
    pub(crate) fn failed(error: CommError) -> Self {
        Self::new(move || Err(error))
    }

    /// Block until the collective completes on this rank.
    pub fn wait(self) -> Result<(), CommError> {
        (self.complete)()
    }
}

impl fmt::Debug for Request<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request").finish_non_exhaustive()
    }
}

/// A participant in a flat group of ranks.
///
/// Rank `0` is conventionally used as the root where one is needed; nothing
/// in the topology distinguishes it.
pub trait Communicator<T: Element> {
    /// This participant's rank, in `0..rank_count`.
    fn rank(&self) -> usize;

    /// Number of ranks in the group.
    fn rank_count(&self) -> usize;

    /// Whether this instance accepts device-resident buffers.
    fn memory_access(&self) -> MemoryAccess;

    /// Whether this rank is the conventional root.
    fn is_root_rank(&self) -> bool {
        self.rank() == 0
    }

    /// After completion every rank's `buffer` holds the root's content.
    ///
    /// All ranks must pass the same `root` and the same `buffer` length.
    fn broadcast<'a>(&'a self, buffer: &'a mut [T], root: usize) -> Request<'a>;

    /// After completion every rank's `buffer` holds the element-wise `op`
    /// over all ranks' inputs.
    ///
    /// Send and receive share the buffer, so the reduction is aliasing-safe
    /// by construction. All ranks must pass the same length and `op`.
    fn all_reduce<'a>(&'a self, buffer: &'a mut [T], op: ReduceOp) -> Request<'a>;

    /// After completion every rank's `recv` holds, at
    /// `displs[r]..displs[r] + recv_counts[r]`, the `send` content of rank
    /// `r`, for every `r`.
    ///
    /// Counts and displacements may be unequal and arbitrary per rank, but
    /// every rank must pass identical `recv_counts` and `displs` arrays, and
    /// `send.len()` must equal `recv_counts[self.rank()]`. Regions of `recv`
    /// not covered by any segment keep whatever the caller left there; gaps
    /// are never zero-filled. Overlapping segments are a caller error.
    fn all_gather_v<'a>(
        &'a self,
        send: &[T],
        recv: &'a mut [T],
        recv_counts: &[usize],
        displs: &[usize],
    ) -> Request<'a>;
}
