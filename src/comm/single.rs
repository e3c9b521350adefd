//! Trivial one-rank backend
//!
//! The non-distributed mode: a group of exactly one rank, where every
//! collective completes immediately. Broadcast and all-reduce are identities
//! (the sole rank's input is the result) and all-gather-v copies the send
//! buffer to its displacement. Code written against [`Communicator`] runs
//! unchanged on one machine or many.

use super::{CommError, Communicator, Element, MemoryAccess, ReduceOp, Request};

/// The sole member of a one-rank group.
#[derive(Clone, Copy, Debug, Default)]
pub struct SingleRank;

impl SingleRank {
    pub fn new() -> Self {
        Self
    }
}

impl<T: Element> Communicator<T> for SingleRank {
    fn rank(&self) -> usize {
        0
    }

    fn rank_count(&self) -> usize {
        1
    }

    fn memory_access(&self) -> MemoryAccess {
        MemoryAccess::HostOnly
    }

    fn broadcast<'a>(&'a self, _buffer: &'a mut [T], root: usize) -> Request<'a> {
        if root != 0 {
            return Request::failed(CommError::RootOutOfRange {
                root,
                rank_count: 1,
            });
        }
        Request::completed()
    }

    fn all_reduce<'a>(&'a self, _buffer: &'a mut [T], _op: ReduceOp) -> Request<'a> {
        Request::completed()
    }

    fn all_gather_v<'a>(
        &'a self,
        send: &[T],
        recv: &'a mut [T],
        recv_counts: &[usize],
        displs: &[usize],
    ) -> Request<'a> {
        debug_assert_eq!(recv_counts.len(), 1);
        debug_assert_eq!(displs.len(), 1);
        debug_assert_eq!(send.len(), recv_counts[0]);
        let offset = displs.first().copied().unwrap_or(0);
        let segment = send.to_vec();
        Request::new(move || {
            recv[offset..offset + segment.len()].copy_from_slice(&segment);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identities() {
        let comm = SingleRank::new();
        assert_eq!(Communicator::<f64>::rank_count(&comm), 1);
        assert!(Communicator::<f64>::is_root_rank(&comm));

        let mut buffer = vec![1.0, 2.0];
        comm.broadcast(&mut buffer, 0).wait().unwrap();
        assert_eq!(buffer, vec![1.0, 2.0]);

        comm.all_reduce(&mut buffer, ReduceOp::Sum).wait().unwrap();
        assert_eq!(buffer, vec![1.0, 2.0]);
    }

    #[test]
    fn test_gather_copies_to_displacement() {
        let comm = SingleRank::new();
        let send = [7.0, 8.0];
        let mut recv = vec![0.0; 5];
        comm.all_gather_v(&send, &mut recv, &[2], &[2]).wait().unwrap();
        assert_eq!(recv, vec![0.0, 0.0, 7.0, 8.0, 0.0]);
    }

    #[test]
    fn test_bad_root() {
        let comm = SingleRank::new();
        let mut buffer = vec![0.0];
        let err = comm.broadcast(&mut buffer, 1).wait().unwrap_err();
        assert_eq!(
            err,
            CommError::RootOutOfRange {
                root: 1,
                rank_count: 1
            }
        );
    }
}
