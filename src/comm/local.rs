//! In-process collective backend
//!
//! Every rank is a thread holding one [`LocalCommunicator`] from the same
//! group. Collectives rendezvous through a shared slot table keyed by a
//! per-rank sequence number, which is why all ranks must issue the same
//! collectives in the same order, the SPMD contract the trait documents.
//!
//! This backend is host-only. It is the substrate the test suites and
//! single-machine multi-threaded deployments run on; an MPI- or NCCL-backed
//! implementation of the same trait slots in without touching the engines.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use log::{debug, trace};

use super::{CommError, Communicator, Element, MemoryAccess, ReduceOp, Request};

/// One rank's handle onto an in-process group.
///
/// # Example
///
/// ```
/// use std::thread;
/// use shardstats::comm::{Communicator, LocalCommunicator, ReduceOp};
///
/// let comms = LocalCommunicator::<f64>::group(2);
/// thread::scope(|scope| {
///     for comm in &comms {
///         scope.spawn(move || {
///             let mut buffer = vec![1.0; 4];
///             comm.all_reduce(&mut buffer, ReduceOp::Sum).wait().unwrap();
///             assert_eq!(buffer, vec![2.0; 4]);
///         });
///     }
/// });
/// ```
pub struct LocalCommunicator<T: Element> {
    state: Arc<GroupState<T>>,
    rank: usize,
    next_seq: AtomicU64,
}

struct GroupState<T> {
    shared: Mutex<Shared<T>>,
    arrival: Condvar,
    rank_count: usize,
}

struct Shared<T> {
    slots: HashMap<u64, Slot<T>>,
    departed: usize,
}

struct Slot<T> {
    data: SlotData<T>,
    shape: usize,
    arrived: usize,
    retrieved: usize,
    fault: Option<String>,
}

enum SlotData<T> {
    Broadcast { root: usize, data: Option<Vec<T>> },
    Reduce { op: ReduceOp, acc: Vec<T> },
    GatherV {
        counts: Vec<usize>,
        displs: Vec<usize>,
        segments: Vec<Option<Vec<T>>>,
    },
}

impl<T: Element> LocalCommunicator<T> {
    /// Create a group of `rank_count` communicators, one per rank.
    ///
    /// Hand each communicator to its own thread; collectives block until
    /// every rank participates.
    ///
    /// # Panics
    ///
    /// Panics if `rank_count` is zero.
    pub fn group(rank_count: usize) -> Vec<Self> {
        assert!(rank_count > 0, "a group needs at least one rank");
        debug!("creating in-process group of {rank_count} ranks");
        let state = Arc::new(GroupState {
            shared: Mutex::new(Shared {
                slots: HashMap::new(),
                departed: 0,
            }),
            arrival: Condvar::new(),
            rank_count,
        });
        (0..rank_count)
            .map(|rank| Self {
                state: Arc::clone(&state),
                rank,
                next_seq: AtomicU64::new(0),
            })
            .collect()
    }

    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Shared<T>>, CommError> {
        // A poisoned mutex means a peer panicked mid-collective.
        self.state.shared.lock().map_err(|_| CommError::PeerLost)
    }

    /// Deposit this rank's contribution into the slot for `seq`, creating
    /// the slot if this rank arrives first.
    fn join<I, D>(&self, seq: u64, shape: usize, init: I, deposit: D) -> Result<(), CommError>
    where
        I: FnOnce() -> SlotData<T>,
        D: FnOnce(&mut SlotData<T>) -> Result<(), String>,
    {
        let mut shared = self.lock()?;
        let slot = shared.slots.entry(seq).or_insert_with(|| Slot {
            data: init(),
            shape,
            arrived: 0,
            retrieved: 0,
            fault: None,
        });
        if cfg!(debug_assertions) && slot.fault.is_none() && slot.shape != shape {
            slot.fault = Some(format!(
                "element count mismatch: step #{seq} expects {}, rank {} passed {}",
                slot.shape, self.rank, shape
            ));
        }
        if slot.fault.is_none() {
            if let Err(message) = deposit(&mut slot.data) {
                slot.fault = Some(message);
            }
        }
        slot.arrived += 1;
        drop(shared);
        self.state.arrival.notify_all();
        Ok(())
    }

    /// Block until every rank has joined `seq`, then read the result out.
    fn complete<F>(&self, seq: u64, finish: F) -> Result<(), CommError>
    where
        F: FnOnce(&Slot<T>) -> Result<(), CommError>,
    {
        let rank_count = self.state.rank_count;
        let mut shared = self.lock()?;
        loop {
            if let Some(slot) = shared.slots.get(&seq) {
                if let Some(message) = slot.fault.clone() {
                    retire(&mut shared, seq, rank_count);
                    return Err(CommError::ContractViolation(message));
                }
                if slot.arrived == rank_count {
                    break;
                }
            } else {
                return Err(CommError::PeerLost);
            }
            if shared.departed > 0 {
                return Err(CommError::PeerLost);
            }
            shared = self
                .state
                .arrival
                .wait(shared)
                .map_err(|_| CommError::PeerLost)?;
        }
        let result = match shared.slots.get(&seq) {
            Some(slot) => finish(slot),
            None => Err(CommError::PeerLost),
        };
        retire(&mut shared, seq, rank_count);
        result
    }
}

fn retire<T>(shared: &mut Shared<T>, seq: u64, rank_count: usize) {
    if let Some(slot) = shared.slots.get_mut(&seq) {
        slot.retrieved += 1;
        if slot.retrieved >= rank_count {
            shared.slots.remove(&seq);
        }
    }
}

fn kind_mismatch() -> Result<(), String> {
    if cfg!(debug_assertions) {
        Err("ranks issued different collective kinds for the same step".into())
    } else {
        Ok(())
    }
}

fn validate_gather(
    rank: usize,
    rank_count: usize,
    send_len: usize,
    recv_len: usize,
    recv_counts: &[usize],
    displs: &[usize],
) -> Result<(), String> {
    if recv_counts.len() != rank_count || displs.len() != rank_count {
        return Err(format!(
            "allgatherv needs one count and displacement per rank: got {} and {} for {} ranks",
            recv_counts.len(),
            displs.len(),
            rank_count
        ));
    }
    if send_len != recv_counts[rank] {
        return Err(format!(
            "rank {rank} sends {send_len} elements but recv_counts[{rank}] is {}",
            recv_counts[rank]
        ));
    }
    let mut ranges: Vec<(usize, usize)> = displs
        .iter()
        .zip(recv_counts)
        .map(|(&d, &c)| (d, d + c))
        .collect();
    for &(start, end) in &ranges {
        if end > recv_len {
            return Err(format!(
                "segment {start}..{end} exceeds receive buffer of {recv_len} elements"
            ));
        }
    }
    ranges.sort_unstable();
    for pair in ranges.windows(2) {
        if pair[1].0 < pair[0].1 {
            return Err("allgatherv displacement ranges overlap".into());
        }
    }
    Ok(())
}

impl<T: Element> Communicator<T> for LocalCommunicator<T> {
    fn rank(&self) -> usize {
        self.rank
    }

    fn rank_count(&self) -> usize {
        self.state.rank_count
    }

    fn memory_access(&self) -> MemoryAccess {
        MemoryAccess::HostOnly
    }

    fn broadcast<'a>(&'a self, buffer: &'a mut [T], root: usize) -> Request<'a> {
        let seq = self.next_seq();
        let rank_count = self.state.rank_count;
        if root >= rank_count {
            return Request::failed(CommError::RootOutOfRange { root, rank_count });
        }
        trace!(
            "rank {} broadcast #{seq}: {} elements, root {root}",
            self.rank,
            buffer.len()
        );
        let contribution = (self.rank == root).then(|| buffer.to_vec());
        let joined = self.join(
            seq,
            buffer.len(),
            || SlotData::Broadcast { root, data: None },
            move |data| match data {
                SlotData::Broadcast {
                    root: slot_root,
                    data,
                } => {
                    if cfg!(debug_assertions) && *slot_root != root {
                        return Err(format!(
                            "broadcast roots differ across ranks: {slot_root} vs {root}"
                        ));
                    }
                    if let Some(contribution) = contribution {
                        *data = Some(contribution);
                    }
                    Ok(())
                }
                _ => kind_mismatch(),
            },
        );
        match joined {
            Err(error) => Request::failed(error),
            Ok(()) => Request::new(move || {
                self.complete(seq, |slot| match &slot.data {
                    SlotData::Broadcast {
                        data: Some(data), ..
                    } => {
                        buffer.copy_from_slice(data);
                        Ok(())
                    }
                    _ => Err(CommError::ContractViolation(
                        "broadcast completed without a root contribution".into(),
                    )),
                })
            }),
        }
    }

    fn all_reduce<'a>(&'a self, buffer: &'a mut [T], op: ReduceOp) -> Request<'a> {
        let seq = self.next_seq();
        trace!(
            "rank {} allreduce #{seq}: {} elements, {op:?}",
            self.rank,
            buffer.len()
        );
        let contribution = buffer.to_vec();
        let joined = self.join(
            seq,
            buffer.len(),
            || SlotData::Reduce {
                op,
                acc: Vec::new(),
            },
            move |data| match data {
                SlotData::Reduce { op: slot_op, acc } => {
                    if cfg!(debug_assertions) && *slot_op != op {
                        return Err(format!(
                            "reduce ops differ across ranks: {slot_op:?} vs {op:?}"
                        ));
                    }
                    if acc.is_empty() {
                        *acc = contribution;
                    } else {
                        for (folded, value) in acc.iter_mut().zip(contribution) {
                            *folded = op.apply(*folded, value);
                        }
                    }
                    Ok(())
                }
                _ => kind_mismatch(),
            },
        );
        match joined {
            Err(error) => Request::failed(error),
            Ok(()) => Request::new(move || {
                self.complete(seq, |slot| match &slot.data {
                    SlotData::Reduce { acc, .. } => {
                        buffer.copy_from_slice(acc);
                        Ok(())
                    }
                    _ => Err(CommError::ContractViolation(
                        "allreduce completed without an accumulator".into(),
                    )),
                })
            }),
        }
    }

    fn all_gather_v<'a>(
        &'a self,
        send: &[T],
        recv: &'a mut [T],
        recv_counts: &[usize],
        displs: &[usize],
    ) -> Request<'a> {
        let seq = self.next_seq();
        let rank_count = self.state.rank_count;
        let rank = self.rank;
        trace!(
            "rank {rank} allgatherv #{seq}: {} elements sent into {}",
            send.len(),
            recv.len()
        );
        let local_error = if cfg!(debug_assertions) {
            validate_gather(rank, rank_count, send.len(), recv.len(), recv_counts, displs).err()
        } else {
            None
        };
        let counts = recv_counts.to_vec();
        let displs_owned = displs.to_vec();
        let init_counts = counts.clone();
        let init_displs = displs_owned.clone();
        let contribution = send.to_vec();
        let shape: usize = counts.iter().sum();
        let joined = self.join(
            seq,
            shape,
            || SlotData::GatherV {
                counts: init_counts,
                displs: init_displs,
                segments: vec![None; rank_count],
            },
            move |data| {
                if let Some(message) = local_error {
                    return Err(message);
                }
                match data {
                    SlotData::GatherV {
                        counts: slot_counts,
                        displs: slot_displs,
                        segments,
                    } => {
                        if cfg!(debug_assertions)
                            && (*slot_counts != counts || *slot_displs != displs_owned)
                        {
                            return Err(
                                "allgatherv counts/displacements differ across ranks".into()
                            );
                        }
                        segments[rank] = Some(contribution);
                        Ok(())
                    }
                    _ => kind_mismatch(),
                }
            },
        );
        match joined {
            Err(error) => Request::failed(error),
            Ok(()) => Request::new(move || {
                self.complete(seq, |slot| match &slot.data {
                    SlotData::GatherV {
                        counts,
                        displs,
                        segments,
                    } => {
                        for (r, segment) in segments.iter().enumerate() {
                            let segment = segment.as_ref().ok_or_else(|| {
                                CommError::ContractViolation(
                                    "allgatherv completed with a missing segment".into(),
                                )
                            })?;
                            let offset = displs[r];
                            recv[offset..offset + counts[r]]
                                .copy_from_slice(&segment[..counts[r]]);
                        }
                        Ok(())
                    }
                    _ => Err(CommError::ContractViolation(
                        "allgatherv completed without segments".into(),
                    )),
                })
            }),
        }
    }
}

impl<T: Element> Drop for LocalCommunicator<T> {
    fn drop(&mut self) {
        let mut shared = match self.state.shared.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        shared.departed += 1;
        drop(shared);
        self.state.arrival.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_broadcast_two_ranks() {
        let comms = LocalCommunicator::<f64>::group(2);
        thread::scope(|scope| {
            for comm in &comms {
                scope.spawn(move || {
                    let mut buffer = if comm.is_root_rank() {
                        vec![3.5, -1.0, 0.0]
                    } else {
                        vec![0.0; 3]
                    };
                    comm.broadcast(&mut buffer, 0).wait().unwrap();
                    assert_eq!(buffer, vec![3.5, -1.0, 0.0]);
                });
            }
        });
    }

    #[test]
    fn test_all_reduce_min_and_max() {
        let comms = LocalCommunicator::<f64>::group(3);
        thread::scope(|scope| {
            for (rank, comm) in comms.iter().enumerate() {
                scope.spawn(move || {
                    let mut lows = vec![rank as f64];
                    comm.all_reduce(&mut lows, ReduceOp::Min).wait().unwrap();
                    assert_eq!(lows, vec![0.0]);

                    let mut highs = vec![rank as f64];
                    comm.all_reduce(&mut highs, ReduceOp::Max).wait().unwrap();
                    assert_eq!(highs, vec![2.0]);
                });
            }
        });
    }

    #[test]
    fn test_root_out_of_range() {
        let comms = LocalCommunicator::<f64>::group(1);
        let mut buffer = vec![0.0];
        let err = comms[0].broadcast(&mut buffer, 5).wait().unwrap_err();
        assert_eq!(
            err,
            CommError::RootOutOfRange {
                root: 5,
                rank_count: 1
            }
        );
    }

    #[test]
    fn test_peer_lost() {
        let mut comms = LocalCommunicator::<f64>::group(2);
        let deserter = comms.pop().unwrap();
        let stayer = comms.pop().unwrap();
        drop(deserter);

        let mut buffer = vec![1.0];
        let err = stayer.broadcast(&mut buffer, 0).wait().unwrap_err();
        assert_eq!(err, CommError::PeerLost);
    }

    #[cfg(debug_assertions)]
    #[test]
    fn test_count_mismatch_fails_fast() {
        let comms = LocalCommunicator::<f64>::group(2);
        thread::scope(|scope| {
            for (rank, comm) in comms.iter().enumerate() {
                scope.spawn(move || {
                    let mut buffer = vec![0.0; 2 + rank];
                    let err = comm
                        .all_reduce(&mut buffer, ReduceOp::Sum)
                        .wait()
                        .unwrap_err();
                    assert!(matches!(err, CommError::ContractViolation(_)));
                });
            }
        });
    }
}
