//! Process-group abstraction.
//!
//! A process group is a fixed set of cooperating processes with one
//! distinguished controller and the rest workers, offering the collective
//! primitives the pipeline is built on: broadcast, scatter, gather,
//! barrier and all-reduce. Every collective is a blocking rendezvous —
//! all participating ranks suspend until the operation completes, and a
//! collective issued on one side but not matched on the other deadlocks.
//! There is no cancellation or timeout at this layer.
//!
//! `LocalGroup` is the in-process implementation (one rank per thread),
//! used by tests and single-machine runs. A cluster transport implements
//! the same trait.

use crate::models::{EikasiaError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Barrier};

/// The part a rank plays in the process group.
///
/// Passed explicitly through every component instead of being re-derived
/// from the rank number at each call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The single rank that drives the control flow and owns all
    /// iteration metadata.
    Controller,
    /// A rank that holds a shard of the emulator state and executes
    /// dispatched calls.
    Worker,
}

/// Marker for types that can cross a rank boundary.
pub trait Payload: Serialize + DeserializeOwned + Send + 'static {}

impl<T: Serialize + DeserializeOwned + Send + 'static> Payload for T {}

/// Collective operations over a fixed process group.
///
/// The controller is the root of every rooted collective. Callers must
/// issue collectives in the same program order on every rank.
pub trait ProcessGroup {
    /// Number of ranks in the group.
    fn size(&self) -> usize;

    /// This rank's index (controller is rank 0).
    fn rank(&self) -> usize;

    /// This rank's role.
    fn role(&self) -> Role;

    /// Whether this rank is the controller.
    fn is_controller(&self) -> bool {
        self.role() == Role::Controller
    }

    /// Broadcast a value from the controller to every rank.
    ///
    /// The controller passes `Some(value)`, workers pass `None`; every
    /// rank returns the controller's value.
    fn broadcast<T: Payload>(&self, value: Option<T>) -> Result<T>;

    /// Scatter one part per rank from the controller.
    ///
    /// The controller passes `Some(parts)` with exactly one entry per
    /// rank; every rank returns its own part.
    fn scatter<T: Payload>(&self, parts: Option<Vec<T>>) -> Result<T>;

    /// Gather one part per rank on the controller.
    ///
    /// Returns `Some(parts)` in rank order on the controller, `None` on
    /// workers.
    fn gather<T: Payload>(&self, part: T) -> Result<Option<Vec<T>>>;

    /// Block until every rank has arrived.
    fn barrier(&self) -> Result<()>;

    /// Sum a value over all ranks; every rank returns the total.
    fn all_sum(&self, value: u64) -> Result<u64>;
}

/// In-process process group: one rank per thread, message frames over
/// std channels, rendezvous via [`std::sync::Barrier`].
///
/// Frames are tagged with the sender rank and buffered per sender, so
/// back-to-back collectives cannot steal each other's messages as long
/// as ranks issue them in matching program order.
pub struct LocalGroup {
    rank: usize,
    size: usize,
    role: Role,
    senders: Vec<Sender<(usize, Vec<u8>)>>,
    receiver: Receiver<(usize, Vec<u8>)>,
    buffers: RefCell<Vec<VecDeque<Vec<u8>>>>,
    barrier: Arc<Barrier>,
}

impl LocalGroup {
    /// Create a group of `size` ranks and return one handle per rank.
    ///
    /// Rank 0 is the controller. Each handle must be moved to its own
    /// thread.
    pub fn split(size: usize) -> Vec<LocalGroup> {
        assert!(size >= 1, "a process group needs at least one rank");

        let mut senders = Vec::with_capacity(size);
        let mut receivers = Vec::with_capacity(size);
        for _ in 0..size {
            let (tx, rx) = mpsc::channel();
            senders.push(tx);
            receivers.push(rx);
        }
        let barrier = Arc::new(Barrier::new(size));

        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, receiver)| LocalGroup {
                rank,
                size,
                role: if rank == 0 {
                    Role::Controller
                } else {
                    Role::Worker
                },
                senders: senders.clone(),
                receiver,
                buffers: RefCell::new(vec![VecDeque::new(); size]),
                barrier: Arc::clone(&barrier),
            })
            .collect()
    }

    fn send_to(&self, to: usize, bytes: Vec<u8>) -> Result<()> {
        self.senders[to]
            .send((self.rank, bytes))
            .map_err(|_| EikasiaError::Collective(format!("rank {} is gone", to)))
    }

    /// Receive the next frame sent by `from`, preserving per-sender FIFO
    /// order.
    fn recv_from(&self, from: usize) -> Result<Vec<u8>> {
        loop {
            if let Some(frame) = self.buffers.borrow_mut()[from].pop_front() {
                return Ok(frame);
            }
            let (src, bytes) = self.receiver.recv().map_err(|_| {
                EikasiaError::Collective("all peers disconnected".to_string())
            })?;
            self.buffers.borrow_mut()[src].push_back(bytes);
        }
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|e| EikasiaError::Collective(format!("failed to encode frame: {}", e)))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| EikasiaError::Collective(format!("failed to decode frame: {}", e)))
}

impl ProcessGroup for LocalGroup {
    fn size(&self) -> usize {
        self.size
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn role(&self) -> Role {
        self.role
    }

    fn broadcast<T: Payload>(&self, value: Option<T>) -> Result<T> {
        match self.role {
            Role::Controller => {
                let value = value.ok_or_else(|| {
                    EikasiaError::Internal(
                        "broadcast called without a value on the controller".to_string(),
                    )
                })?;
                let bytes = encode(&value)?;
                for rank in 1..self.size {
                    self.send_to(rank, bytes.clone())?;
                }
                Ok(value)
            }
            Role::Worker => decode(&self.recv_from(0)?),
        }
    }

    fn scatter<T: Payload>(&self, parts: Option<Vec<T>>) -> Result<T> {
        match self.role {
            Role::Controller => {
                let parts = parts.ok_or_else(|| {
                    EikasiaError::Internal(
                        "scatter called without parts on the controller".to_string(),
                    )
                })?;
                if parts.len() != self.size {
                    return Err(EikasiaError::Internal(format!(
                        "scatter got {} parts for {} ranks",
                        parts.len(),
                        self.size
                    )));
                }
                let mut own = None;
                for (rank, part) in parts.into_iter().enumerate() {
                    if rank == self.rank {
                        own = Some(part);
                    } else {
                        self.send_to(rank, encode(&part)?)?;
                    }
                }
                own.ok_or_else(|| {
                    EikasiaError::Internal("scatter lost the controller's part".to_string())
                })
            }
            Role::Worker => decode(&self.recv_from(0)?),
        }
    }

    fn gather<T: Payload>(&self, part: T) -> Result<Option<Vec<T>>> {
        match self.role {
            Role::Controller => {
                let mut parts = Vec::with_capacity(self.size);
                parts.push(part);
                for rank in 1..self.size {
                    parts.push(decode(&self.recv_from(rank)?)?);
                }
                Ok(Some(parts))
            }
            Role::Worker => {
                self.send_to(0, encode(&part)?)?;
                Ok(None)
            }
        }
    }

    fn barrier(&self) -> Result<()> {
        self.barrier.wait();
        Ok(())
    }

    fn all_sum(&self, value: u64) -> Result<u64> {
        let total = self
            .gather(value)?
            .map(|parts| parts.into_iter().sum::<u64>());
        self.broadcast(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn spmd<R, F>(size: usize, f: F) -> Vec<R>
    where
        R: Send + 'static,
        F: Fn(LocalGroup) -> R + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let handles: Vec<_> = LocalGroup::split(size)
            .into_iter()
            .map(|group| {
                let f = Arc::clone(&f);
                thread::spawn(move || f(group))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    #[test]
    fn split_assigns_one_controller() {
        let groups = LocalGroup::split(3);
        assert_eq!(groups[0].role(), Role::Controller);
        assert_eq!(groups[1].role(), Role::Worker);
        assert_eq!(groups[2].role(), Role::Worker);
    }

    #[test]
    fn broadcast_reaches_every_rank() {
        let results = spmd(3, |group| {
            let value = if group.is_controller() {
                Some(vec![1.5, 2.5])
            } else {
                None
            };
            group.broadcast(value).unwrap()
        });
        for r in results {
            assert_eq!(r, vec![1.5, 2.5]);
        }
    }

    #[test]
    fn scatter_delivers_each_rank_its_part() {
        let results = spmd(3, |group| {
            let parts = if group.is_controller() {
                Some(vec![10u64, 20, 30])
            } else {
                None
            };
            group.scatter(parts).unwrap()
        });
        assert_eq!(results, vec![10, 20, 30]);
    }

    #[test]
    fn gather_collects_in_rank_order() {
        let results = spmd(3, |group| group.gather(group.rank() as u64 * 2).unwrap());
        assert_eq!(results[0], Some(vec![0, 2, 4]));
        assert_eq!(results[1], None);
        assert_eq!(results[2], None);
    }

    #[test]
    fn all_sum_agrees_on_every_rank() {
        let results = spmd(4, |group| group.all_sum(group.rank() as u64 + 1).unwrap());
        assert_eq!(results, vec![10, 10, 10, 10]);
    }

    #[test]
    fn consecutive_collectives_do_not_interleave() {
        let results = spmd(2, |group| {
            // Worker races ahead: both gathers are sent before the
            // controller reads the first one.
            let a = group.gather(group.rank() as u64).unwrap();
            let b = group.gather(group.rank() as u64 + 100).unwrap();
            (a, b)
        });
        assert_eq!(results[0].0, Some(vec![0, 1]));
        assert_eq!(results[0].1, Some(vec![100, 101]));
    }

    #[test]
    fn single_rank_group_works() {
        let group = LocalGroup::split(1).pop().unwrap();
        assert_eq!(group.broadcast(Some(7u32)).unwrap(), 7);
        assert_eq!(group.scatter(Some(vec![5u32])).unwrap(), 5);
        assert_eq!(group.gather(9u32).unwrap(), Some(vec![9]));
        assert_eq!(group.all_sum(3).unwrap(), 3);
    }
}
