//! In-process world: one OS thread per rank

use std::sync::{Arc, Barrier, Mutex, PoisonError};
use std::thread;

use tracing::info_span;

use super::Communicator;
use crate::error::{CollateError, Result};

/// State every rank of one world shares
struct Shared {
    barrier: Barrier,
    /// One contribution slot per rank for the scan
    slots: Mutex<Vec<u64>>,
    /// Value published by the broadcast root
    published: Mutex<u64>,
}

/// Communicator handle owned by a single rank thread
pub struct ThreadComm {
    rank: usize,
    size: usize,
    shared: Arc<Shared>,
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn broadcast(&self, value: u64, root: usize) -> u64 {
        if self.rank == root {
            *self
                .shared
                .published
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = value;
        }
        self.shared.barrier.wait();
        let value = *self
            .shared
            .published
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Nobody may publish the next value until every rank has read this one
        self.shared.barrier.wait();
        value
    }

    fn barrier(&self) {
        self.shared.barrier.wait();
    }

    fn exclusive_scan(&self, local: u64) -> u64 {
        self.shared
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)[self.rank] = local;
        self.shared.barrier.wait();
        let prefix = self
            .shared
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)[..self.rank]
            .iter()
            .sum();
        self.shared.barrier.wait();
        prefix
    }
}

/// A fixed set of ranks running as threads of this process
#[derive(Debug, Clone, Copy)]
pub struct ThreadWorld {
    size: usize,
}

impl ThreadWorld {
    /// Create a world of `size` ranks
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(CollateError::Config(
                "a world needs at least one rank".to_string(),
            ));
        }
        Ok(Self { size })
    }

    /// Number of ranks
    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `body` once on every rank and collect the results ordered by rank
    ///
    /// Each rank thread is named `rank-N` and enters a `rank` tracing span.
    /// A rank that panics outside a collective is reported as
    /// [`CollateError::Parallel`]; one that panics while others wait in a
    /// collective leaves them blocked.
    pub fn run<F, R>(&self, body: F) -> Result<Vec<R>>
    where
        F: Fn(ThreadComm) -> R + Sync,
        R: Send,
    {
        let shared = Arc::new(Shared {
            barrier: Barrier::new(self.size),
            slots: Mutex::new(vec![0; self.size]),
            published: Mutex::new(0),
        });

        thread::scope(|scope| -> Result<Vec<R>> {
            let mut handles = Vec::with_capacity(self.size);
            for rank in 0..self.size {
                let comm = ThreadComm {
                    rank,
                    size: self.size,
                    shared: Arc::clone(&shared),
                };
                let body = &body;
                let handle = thread::Builder::new()
                    .name(format!("rank-{}", rank))
                    .spawn_scoped(scope, move || {
                        let span = info_span!("rank", rank);
                        let _entered = span.enter();
                        body(comm)
                    })?;
                handles.push(handle);
            }

            handles
                .into_iter()
                .enumerate()
                .map(|(rank, handle)| {
                    handle
                        .join()
                        .map_err(|_| CollateError::Parallel(format!("rank {} panicked", rank)))
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_world_requires_a_rank() {
        assert!(ThreadWorld::new(0).is_err());
        assert_eq!(ThreadWorld::new(3).unwrap().size(), 3);
    }

    #[test]
    fn test_results_are_ordered_by_rank() {
        let world = ThreadWorld::new(5).unwrap();
        let ranks = world.run(|comm| (comm.rank(), comm.size())).unwrap();
        assert_eq!(
            ranks,
            vec![(0, 5), (1, 5), (2, 5), (3, 5), (4, 5)]
        );
    }

    #[test]
    fn test_broadcast_from_any_root() {
        let world = ThreadWorld::new(4).unwrap();
        let values = world
            .run(|comm| {
                let first = comm.broadcast(100 + comm.rank() as u64, 0);
                let second = comm.broadcast(200 + comm.rank() as u64, 3);
                (first, second)
            })
            .unwrap();
        assert!(values.iter().all(|&v| v == (100, 203)));
    }

    #[test]
    fn test_exclusive_scan() {
        let world = ThreadWorld::new(4).unwrap();
        let sizes = [7u64, 0, 13, 5];
        let offsets = world
            .run(|comm| comm.exclusive_scan(sizes[comm.rank()]))
            .unwrap();
        assert_eq!(offsets, vec![0, 7, 7, 20]);
    }

    #[test]
    fn test_repeated_scans_do_not_bleed() {
        let world = ThreadWorld::new(3).unwrap();
        let offsets = world
            .run(|comm| {
                let a = comm.exclusive_scan(1);
                let b = comm.exclusive_scan(10 * (comm.rank() as u64 + 1));
                (a, b)
            })
            .unwrap();
        assert_eq!(offsets, vec![(0, 0), (1, 10), (2, 30)]);
    }

    #[test]
    fn test_barrier_orders_phases() {
        let world = ThreadWorld::new(6).unwrap();
        let arrived = AtomicUsize::new(0);
        let seen = world
            .run(|comm| {
                arrived.fetch_add(1, Ordering::SeqCst);
                comm.barrier();
                arrived.load(Ordering::SeqCst)
            })
            .unwrap();
        assert!(seen.iter().all(|&n| n == 6));
    }

    #[test]
    fn test_single_rank_world() {
        let world = ThreadWorld::new(1).unwrap();
        let out = world
            .run(|comm| {
                comm.barrier();
                (comm.broadcast(9, 0), comm.exclusive_scan(4), comm.is_coordinator())
            })
            .unwrap();
        assert_eq!(out, vec![(9, 0, true)]);
    }
}
