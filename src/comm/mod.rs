//! Collective communication between cooperating ranks
//!
//! The pipelines only ever synchronize through the primitives on
//! [`Communicator`]: broadcast, barrier and exclusive prefix sum. Everything
//! between two collective calls runs independently on each rank.
//!
//! [`ThreadWorld`] runs every rank as an OS thread of the current process.
//! A multi-process transport can implement the same trait.
//!
//! Every rank must reach every collective call in the same order. A rank
//! that skips one leaves the others blocked forever.

mod thread;

pub use thread::{ThreadComm, ThreadWorld};

/// Rank 0 coordinates: it validates inputs, seeds work and truncates shared outputs
pub const COORDINATOR: usize = 0;

/// The collective operations the pipelines consume
pub trait Communicator: Send {
    /// Index of this rank, `0..size()`
    fn rank(&self) -> usize;

    /// Number of ranks in the world
    fn size(&self) -> usize;

    /// Every rank returns the value supplied by `root`; other ranks' `value` is ignored
    fn broadcast(&self, value: u64, root: usize) -> u64;

    /// Block until every rank has reached the barrier
    fn barrier(&self);

    /// Sum of `local` over ranks `0..rank()`; rank 0 receives 0
    fn exclusive_scan(&self, local: u64) -> u64;

    /// Whether this rank is the coordinator
    fn is_coordinator(&self) -> bool {
        self.rank() == COORDINATOR
    }
}
