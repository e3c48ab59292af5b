/*!
 * Run statistics, reduced across ranks with collectives
 */

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::comm::Communicator;
use crate::core::reconcile::global_total;
use crate::error::{EXIT_PARTIAL, EXIT_SUCCESS};

/// Counters for one run (per rank until reduced)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Files fully handled (compressed, or first segment copied)
    pub files: u64,
    /// File segments written
    pub segments: u64,
    /// Source bytes read
    pub bytes_read: u64,
    /// Destination bytes written
    pub bytes_written: u64,
    /// Directories created or reused
    pub directories: u64,
    /// Symbolic links recreated
    pub links: u64,
    /// Objects left alone by policy
    pub skipped: u64,
    /// Objects that failed
    pub failed: u64,
    /// Wall time on the reporting rank
    pub duration_ms: u64,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum every counter over all ranks; every rank receives the totals
    ///
    /// `duration_ms` keeps this rank's own value.
    pub fn reduce<C: Communicator>(&self, comm: &C) -> RunStats {
        RunStats {
            files: global_total(comm, self.files),
            segments: global_total(comm, self.segments),
            bytes_read: global_total(comm, self.bytes_read),
            bytes_written: global_total(comm, self.bytes_written),
            directories: global_total(comm, self.directories),
            links: global_total(comm, self.links),
            skipped: global_total(comm, self.skipped),
            failed: global_total(comm, self.failed),
            duration_ms: self.duration_ms,
        }
    }

    /// Add another rank's or file's counters into this one
    pub fn merge(&mut self, other: &RunStats) {
        self.files += other.files;
        self.segments += other.segments;
        self.bytes_read += other.bytes_read;
        self.bytes_written += other.bytes_written;
        self.directories += other.directories;
        self.links += other.links;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.duration_ms = self.duration_ms.max(other.duration_ms);
    }

    pub fn set_duration(&mut self, duration: Duration) {
        self.duration_ms = duration.as_millis() as u64;
    }

    /// Process exit status for these results
    pub fn exit_code(&self) -> i32 {
        if self.failed > 0 {
            EXIT_PARTIAL
        } else {
            EXIT_SUCCESS
        }
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Files:          {}", self.files)?;
        writeln!(f, "  Segments:       {}", self.segments)?;
        writeln!(f, "  Directories:    {}", self.directories)?;
        writeln!(f, "  Links:          {}", self.links)?;
        writeln!(f, "  Skipped:        {}", self.skipped)?;
        writeln!(f, "  Failed:         {}", self.failed)?;
        writeln!(f, "  Bytes read:     {}", self.bytes_read)?;
        writeln!(f, "  Bytes written:  {}", self.bytes_written)?;
        write!(f, "  Duration:       {} ms", self.duration_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::ThreadWorld;

    #[test]
    fn test_reduce_sums_counters_on_every_rank() {
        let world = ThreadWorld::new(3).unwrap();
        let reduced = world
            .run(|comm| {
                let rank = comm.rank() as u64;
                let local = RunStats {
                    files: 1,
                    segments: rank,
                    bytes_read: 100 * rank,
                    failed: u64::from(rank == 2),
                    ..RunStats::default()
                };
                local.reduce(&comm)
            })
            .unwrap();

        for totals in &reduced {
            assert_eq!(totals.files, 3);
            assert_eq!(totals.segments, 3);
            assert_eq!(totals.bytes_read, 300);
            assert_eq!(totals.failed, 1);
        }
        assert_eq!(reduced[0].exit_code(), EXIT_PARTIAL);
    }

    #[test]
    fn test_merge() {
        let mut total = RunStats::new();
        total.merge(&RunStats {
            files: 2,
            skipped: 1,
            duration_ms: 40,
            ..RunStats::default()
        });
        total.merge(&RunStats {
            files: 1,
            duration_ms: 10,
            ..RunStats::default()
        });
        assert_eq!(total.files, 3);
        assert_eq!(total.skipped, 1);
        assert_eq!(total.duration_ms, 40);
        assert_eq!(total.exit_code(), EXIT_SUCCESS);
    }
}
