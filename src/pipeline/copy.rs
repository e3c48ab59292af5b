/*!
 * Copy mode: seed the shared queue, drain it on every rank, apply
 * deferred attributes
 *
 * Offsets within a file are static (output size equals input size), so
 * there is no scan step. Each destination path is written independently.
 */

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{error, warn};

use crate::comm::{Communicator, COORDINATOR};
use crate::config::CopyPolicy;
use crate::core::queue::SharedQueue;
use crate::core::segment::{plan_entry, Planned, SegmentProcessor};
use crate::core::targets::resolve_targets;
use crate::error::{CollateError, Result};
use crate::stats::RunStats;

const GO: u64 = 0;
const ABORT: u64 = 1;

/// Copy `sources` to `target` using every rank of `comm`
///
/// Every rank must call this with the same queue and arguments. A rejected
/// source/target combination returns the validation error on the
/// coordinator and [`CollateError::Aborted`] elsewhere, before any work is
/// enqueued.
pub fn copy_tree<C: Communicator>(
    comm: &C,
    queue: &SharedQueue,
    sources: &[PathBuf],
    target: &Path,
    policy: &CopyPolicy,
) -> Result<RunStats> {
    let started = Instant::now();
    let mut seeded = RunStats::new();
    let mut fatal = None;

    let status = if comm.is_coordinator() {
        match seed(queue, sources, target, policy, &mut seeded) {
            Ok(()) => GO,
            Err(e) => {
                error!("{}", e);
                fatal = Some(e);
                ABORT
            }
        }
    } else {
        GO
    };

    // Seeds are enqueued before the broadcast returns anywhere
    if comm.broadcast(status, COORDINATOR) != GO {
        return Err(fatal.unwrap_or(CollateError::Aborted));
    }

    let mut processor = SegmentProcessor::new(comm.rank(), policy, queue);
    queue.drain(|item| processor.handle(item));

    // Attributes only after every rank has stopped writing
    comm.barrier();
    let mut stats = processor.finish();
    stats.merge(&seeded);
    stats.set_duration(started.elapsed());
    Ok(stats.reduce(comm))
}

/// Resolve targets and enqueue the top-level items (coordinator only)
fn seed(
    queue: &SharedQueue,
    sources: &[PathBuf],
    target: &Path,
    policy: &CopyPolicy,
    stats: &mut RunStats,
) -> Result<()> {
    let spec = resolve_targets(sources, target, policy)?;

    for rejected in &spec.rejected {
        warn!(category = rejected.category(), "{}", rejected);
        stats.failed += 1;
    }

    for pair in &spec.pairs {
        match plan_entry(queue, &pair.source, &pair.dest, policy) {
            Ok(Planned::Enqueued(_)) => {}
            Ok(Planned::Skipped) => stats.skipped += 1,
            Err(e) => {
                warn!(category = e.category(), "{}: {}", pair.source.display(), e);
                stats.failed += 1;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::ThreadWorld;
    use crate::logging::init_test_logging;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_validation_error_aborts_every_rank() {
        init_test_logging();
        let dir = tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        let file_target = dir.path().join("target");
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"b").unwrap();
        fs::write(&file_target, b"t").unwrap();

        let queue = SharedQueue::new();
        let world = ThreadWorld::new(3).unwrap();
        let results = world
            .run(|comm| {
                copy_tree(
                    &comm,
                    &queue,
                    &[a.clone(), b.clone()],
                    &file_target,
                    &CopyPolicy::default(),
                )
            })
            .unwrap();

        assert!(matches!(results[0], Err(CollateError::Validation(_))));
        assert!(matches!(results[1], Err(CollateError::Aborted)));
        assert!(matches!(results[2], Err(CollateError::Aborted)));
        assert_eq!(queue.stats().file_items(), 0);
        assert_eq!(fs::read(&file_target).unwrap(), b"t");
    }

    #[test]
    fn test_rejected_source_counts_as_failed() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("good");
        let out = dir.path().join("out");
        fs::write(&good, b"good").unwrap();
        fs::create_dir(&out).unwrap();

        let queue = SharedQueue::new();
        let world = ThreadWorld::new(2).unwrap();
        let results = world
            .run(|comm| {
                copy_tree(
                    &comm,
                    &queue,
                    &[good.clone(), dir.path().join("missing")],
                    &out,
                    &CopyPolicy::default(),
                )
            })
            .unwrap();

        for stats in results {
            let stats = stats.unwrap();
            assert_eq!(stats.files, 1);
            assert_eq!(stats.failed, 1);
        }
        assert_eq!(fs::read(out.join("good")).unwrap(), b"good");
    }
}
