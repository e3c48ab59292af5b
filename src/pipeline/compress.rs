/*!
 * Compress mode: partition, transform, scan, write, clean up
 *
 * Files are processed one after another; within a file every rank
 * transforms its own range in parallel. All ranks walk through the same
 * sequence of collective calls for every file, whatever happens locally,
 * so a local failure is first agreed on and only then acted upon.
 */

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use tempfile::{Builder, TempPath};
use tracing::{debug, info, warn};

use crate::comm::{Communicator, COORDINATOR};
use crate::compression::{build_transform, Transform, TempFileCleanup};
use crate::config::CompressConfig;
use crate::core::metadata::preserve_metadata;
use crate::core::partition::{has_work, partition, Range};
use crate::core::reconcile::{compute_offset, copy_range, global_total, write_segment_at};
use crate::error::{CollateError, Result};
use crate::stats::RunStats;

/// Broadcast in place of a file size when the coordinator rejects a file
pub const SKIP_FILE: u64 = u64::MAX;

const STATUS_OK: u64 = 0;
const STATUS_FAILED: u64 = 1;

/// How one file ended, as seen by every rank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOutcome {
    Compressed,
    /// Left alone by policy (already compressed)
    Skipped,
    Failed,
}

/// One rank's view of one file
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub source: PathBuf,
    pub dest: PathBuf,
    pub outcome: FileOutcome,
    /// This rank's input range
    pub range: Range,
    /// Size of this rank's transformed segment
    pub local_size: u64,
    /// Where this rank's segment starts in the destination
    pub offset: u64,
}

impl FileReport {
    fn new(source: &Path, dest: &Path) -> Self {
        Self {
            source: source.to_path_buf(),
            dest: dest.to_path_buf(),
            outcome: FileOutcome::Failed,
            range: Range { start: 0, length: 0 },
            local_size: 0,
            offset: 0,
        }
    }
}

/// A transformed segment owned by this rank; its files go away on drop
struct LocalSegment {
    path: PathBuf,
    size: u64,
    _output: TempFileCleanup,
    _input: TempPath,
}

/// Compress every file in `sources`; returns totals reduced over all ranks
pub fn compress_files<C: Communicator>(
    comm: &C,
    sources: &[PathBuf],
    config: &CompressConfig,
) -> RunStats {
    let started = Instant::now();
    let transform = build_transform(config);
    let mut stats = RunStats::new();

    for source in sources {
        let report = compress_file(comm, source, config, transform.as_ref());

        if report.outcome == FileOutcome::Compressed && !report.range.is_empty() {
            stats.bytes_read += report.range.length;
        }
        if report.outcome == FileOutcome::Compressed && report.local_size > 0 {
            stats.segments += 1;
            stats.bytes_written += report.local_size;
        }
        // File-level outcomes are counted once, by the coordinator
        if comm.is_coordinator() {
            match report.outcome {
                FileOutcome::Compressed => stats.files += 1,
                FileOutcome::Skipped => stats.skipped += 1,
                FileOutcome::Failed => stats.failed += 1,
            }
        }
    }

    stats.set_duration(started.elapsed());
    stats.reduce(comm)
}

/// Compress one file collectively; every rank must call this with the same arguments
pub fn compress_file<C: Communicator>(
    comm: &C,
    source: &Path,
    config: &CompressConfig,
    transform: &dyn Transform,
) -> FileReport {
    let suffix = config.output_suffix();
    let dest = with_suffix(source, suffix);
    let mut report = FileReport::new(source, &dest);
    let rank = comm.rank();

    // 1. Coordinator validates and broadcasts the size
    let mut skipped_by_policy = false;
    let announced = if comm.is_coordinator() {
        match validate_source(source, &dest, suffix, config.force) {
            Ok(Some(size)) => size,
            Ok(None) => {
                skipped_by_policy = true;
                SKIP_FILE
            }
            Err(e) => {
                warn!(rank, category = e.category(), "{}: {}", source.display(), e);
                SKIP_FILE
            }
        }
    } else {
        0
    };
    let size = comm.broadcast(announced, COORDINATOR);
    if size == SKIP_FILE {
        report.outcome = if skipped_by_policy || !comm.is_coordinator() {
            FileOutcome::Skipped
        } else {
            FileOutcome::Failed
        };
        return report;
    }

    // 2-3. Each rank transforms its own range into a private temp file
    report.range = partition(size, comm.size(), rank);
    let segment = if has_work(size, comm.size(), rank) {
        match transform_range(source, &dest, report.range, rank, transform) {
            Ok(segment) => Some(segment),
            Err(e) => {
                warn!(
                    rank,
                    category = e.category(),
                    "{}: segment {}+{}: {}",
                    source.display(),
                    report.range.start,
                    report.range.length,
                    e
                );
                return abandon(comm, report);
            }
        }
    } else {
        None
    };
    // Any rank's failure abandons the file everywhere, before the destination is touched
    if global_total(comm, 0) > 0 {
        return report;
    }

    // 4. Scan for this rank's offset
    report.local_size = segment.as_ref().map_or(0, |s| s.size);
    report.offset = compute_offset(comm, report.local_size);

    // 5. Coordinator truncates; the status broadcast orders truncation before any write
    let truncated = if comm.is_coordinator() {
        match recreate_dest(&dest) {
            Ok(_) => STATUS_OK,
            Err(e) => {
                warn!(rank, "{}: {}", dest.display(), e);
                STATUS_FAILED
            }
        }
    } else {
        STATUS_OK
    };
    if comm.broadcast(truncated, COORDINATOR) != STATUS_OK {
        return report;
    }

    // 6. Write at the scanned offset, then drop the temp files
    let mut write_failed = false;
    if let Some(segment) = segment {
        match write_segment_at(&segment.path, &dest, report.offset) {
            Ok(written) => debug!(
                rank,
                "{}: wrote {} bytes at offset {}",
                dest.display(),
                written,
                report.offset
            ),
            Err(e) => {
                warn!(rank, "{}: write at offset {}: {}", dest.display(), report.offset, e);
                write_failed = true;
            }
        }
    }

    // 7. Agree on the writes; this is also the barrier before source removal
    if global_total(comm, u64::from(write_failed)) > 0 {
        if comm.is_coordinator() {
            if let Err(e) = fs::remove_file(&dest) {
                warn!(rank, "Failed to remove partial {}: {}", dest.display(), e);
            }
        }
        return report;
    }

    report.outcome = FileOutcome::Compressed;
    if comm.is_coordinator() {
        finish_source(source, &dest, config);
    }
    report
}

/// Truncate `dest` in place, replacing anything that is not a regular file
fn recreate_dest(dest: &Path) -> std::io::Result<File> {
    if let Ok(meta) = fs::symlink_metadata(dest) {
        if !meta.is_file() {
            fs::remove_file(dest)?;
        }
    }
    File::create(dest)
}

/// Report a local failure to the other ranks and give up on the file
fn abandon<C: Communicator>(comm: &C, mut report: FileReport) -> FileReport {
    global_total(comm, 1);
    report.outcome = FileOutcome::Failed;
    report
}

/// Coordinator-side checks; `Ok(None)` means skip without failing
fn validate_source(source: &Path, dest: &Path, suffix: &str, force: bool) -> Result<Option<u64>> {
    if source.to_string_lossy().ends_with(suffix) {
        warn!("{} already has {} suffix -- unchanged", source.display(), suffix);
        return Ok(None);
    }

    let meta = fs::metadata(source).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CollateError::SourceNotFound(source.to_path_buf())
        } else {
            e.into()
        }
    })?;
    if !meta.is_file() {
        return Err(CollateError::InvalidPath(source.to_path_buf()));
    }

    if !force && fs::symlink_metadata(dest).is_ok() {
        return Err(CollateError::Validation(format!(
            "{} already exists; use --force to overwrite",
            dest.display()
        )));
    }

    Ok(Some(meta.len()))
}

/// Copy `range` of `source` into a private temp file next to `dest` and transform it
fn transform_range(
    source: &Path,
    dest: &Path,
    range: Range,
    rank: usize,
    transform: &dyn Transform,
) -> Result<LocalSegment> {
    let dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = Builder::new()
        .prefix(&format!(".collate-r{}-", rank))
        .tempfile_in(dir)?;
    copy_range(source, range.start, range.length, temp.as_file_mut())?;
    temp.as_file_mut().flush()?;
    let input = temp.into_temp_path();

    debug!(rank, "{}: running {} on {} bytes", source.display(), transform.name(), range.length);
    let path = transform.transform(&input)?;
    let output = TempFileCleanup::new(&path);
    let size = fs::metadata(&path)?.len();

    Ok(LocalSegment {
        path,
        size,
        _output: output,
        _input: input,
    })
}

/// Copy attributes onto the finished output and drop the original unless kept
fn finish_source(source: &Path, dest: &Path, config: &CompressConfig) {
    if let Err(e) = preserve_metadata(source, dest) {
        warn!("{}: {}", dest.display(), e);
    }

    if config.verbosity > 0 {
        info!("{} -> {}", source.display(), dest.display());
    } else {
        debug!("{} -> {}", source.display(), dest.display());
    }

    if !config.keep {
        if let Err(e) = fs::remove_file(source) {
            warn!("Failed to remove {}: {}", source.display(), e);
        }
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
