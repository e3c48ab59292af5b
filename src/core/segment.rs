/*!
 * Per-item processing for queue-driven copies
 *
 * Planning (`plan_entry`) runs wherever an object is discovered and applies
 * the policies that must be decided once per object: no-clobber skips, type
 * conflicts, removal of stale destinations. Processing then works on a single
 * item and never assumes any other segment of the same file has run.
 */

use std::fs::{self, Metadata, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::metadata::{preserve_metadata, preserve_symlink_metadata};
use super::queue::{ItemKind, SharedQueue, WorkItem};
use super::reconcile::copy_range;
use crate::config::CopyPolicy;
use crate::error::{CollateError, Result};
use crate::stats::RunStats;

/// Result of planning one discovered object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Planned {
    /// This many items were enqueued for the object
    Enqueued(u32),
    /// Left alone by policy
    Skipped,
}

/// Result of processing one item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Directory created (or reused) and `children` objects enqueued
    Directory { created: bool, children: u64 },
    /// Symbolic link recreated
    Linked,
    /// Byte range written
    Segment { bytes: u64 },
    /// Conflict already reported by the first segment of this object
    Suppressed,
}

/// Decide what to enqueue for `source` landing at `dest`
pub fn plan_entry(
    queue: &SharedQueue,
    source: &Path,
    dest: &Path,
    policy: &CopyPolicy,
) -> Result<Planned> {
    let mut source_meta = fs::symlink_metadata(source).map_err(|e| not_found_as_source(e, source))?;
    if source_meta.file_type().is_symlink() && policy.dereference {
        source_meta = fs::metadata(source).map_err(|e| not_found_as_source(e, source))?;
    }

    let dest_meta = match fs::symlink_metadata(dest) {
        Ok(meta) => Some(meta),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };

    let file_type = source_meta.file_type();
    if file_type.is_dir() {
        if let Some(meta) = &dest_meta {
            if !meta.is_dir() {
                return Err(conflict(source, dest, &source_meta, meta));
            }
        }
        queue.enqueue(&WorkItem::directory(source, dest))?;
        return Ok(Planned::Enqueued(1));
    }

    if !file_type.is_file() && !file_type.is_symlink() {
        warn!("Skipping special file {}", source.display());
        return Ok(Planned::Skipped);
    }

    if let Some(meta) = &dest_meta {
        if meta.is_dir() {
            return Err(conflict(source, dest, &source_meta, meta));
        }
        if !policy.clobber {
            debug!("Not overwriting {}", dest.display());
            return Ok(Planned::Skipped);
        }
        // Segments never truncate, so a destination of another size or type goes first
        if !meta.is_file() || meta.len() != source_meta.len() || file_type.is_symlink() {
            fs::remove_file(dest)?;
        }
    }

    if file_type.is_symlink() {
        queue.enqueue(&WorkItem::single(source, dest, 0))?;
        return Ok(Planned::Enqueued(1));
    }

    let items = WorkItem::file_segments(source, dest, source_meta.len(), policy.segment_size);
    for item in &items {
        queue.enqueue(item)?;
    }
    Ok(Planned::Enqueued(items.len() as u32))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeferredKind {
    File,
    Symlink,
    Directory,
}

/// Attribute work recorded during the copy and applied after global drain
#[derive(Debug)]
struct Deferred {
    source: PathBuf,
    dest: PathBuf,
    kind: DeferredKind,
}

/// Processes items on one rank
pub struct SegmentProcessor<'a> {
    rank: usize,
    policy: &'a CopyPolicy,
    queue: &'a SharedQueue,
    stats: RunStats,
    deferred: Vec<Deferred>,
}

impl<'a> SegmentProcessor<'a> {
    pub fn new(rank: usize, policy: &'a CopyPolicy, queue: &'a SharedQueue) -> Self {
        Self {
            rank,
            policy,
            queue,
            stats: RunStats::new(),
            deferred: Vec::new(),
        }
    }

    /// Process one item and fold the outcome into this rank's counters
    ///
    /// Errors are reported and counted; they never stop the drain.
    pub fn handle(&mut self, item: &WorkItem) {
        match self.process(item) {
            Ok(Outcome::Directory { .. }) => self.stats.directories += 1,
            Ok(Outcome::Linked) => self.stats.links += 1,
            Ok(Outcome::Segment { bytes }) => {
                self.stats.segments += 1;
                self.stats.bytes_read += bytes;
                self.stats.bytes_written += bytes;
                if item.is_first_segment() {
                    self.stats.files += 1;
                }
            }
            Ok(Outcome::Suppressed) => {}
            Err(e) => {
                warn!(
                    rank = self.rank,
                    category = e.category(),
                    "{}: {}",
                    item.source.display(),
                    e
                );
                self.stats.failed += 1;
            }
        }
    }

    /// Execute one work item
    pub fn process(&mut self, item: &WorkItem) -> Result<Outcome> {
        match item.kind {
            ItemKind::Directory => self.process_directory(item),
            ItemKind::File => {
                let source_meta = fs::symlink_metadata(&item.source)
                    .map_err(|e| not_found_as_source(e, &item.source))?;
                if source_meta.file_type().is_symlink() && !self.policy.dereference {
                    self.process_symlink(item)
                } else {
                    self.process_segment(item)
                }
            }
        }
    }

    /// Apply deferred attributes and hand back this rank's counters
    ///
    /// Call once the queue is drained everywhere: directories are applied
    /// deepest first, after every file below them has been written.
    pub fn finish(mut self) -> RunStats {
        let mut deferred = std::mem::take(&mut self.deferred);
        deferred.sort_by_key(|d| {
            (
                d.kind == DeferredKind::Directory,
                std::cmp::Reverse(d.dest.components().count()),
            )
        });

        for entry in &deferred {
            let result = match entry.kind {
                DeferredKind::Symlink => preserve_symlink_metadata(&entry.source, &entry.dest),
                DeferredKind::File | DeferredKind::Directory => {
                    preserve_metadata(&entry.source, &entry.dest)
                }
            };
            if let Err(e) = result {
                warn!(rank = self.rank, "{}: {}", entry.dest.display(), e);
                self.stats.failed += 1;
            }
        }
        self.stats
    }

    fn process_directory(&mut self, item: &WorkItem) -> Result<Outcome> {
        let created = match fs::symlink_metadata(&item.dest) {
            Ok(meta) if meta.is_dir() => false,
            Ok(meta) => {
                let source_meta = fs::metadata(&item.source)?;
                return Err(conflict(&item.source, &item.dest, &source_meta, &meta));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                fs::create_dir(&item.dest)?;
                true
            }
            Err(e) => return Err(e.into()),
        };

        if self.policy.preserve && (created || self.policy.clobber) {
            self.defer(item, DeferredKind::Directory);
        }

        let children = self.expand(item);
        self.progress(format_args!(
            "directory {} ({} entries)",
            item.dest.display(),
            children
        ));
        Ok(Outcome::Directory { created, children })
    }

    /// Plan every direct child of a directory item
    fn expand(&mut self, item: &WorkItem) -> u64 {
        let mut children = 0;
        let entries = WalkDir::new(&item.source)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name();

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(rank = self.rank, "Failed to read entry: {}", e);
                    self.stats.failed += 1;
                    continue;
                }
            };

            let dest = item.dest.join(entry.file_name());
            let looped =
                self.policy.dereference && entry.path_is_symlink() && reenters_ancestor(entry.path());
            let planned = if looped {
                Err(CollateError::FilesystemLoop(entry.path().to_path_buf()))
            } else {
                plan_entry(self.queue, entry.path(), &dest, self.policy)
            };
            match planned {
                Ok(Planned::Enqueued(_)) => children += 1,
                Ok(Planned::Skipped) => self.stats.skipped += 1,
                Err(e) => {
                    warn!(
                        rank = self.rank,
                        category = e.category(),
                        "{}: {}",
                        entry.path().display(),
                        e
                    );
                    self.stats.failed += 1;
                }
            }
        }
        children
    }

    fn process_symlink(&mut self, item: &WorkItem) -> Result<Outcome> {
        let target = fs::read_link(&item.source)?;

        match fs::symlink_metadata(&item.dest) {
            Ok(meta) if meta.is_dir() => {
                let source_meta = fs::symlink_metadata(&item.source)?;
                return Err(conflict(&item.source, &item.dest, &source_meta, &meta));
            }
            Ok(_) if !self.policy.clobber => return Ok(Outcome::Suppressed),
            Ok(_) => fs::remove_file(&item.dest)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        create_symlink(&target, &item.dest)?;
        if self.policy.preserve {
            self.defer(item, DeferredKind::Symlink);
        }
        self.progress(format_args!(
            "link {} -> {}",
            item.dest.display(),
            target.display()
        ));
        Ok(Outcome::Linked)
    }

    fn process_segment(&mut self, item: &WorkItem) -> Result<Outcome> {
        if let Ok(dest_meta) = fs::symlink_metadata(&item.dest) {
            if dest_meta.is_dir() {
                // One report per object, from whoever holds segment 0
                if !item.is_first_segment() {
                    return Ok(Outcome::Suppressed);
                }
                let source_meta = fs::metadata(&item.source)?;
                return Err(conflict(&item.source, &item.dest, &source_meta, &dest_meta));
            }
        }

        let range = item.range();
        let mut output = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&item.dest)?;
        output.seek(SeekFrom::Start(range.start))?;
        let bytes = copy_range(&item.source, range.start, range.length, &mut output)?;
        output.flush()?;
        drop(output);

        if self.policy.verify {
            verify_range(item)?;
        }

        if item.is_first_segment() && self.policy.preserve {
            self.defer(item, DeferredKind::File);
        }

        self.progress(format_args!(
            "{}: segment {} of {} ({} bytes)",
            item.dest.display(),
            item.segment + 1,
            item.total_segments,
            bytes
        ));
        Ok(Outcome::Segment { bytes })
    }

    fn defer(&mut self, item: &WorkItem, kind: DeferredKind) {
        self.deferred.push(Deferred {
            source: item.source.clone(),
            dest: item.dest.clone(),
            kind,
        });
    }

    fn progress(&self, message: std::fmt::Arguments<'_>) {
        if self.policy.verbosity > 0 {
            info!(rank = self.rank, "{}", message);
        } else {
            debug!(rank = self.rank, "{}", message);
        }
    }
}

/// Compare blake3 digests of the item's range in source and destination
fn verify_range(item: &WorkItem) -> Result<()> {
    let range = item.range();
    let expected = range_digest(&item.source, range.start, range.length)?;
    let actual = range_digest(&item.dest, range.start, range.length)?;
    if expected != actual {
        return Err(CollateError::ChecksumMismatch {
            path: item.dest.clone(),
            expected,
            actual,
        });
    }
    Ok(())
}

fn range_digest(path: &Path, start: u64, length: u64) -> Result<String> {
    let mut hasher = blake3::Hasher::new();
    copy_range(path, start, length, &mut hasher)?;
    Ok(hex::encode(hasher.finalize().as_bytes()))
}

/// Whether the link at `path` resolves to one of the directories above it
fn reenters_ancestor(path: &Path) -> bool {
    let Ok(resolved) = path.canonicalize() else {
        return false;
    };
    if !resolved.is_dir() {
        return false;
    }
    path.ancestors()
        .skip(1)
        .map(|ancestor| if ancestor.as_os_str().is_empty() { Path::new(".") } else { ancestor })
        .any(|ancestor| ancestor.canonicalize().map_or(false, |real| real == resolved))
}

fn not_found_as_source(err: io::Error, source: &Path) -> CollateError {
    if err.kind() == io::ErrorKind::NotFound {
        CollateError::SourceNotFound(source.to_path_buf())
    } else {
        err.into()
    }
}

fn kind_name(meta: &Metadata) -> &'static str {
    let file_type = meta.file_type();
    if file_type.is_dir() {
        "directory"
    } else if file_type.is_symlink() {
        "symlink"
    } else if file_type.is_file() {
        "file"
    } else {
        "special file"
    }
}

fn conflict(source: &Path, dest: &Path, source_meta: &Metadata, dest_meta: &Metadata) -> CollateError {
    CollateError::TypeConflict {
        source_path: source.to_path_buf(),
        dest_path: dest.to_path_buf(),
        source_kind: kind_name(source_meta),
        dest_kind: kind_name(dest_meta),
    }
}

/// Create a symbolic link (cross-platform)
#[cfg(unix)]
fn create_symlink(target: &Path, link_path: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link_path).map_err(CollateError::from)
}

#[cfg(windows)]
fn create_symlink(target: &Path, link_path: &Path) -> Result<()> {
    if target.is_dir() {
        std::os::windows::fs::symlink_dir(target, link_path).map_err(CollateError::from)
    } else {
        std::os::windows::fs::symlink_file(target, link_path).map_err(CollateError::from)
    }
}
