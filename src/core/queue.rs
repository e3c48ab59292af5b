//! Shared work queue drained cooperatively by every rank
//!
//! Items travel as opaque `bincode` records, so an item cannot change once
//! it is enqueued. Any rank may dequeue any record, whoever produced it.
//! Processing a directory enqueues its children, so the queue grows with
//! the tree as it is discovered rather than up front.
//!
//! Termination: an atomic counter tracks items that have been enqueued but
//! not yet finished. It only reaches zero when the channel is empty and no
//! rank is inside a processing callback (which is the only place new items
//! come from), because children are counted before their parent's claim is
//! released.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::partition::{partition, segment_count, Range};
use crate::error::{CollateError, Result};

/// What a work item refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    /// A segment of a file, or a symlink (always a single segment)
    File,
    /// A directory; processing it creates the destination and expands children
    Directory,
}

/// One unit of work
///
/// Either segment `segment` of a file of `object_size` bytes split into
/// `total_segments` pieces, or a whole directory (`total_segments == 1`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub segment: u32,
    pub total_segments: u32,
    pub object_size: u64,
    pub source: PathBuf,
    pub dest: PathBuf,
    pub kind: ItemKind,
}

impl WorkItem {
    /// Item for a whole directory
    pub fn directory(source: &Path, dest: &Path) -> Self {
        Self {
            segment: 0,
            total_segments: 1,
            object_size: 0,
            source: source.to_path_buf(),
            dest: dest.to_path_buf(),
            kind: ItemKind::Directory,
        }
    }

    /// Item for an object copied in one piece (symlinks, small files)
    pub fn single(source: &Path, dest: &Path, object_size: u64) -> Self {
        Self {
            segment: 0,
            total_segments: 1,
            object_size,
            source: source.to_path_buf(),
            dest: dest.to_path_buf(),
            kind: ItemKind::File,
        }
    }

    /// All segment items for a file of `object_size` bytes at `segment_size` bytes per item
    pub fn file_segments(
        source: &Path,
        dest: &Path,
        object_size: u64,
        segment_size: u64,
    ) -> Vec<WorkItem> {
        let total_segments = segment_count(object_size, segment_size);
        (0..total_segments)
            .map(|segment| WorkItem {
                segment,
                total_segments,
                object_size,
                source: source.to_path_buf(),
                dest: dest.to_path_buf(),
                kind: ItemKind::File,
            })
            .collect()
    }

    /// Byte range this item covers; derived, never stored
    pub fn range(&self) -> Range {
        partition(
            self.object_size,
            self.total_segments as usize,
            self.segment as usize,
        )
    }

    /// Whether this item is responsible for per-object work (conflict reports, attributes)
    pub fn is_first_segment(&self) -> bool {
        self.segment == 0
    }

    fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    fn decode(record: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(record)?)
    }
}

/// Counters for the queue
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Directory items enqueued
    pub directory_items: AtomicU64,

    /// File (segment and symlink) items enqueued
    pub file_items: AtomicU64,

    /// Items handed to a rank
    pub dequeued: AtomicU64,
}

impl QueueStats {
    pub fn directory_items(&self) -> u64 {
        self.directory_items.load(Ordering::Relaxed)
    }

    pub fn file_items(&self) -> u64 {
        self.file_items.load(Ordering::Relaxed)
    }

    pub fn dequeued(&self) -> u64 {
        self.dequeued.load(Ordering::Relaxed)
    }
}

/// Work queue visible to every rank of a world
pub struct SharedQueue {
    sender: Sender<Vec<u8>>,
    receiver: Receiver<Vec<u8>>,
    /// Enqueued and not yet finished
    outstanding: AtomicUsize,
    stats: QueueStats,
    poll_interval: Duration,
}

impl Default for SharedQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedQueue {
    pub fn new() -> Self {
        Self::with_poll_interval(Duration::from_millis(5))
    }

    /// Queue whose idle ranks re-check for termination every `poll_interval`
    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            outstanding: AtomicUsize::new(0),
            stats: QueueStats::default(),
            poll_interval,
        }
    }

    /// Add an item; callable from any rank, including from inside processing
    pub fn enqueue(&self, item: &WorkItem) -> Result<()> {
        let record = item.encode()?;
        // Count before sending so the item is never invisible to termination checks
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(record).is_err() {
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
            return Err(CollateError::Queue("queue disconnected".to_string()));
        }

        match item.kind {
            ItemKind::Directory => self.stats.directory_items.fetch_add(1, Ordering::Relaxed),
            ItemKind::File => self.stats.file_items.fetch_add(1, Ordering::Relaxed),
        };
        Ok(())
    }

    /// Take one item if any is immediately available
    ///
    /// The item counts as outstanding until the returned claim is dropped.
    pub fn dequeue(&self) -> Result<Option<ClaimedItem<'_>>> {
        match self.receiver.try_recv() {
            Ok(record) => self.claim(&record).map(Some),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => Ok(None),
        }
    }

    /// Process items on this rank until the whole queue is globally drained
    ///
    /// Returns the number of items this rank processed.
    pub fn drain<F>(&self, mut process: F) -> u64
    where
        F: FnMut(&WorkItem),
    {
        let mut processed = 0;
        loop {
            match self.receiver.recv_timeout(self.poll_interval) {
                Ok(record) => match self.claim(&record) {
                    Ok(claimed) => {
                        process(&claimed);
                        processed += 1;
                    }
                    Err(e) => warn!("Dropping unreadable work record: {}", e),
                },
                Err(RecvTimeoutError::Timeout) => {
                    if self.is_drained() {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        processed
    }

    /// No item is queued or being processed anywhere
    pub fn is_drained(&self) -> bool {
        self.outstanding.load(Ordering::SeqCst) == 0
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    fn claim(&self, record: &[u8]) -> Result<ClaimedItem<'_>> {
        self.stats.dequeued.fetch_add(1, Ordering::Relaxed);
        let release = Release { queue: self };
        let item = WorkItem::decode(record)?;
        Ok(ClaimedItem {
            item,
            _release: release,
        })
    }
}

/// Marks one outstanding item finished when dropped
struct Release<'a> {
    queue: &'a SharedQueue,
}

impl Drop for Release<'_> {
    fn drop(&mut self) {
        self.queue.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A dequeued item; it stays outstanding until this guard is dropped
pub struct ClaimedItem<'a> {
    item: WorkItem,
    _release: Release<'a>,
}

impl std::ops::Deref for ClaimedItem<'_> {
    type Target = WorkItem;

    fn deref(&self) -> &WorkItem {
        &self.item
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{Communicator, ThreadWorld};
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[test]
    fn test_file_segments_cover_file() {
        let items = WorkItem::file_segments(Path::new("a"), Path::new("b"), 10_000, 4096);
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|i| i.total_segments == 3));
        assert!(items[0].is_first_segment());
        assert_eq!(items[0].range().start, 0);
        assert_eq!(items[2].range().end(), 10_000);
        let covered: u64 = items.iter().map(|i| i.range().length).sum();
        assert_eq!(covered, 10_000);
    }

    #[test]
    fn test_empty_file_gets_one_item() {
        let items = WorkItem::file_segments(Path::new("a"), Path::new("b"), 0, 4096);
        assert_eq!(items.len(), 1);
        assert!(items[0].range().is_empty());
    }

    #[test]
    fn test_claim_holds_outstanding_until_dropped() {
        let queue = SharedQueue::new();
        let item = WorkItem::single(Path::new("src/x"), Path::new("dst/x"), 42);
        queue.enqueue(&item).unwrap();
        assert!(!queue.is_drained());

        let claimed = queue.dequeue().unwrap().expect("item queued");
        assert_eq!(*claimed, item);
        assert!(!queue.is_drained());
        drop(claimed);

        assert!(queue.is_drained());
        assert!(queue.dequeue().unwrap().is_none());
        assert_eq!(queue.stats().file_items(), 1);
        assert_eq!(queue.stats().dequeued(), 1);
    }

    /// Synthetic tree: node `n` at depth < 3 has children `3n+1..=3n+3`
    fn children(node: u64) -> Vec<u64> {
        if node >= 13 {
            Vec::new()
        } else {
            vec![3 * node + 1, 3 * node + 2, 3 * node + 3]
        }
    }

    fn node_item(node: u64) -> WorkItem {
        let path = PathBuf::from(format!("n{}", node));
        if children(node).is_empty() {
            WorkItem::single(&path, &path, node)
        } else {
            WorkItem::directory(&path, &path)
        }
    }

    #[test]
    fn test_recursive_expansion_terminates_with_every_item_once() {
        let queue = SharedQueue::with_poll_interval(Duration::from_millis(1));
        let seen = Mutex::new(Vec::new());
        let world = ThreadWorld::new(4).unwrap();

        let per_rank = world
            .run(|comm| {
                if comm.is_coordinator() {
                    queue.enqueue(&node_item(0)).unwrap();
                }
                comm.barrier();
                queue.drain(|item| {
                    let node: u64 = item.source.to_string_lossy()[1..].parse().unwrap();
                    seen.lock().unwrap().push(node);
                    if item.kind == ItemKind::Directory {
                        for child in children(node) {
                            queue.enqueue(&node_item(child)).unwrap();
                        }
                    }
                })
            })
            .unwrap();

        // 1 + 3 + 9 + 27 nodes; the 13 internal ones are directories
        let seen = seen.into_inner().unwrap();
        let unique: HashSet<u64> = seen.iter().copied().collect();
        assert_eq!(seen.len(), 40);
        assert_eq!(unique.len(), 40);
        assert_eq!(per_rank.iter().sum::<u64>(), 40);
        assert_eq!(queue.stats().directory_items(), 13);
        assert_eq!(queue.stats().file_items(), 27);
        assert!(queue.is_drained());
    }
}
