/*!
 * Deterministic byte-range partitioning
 *
 * Every rank computes its own range from the same three integers, so
 * partition boundaries never travel between ranks. Only the object size is
 * broadcast.
 */

use serde::{Deserialize, Serialize};

/// A contiguous byte range `[start, start + length)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: u64,
    pub length: u64,
}

impl Range {
    /// One past the last byte of the range
    pub fn end(&self) -> u64 {
        self.start + self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

/// Range owned by `worker_index` when `object_size` bytes are split across `worker_count` workers
///
/// Every worker but the last gets `object_size / worker_count` bytes; the last
/// absorbs the remainder. When there are more workers than bytes the leading
/// ranges are empty, which callers treat as no-op work.
pub fn partition(object_size: u64, worker_count: usize, worker_index: usize) -> Range {
    debug_assert!(worker_count > 0, "partition needs at least one worker");
    debug_assert!(worker_index < worker_count.max(1), "worker index out of range");

    let count = worker_count.max(1) as u64;
    let index = (worker_index as u64).min(count - 1);
    let block_size = object_size / count;
    let start = index * block_size;

    let length = if index == count - 1 {
        object_size - start
    } else {
        block_size
    };

    Range { start, length }
}

/// Number of work units an object of `object_size` bytes splits into at `unit_size` bytes each
///
/// Never zero: an empty object is still one unit, so its (empty) output gets created.
pub fn segment_count(object_size: u64, unit_size: u64) -> u32 {
    if object_size == 0 || unit_size == 0 {
        return 1;
    }
    object_size.div_ceil(unit_size).min(u32::MAX as u64) as u32
}

/// Whether `worker_index` has work for an object of `object_size` bytes
///
/// Empty ranges are skipped, except that worker 0 owns the single segment
/// of an empty object.
pub fn has_work(object_size: u64, worker_count: usize, worker_index: usize) -> bool {
    if object_size == 0 {
        return worker_index == 0;
    }
    !partition(object_size, worker_count, worker_index).is_empty()
}
