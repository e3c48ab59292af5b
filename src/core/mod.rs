/*!
 * Core engine: partitioning, reconciliation, the shared work queue and
 * per-item processing
 */

pub mod metadata;
pub mod partition;
pub mod queue;
pub mod reconcile;
pub mod segment;
pub mod targets;

pub use partition::{has_work, partition, segment_count, Range};
pub use queue::{ItemKind, QueueStats, SharedQueue, WorkItem};
pub use reconcile::{compute_offset, global_total, write_segment_at};
pub use segment::{plan_entry, Outcome, Planned, SegmentProcessor};
pub use targets::{resolve_targets, CopyPair, TargetSpec};
