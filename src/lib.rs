/*!
 * Collate - parallel bulk compression and tree copy
 *
 * A fixed set of cooperating ranks splits bulk file work between them:
 * - compress mode partitions each file into one byte range per rank,
 *   compresses the ranges independently and reassembles them in rank
 *   order at offsets computed by an exclusive prefix sum
 * - copy mode drains a shared work queue that grows as directories are
 *   expanded, with large files split into independently copied segments
 *
 * Ranks synchronize only through the collectives on [`comm::Communicator`].
 */

pub mod comm;
pub mod compression;
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod stats;

// Re-export commonly used types
pub use comm::{Communicator, ThreadComm, ThreadWorld};
pub use config::{Codec, CompressConfig, CopyPolicy, LogLevel, RunConfig};
pub use error::{CollateError, Result};
pub use pipeline::{compress_file, compress_files, copy_tree, FileOutcome, FileReport};
pub use stats::RunStats;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
