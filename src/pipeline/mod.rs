//! Pipeline orchestration for the two operation modes
//!
//! - [`compress`]: one file at a time, split across ranks, reassembled by scan
//! - [`copy`]: queue-driven, ranks pull items and push discovered children

pub mod compress;
pub mod copy;

pub use compress::{compress_file, compress_files, FileOutcome, FileReport, SKIP_FILE};
pub use copy::copy_tree;
