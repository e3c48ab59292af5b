/*!
 * Scan-based reconciliation of variable-size per-rank outputs
 *
 * Transformed segments differ in size from their inputs, so write offsets
 * in the shared output cannot be derived from the input partition. An
 * exclusive prefix sum over the produced sizes gives every rank a disjoint
 * slot without a central allocator.
 */

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::comm::Communicator;
use crate::error::{CollateError, Result};

/// Absolute write offset of this rank's `local_size` bytes in the shared output
pub fn compute_offset<C: Communicator>(comm: &C, local_size: u64) -> u64 {
    comm.exclusive_scan(local_size)
}

/// Sum of `local` over all ranks, returned on every rank
///
/// Built from the primitives: the last rank's exclusive prefix plus its own
/// value is the total, which it then broadcasts.
pub fn global_total<C: Communicator>(comm: &C, local: u64) -> u64 {
    let prefix = comm.exclusive_scan(local);
    let last = comm.size() - 1;
    comm.broadcast(prefix + local, last)
}

/// Exclusive prefix sums of `sizes` in order
pub fn exclusive_prefix_sums(sizes: &[u64]) -> Vec<u64> {
    sizes
        .iter()
        .scan(0u64, |running, &size| {
            let offset = *running;
            *running += size;
            Some(offset)
        })
        .collect()
}

/// Copy all of `segment` into `dest` starting at byte `offset`
///
/// `dest` must already exist; bytes outside `[offset, offset + len)` are not
/// touched, so several ranks may write disjoint slots of one file at once.
pub fn write_segment_at(segment: &Path, dest: &Path, offset: u64) -> Result<u64> {
    let mut input = File::open(segment)?;
    let mut output = OpenOptions::new().write(true).open(dest)?;
    output.seek(SeekFrom::Start(offset))?;
    let written = io::copy(&mut input, &mut output)?;
    output.flush()?;
    Ok(written)
}

/// Copy `length` bytes of `source` starting at `start` into `sink`
///
/// A source that ends before the range does is an error: the file changed
/// under us and the output would be short.
pub fn copy_range<W: Write>(source: &Path, start: u64, length: u64, sink: &mut W) -> Result<u64> {
    let mut input = File::open(source)?;
    input.seek(SeekFrom::Start(start))?;
    let copied = io::copy(&mut Read::by_ref(&mut input).take(length), sink)?;
    if copied != length {
        return Err(CollateError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "{} shrank: expected {} bytes at offset {}, read {}",
                source.display(),
                length,
                start,
                copied
            ),
        )));
    }
    Ok(copied)
}
