//! Two-way shard merger.

use std::fs;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};

use log;

use crate::buffer::RecordWindow;
use crate::error::ShardError;
use crate::provenance::{MergeEntry, MergeLog};
use crate::queue::WorkQueue;
use crate::record::{self, STRIDE};
use crate::split;

/// Merges two sorted record streams into a single sorted one.
/// Returns the number of records written.
///
/// Each input is read through its own window of `window_size` bytes. Merged records accumulate in an
/// output buffer which is written out before any window refill and whenever it grows past the
/// window size, so memory usage stays bounded by about three windows. Equal records are all kept.
/// Inputs should be sorted in ascending order otherwise the result is undefined.
///
/// # Arguments
/// * `left` - First sorted input
/// * `right` - Second sorted input
/// * `output` - Merged data destination
/// * `window_size` - Per input read window size in bytes
pub fn merge_streams<L, R, W>(left: L, right: R, output: &mut W, window_size: usize) -> io::Result<u64>
where
    L: Read,
    R: Read,
    W: Write,
{
    let mut left = RecordWindow::new(left, window_size);
    let mut right = RecordWindow::new(right, window_size);
    let limit = left.limit();

    let mut out = Vec::with_capacity(limit + 2 * STRIDE);
    let mut written = 0u64;

    loop {
        if left.is_exhausted() && !left.is_eof() {
            written += flush(&mut out, output)?;
            left.refill()?;
        }
        if right.is_exhausted() && !right.is_eof() {
            written += flush(&mut out, output)?;
            right.refill()?;
        }

        match (left.head(), right.head()) {
            (Some(l), Some(r)) => {
                if l <= r {
                    record::push_record(l, &mut out);
                    left.advance();
                }
                if r <= l {
                    record::push_record(r, &mut out);
                    right.advance();
                }
            }
            (Some(_), None) => {
                record::encode_into(left.remaining(), &mut out);
                left.consume_all();
            }
            (None, Some(_)) => {
                record::encode_into(right.remaining(), &mut out);
                right.consume_all();
            }
            (None, None) => break,
        }

        if out.len() >= limit {
            written += flush(&mut out, output)?;
        }
    }

    written += flush(&mut out, output)?;
    return Ok(written);
}

fn flush<W: Write>(out: &mut Vec<u8>, output: &mut W) -> io::Result<u64> {
    if out.is_empty() {
        return Ok(0);
    }

    output.write_all(out)?;
    let records = (out.len() / STRIDE) as u64;
    out.clear();

    return Ok(records);
}

/// Merges two sorted shard files.
///
/// The merged data is written to `<left stem>_<extension>` beside `left`. Once done the output
/// takes the place of `left`, `right` is deleted, the resulting path is pushed back to the queue
/// and the merge is recorded in the log. On failure both inputs are left in place and the output is
/// removed. The caller must own both paths, that is hold them outside
/// of the queue.
///
/// # Arguments
/// * `left` - First sorted shard, its path is reused for the result
/// * `right` - Second sorted shard
/// * `budget` - Memory budget in bytes shared by both input windows
/// * `queue` - Queue receiving the merged shard
/// * `merge_log` - Log receiving the merge record
pub fn merge_shards(
    left: &Path,
    right: &Path,
    budget: usize,
    queue: &WorkQueue,
    merge_log: &MergeLog,
) -> Result<PathBuf, ShardError> {
    let left_file = fs::File::open(left).map_err(|err| ShardError::open(left, err))?;
    let right_file = fs::File::open(right).map_err(|err| ShardError::open(right, err))?;

    let output_path = split::with_stem_suffix(left, "_");
    let mut output = fs::File::create(&output_path).map_err(|err| ShardError::open(&output_path, err))?;

    let records = match merge_streams(left_file, right_file, &mut output, budget / 2) {
        Ok(records) => records,
        Err(err) => {
            drop(output);
            if let Err(err) = fs::remove_file(&output_path) {
                log::warn!("partial merge output {} not removed: {}", output_path.display(), err);
            }
            return Err(ShardError::IO(err));
        }
    };
    drop(output);

    replace_inputs(&output_path, left, right)?;

    log::debug!(
        "merged {} and {} ({} records)",
        left.display(),
        right.display(),
        records
    );

    queue.push(left.to_path_buf());
    merge_log.append(MergeEntry {
        result: split::stem(left),
        left: split::stem(left),
        right: split::stem(right),
    });

    return Ok(left.to_path_buf());
}

/// Moves the merged output over `left`, then deletes `right`.
///
/// If the output can't take the place of `left` it is removed and both inputs stay untouched. Once
/// the rename succeeded `left` holds every record, so a failure to delete `right` only leaves a stale
/// file behind and is not an error.
fn replace_inputs(output: &Path, left: &Path, right: &Path) -> Result<(), ShardError> {
    if let Err(err) = fs::rename(output, left) {
        if let Err(err) = fs::remove_file(output) {
            log::warn!("merge output {} not removed: {}", output.display(), err);
        }
        return Err(ShardError::IO(err));
    }

    if let Err(err) = fs::remove_file(right) {
        log::warn!("merged shard {} not removed: {}", right.display(), err);
    }

    return Ok(());
}
