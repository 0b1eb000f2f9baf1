//! Shard sorter.

use std::fs;
use std::io::prelude::*;
use std::path::{Path, PathBuf};

use log;
use rayon::prelude::*;

use crate::error::ShardError;
use crate::record::{self, RecordFormat};

/// Sorts a shard in place.
///
/// The whole file is loaded into memory, sorted in ascending order and rewritten using the
/// binary record format whatever the input format was. Equal values keep no particular order.
/// If the file can't be opened it is left untouched.
///
/// # Arguments
/// * `path` - Shard to be sorted
/// * `format` - Shard encoding
pub fn sort_shard(path: &Path, format: RecordFormat) -> Result<PathBuf, ShardError> {
    let mut data = Vec::new();
    fs::File::open(path)
        .map_err(|err| ShardError::open(path, err))?
        .read_to_end(&mut data)?;

    let mut values = match format {
        RecordFormat::Text => record::parse_text(&data),
        RecordFormat::Binary => record::decode(&data),
    };
    drop(data);

    log::debug!("sorting {} ({} records) ...", path.display(), values.len());
    values.par_sort_unstable();

    let encoded = record::encode(&values);
    let mut shard = fs::File::create(path).map_err(|err| ShardError::open(path, err))?;
    shard.write_all(&encoded)?;

    return Ok(path.to_path_buf());
}
