//! Shard file operation errors.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io;
use std::path::{Path, PathBuf};

/// Error raised by split, sort and merge operations on shard files.
#[derive(Debug)]
pub enum ShardError {
    /// File could not be opened or created. The operation on that file is aborted.
    Open(PathBuf, io::Error),
    /// Common I/O error.
    IO(io::Error),
}

impl ShardError {
    pub(crate) fn open(path: &Path, err: io::Error) -> Self {
        ShardError::Open(path.to_path_buf(), err)
    }
}

impl Error for ShardError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match &self {
            ShardError::Open(_, err) => err,
            ShardError::IO(err) => err,
        })
    }
}

impl Display for ShardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            ShardError::Open(path, err) => write!(f, "file {} not opened: {}", path.display(), err),
            ShardError::IO(err) => write!(f, "I/O operation failed: {}", err),
        }
    }
}

impl From<io::Error> for ShardError {
    fn from(err: io::Error) -> Self {
        ShardError::IO(err)
    }
}
