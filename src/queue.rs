//! Shared work queue of shard paths.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

/// FIFO queue of shard paths awaiting a merge.
///
/// Popping a path transfers the ownership of the shard file to the caller: only the holder of a
/// path may rename or delete the file, until it pushes the path back.
#[derive(Debug, Default)]
pub struct WorkQueue {
    paths: Mutex<VecDeque<PathBuf>>,
}

impl WorkQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        WorkQueue::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<PathBuf>> {
        // queue content stays consistent even if a holder panicked
        self.paths.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Appends a path at the back of the queue.
    pub fn push(&self, path: PathBuf) {
        self.lock().push_back(path);
    }

    /// Appends several paths keeping their order.
    pub fn extend<I: IntoIterator<Item = PathBuf>>(&self, paths: I) {
        self.lock().extend(paths);
    }

    /// Pops the front path.
    pub fn pop(&self) -> Option<PathBuf> {
        self.lock().pop_front()
    }

    /// Pops the two front paths under a single lock acquisition, or nothing if fewer than two
    /// paths are queued.
    pub fn pop_pair(&self) -> Option<(PathBuf, PathBuf)> {
        let mut paths = self.lock();
        if paths.len() < 2 {
            return None;
        }

        let first = paths.pop_front()?;
        let second = paths.pop_front()?;
        return Some((first, second));
    }

    /// Removes every queued path.
    pub fn drain(&self) -> Vec<PathBuf> {
        self.lock().drain(..).collect()
    }

    /// Returns queued paths count.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
