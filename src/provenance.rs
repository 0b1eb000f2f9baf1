//! Merge provenance log.

use std::fs;
use std::io::{self, prelude::*};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use log;

/// Report column width.
const COLUMN_WIDTH: usize = 20;

/// A single merge: `result` was produced from `left` and `right`. Files are named by stem.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeEntry {
    pub result: String,
    pub left: String,
    pub right: String,
}

/// Append-only log of merges in completion order.
#[derive(Debug, Default)]
pub struct MergeLog {
    entries: Mutex<Vec<MergeEntry>>,
}

impl MergeLog {
    pub fn new() -> Self {
        MergeLog::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<MergeEntry>> {
        self.entries.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Appends a merge entry.
    pub fn append(&self, entry: MergeEntry) {
        log::trace!("merged {} + {} -> {}", entry.left, entry.right, entry.result);
        self.lock().push(entry);
    }

    /// Returns a copy of the entries.
    pub fn entries(&self) -> Vec<MergeEntry> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Writes the log as a fixed-column text report.
    /// The header is padded only, data rows also separate columns with a tab.
    pub fn write_report<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writeln!(
            writer,
            "{:<width$}{:<width$}{:<width$}",
            "Final File",
            "First File",
            "Second File",
            width = COLUMN_WIDTH
        )?;

        for entry in self.lock().iter() {
            writeln!(
                writer,
                "{:<width$}\t{:<width$}\t{:<width$}",
                entry.result,
                entry.left,
                entry.right,
                width = COLUMN_WIDTH
            )?;
        }

        return Ok(());
    }

    /// Writes the report to a file, replacing any previous one.
    pub fn dump(&self, path: &Path) -> io::Result<()> {
        let mut writer = io::BufWriter::new(fs::File::create(path)?);
        self.write_report(&mut writer)?;
        writer.flush()
    }
}
