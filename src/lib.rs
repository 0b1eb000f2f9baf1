//! `shard-sort` is an out-of-core parallel sort of integer record files.
//!
//! It sorts every file of a directory into a single file, even if the data doesn't fit into memory.
//! Sorting goes through three stages executed on a bounded worker pool:
//!
//! * **Split:** every input file is cut into shards small enough to be sorted in memory.
//! * **Sort:** every shard is loaded, sorted and rewritten in place using a fixed-width binary format.
//! * **Merge:** shards are merged pairwise, each merge streaming both inputs through bounded
//!   windows, until a single shard holding every record remains.
//!
//! Records are 64-bit signed integers. Inputs are decimal text (or already encoded binary records),
//! intermediate files always use the binary format described in [`record`].
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use shard_sort::PipelineBuilder;
//!
//! fn main() {
//!     let mut pipeline = PipelineBuilder::new()
//!         .with_cache_size(512 * 1024)
//!         .with_merge_log(Path::new("merge.log"))
//!         .build()
//!         .unwrap();
//!
//!     let report = pipeline.run(Path::new("./data")).unwrap();
//!     println!("sorted {} records into {:?}", report.records, report.output);
//! }
//! ```

pub mod buffer;
pub mod error;
pub mod merger;
pub mod pipeline;
pub mod provenance;
pub mod queue;
pub mod record;
pub mod scheduler;
pub mod sort;
pub mod split;

pub use buffer::RecordWindow;
pub use error::ShardError;
pub use merger::{merge_shards, merge_streams};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineError, PipelineReport, Stage};
pub use provenance::{MergeEntry, MergeLog};
pub use queue::WorkQueue;
pub use record::RecordFormat;
pub use scheduler::{Scheduler, SchedulerError, TaskHandle};
pub use sort::sort_shard;
pub use split::split_file;
