//! Split, sort and merge pipeline.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io::{self, prelude::*};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Sender};
use log;

use crate::buffer::RecordWindow;
use crate::error::ShardError;
use crate::merger;
use crate::provenance::MergeLog;
use crate::queue::WorkQueue;
use crate::record::{self, RecordFormat, STRIDE};
use crate::scheduler::{Scheduler, SchedulerError};
use crate::sort;
use crate::split;

/// Default memory budget: 512 KiB.
pub const DEFAULT_CACHE_SIZE: usize = 512 * 1024;

/// Default merge log location.
pub const DEFAULT_MERGE_LOG: &str = "merge.log";

/// Pipeline error.
#[derive(Debug)]
pub enum PipelineError {
    /// Input directory can't be listed.
    InputDir(io::Error),
    /// Scheduler initialization or task submission error.
    Scheduler(SchedulerError),
    /// Result finalization error.
    Finalize(ShardError),
    /// Merge log write error.
    MergeLog(io::Error),
}

impl Error for PipelineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match &self {
            PipelineError::InputDir(err) => err,
            PipelineError::Scheduler(err) => err,
            PipelineError::Finalize(err) => err,
            PipelineError::MergeLog(err) => err,
        })
    }
}

impl Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            PipelineError::InputDir(err) => write!(f, "input directory not listed: {}", err),
            PipelineError::Scheduler(err) => write!(f, "scheduler error: {}", err),
            PipelineError::Finalize(err) => write!(f, "result finalization failed: {}", err),
            PipelineError::MergeLog(err) => write!(f, "merge log not written: {}", err),
        }
    }
}

impl From<SchedulerError> for PipelineError {
    fn from(err: SchedulerError) -> Self {
        PipelineError::Scheduler(err)
    }
}

/// Pipeline stage.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Splitting,
    Sorting,
    Merging,
    Done,
}

/// Outcome of a pipeline run.
#[derive(Debug)]
pub struct PipelineReport {
    /// Sorted result, [`None`] if the input held no data.
    pub output: Option<PathBuf>,
    /// Records count of the result.
    pub records: u64,
    /// Shards produced by the split stage.
    pub shards: usize,
    /// Files whose split failed.
    pub failed_inputs: usize,
    /// Shards whose sort failed. Their data is missing from the result.
    pub failed_shards: usize,
    /// Merges whose execution failed. Both inputs stay on disk but are missing from the result.
    pub failed_merges: usize,
    /// Completed merges count.
    pub merges: usize,
    /// Per stage wall time.
    pub timings: Vec<(Stage, Duration)>,
}

impl PipelineReport {
    /// Checks if every input record made it to the result.
    pub fn is_complete(&self) -> bool {
        self.failed_inputs == 0 && self.failed_shards == 0 && self.failed_merges == 0
    }
}

/// Pipeline builder. Provides methods for [`Pipeline`] initialization.
#[derive(Clone)]
pub struct PipelineBuilder {
    /// Number of worker threads.
    threads_number: Option<usize>,
    /// Memory budget in bytes bounding shard size and merge windows.
    cache_size: usize,
    /// Input files encoding.
    format: RecordFormat,
    /// Merge log report location, [`None`] to skip the report.
    merge_log: Option<Box<Path>>,
    /// Whether the binary result is converted to a text transcript.
    text_output: bool,
}

impl PipelineBuilder {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        PipelineBuilder::default()
    }

    /// Builds a [`Pipeline`] instance using provided configuration.
    pub fn build(self) -> Result<Pipeline, PipelineError> {
        Pipeline::new(
            self.threads_number,
            self.cache_size,
            self.format,
            self.merge_log.as_deref(),
            self.text_output,
        )
    }

    /// Sets number of worker threads.
    pub fn with_threads_number(mut self, threads_number: usize) -> PipelineBuilder {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets memory budget in bytes.
    pub fn with_cache_size(mut self, cache_size: usize) -> PipelineBuilder {
        self.cache_size = cache_size;
        return self;
    }

    /// Sets input files encoding.
    pub fn with_format(mut self, format: RecordFormat) -> PipelineBuilder {
        self.format = format;
        return self;
    }

    /// Sets merge log report location.
    pub fn with_merge_log(mut self, path: &Path) -> PipelineBuilder {
        self.merge_log = Some(path.into());
        return self;
    }

    /// Disables merge log report.
    pub fn without_merge_log(mut self) -> PipelineBuilder {
        self.merge_log = None;
        return self;
    }

    /// Sets whether the result is converted to decimal text.
    pub fn with_text_output(mut self, text_output: bool) -> PipelineBuilder {
        self.text_output = text_output;
        return self;
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        PipelineBuilder {
            threads_number: None,
            cache_size: DEFAULT_CACHE_SIZE,
            format: RecordFormat::default(),
            merge_log: Some(Path::new(DEFAULT_MERGE_LOG).into()),
            text_output: true,
        }
    }
}

/// Out-of-core sorting pipeline.
///
/// Sorts every file of a directory into a single file in three stages run on a worker pool:
/// inputs are split into shards bounded by the cache size, each shard is sorted in memory, then
/// shards are merged pairwise until a single one remains.
pub struct Pipeline {
    scheduler: Scheduler,
    cache_size: usize,
    format: RecordFormat,
    merge_log_path: Option<Box<Path>>,
    text_output: bool,

    stage: Stage,
    queue: Arc<WorkQueue>,
    merge_log: Arc<MergeLog>,
}

impl Pipeline {
    /// Creates a new pipeline instance.
    ///
    /// # Arguments
    /// * `threads_number` - Number of worker threads. If the parameter is [`None`] threads number will be
    ///   selected based on available CPU core number.
    /// * `cache_size` - Memory budget in bytes. Bounds shard size and merge memory.
    /// * `format` - Input files encoding.
    /// * `merge_log` - Merge log report location. If the parameter is [`None`] no report is written.
    /// * `text_output` - Whether the result is converted to decimal text.
    pub fn new(
        threads_number: Option<usize>,
        cache_size: usize,
        format: RecordFormat,
        merge_log: Option<&Path>,
        text_output: bool,
    ) -> Result<Self, PipelineError> {
        return Ok(Pipeline {
            scheduler: Scheduler::new(threads_number)?,
            cache_size: cache_size.max(2 * STRIDE),
            format,
            merge_log_path: merge_log.map(Into::into),
            text_output,
            stage: Stage::Idle,
            queue: Arc::new(WorkQueue::new()),
            merge_log: Arc::new(MergeLog::new()),
        });
    }

    /// Returns the current stage.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Returns the worker pool.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Sorts every regular file of `input_dir` into a single file.
    /// Subdirectories are skipped, inputs are left untouched.
    ///
    /// Failures on individual files are logged and counted in the report, the run goes on with the
    /// remaining data.
    pub fn run(&mut self, input_dir: &Path) -> Result<PipelineReport, PipelineError> {
        self.stage = Stage::Idle;
        self.queue.drain();
        self.merge_log.clear();

        let inputs = list_inputs(input_dir)?;
        log::info!("sorting {} files from {}", inputs.len(), input_dir.display());

        let mut timings = Vec::new();

        let start = Instant::now();
        self.stage = Stage::Splitting;
        let (shards, failed_inputs) = self.split(inputs)?;
        timings.push(self.stage_done(start));

        let start = Instant::now();
        self.stage = Stage::Sorting;
        let failed_shards = self.sort()?;
        timings.push(self.stage_done(start));

        let start = Instant::now();
        self.stage = Stage::Merging;
        let (merges, failed_merges) = self.merge()?;
        timings.push(self.stage_done(start));

        self.stage = Stage::Done;
        let (output, records) = self.finalize()?;

        if let Some(path) = &self.merge_log_path {
            self.merge_log.dump(path).map_err(PipelineError::MergeLog)?;
            log::info!("merge log written to {}", path.display());
        }

        return Ok(PipelineReport {
            output,
            records,
            shards,
            failed_inputs,
            failed_shards,
            failed_merges,
            merges,
            timings,
        });
    }

    fn stage_done(&self, start: Instant) -> (Stage, Duration) {
        let elapsed = start.elapsed();
        log::info!("{:?} stage time: {:.3}s", self.stage, elapsed.as_secs_f64());
        (self.stage, elapsed)
    }

    /// Splits every input on the pool and queues the produced shards in input order.
    fn split(&self, inputs: Vec<PathBuf>) -> Result<(usize, usize), PipelineError> {
        let mut handles = Vec::with_capacity(inputs.len());
        for input in inputs {
            let (cache_size, format) = (self.cache_size, self.format);
            let task_input = input.clone();
            let handle = self
                .scheduler
                .submit(move || split::split_file(&task_input, cache_size, format))?;
            handles.push((input, handle));
        }

        let mut shards = 0;
        let mut failed = 0;
        for (input, handle) in handles {
            match handle.wait() {
                Ok(Ok(paths)) => {
                    shards += paths.len();
                    self.queue.extend(paths);
                }
                Ok(Err(err)) => {
                    log::error!("{} not split: {}", input.display(), err);
                    failed += 1;
                }
                Err(err) => {
                    log::error!("{} split task failed: {}", input.display(), err);
                    failed += 1;
                }
            }
        }

        log::debug!("{} shards queued", shards);
        return Ok((shards, failed));
    }

    /// Sorts every queued shard on the pool and queues them back.
    /// A shard whose sort fails is left out of the queue.
    fn sort(&self) -> Result<usize, PipelineError> {
        let mut handles = Vec::new();
        for shard in self.queue.drain() {
            let format = self.format;
            let task_shard = shard.clone();
            let handle = self.scheduler.submit(move || sort::sort_shard(&task_shard, format))?;
            handles.push((shard, handle));
        }

        let mut failed = 0;
        for (shard, handle) in handles {
            match handle.wait() {
                Ok(Ok(sorted)) => self.queue.push(sorted),
                Ok(Err(err)) => {
                    log::error!("{} excluded from merge, sort failed: {}", shard.display(), err);
                    failed += 1;
                }
                Err(err) => {
                    log::error!("{} excluded from merge, sort task failed: {}", shard.display(), err);
                    failed += 1;
                }
            }
        }

        return Ok(failed);
    }

    /// Merges queued shards pairwise until a single one remains.
    ///
    /// Pairs are taken from the queue on the calling thread and merged on the pool. Merge tasks push
    /// their result back to the queue and then signal completion on a channel. When no pair is
    /// available the loop blocks on that channel; it ends once fewer than two shards are queued
    /// and the pool is quiescent.
    fn merge(&self) -> Result<(usize, usize), PipelineError> {
        let (done_sender, done_receiver) = unbounded::<bool>();
        let mut in_flight = 0usize;
        let mut merges = 0usize;
        let mut failed = 0usize;

        loop {
            if let Some((left, right)) = self.queue.pop_pair() {
                if left == right {
                    // never happens while ownership goes through the queue only
                    log::error!("invariant violation: {} dequeued twice for a single merge", left.display());
                    self.queue.push(left);
                    continue;
                }

                let queue = Arc::clone(&self.queue);
                let merge_log = Arc::clone(&self.merge_log);
                let mut done = MergeSignal::new(done_sender.clone());
                let budget = self.cache_size;
                let (task_left, task_right) = (left.clone(), right.clone());

                let submitted = self.scheduler.submit(move || {
                    let result = merger::merge_shards(&task_left, &task_right, budget, &queue, &merge_log);
                    if let Err(err) = &result {
                        log::error!(
                            "{} and {} excluded from merge: {}",
                            task_left.display(),
                            task_right.display(),
                            err
                        );
                    }
                    done.succeeded = result.is_ok();
                });

                match submitted {
                    // completion is observed through the channel only
                    Ok(_handle) => in_flight += 1,
                    Err(err) => {
                        self.queue.extend(vec![left, right]);
                        return Err(err.into());
                    }
                }
                continue;
            }

            if in_flight == 0 {
                if self.scheduler.quiescent() {
                    break;
                }
                // last merge signalled but its task is not finished yet
                thread::yield_now();
                continue;
            }

            match done_receiver.recv() {
                Ok(succeeded) => {
                    in_flight -= 1;
                    if succeeded {
                        merges += 1;
                    } else {
                        failed += 1;
                    }
                }
                Err(_) => break,
            }
        }

        log::debug!("{} merges done, {} failed", merges, failed);
        return Ok((merges, failed));
    }

    /// Takes the result out of the queue and converts it to text if requested.
    fn finalize(&self) -> Result<(Option<PathBuf>, u64), PipelineError> {
        let result = match self.queue.pop() {
            Some(result) => result,
            None => {
                log::warn!("no data sorted");
                return Ok((None, 0));
            }
        };

        let records = fs::metadata(&result)
            .map_err(|err| PipelineError::Finalize(ShardError::open(&result, err)))?
            .len()
            / STRIDE as u64;

        if !self.text_output {
            log::info!("sorted {} records into {}", records, result.display());
            return Ok((Some(result), records));
        }

        let transcript = write_transcript(&result, self.cache_size).map_err(PipelineError::Finalize)?;
        fs::remove_file(&result).map_err(|err| PipelineError::Finalize(ShardError::IO(err)))?;
        log::info!("sorted {} records into {}", records, transcript.display());

        return Ok((Some(transcript), records));
    }
}

/// Merge completion notice, sent when dropped so that a panicking merge is reported as failed.
struct MergeSignal {
    sender: Sender<bool>,
    succeeded: bool,
}

impl MergeSignal {
    fn new(sender: Sender<bool>) -> Self {
        MergeSignal {
            sender,
            succeeded: false,
        }
    }
}

impl Drop for MergeSignal {
    fn drop(&mut self) {
        let _ = self.sender.send(self.succeeded);
    }
}

/// Lists regular files of a directory in name order.
fn list_inputs(input_dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let mut inputs = Vec::new();
    for entry in fs::read_dir(input_dir).map_err(PipelineError::InputDir)? {
        let entry = entry.map_err(PipelineError::InputDir)?;
        let path = entry.path();
        if path.is_dir() {
            log::debug!("skipping directory {}", path.display());
            continue;
        }
        inputs.push(path);
    }

    inputs.sort();
    return Ok(inputs);
}

/// Writes a decimal text copy of a binary record file as `<stem>t<extension>` beside it.
/// Returns the text file path.
pub fn write_transcript(path: &Path, window_size: usize) -> Result<PathBuf, ShardError> {
    let source = fs::File::open(path).map_err(|err| ShardError::open(path, err))?;
    let transcript = split::with_stem_suffix(path, "t");
    let output = fs::File::create(&transcript).map_err(|err| ShardError::open(&transcript, err))?;

    let mut window = RecordWindow::new(source, window_size);
    let mut writer = io::BufWriter::new(output);
    let mut text = Vec::with_capacity(window.limit() * 3);

    while window.refill()? > 0 {
        text.clear();
        record::format_text(window.remaining(), &mut text);
        writer.write_all(&text)?;
    }
    writer.flush()?;

    return Ok(transcript);
}
