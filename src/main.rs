use std::path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use shard_sort::{PipelineBuilder, RecordFormat};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let input_dir = arg_parser.value_of("input_dir").expect("value has a default");
    let cache_size_kb: u64 = arg_parser.value_of_t_or_exit("cache_size");
    let threads: Option<usize> = arg_parser
        .is_present("threads")
        .then(|| arg_parser.value_of_t_or_exit("threads"));
    let merge_log = arg_parser.value_of("merge_log").expect("value has a default");

    let cache_size = ByteSize::kib(cache_size_kb);
    log::info!("cache size: {}", cache_size);

    let mut pipeline_builder = PipelineBuilder::new()
        .with_cache_size(cache_size.as_u64() as usize)
        .with_merge_log(path::Path::new(merge_log))
        .with_text_output(!arg_parser.is_present("keep_binary"));

    if let Some(threads) = threads {
        pipeline_builder = pipeline_builder.with_threads_number(threads);
    }

    if arg_parser.is_present("binary") {
        pipeline_builder = pipeline_builder.with_format(RecordFormat::Binary);
    }

    let mut pipeline = match pipeline_builder.build() {
        Ok(pipeline) => pipeline,
        Err(err) => {
            log::error!("pipeline initialization error: {}", err);
            process::exit(1);
        }
    };

    let report = match pipeline.run(path::Path::new(input_dir)) {
        Ok(report) => report,
        Err(err) => {
            log::error!("data sorting error: {}", err);
            process::exit(1);
        }
    };

    if !report.is_complete() {
        log::warn!(
            "result is incomplete: {} inputs, {} shards and {} merges failed",
            report.failed_inputs,
            report.failed_shards,
            report.failed_merges
        );
    }

    match report.output {
        Some(output) => log::info!("{} records sorted into {}", report.records, output.display()),
        None => log::info!("nothing to sort in {}", input_dir),
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("shard-sort")
        .about("out-of-core integer file sorter")
        .arg(
            clap::Arg::new("input_dir")
                .index(1)
                .help("directory whose files are sorted")
                .default_value("./"),
        )
        .arg(
            clap::Arg::new("cache_size")
                .index(2)
                .help("memory budget in KB, bounds shard size and merge buffers")
                .default_value("512")
                .validator(|v| match v.parse::<u64>() {
                    Ok(0) => Err("Cache size must be positive".to_string()),
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Cache size format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .arg(
            clap::Arg::new("threads")
                .short('t')
                .long("threads")
                .help("number of worker threads")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("merge_log")
                .short('m')
                .long("merge-log")
                .help("merge log report location")
                .takes_value(true)
                .default_value("merge.log"),
        )
        .arg(
            clap::Arg::new("binary")
                .short('b')
                .long("binary")
                .help("input files hold binary records instead of decimal text"),
        )
        .arg(
            clap::Arg::new("keep_binary")
                .long("keep-binary")
                .help("keep the binary result instead of converting it to text"),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
