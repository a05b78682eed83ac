use std::path;
use std::process;
use std::time::Instant;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use ext_merge_sort::format::VALUE_SIZE;
use ext_merge_sort::{DualSorter, ExternalSorterBuilder, Format, SortError};

fn main() {
    let arg_parser = parse_args();
    let (command, args) = arg_parser.subcommand().expect("subcommand is required");

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let builder = match build_sorter(&arg_parser, args) {
        Ok(builder) => builder,
        Err(err) => {
            log::error!("sorter configuration error: {}", err);
            process::exit(1);
        }
    };
    let format: FormatArg = args.value_of_t_or_exit("format");
    let output = path::Path::new(args.value_of("output").expect("value is required"));

    let started = Instant::now();
    let result = match command {
        "pair" => sort_pair(args, builder, output, format.into()),
        _ => sort_single(args, builder, output, format.into()),
    };

    match result {
        Ok(values) => {
            println!(
                "Sorted {} numbers in {:.3} seconds.",
                values,
                started.elapsed().as_secs_f64()
            );
            println!("Output written to {}", output.display());
        }
        Err(err) => {
            log::error!("data sorting error: {}", err);
            process::exit(1);
        }
    }
}

fn sort_pair(
    args: &clap::ArgMatches,
    builder: ExternalSorterBuilder,
    output: &path::Path,
    format: Format,
) -> Result<u64, SortError> {
    let first = path::Path::new(args.value_of("first").expect("value is required"));
    let second = path::Path::new(args.value_of("second").expect("value is required"));

    let sorter = DualSorter::new(&builder)?;
    let stats = sorter.sort_files(first, second, output, format)?;

    return Ok(stats.values());
}

fn sort_single(
    args: &clap::ArgMatches,
    builder: ExternalSorterBuilder,
    output: &path::Path,
    format: Format,
) -> Result<u64, SortError> {
    let input = path::Path::new(args.value_of("input").expect("value is required"));

    let sorter = builder.build()?;
    let stats = sorter.sort_file(input, output, format)?;

    return Ok(stats.values);
}

/// Builds the sorter configuration from global options and the positional M and N of a subcommand.
fn build_sorter(globals: &clap::ArgMatches, args: &clap::ArgMatches) -> Result<ExternalSorterBuilder, String> {
    let block_size: usize = args.value_of_t("block_size").map_err(|err| err.to_string())?;
    let blocks_number: usize = args.value_of_t("blocks_number").map_err(|err| err.to_string())?;

    let mut sorter_builder = ExternalSorterBuilder::new()
        .with_block_size(block_size)
        .with_blocks_number(blocks_number);

    if globals.is_present("threads") {
        let threads: usize = globals.value_of_t("threads").map_err(|err| err.to_string())?;
        sorter_builder = sorter_builder.with_threads_number(threads);
    }

    if let Some(tmp_dir) = globals.value_of("tmp_dir") {
        sorter_builder = sorter_builder.with_tmp_dir(path::Path::new(tmp_dir));
    }

    if let Some(read_buffer) = globals.value_of("read_buffer") {
        let read_buffer: ByteSize = read_buffer.parse()?;
        sorter_builder = sorter_builder.with_read_buffer(read_buffer.as_u64() as usize / VALUE_SIZE);
    }

    return Ok(sorter_builder);
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

#[derive(Copy, Clone, clap::ArgEnum)]
enum FormatArg {
    Binary,
    Text,
}

impl FormatArg {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        FormatArg::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for FormatArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <FormatArg as clap::ArgEnum>::from_str(s, false)
    }
}

impl From<FormatArg> for Format {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Binary => Format::Binary,
            FormatArg::Text => Format::Text,
        }
    }
}

/// Parses command line arguments. Usage errors terminate the process with exit code 1.
fn parse_args() -> clap::ArgMatches {
    match build_arg_parser().try_get_matches() {
        Ok(matches) => matches,
        // help and version requests
        Err(err) if !err.use_stderr() => err.exit(),
        Err(err) => {
            let _ = err.print();
            process::exit(1);
        }
    }
}

fn build_arg_parser() -> clap::App<'static> {
    let pair = clap::App::new("pair")
        .about("sorts two text files into a single one")
        .arg(positional("first", 1, "first file to be sorted"))
        .arg(positional("second", 2, "second file to be sorted"))
        .arg(positional("output", 3, "result file"))
        .arg(positive_positional("block_size", 4, "M", "numbers per block"))
        .arg(positive_positional("blocks_number", 5, "N", "blocks per batch, sorted in parallel"))
        .arg(format_arg("text"));

    let single = clap::App::new("single")
        .about("sorts a binary file")
        .arg(positional("input", 1, "file to be sorted"))
        .arg(positional("output", 2, "result file"))
        .arg(positive_positional("block_size", 3, "M", "numbers per block"))
        .arg(positive_positional("blocks_number", 4, "N", "blocks per batch, sorted in parallel"))
        .arg(format_arg("binary"));

    clap::App::new("ext-merge-sort")
        .about("bounded memory external merge sort of unsigned 32-bit integers")
        .setting(clap::AppSettings::SubcommandRequiredElseHelp)
        .subcommand(pair)
        .subcommand(single)
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .global(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .arg(
            clap::Arg::new("threads")
                .short('t')
                .long("threads")
                .help("number of threads to use for parallel sorting, defaults to N")
                .takes_value(true)
                .global(true)
                .validator(parse_positive),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store temporary data, defaults to the output directory")
                .takes_value(true)
                .global(true),
        )
        .arg(
            clap::Arg::new("read_buffer")
                .short('r')
                .long("read-buffer")
                .help("run read buffer size")
                .takes_value(true)
                .global(true)
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(size) if size.as_u64() >= VALUE_SIZE as u64 => Ok(()),
                    Ok(size) => Err(format!("Read buffer must hold at least one number, got {}", size)),
                    Err(err) => Err(format!("Read buffer size format incorrect: {}", err)),
                }),
        )
}

fn positional(name: &'static str, index: usize, help: &'static str) -> clap::Arg<'static> {
    clap::Arg::new(name).help(help).required(true).index(index)
}

fn positive_positional(
    name: &'static str,
    index: usize,
    value_name: &'static str,
    help: &'static str,
) -> clap::Arg<'static> {
    positional(name, index, help).value_name(value_name).validator(parse_positive)
}

fn format_arg(default: &'static str) -> clap::Arg<'static> {
    clap::Arg::new("format")
        .short('f')
        .long("format")
        .help("input and output file format")
        .takes_value(true)
        .default_value(default)
        .possible_values(FormatArg::possible_values())
}

fn parse_positive(v: &str) -> Result<usize, String> {
    match v.parse::<usize>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(format!("must be a positive integer, got '{}'", v)),
    }
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
