use anyhow;
use clap;
use csv;
use env_logger;
use num_cpus;
use rayon;

use itertools::Itertools;
use jvm_hprof_slurp::{Decoder, DecoderConfig, SlurpResult};
use rayon::prelude::*;
use std::{io, path};

fn main() -> Result<(), anyhow::Error> {
    env_logger::init();

    let app = clap::App::new("Slurp hprof")
        .arg(
            clap::Arg::with_name("file")
                .short("f")
                .long("file")
                .required(true)
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .help("Heap dump file to read. May be repeated; files are decoded in parallel."),
        )
        .arg(
            clap::Arg::with_name("threads")
                .short("t")
                .long("threads")
                .required(false)
                .takes_value(true)
                .help("Number of files to decode at once. Defaults to 4 or the number of cores, whichever is smaller."),
        )
        .arg(
            clap::Arg::with_name("chunk-size")
                .long("chunk-size")
                .required(false)
                .takes_value(true)
                .help("Bytes to read from the file at a time"),
        )
        .subcommand(clap::SubCommand::with_name("header")
            .about("Display metadata from the hprof header"))
        .subcommand(clap::SubCommand::with_name("record-counts")
            .about("Display the number of each of the top level hprof record types"))
        .subcommand(
            clap::SubCommand::with_name("top")
                .about("Display the classes and array types using the most memory as CSV")
                .arg(
                    clap::Arg::with_name("count")
                        .short("n")
                        .long("count")
                        .help("how many entries to show per file")
                        .required(false)
                        .default_value("20")
                        .takes_value(true),
                ),
        );
    let matches = app.get_matches();

    let files = matches
        .values_of("file")
        .map(|values| values.map(path::PathBuf::from).collect::<Vec<_>>())
        .unwrap_or_default();

    let threads = matches
        .value_of("threads")
        .map(|s| s.parse::<usize>())
        .transpose()?
        .unwrap_or_else(|| {
            let cores = num_cpus::get();

            // each decode is I/O bound on its own file, so more threads than disks rarely helps
            std::cmp::min(cores, 4)
        });

    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()?;

    let mut config = DecoderConfig::new();
    if let Some(chunk_size) = matches
        .value_of("chunk-size")
        .map(|s| s.parse::<usize>())
        .transpose()?
    {
        config = config.with_chunk_size(chunk_size);
    }
    let decoder = Decoder::new(config);

    // one decode per file; within a file the record framing forces a sequential pass
    let results = files
        .par_iter()
        .map(|f| (f, decoder.decode_file(f)))
        .collect::<Vec<_>>();

    for (file, result) in results {
        let result = result.map_err(|e| anyhow::anyhow!("{}: {}", file.display(), e))?;

        match matches.subcommand() {
            ("header", _) => header(file, &result),
            ("record-counts", _) => record_counts(file, &result),
            ("top", arg_matches) => {
                let count = arg_matches
                    .and_then(|m| m.value_of("count"))
                    .map(|s| s.parse::<usize>())
                    .transpose()?
                    .unwrap_or(20);
                top_entries(file, &result, count)?
            }
            _ => summary(file, &result),
        };
    }

    Ok(())
}

fn header(file: &path::Path, result: &SlurpResult) {
    println!("File: {}", file.display());
    println!(
        "Label: {}",
        result.header().label().unwrap_or("(invalid UTF-8)")
    );
    println!("Id size: {:?}", result.header().id_size());
    match result.header().timestamp() {
        Some(ts) => println!("Timestamp: {}", ts),
        None => println!("Timestamp: {} ms", result.header().timestamp_millis()),
    }
}

fn record_counts(file: &path::Path, result: &SlurpResult) {
    println!("File: {}", file.display());

    // highest count on top
    for (tag, count) in result
        .stats()
        .record_counts()
        .into_iter()
        .sorted_by_key(|&(_, count)| std::cmp::Reverse(count))
    {
        println!("{:?}: {}", tag, count);
    }
    println!("Unknown: {}", result.stats().unknown_records());

    for (tag, count) in result
        .stats()
        .sub_record_counts()
        .into_iter()
        .filter(|&(_, count)| count > 0)
    {
        println!("  {:?}: {}", tag, count);
    }
}

fn top_entries(file: &path::Path, result: &SlurpResult, count: usize) -> Result<(), anyhow::Error> {
    let mut wtr = csv::Writer::from_writer(io::stdout());
    wtr.write_record(&[
        "File",
        "Kind",
        "Name",
        "Count",
        "Largest size estimate (bytes)",
        "Total size estimate (bytes)",
    ])?;

    for entry in result.entries_by_total_size().into_iter().take(count) {
        wtr.write_record(&[
            file.display().to_string(),
            entry.kind().to_string(),
            entry.name().unwrap_or("(unknown)").to_string(),
            entry.count().to_string(),
            entry.largest_size_estimate().to_string(),
            entry.total_size_estimate().to_string(),
        ])?;
    }

    wtr.flush()?;

    Ok(())
}

fn summary(file: &path::Path, result: &SlurpResult) {
    println!(
        "{}: {} entries, {} bytes estimated, {} classes",
        file.display(),
        result.entries().len(),
        result.total_size_estimate(),
        result.stats().class_dumps()
    );
}
