//! Command-line front end for the filepress engine.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;
use std::io::Write;
use std::path::Path;

use filepress::cli::{Cli, Command};
use filepress::{Archiver, ProgressTracker, ZipFileEntry};

/// Application entry point.
///
/// Parses the command line, configures logging, and runs the selected
/// subcommand against an [`Archiver`] built from the CLI settings.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level());

    let archiver = Archiver::new(cli.settings());

    match &cli.command {
        Command::Compress {
            source,
            destination,
            format,
        } => {
            // Drive the progress bar from the tracker callbacks
            let bar = progress_bar(cli.is_quiet());
            let mut tracker = tracker_for(&bar);
            let result = archiver
                .compress_with_progress(source, destination, format, &mut tracker)
                .await;
            bar.finish_and_clear();
            result.with_context(|| format!("compression of '{}' failed", source.display()))?;

            // Report original vs. output size
            if !cli.is_quiet() {
                let output = tokio::fs::metadata(destination).await?.len();
                report_sizes(tracker.total_size(), output);
            }
        }
        Command::Extract {
            archive,
            destination,
        } => {
            let bar = progress_bar(cli.is_quiet());
            let mut tracker = tracker_for(&bar);
            let result = archiver
                .extract_with_progress(archive, destination, &mut tracker)
                .await;
            bar.finish_and_clear();
            result.with_context(|| format!("extraction of '{}' failed", archive.display()))?;

            if !cli.is_quiet() {
                println!(
                    "Extracted {} into {}",
                    format_size(tracker.total_size()),
                    destination.display()
                );
            }
        }
        Command::List { archive, long } => {
            // Listing reads only the Central Directory
            let entries = archiver.list(archive).await?;
            list_entries(archive, &entries, *long);
        }
    }

    Ok(())
}

/// `[LEVEL] message` lines on stderr; `RUST_LOG` overrides the CLI level.
fn init_logging(level: LevelFilter) {
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()))
        .init();
}

fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.blue} [{elapsed_precise}] {wide_bar:.cyan/blue} {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
    ) {
        bar.set_style(style.progress_chars("#>-"));
    }
    bar
}

fn tracker_for(bar: &ProgressBar) -> ProgressTracker {
    let bar = bar.clone();
    ProgressTracker::new(move |written, total| {
        bar.set_length(total);
        bar.set_position(written);
    })
}

fn report_sizes(original: u64, output: u64) {
    println!("Original size: {}", format_size(original));
    println!("Output size:   {}", format_size(output));
    if original > 0 {
        let saved = 100.0 - (output as f64 * 100.0 / original as f64);
        println!("Saved:         {:.1}%", saved);
    }
}

/// Print the archive contents.
///
/// Supports two output formats:
/// - Short: just entry names, one per line
/// - Long (`list -l`): a table with sizes, ratio and DOS timestamp per entry
///   and a totals line
///
/// # Arguments
///
/// * `archive` - Path shown in the table header
/// * `entries` - Entries in Central Directory order
/// * `long` - Whether to print the table form
fn list_entries(archive: &Path, entries: &[ZipFileEntry], long: bool) {
    if !long {
        for entry in entries {
            println!("{}", entry.file_name);
        }
        return;
    }

    println!("Archive: {}", archive.display());
    println!(
        "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  Name",
        "Length", "Size", "Cmpr", "Date", "Time"
    );
    println!("{}", "-".repeat(70));

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    // Print each entry
    for entry in entries {
        let (year, month, day) = entry.mod_date();
        let (hour, minute, _second) = entry.mod_time();
        println!(
            "{:>10}  {:>10}  {}  {:04}-{:02}-{:02}  {:02}:{:02}  {}",
            entry.uncompressed_size,
            entry.compressed_size,
            ratio(entry.compressed_size, entry.uncompressed_size),
            year,
            month,
            day,
            hour,
            minute,
            entry.file_name
        );

        // Directories don't count towards totals
        if !entry.is_directory {
            total_uncompressed += entry.uncompressed_size;
            total_compressed += entry.compressed_size;
            file_count += 1;
        }
    }

    // Print summary
    println!("{}", "-".repeat(70));
    println!(
        "{:>10}  {:>10}  {}  {:>21}  {} files",
        total_uncompressed,
        total_compressed,
        ratio(total_compressed, total_uncompressed),
        "",
        file_count
    );
}

/// Space saved as a right-aligned percentage; stored data larger than the
/// original shows as 0%.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed == 0 {
        return "  0%".to_string();
    }
    let saved = 100u64.saturating_sub(compressed.saturating_mul(100) / uncompressed);
    format!("{:>4}%", saved)
}

fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
