use clap::{ArgAction, Parser, Subcommand};
use log::LevelFilter;
use std::path::PathBuf;

use crate::config::Settings;

#[derive(Parser, Debug)]
#[command(name = "filepress")]
#[command(version)]
#[command(about = "Compress files and folders into ZIP archives, shrink images and PDFs", long_about = None)]
#[command(after_help = "Examples:\n  \
  filepress compress photos/ photos.zip          archive a folder at maximum compression\n  \
  filepress compress scan.pdf small.pdf pdf      optimize a PDF\n  \
  filepress extract photos.zip restored/         unpack an archive\n  \
  filepress list -l photos.zip                   show sizes and ratios")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Quiet mode: no progress bar or summary, errors only
    #[arg(short = 'q', action = ArgAction::Count, global = true)]
    pub quiet: u8,

    /// More log output (-vv for trace)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Ghostscript binary used for PDF optimization
    #[arg(long, env = "FILEPRESS_GHOSTSCRIPT", value_name = "PATH", global = true)]
    pub ghostscript: Option<PathBuf>,

    /// Skip Ghostscript and optimize PDFs in-process only
    #[arg(long, global = true)]
    pub no_ghostscript: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compress a file or directory
    Compress {
        /// File or directory to compress
        source: PathBuf,
        /// Output file
        destination: PathBuf,
        /// zip, png, jpg/jpeg or pdf
        #[arg(default_value = "zip")]
        format: String,
    },

    /// Extract an archive into a directory
    Extract {
        archive: PathBuf,
        /// Created if missing
        destination: PathBuf,
    },

    /// List the entries of an archive
    List {
        archive: PathBuf,

        /// Show sizes, ratios and timestamps
        #[arg(short = 'l', long)]
        long: bool,
    },
}

impl Cli {
    pub fn is_quiet(&self) -> bool {
        self.quiet > 0
    }

    /// Log level from the flags; `RUST_LOG` still takes precedence.
    pub fn log_level(&self) -> LevelFilter {
        if self.is_quiet() {
            return LevelFilter::Error;
        }
        match self.verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    pub fn settings(&self) -> Settings {
        let mut settings = Settings::default();
        if self.no_ghostscript {
            settings.pdf.ghostscript = None;
        } else if let Some(program) = &self.ghostscript {
            settings.pdf.ghostscript = Some(program.clone());
        }
        settings
    }
}
