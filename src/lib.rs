//! # filepress
//!
//! File compression engine: ZIP archives at maximum DEFLATE effort, lossy
//! PNG/JPEG re-encoding, and PDF optimization with an external Ghostscript
//! tier and an in-process `lopdf` fallback.
//!
//! ## Features
//!
//! - Compress a file or directory tree into a ZIP archive (ZIP64 when needed)
//! - Extract ZIP archives with CRC verification and path-traversal rejection
//! - Downsample and re-encode PNG and JPEG images in place or to a new file
//! - Shrink PDFs, keeping the original when optimization would grow it
//! - Byte-level progress reporting through a caller-supplied observer
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use filepress::{Archiver, ProgressTracker};
//!
//! #[tokio::main]
//! async fn main() -> filepress::Result<()> {
//!     let archiver = Archiver::default();
//!
//!     let mut tracker = ProgressTracker::new(|written, total| {
//!         println!("{written}/{total}");
//!     });
//!     archiver
//!         .compress_with_progress(Path::new("photos"), Path::new("photos.zip"), "zip", &mut tracker)
//!         .await?;
//!
//!     archiver.extract(Path::new("photos.zip"), Path::new("restored")).await?;
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod io;
pub mod pdf;
pub mod raster;
pub mod sanitize;
pub mod zip;

pub use config::{PdfOptimizationConfig, PdfPolicy, RasterPolicy, Settings};
pub use dispatch::{
    Archiver, CompressionJob, Format, compress, compress_with_progress, extract,
    extract_with_progress,
};
pub use error::{Error, PdfStage, Result};
pub use io::{LocalFileReader, ProgressTracker, ProgressWriter, ReadAt};
pub use zip::{ZipExtractor, ZipFileEntry};
