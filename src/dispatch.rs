//! Job entry points.
//!
//! [`Archiver`] validates a request, picks the pipeline for the requested
//! format and drives the progress tracker around it. The free functions at
//! the bottom run with default [`Settings`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs;

use crate::archive;
use crate::config::Settings;
use crate::error::{Error, IoContext, Result};
use crate::io::{ProgressTracker, blocking};
use crate::pdf::PdfOptimizer;
use crate::raster::{self, RasterFormat};
use crate::zip::ZipFileEntry;

/// Output formats with a working pipeline.
///
/// Any other name parses to [`Error::UnsupportedFormat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Zip,
    Png,
    Jpeg,
    Pdf,
}

impl Format {
    pub fn name(self) -> &'static str {
        match self {
            Format::Zip => "zip",
            Format::Png => "png",
            Format::Jpeg => "jpeg",
            Format::Pdf => "pdf",
        }
    }

    /// Archive format for extraction, inferred from the archive's extension.
    pub fn for_archive(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "zip" => Ok(Format::Zip),
            "" => Err(Error::UnsupportedFormat(format!(
                "'{}' has no extension",
                path.display()
            ))),
            _ => Err(Error::UnsupportedFormat(ext)),
        }
    }

    /// Whether `path` carries an extension this format can process.
    fn accepts_source(self, path: &Path) -> bool {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match self {
            Format::Zip => true,
            Format::Png => ext == "png",
            Format::Jpeg => ext == "jpg" || ext == "jpeg",
            Format::Pdf => ext == "pdf",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Format {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "zip" => Ok(Format::Zip),
            "png" => Ok(Format::Png),
            "jpg" | "jpeg" => Ok(Format::Jpeg),
            "pdf" => Ok(Format::Pdf),
            _ => Err(Error::UnsupportedFormat(s.to_string())),
        }
    }
}

/// A validated compression request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressionJob {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub format: Format,
    pub is_dir: bool,
}

impl CompressionJob {
    /// Check that `source` exists, that `format` is supported, and that the
    /// source matches the format. Touches nothing on disk.
    pub async fn new(source: &Path, destination: &Path, format: &str) -> Result<Self> {
        let metadata = fs::metadata(source).await.map_err(|e| Error::Path {
            path: source.to_path_buf(),
            source: e,
        })?;
        let format: Format = format.parse()?;

        if !format.accepts_source(source) || (format != Format::Zip && metadata.is_dir()) {
            return Err(Error::FormatMismatch {
                path: source.to_path_buf(),
                format,
            });
        }

        Ok(Self {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            format,
            is_dir: metadata.is_dir(),
        })
    }
}

/// Runs compression and extraction jobs with a fixed [`Settings`].
#[derive(Debug, Clone, Default)]
pub struct Archiver {
    settings: Settings,
}

impl Archiver {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub async fn compress(&self, source: &Path, dest: &Path, format: &str) -> Result<()> {
        self.compress_with_progress(source, dest, format, &mut ProgressTracker::silent())
            .await
    }

    /// Compress `source` into `dest` as `format`, reporting to `tracker`.
    ///
    /// The tracker's total is set before any output is written and the job
    /// is marked complete on success.
    pub async fn compress_with_progress(
        &self,
        source: &Path,
        dest: &Path,
        format: &str,
        tracker: &mut ProgressTracker,
    ) -> Result<()> {
        let job = CompressionJob::new(source, dest, format).await?;
        log::debug!("compressing {:?}", job);

        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.at(parent)?;
        }

        match job.format {
            Format::Zip => {
                let files = archive::scan_source(&job.source, job.is_dir, dest).await?;
                tracker.set_total_size(archive::total_size(&files));
                archive::write_zip(
                    &files,
                    dest,
                    tracker,
                    self.settings.write_buffer_size,
                )
                .await?;
            }
            Format::Png | Format::Jpeg => {
                let size = fs::metadata(source).await.at(source)?.len();
                tracker.set_total_size(size);
                let kind = if job.format == Format::Png {
                    RasterFormat::Png
                } else {
                    RasterFormat::Jpeg
                };
                let policy = self.settings.raster.clone();
                let (src, dst) = (job.source.clone(), dest.to_path_buf());
                blocking(source, move || raster::reencode(&src, &dst, kind, &policy)).await?;
            }
            Format::Pdf => {
                let size = fs::metadata(source).await.at(source)?.len();
                tracker.set_total_size(size);
                PdfOptimizer::new(&self.settings.pdf, &self.settings.raster)
                    .optimize(source, dest)
                    .await?;
            }
        }

        tracker.set_complete();
        Ok(())
    }

    pub async fn extract(&self, archive: &Path, dest: &Path) -> Result<()> {
        self.extract_with_progress(archive, dest, &mut ProgressTracker::silent())
            .await
    }

    /// Unpack `archive` below `dest`, which is created when missing.
    pub async fn extract_with_progress(
        &self,
        archive: &Path,
        dest: &Path,
        tracker: &mut ProgressTracker,
    ) -> Result<()> {
        fs::metadata(archive).await.map_err(|e| Error::Path {
            path: archive.to_path_buf(),
            source: e,
        })?;

        match Format::for_archive(archive)? {
            Format::Zip => {
                archive::extract_zip(archive, dest, tracker, self.settings.extract_buffer_size)
                    .await?;
            }
            other => return Err(Error::UnsupportedFormat(other.to_string())),
        }

        tracker.set_complete();
        Ok(())
    }

    /// Entries of a ZIP archive.
    pub async fn list(&self, archive: &Path) -> Result<Vec<ZipFileEntry>> {
        fs::metadata(archive).await.map_err(|e| Error::Path {
            path: archive.to_path_buf(),
            source: e,
        })?;
        match Format::for_archive(archive)? {
            Format::Zip => archive::list_zip(archive).await,
            other => Err(Error::UnsupportedFormat(other.to_string())),
        }
    }
}

pub async fn compress(source: &Path, dest: &Path, format: &str) -> Result<()> {
    Archiver::default().compress(source, dest, format).await
}

pub async fn compress_with_progress(
    source: &Path,
    dest: &Path,
    format: &str,
    tracker: &mut ProgressTracker,
) -> Result<()> {
    Archiver::default()
        .compress_with_progress(source, dest, format, tracker)
        .await
}

pub async fn extract(archive: &Path, dest: &Path) -> Result<()> {
    Archiver::default().extract(archive, dest).await
}

pub async fn extract_with_progress(
    archive: &Path,
    dest: &Path,
    tracker: &mut ProgressTracker,
) -> Result<()> {
    Archiver::default()
        .extract_with_progress(archive, dest, tracker)
        .await
}
