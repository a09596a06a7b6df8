use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use crate::dispatch::Format;

/// Stage of the PDF fallback pipeline that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdfStage {
    /// Creating scratch space before the library tier runs.
    Setup,
    /// Pulling embedded raster images out of the source document.
    ImageExtraction,
    /// Structural optimization from the source into the intermediate file.
    FirstPass,
    /// Structural optimization from the intermediate file into the destination.
    FinalPass,
    /// Comparing and settling the final output.
    Finalize,
}

impl fmt::Display for PdfStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PdfStage::Setup => "setup",
            PdfStage::ImageExtraction => "image extraction",
            PdfStage::FirstPass => "first optimization pass",
            PdfStage::FinalPass => "final optimization pass",
            PdfStage::Finalize => "finalize",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("source path error: '{path}': {source}")]
    Path { path: PathBuf, source: io::Error },

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("source file '{path}' is not a {format} file")]
    FormatMismatch { path: PathBuf, format: Format },

    #[error("illegal file path: entry '{entry}' resolves outside '{root}'")]
    IllegalPath { entry: String, root: PathBuf },

    #[error("I/O error on '{path}': {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("PDF optimization failed during {stage}: {message}")]
    Optimization { stage: PdfStage, message: String },

    #[error("invalid ZIP archive: {0}")]
    InvalidArchive(String),

    #[error("failed to process image '{path}': {source}")]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Attaches the offending path to raw I/O errors.
pub(crate) trait IoContext<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|source| Error::Io {
            path: path.as_ref().to_path_buf(),
            source,
        })
    }
}
