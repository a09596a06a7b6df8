//! Fixed compression policy.
//!
//! None of these values are tuned per job; they are grouped here so a caller
//! embedding the engine can override them without touching the pipelines.

use image::codecs::png::CompressionType;
use image::imageops::FilterType;
use std::path::PathBuf;

/// Write buffer for streaming files into an archive.
pub const ARCHIVE_WRITE_BUFFER: usize = 4 * 1024 * 1024;
/// Read/inflate buffer for extraction; small enough for fine-grained progress.
pub const EXTRACT_BUFFER: usize = 32 * 1024;

#[derive(Debug, Clone)]
pub struct Settings {
    pub raster: RasterPolicy,
    pub pdf: PdfPolicy,
    pub write_buffer_size: usize,
    pub extract_buffer_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            raster: RasterPolicy::default(),
            pdf: PdfPolicy::default(),
            write_buffer_size: ARCHIVE_WRITE_BUFFER,
            extract_buffer_size: EXTRACT_BUFFER,
        }
    }
}

/// Tiered downsampling and re-encoding parameters for PNG/JPEG.
#[derive(Debug, Clone)]
pub struct RasterPolicy {
    /// Images with either side above this are scaled by `large_scale_percent`.
    pub large_threshold: u32,
    pub large_scale_percent: u32,
    /// Images with either side above this are scaled by `medium_scale_percent`.
    pub medium_threshold: u32,
    pub medium_scale_percent: u32,
    pub filter: FilterType,
    pub png_compression: CompressionType,
    /// 1..=100; lower is smaller.
    pub jpeg_quality: u8,
}

impl Default for RasterPolicy {
    fn default() -> Self {
        Self {
            large_threshold: 1000,
            large_scale_percent: 70,
            medium_threshold: 500,
            medium_scale_percent: 80,
            filter: FilterType::CatmullRom,
            png_compression: CompressionType::Best,
            jpeg_quality: 1,
        }
    }
}

/// Settings for the structural PDF rewrite passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdfOptimizationConfig {
    /// Emit a PDF 1.5 header so newer structures are allowed.
    pub reader15: bool,
    /// Compress every eligible stream and drop unreferenced objects.
    pub write_object_streams: bool,
    /// Write the cross-reference section as a compressed stream.
    pub write_xref_streams: bool,
}

impl PdfOptimizationConfig {
    pub const fn high_compression() -> Self {
        Self {
            reader15: true,
            write_object_streams: true,
            write_xref_streams: true,
        }
    }
}

impl Default for PdfOptimizationConfig {
    fn default() -> Self {
        Self::high_compression()
    }
}

#[derive(Debug, Clone)]
pub struct PdfPolicy {
    /// External optimizer; `None` skips the external tier.
    pub ghostscript: Option<PathBuf>,
    /// Target resolution for downsampled images in the external tier.
    pub resolution_dpi: u32,
    pub compatibility_level: String,
    pub optimization: PdfOptimizationConfig,
    /// Keep the source bytes when optimization would grow the file.
    pub keep_smaller: bool,
}

impl Default for PdfPolicy {
    fn default() -> Self {
        Self {
            ghostscript: Some(PathBuf::from("gs")),
            resolution_dpi: 72,
            compatibility_level: "1.4".to_string(),
            optimization: PdfOptimizationConfig::high_compression(),
            keep_smaller: true,
        }
    }
}
