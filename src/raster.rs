//! PNG/JPEG re-encoding.
//!
//! The whole image is decoded into memory, optionally downsampled by a fixed
//! tier, and written back at the most aggressive setting the policy names.
//! Source and destination may be the same path; the source is fully decoded
//! before the destination is opened.
//!
//! No progress is reported from here. Jobs that re-encode an image only
//! report the baseline and completion.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{FilterType as PngFilter, PngEncoder};
use image::{DynamicImage, ImageFormat};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use crate::config::RasterPolicy;
use crate::error::{Error, IoContext, Result};

/// The two raster encodings the re-encoder handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterFormat {
    Png,
    Jpeg,
}

impl RasterFormat {
    /// Guess from a file extension, case-insensitively.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "png" => Some(RasterFormat::Png),
            "jpg" | "jpeg" => Some(RasterFormat::Jpeg),
            _ => None,
        }
    }

    fn image_format(self) -> ImageFormat {
        match self {
            RasterFormat::Png => ImageFormat::Png,
            RasterFormat::Jpeg => ImageFormat::Jpeg,
        }
    }
}

/// Dimensions after applying the tiered downsampling rule.
pub fn scaled_dimensions(width: u32, height: u32, policy: &RasterPolicy) -> (u32, u32) {
    let percent = if width > policy.large_threshold || height > policy.large_threshold {
        policy.large_scale_percent
    } else if width > policy.medium_threshold || height > policy.medium_threshold {
        policy.medium_scale_percent
    } else {
        return (width, height);
    };

    let scale = |side: u32| ((side as u64 * percent as u64) / 100).max(1) as u32;
    (scale(width), scale(height))
}

/// Decode `source`, downsample per `policy`, and write it to `dest`.
pub fn reencode(source: &Path, dest: &Path, format: RasterFormat, policy: &RasterPolicy) -> Result<()> {
    let reader = BufReader::new(File::open(source).at(source)?);
    let image = image::load(reader, format.image_format()).map_err(|e| Error::Image {
        path: source.to_path_buf(),
        source: e,
    })?;

    let (width, height) = (image.width(), image.height());
    let (new_width, new_height) = scaled_dimensions(width, height, policy);
    let image = if (new_width, new_height) != (width, height) {
        log::debug!(
            "resizing '{}' from {}x{} to {}x{}",
            source.display(),
            width,
            height,
            new_width,
            new_height
        );
        image.resize_exact(new_width, new_height, policy.filter)
    } else {
        image
    };

    let mut writer = BufWriter::new(File::create(dest).at(dest)?);
    encode(&image, &mut writer, format, policy).map_err(|e| Error::Image {
        path: dest.to_path_buf(),
        source: e,
    })?;
    writer.flush().at(dest)?;
    Ok(())
}

fn encode<W: Write>(
    image: &DynamicImage,
    writer: &mut W,
    format: RasterFormat,
    policy: &RasterPolicy,
) -> image::ImageResult<()> {
    match format {
        RasterFormat::Png => {
            let encoder =
                PngEncoder::new_with_quality(writer, policy.png_compression, PngFilter::Adaptive);
            image.write_with_encoder(encoder)
        }
        RasterFormat::Jpeg => {
            // JPEG has no alpha channel
            let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
            let encoder = JpegEncoder::new_with_quality(writer, policy.jpeg_quality);
            rgb.write_with_encoder(encoder)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn large_images_scale_to_seventy_percent() {
        let policy = RasterPolicy::default();
        assert_eq!(scaled_dimensions(2000, 1500, &policy), (1400, 1050));
        assert_eq!(scaled_dimensions(400, 1001, &policy), (280, 700));
    }

    #[test]
    fn medium_images_scale_to_eighty_percent() {
        let policy = RasterPolicy::default();
        assert_eq!(scaled_dimensions(1000, 600, &policy), (800, 480));
        assert_eq!(scaled_dimensions(501, 10, &policy), (400, 8));
    }

    #[test]
    fn small_images_are_untouched() {
        let policy = RasterPolicy::default();
        assert_eq!(scaled_dimensions(500, 500, &policy), (500, 500));
        assert_eq!(scaled_dimensions(1, 1, &policy), (1, 1));
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(RasterFormat::from_path(Path::new("a/B.PNG")), Some(RasterFormat::Png));
        assert_eq!(RasterFormat::from_path(Path::new("x.Jpeg")), Some(RasterFormat::Jpeg));
        assert_eq!(RasterFormat::from_path(Path::new("x.gif")), None);
        assert_eq!(RasterFormat::from_path(Path::new("noext")), None);
    }

    #[test]
    fn jpeg_reencode_in_place_shrinks_medium_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        let image = RgbImage::from_fn(640, 480, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 90]));
        image.save(&path).unwrap();

        reencode(&path, &path, RasterFormat::Jpeg, &RasterPolicy::default()).unwrap();

        let result = image::open(&path).unwrap();
        assert_eq!((result.width(), result.height()), (512, 384));
    }

    #[test]
    fn corrupt_input_reports_image_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not a png").unwrap();

        let result = reencode(&path, &dir.path().join("out.png"), RasterFormat::Png, &RasterPolicy::default());
        assert!(matches!(result, Err(Error::Image { .. })));
    }
}
