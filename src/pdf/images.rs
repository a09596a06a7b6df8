use image::{GrayImage, ImageFormat, RgbImage};
use flate2::read::ZlibDecoder;
use lopdf::{Dictionary, Document, Object};
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::config::RasterPolicy;
use crate::error::{Error, IoContext, PdfStage, Result};
use crate::raster::{self, RasterFormat};

/// Write the embedded raster images of `source` into `dir`.
///
/// JPEG streams are copied verbatim. Uncompressed-after-Flate 8-bit RGB and
/// grayscale images become PNG files. Anything else is skipped. Returns the
/// files written.
pub fn extract_images(source: &Path, dir: &Path) -> Result<Vec<PathBuf>> {
    let doc = Document::load(source).map_err(|e| Error::Optimization {
        stage: PdfStage::ImageExtraction,
        message: format!("cannot load '{}': {}", source.display(), e),
    })?;

    let mut written = Vec::new();
    for (&(number, generation), object) in &doc.objects {
        let Object::Stream(stream) = object else {
            continue;
        };
        if name(&stream.dict, b"Subtype") != Some(b"Image".as_slice()) {
            continue;
        }

        let stem = format!("image_{number}_{generation}");
        match filters(&stream.dict).as_slice() {
            [filter] if filter.as_slice() == b"DCTDecode" => {
                let path = dir.join(format!("{stem}.jpg"));
                std::fs::write(&path, &stream.content).at(&path)?;
                written.push(path);
            }
            [filter] if filter.as_slice() == b"FlateDecode" => {
                if stream.dict.has(b"DecodeParms") {
                    log::debug!("skipping predictor-encoded image {number} {generation}");
                    continue;
                }
                let Ok(pixels) = inflate(&stream.content) else {
                    log::debug!("skipping undecodable image {number} {generation}");
                    continue;
                };
                let path = dir.join(format!("{stem}.png"));
                if write_png(&stream.dict, pixels, &path)? {
                    written.push(path);
                }
            }
            _ => {}
        }
    }
    Ok(written)
}

/// Re-encode each extracted image in place. Failures are logged and skipped.
///
/// Returns how many images were recompressed.
pub fn recompress_images(paths: &[PathBuf], policy: &RasterPolicy) -> usize {
    let mut done = 0;
    for path in paths {
        let Some(format) = RasterFormat::from_path(path) else {
            continue;
        };
        match raster::reencode(path, path, format, policy) {
            Ok(()) => done += 1,
            Err(e) => log::warn!("image recompression failed: {e}"),
        }
    }
    done
}

/// lopdf refuses to decode image streams itself, so the zlib data is
/// inflated here.
fn inflate(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut pixels = Vec::new();
    ZlibDecoder::new(data).read_to_end(&mut pixels)?;
    Ok(pixels)
}

fn write_png(dict: &Dictionary, pixels: Vec<u8>, path: &Path) -> Result<bool> {
    let (Some(width), Some(height)) = (integer(dict, b"Width"), integer(dict, b"Height")) else {
        return Ok(false);
    };
    if integer(dict, b"BitsPerComponent") != Some(8) {
        return Ok(false);
    }

    let saved = match name(dict, b"ColorSpace") {
        Some(b"DeviceRGB") => RgbImage::from_raw(width, height, pixels)
            .map(|img| img.save_with_format(path, ImageFormat::Png)),
        Some(b"DeviceGray") => GrayImage::from_raw(width, height, pixels)
            .map(|img| img.save_with_format(path, ImageFormat::Png)),
        _ => None,
    };

    match saved {
        Some(Ok(())) => Ok(true),
        Some(Err(source)) => Err(Error::Image {
            path: path.to_path_buf(),
            source,
        }),
        // Pixel buffer shorter than the declared dimensions
        None => Ok(false),
    }
}

fn name<'a>(dict: &'a Dictionary, key: &[u8]) -> Option<&'a [u8]> {
    match dict.get(key).ok()? {
        Object::Name(name) => Some(name.as_slice()),
        _ => None,
    }
}

fn integer(dict: &Dictionary, key: &[u8]) -> Option<u32> {
    match dict.get(key).ok()? {
        Object::Integer(value) => u32::try_from(*value).ok().filter(|v| *v > 0),
        _ => None,
    }
}

fn filters(dict: &Dictionary) -> Vec<Vec<u8>> {
    match dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![name.clone()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Object::Name(name) => Some(name.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}
