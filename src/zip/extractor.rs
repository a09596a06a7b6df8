use flate2::{Crc, Decompress, FlushDecompress, Status};
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{IoContext, Result};
use crate::io::{ProgressTracker, ReadAt};
use crate::sanitize;

use super::parser::ZipParser;
use super::structures::{CompressionMethod, ZipFileEntry, invalid};

/// ZIP file extractor
pub struct ZipExtractor<R: ReadAt> {
    parser: ZipParser<R>,
}

impl<R: ReadAt> ZipExtractor<R> {
    pub fn new(reader: Arc<R>) -> Self {
        Self {
            parser: ZipParser::new(reader),
        }
    }

    /// List all files in the archive
    pub async fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        self.parser.list_files().await
    }

    /// Extract every entry below `destination`.
    ///
    /// The tracker's total is set to the sum of uncompressed sizes before any
    /// entry is written. An entry name that escapes the destination rejects
    /// the archive up front; any other failing entry aborts the extraction.
    pub async fn extract_all(
        &self,
        destination: &Path,
        tracker: &mut ProgressTracker,
        buffer_size: usize,
    ) -> Result<Vec<ZipFileEntry>> {
        let root = sanitize::canonical_root(destination)?;
        let entries = self.list_files().await?;

        // Every name is checked before the first byte lands on disk
        let targets = entries
            .iter()
            .map(|entry| sanitize::resolve_entry_path(&root, &entry.file_name))
            .collect::<Result<Vec<_>>>()?;

        // Declared sizes are untrusted; saturate instead of overflowing
        let total = entries
            .iter()
            .fold(0u64, |sum, e| sum.saturating_add(e.uncompressed_size));
        tracker.set_total_size(total);

        let mut input = vec![0u8; buffer_size];
        let mut output = vec![0u8; buffer_size];

        for (entry, target) in entries.iter().zip(&targets) {
            sanitize::ensure_contained(&root, target, &entry.file_name)?;

            if entry.is_directory {
                fs::create_dir_all(target).await.at(target)?;
                continue;
            }

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).await.at(parent)?;
            }

            log::debug!("extracting '{}'", entry.file_name);
            self.extract_to_file(entry, target, tracker, &mut input, &mut output)
                .await?;
            restore_mode(target, entry.unix_mode).await?;
        }

        Ok(entries)
    }

    /// Stream one entry into `output_path`, verifying its CRC.
    ///
    /// Progress advances by decompressed bytes written, chunk by chunk.
    pub async fn extract_to_file(
        &self,
        entry: &ZipFileEntry,
        output_path: &Path,
        tracker: &mut ProgressTracker,
        input: &mut [u8],
        output: &mut [u8],
    ) -> Result<()> {
        let data_offset = self.parser.get_data_offset(entry).await?;
        let mut file = fs::File::create(output_path).await.at(output_path)?;
        let mut crc = Crc::new();
        let mut written = 0u64;

        match entry.compression_method {
            CompressionMethod::Stored => {
                let mut offset = data_offset;
                let end = data_offset + entry.compressed_size;
                while offset < end {
                    let want = input.len().min((end - offset) as usize);
                    let chunk = &mut input[..want];
                    self.parser.reader().read_exact_at(offset, chunk).await?;
                    offset += want as u64;

                    check_declared_size(entry, written, want)?;
                    file.write_all(chunk).await.at(output_path)?;
                    crc.update(chunk);
                    written += want as u64;
                    tracker.add_progress(want as u64);
                }
            }
            CompressionMethod::Deflate => {
                written = self
                    .inflate_into(
                        entry,
                        data_offset,
                        &mut file,
                        output_path,
                        &mut crc,
                        tracker,
                        input,
                        output,
                    )
                    .await?;
            }
            CompressionMethod::Unknown(method) => {
                return Err(invalid(format!(
                    "unsupported compression method {} for '{}'",
                    method, entry.file_name
                )));
            }
        }

        file.flush().await.at(output_path)?;

        if written != entry.uncompressed_size || crc.sum() != entry.crc32 {
            return Err(invalid(format!(
                "checksum mismatch for '{}'",
                entry.file_name
            )));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn inflate_into(
        &self,
        entry: &ZipFileEntry,
        data_offset: u64,
        file: &mut fs::File,
        output_path: &Path,
        crc: &mut Crc,
        tracker: &mut ProgressTracker,
        input: &mut [u8],
        output: &mut [u8],
    ) -> Result<u64> {
        let mut inflater = Decompress::new(false);
        let end = data_offset + entry.compressed_size;
        let mut offset = data_offset;
        let (mut pos, mut filled) = (0usize, 0usize);
        let mut written = 0u64;

        loop {
            if pos == filled && offset < end {
                let want = input.len().min((end - offset) as usize);
                self.parser
                    .reader()
                    .read_exact_at(offset, &mut input[..want])
                    .await?;
                offset += want as u64;
                pos = 0;
                filled = want;
            }

            let before_in = inflater.total_in();
            let before_out = inflater.total_out();
            let status = inflater
                .decompress(&input[pos..filled], output, FlushDecompress::None)
                .map_err(|e| invalid(format!("corrupt data in '{}': {}", entry.file_name, e)))?;
            let consumed = (inflater.total_in() - before_in) as usize;
            let produced = (inflater.total_out() - before_out) as usize;
            pos += consumed;

            if produced > 0 {
                check_declared_size(entry, written, produced)?;
                let chunk = &output[..produced];
                file.write_all(chunk).await.at(output_path)?;
                crc.update(chunk);
                written += produced as u64;
                tracker.add_progress(produced as u64);
            }

            match status {
                Status::StreamEnd => return Ok(written),
                Status::Ok | Status::BufError => {
                    if consumed == 0 && produced == 0 && pos == filled && offset == end {
                        return Err(invalid(format!(
                            "truncated data in '{}'",
                            entry.file_name
                        )));
                    }
                }
            }
        }
    }
}

/// Reject data running past the size recorded in the Central Directory
/// before it reaches the disk.
fn check_declared_size(entry: &ZipFileEntry, written: u64, next: usize) -> Result<()> {
    if written.saturating_add(next as u64) > entry.uncompressed_size {
        return Err(invalid(format!(
            "'{}' holds more data than its declared {} bytes",
            entry.file_name, entry.uncompressed_size
        )));
    }
    Ok(())
}

#[cfg(unix)]
async fn restore_mode(path: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if let Some(mode) = mode {
        fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .await
            .at(path)?;
    }
    Ok(())
}

#[cfg(not(unix))]
async fn restore_mode(_path: &Path, _mode: Option<u32>) -> Result<()> {
    Ok(())
}
