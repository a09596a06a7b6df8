//! Streaming ZIP writer.
//!
//! Entries are appended one after another: local header, DEFLATE data, then
//! a data descriptor with the CRC and sizes. The Central Directory and the
//! end records are written by [`ZipWriter::finish`]. Nothing is ever seeked,
//! so the sink may be any async writer.

use flate2::Crc;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{IoContext, Result};

use super::compression::MaxCompressionWriter;
use super::structures::*;

/// Metadata for an entry about to be written.
#[derive(Debug, Clone)]
pub struct EntryHeader {
    /// POSIX-style path inside the archive.
    pub name: String,
    /// File the entry data is read from, used for error context.
    pub origin: PathBuf,
    /// Permission bits (and file type bits) recorded for UNIX extractors.
    pub unix_mode: u32,
    pub modified: DosDateTime,
    /// Expected uncompressed size, used to decide on ZIP64 local records.
    pub size_hint: u64,
}

struct WrittenEntry {
    name: String,
    flags: u16,
    modified: DosDateTime,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    lfh_offset: u64,
    unix_mode: u32,
}

/// ZIP archive writer over an append-only sink.
pub struct ZipWriter<W> {
    sink: W,
    dest: PathBuf,
    offset: u64,
    entries: Vec<WrittenEntry>,
}

impl<W: AsyncWrite + Unpin> ZipWriter<W> {
    /// Create a writer; `dest` names the sink in error messages.
    pub fn new(sink: W, dest: &Path) -> Self {
        Self {
            sink,
            dest: dest.to_path_buf(),
            offset: 0,
            entries: Vec::new(),
        }
    }

    /// Number of entries written so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    async fn emit(&mut self, bytes: &[u8]) -> Result<()> {
        self.sink.write_all(bytes).await.at(&self.dest)?;
        self.offset += bytes.len() as u64;
        Ok(())
    }

    /// Append one DEFLATE entry whose data is read from `source` through `buffer`.
    ///
    /// Returns the number of uncompressed bytes stored.
    pub async fn write_entry<R: AsyncRead + Unpin>(
        &mut self,
        header: EntryHeader,
        source: &mut R,
        buffer: &mut [u8],
    ) -> Result<u64> {
        let zip64 = needs_zip64(header.size_hint);
        let flags = FLAG_DATA_DESCRIPTOR | FLAG_UTF8;
        let lfh_offset = self.offset;

        let local = LocalFileHeader {
            version_needed: if zip64 { VERSION_ZIP64 } else { VERSION_DEFLATE },
            flags,
            method: CompressionMethod::Deflate,
            modified: header.modified,
            file_name: &header.name,
            zip64,
        }
        .to_bytes()
        .at(&header.origin)?;
        self.emit(&local).await?;

        let mut encoder = MaxCompressionWriter::new();
        let mut crc = Crc::new();
        let mut uncompressed_size = 0u64;
        let mut compressed_size = 0u64;

        loop {
            let n = source.read(buffer).await.at(&header.origin)?;
            if n == 0 {
                break;
            }
            let chunk = &buffer[..n];
            crc.update(chunk);
            uncompressed_size += n as u64;

            let out = encoder.compress_chunk(chunk).at(&self.dest)?;
            if !out.is_empty() {
                compressed_size += out.len() as u64;
                self.emit(&out).await?;
            }
        }

        let tail = encoder.finish().at(&self.dest)?;
        compressed_size += tail.len() as u64;
        self.emit(&tail).await?;

        let descriptor = DataDescriptor {
            crc32: crc.sum(),
            compressed_size,
            uncompressed_size,
            zip64,
        }
        .to_bytes()
        .at(&header.origin)?;
        self.emit(&descriptor).await?;

        log::debug!(
            "stored '{}': {} -> {} bytes",
            header.name,
            uncompressed_size,
            compressed_size
        );

        self.entries.push(WrittenEntry {
            name: header.name,
            flags,
            modified: header.modified,
            crc32: crc.sum(),
            compressed_size,
            uncompressed_size,
            lfh_offset,
            unix_mode: header.unix_mode,
        });

        Ok(uncompressed_size)
    }

    /// Write the Central Directory and end records, then flush the sink.
    pub async fn finish(mut self) -> Result<W> {
        let cd_offset = self.offset;
        let entries = std::mem::take(&mut self.entries);
        for entry in &entries {
            let header = CentralDirectoryHeader {
                flags: entry.flags,
                method: CompressionMethod::Deflate,
                modified: entry.modified,
                crc32: entry.crc32,
                compressed_size: entry.compressed_size,
                uncompressed_size: entry.uncompressed_size,
                lfh_offset: entry.lfh_offset,
                unix_mode: entry.unix_mode,
                file_name: &entry.name,
            }
            .to_bytes()
            .at(&self.dest)?;
            self.emit(&header).await?;
        }

        let cd_size = self.offset - cd_offset;
        let count = entries.len() as u64;

        if count >= ZIP64_MARKER_16 as u64
            || cd_size >= ZIP64_MARKER_32 as u64
            || cd_offset >= ZIP64_MARKER_32 as u64
        {
            let eocd64_offset = self.offset;
            let record = Zip64EOCD::for_directory(count, cd_size, cd_offset)
                .to_bytes()
                .at(&self.dest)?;
            self.emit(&record).await?;

            let locator = Zip64EOCDLocator {
                disk_with_eocd64: 0,
                eocd64_offset,
                total_disks: 1,
            }
            .to_bytes()
            .at(&self.dest)?;
            self.emit(&locator).await?;
        }

        let eocd = EndOfCentralDirectory::for_directory(count, cd_size, cd_offset)
            .to_bytes()
            .at(&self.dest)?;
        self.emit(&eocd).await?;

        self.sink.flush().await.at(&self.dest)?;
        Ok(self.sink)
    }
}

/// Whether an entry of `size` bytes could overflow 32-bit size fields once
/// DEFLATE framing overhead is added.
fn needs_zip64(size: u64) -> bool {
    size.saturating_add(size / 1000 + 1024) >= ZIP64_MARKER_32 as u64
}
