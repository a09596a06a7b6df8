//! Central Directory reader.
//!
//! Archives are read from the tail: the End of Central Directory record (and
//! its ZIP64 counterpart when the 32-bit fields saturate) gives the location
//! of the Central Directory, which is fetched in one read and decoded into
//! [`ZipFileEntry`] values. Entry data is only touched by the extractor.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::error::Result;
use crate::io::ReadAt;

use super::structures::*;

/// Largest archive comment the EOCD can describe.
const MAX_COMMENT_SIZE: u64 = u16::MAX as u64;

/// Where the Central Directory lives and how many headers it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryLocation {
    pub offset: u64,
    pub size: u64,
    pub entries: u64,
}

/// Reads archive metadata from any positional source.
///
/// Usually driven through [`ZipExtractor`](super::ZipExtractor).
pub struct ZipParser<R: ReadAt> {
    reader: Arc<R>,
    size: u64,
}

impl<R: ReadAt> ZipParser<R> {
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }

    /// Find the EOCD record, returning it with its file offset.
    ///
    /// Archives without a comment are answered with a single small read;
    /// otherwise the last 64 KiB are scanned backwards for a record whose
    /// comment length reaches exactly to the end of the file.
    ///
    /// # Returns
    ///
    /// The parsed record and the absolute offset of its signature.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArchive`](crate::Error::InvalidArchive) if the
    /// file is shorter than an EOCD or no record matches.
    pub async fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64)> {
        let record = EndOfCentralDirectory::SIZE as u64;
        if self.size < record {
            return Err(invalid("file too small to be a ZIP archive"));
        }

        // Fast path: no archive comment
        let tail_offset = self.size - record;
        let mut tail = [0u8; EndOfCentralDirectory::SIZE];
        self.reader.read_exact_at(tail_offset, &mut tail).await?;
        if locate_eocd(&tail) == Some(0) {
            return Ok((EndOfCentralDirectory::from_bytes(&tail)?, tail_offset));
        }

        // Slow path: the comment may be up to 64 KiB long
        let window = (MAX_COMMENT_SIZE + record).min(self.size);
        let window_start = self.size - window;
        let mut buf = vec![0u8; window as usize];
        self.reader.read_exact_at(window_start, &mut buf).await?;

        let at = locate_eocd(&buf).ok_or_else(|| invalid("end of central directory not found"))?;
        let eocd = EndOfCentralDirectory::from_bytes(&buf[at..at + EndOfCentralDirectory::SIZE])?;
        Ok((eocd, window_start + at as u64))
    }

    /// Follow the ZIP64 locator that sits right before the EOCD at `eocd_offset`.
    pub async fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<Zip64EOCD> {
        let locator_offset = eocd_offset
            .checked_sub(Zip64EOCDLocator::SIZE as u64)
            .ok_or_else(|| invalid("missing ZIP64 locator"))?;
        let mut buf = [0u8; Zip64EOCDLocator::SIZE];
        self.reader.read_exact_at(locator_offset, &mut buf).await?;
        let locator = Zip64EOCDLocator::from_bytes(&buf)?;

        if locator.eocd64_offset >= locator_offset {
            return Err(invalid("ZIP64 end record points past its locator"));
        }
        let mut record = vec![0u8; Zip64EOCD::MIN_SIZE];
        self.reader
            .read_exact_at(locator.eocd64_offset, &mut record)
            .await?;
        Zip64EOCD::from_bytes(&record)
    }

    /// Resolve the Central Directory position, preferring ZIP64 values.
    pub async fn directory_location(&self) -> Result<DirectoryLocation> {
        let (eocd, eocd_offset) = self.find_eocd().await?;
        let location = if eocd.is_zip64() {
            let eocd64 = self.read_zip64_eocd(eocd_offset).await?;
            DirectoryLocation {
                offset: eocd64.cd_offset,
                size: eocd64.cd_size,
                entries: eocd64.total_entries,
            }
        } else {
            DirectoryLocation {
                offset: eocd.cd_offset as u64,
                size: eocd.cd_size as u64,
                entries: eocd.total_entries as u64,
            }
        };

        if location.offset.saturating_add(location.size) > self.size {
            return Err(invalid("central directory extends past end of file"));
        }
        Ok(location)
    }

    /// Every entry recorded in the Central Directory, in stored order.
    ///
    /// The whole directory is fetched with one read and decoded in memory;
    /// entry data is not touched.
    ///
    /// # Returns
    ///
    /// One [`ZipFileEntry`] per Central Directory File Header.
    ///
    /// # Errors
    ///
    /// Returns an error if the end records are missing, the directory lies
    /// outside the file, or a header is malformed or truncated.
    pub async fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        let location = self.directory_location().await?;

        // Read the entire Central Directory
        let mut directory = vec![0u8; location.size as usize];
        self.reader
            .read_exact_at(location.offset, &mut directory)
            .await?;

        // A hostile entry count cannot reserve more than the directory can hold
        let capacity = location.entries.min(location.size / CDFH_MIN_SIZE as u64);
        let mut entries = Vec::with_capacity(capacity as usize);
        let mut cursor = Cursor::new(directory.as_slice());
        for _ in 0..location.entries {
            entries.push(read_central_header(&mut cursor)?);
        }
        Ok(entries)
    }

    /// Offset of the first data byte of `entry`.
    ///
    /// The local header repeats the name and may carry a different extra
    /// field than the Central Directory, so its lengths are read here.
    ///
    /// # Arguments
    ///
    /// * `entry` - An entry returned by [`list_files()`](Self::list_files)
    ///
    /// # Returns
    ///
    /// The byte offset where the entry's stored data begins.
    ///
    /// # Errors
    ///
    /// Returns an error if the Local File Header signature is wrong or the
    /// data would run past the end of the file.
    pub async fn get_data_offset(&self, entry: &ZipFileEntry) -> Result<u64> {
        let mut header = [0u8; LFH_SIZE];
        self.reader
            .read_exact_at(entry.lfh_offset, &mut header)
            .await?;
        if &header[0..4] != LFH_SIGNATURE {
            return Err(invalid(format!(
                "bad Local File Header for '{}'",
                entry.file_name
            )));
        }

        // Skip the variable-length name and extra field
        let name_len = u16::from_le_bytes([header[26], header[27]]) as u64;
        let extra_len = u16::from_le_bytes([header[28], header[29]]) as u64;
        let data_offset = entry.lfh_offset + LFH_SIZE as u64 + name_len + extra_len;

        if data_offset.saturating_add(entry.compressed_size) > self.size {
            return Err(invalid(format!(
                "data for '{}' extends past end of file",
                entry.file_name
            )));
        }
        Ok(data_offset)
    }
}

/// Index of the last EOCD signature in `buf` whose comment ends exactly at
/// the end of the buffer.
fn locate_eocd(buf: &[u8]) -> Option<usize> {
    let last = buf.len().checked_sub(EndOfCentralDirectory::SIZE)?;
    (0..=last).rev().find(|&i| {
        &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE && {
            let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;
            comment_len == buf.len() - i - EndOfCentralDirectory::SIZE
        }
    })
}

fn read_central_header(cursor: &mut Cursor<&[u8]>) -> Result<ZipFileEntry> {
    let mut sig = [0u8; 4];
    cursor.read_exact(&mut sig).map_err(truncated)?;
    if sig != CDFH_SIGNATURE {
        return Err(invalid("bad Central Directory File Header"));
    }

    let mut u16_field = || cursor.read_u16::<LittleEndian>().map_err(truncated);
    let version_made_by = u16_field()?;
    let _version_needed = u16_field()?;
    let _flags = u16_field()?;
    let method = u16_field()?;
    let last_mod_time = u16_field()?;
    let last_mod_date = u16_field()?;

    let crc32 = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
    let mut compressed_size = cursor.read_u32::<LittleEndian>().map_err(truncated)? as u64;
    let mut uncompressed_size = cursor.read_u32::<LittleEndian>().map_err(truncated)? as u64;

    let mut u16_field = || cursor.read_u16::<LittleEndian>().map_err(truncated);
    let name_len = u16_field()? as usize;
    let extra_len = u16_field()? as u64;
    let comment_len = u16_field()? as u64;
    let _disk_start = u16_field()?;
    let _internal_attrs = u16_field()?;

    let external_attrs = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
    let mut lfh_offset = cursor.read_u32::<LittleEndian>().map_err(truncated)? as u64;

    let mut name = vec![0u8; name_len];
    cursor.read_exact(&mut name).map_err(truncated)?;
    let file_name = String::from_utf8_lossy(&name).into_owned();

    let extra_end = cursor.position() + extra_len;
    while cursor.position() + 4 <= extra_end {
        let id = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
        let len = cursor.read_u16::<LittleEndian>().map_err(truncated)? as u64;
        let field_end = (cursor.position() + len).min(extra_end);

        if id == ZIP64_EXTRA_ID {
            // Only saturated fields appear, always in this order
            for value in [&mut uncompressed_size, &mut compressed_size, &mut lfh_offset] {
                if *value == ZIP64_MARKER_32 as u64 && cursor.position() + 8 <= field_end {
                    *value = cursor.read_u64::<LittleEndian>().map_err(truncated)?;
                }
            }
        }
        cursor.set_position(field_end);
    }
    cursor.set_position(extra_end + comment_len);

    let unix_mode = if version_made_by >> 8 == HOST_UNIX {
        Some((external_attrs >> 16) & 0o7777).filter(|mode| *mode != 0)
    } else {
        None
    };

    Ok(ZipFileEntry {
        is_directory: file_name.ends_with('/'),
        file_name,
        compression_method: CompressionMethod::from_u16(method),
        compressed_size,
        uncompressed_size,
        crc32,
        lfh_offset,
        last_mod_time,
        last_mod_date,
        unix_mode,
    })
}
