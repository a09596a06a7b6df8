use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Datelike, Local, Timelike};
use std::io::{self, Cursor};
use std::time::SystemTime;

use crate::error::{Error, Result};

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

/// Version 2.0: DEFLATE and directories.
pub const VERSION_DEFLATE: u16 = 20;
/// Version 4.5: ZIP64 extensions.
pub const VERSION_ZIP64: u16 = 45;
/// Upper byte of "version made by" for UNIX hosts.
pub const HOST_UNIX: u16 = 3;

/// General purpose flag: sizes and CRC follow the data in a descriptor.
pub const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
/// General purpose flag: file name is UTF-8.
pub const FLAG_UTF8: u16 = 0x0800;

/// Extra field ID carrying ZIP64 sizes and offsets.
pub const ZIP64_EXTRA_ID: u16 = 0x0001;

/// Marker stored in 32-bit fields whose value lives in a ZIP64 record.
pub const ZIP64_MARKER_32: u32 = 0xFFFF_FFFF;
pub const ZIP64_MARKER_16: u16 = 0xFFFF;

/// End of Central Directory (EOCD) - 22 bytes minimum
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(invalid("bad End of Central Directory record"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
            disk_with_cd: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
            disk_entries: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
            total_entries: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
            cd_size: cursor.read_u32::<LittleEndian>().map_err(truncated)?,
            cd_offset: cursor.read_u32::<LittleEndian>().map_err(truncated)?,
            comment_len: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
        })
    }

    /// Build the record for a single-disk archive, saturating to the ZIP64
    /// markers where a value does not fit.
    pub fn for_directory(entries: u64, cd_size: u64, cd_offset: u64) -> Self {
        let count = u16::try_from(entries).unwrap_or(ZIP64_MARKER_16);
        Self {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: count,
            total_entries: count,
            cd_size: u32::try_from(cd_size).unwrap_or(ZIP64_MARKER_32),
            cd_offset: u32::try_from(cd_offset).unwrap_or(ZIP64_MARKER_32),
            comment_len: 0,
        }
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(Self::SIGNATURE);
        buf.write_u16::<LittleEndian>(self.disk_number)?;
        buf.write_u16::<LittleEndian>(self.disk_with_cd)?;
        buf.write_u16::<LittleEndian>(self.disk_entries)?;
        buf.write_u16::<LittleEndian>(self.total_entries)?;
        buf.write_u32::<LittleEndian>(self.cd_size)?;
        buf.write_u32::<LittleEndian>(self.cd_offset)?;
        buf.write_u16::<LittleEndian>(self.comment_len)?;
        Ok(buf)
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == ZIP64_MARKER_16
            || self.total_entries == ZIP64_MARKER_16
            || self.cd_size == ZIP64_MARKER_32
            || self.cd_offset == ZIP64_MARKER_32
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(invalid("bad ZIP64 End of Central Directory locator"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>().map_err(truncated)?,
            eocd64_offset: cursor.read_u64::<LittleEndian>().map_err(truncated)?,
            total_disks: cursor.read_u32::<LittleEndian>().map_err(truncated)?,
        })
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(Self::SIGNATURE);
        buf.write_u32::<LittleEndian>(self.disk_with_eocd64)?;
        buf.write_u64::<LittleEndian>(self.eocd64_offset)?;
        buf.write_u32::<LittleEndian>(self.total_disks)?;
        Ok(buf)
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
pub struct Zip64EOCD {
    pub eocd64_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::MIN_SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(invalid("bad ZIP64 End of Central Directory record"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            eocd64_size: cursor.read_u64::<LittleEndian>().map_err(truncated)?,
            version_made_by: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
            version_needed: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
            disk_number: cursor.read_u32::<LittleEndian>().map_err(truncated)?,
            disk_with_cd: cursor.read_u32::<LittleEndian>().map_err(truncated)?,
            disk_entries: cursor.read_u64::<LittleEndian>().map_err(truncated)?,
            total_entries: cursor.read_u64::<LittleEndian>().map_err(truncated)?,
            cd_size: cursor.read_u64::<LittleEndian>().map_err(truncated)?,
            cd_offset: cursor.read_u64::<LittleEndian>().map_err(truncated)?,
        })
    }

    pub fn for_directory(entries: u64, cd_size: u64, cd_offset: u64) -> Self {
        Self {
            // Size of the remaining record, excluding signature and this field.
            eocd64_size: (Self::MIN_SIZE - 12) as u64,
            version_made_by: (HOST_UNIX << 8) | VERSION_ZIP64,
            version_needed: VERSION_ZIP64,
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: entries,
            total_entries: entries,
            cd_size,
            cd_offset,
        }
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(Self::MIN_SIZE);
        buf.extend_from_slice(Self::SIGNATURE);
        buf.write_u64::<LittleEndian>(self.eocd64_size)?;
        buf.write_u16::<LittleEndian>(self.version_made_by)?;
        buf.write_u16::<LittleEndian>(self.version_needed)?;
        buf.write_u32::<LittleEndian>(self.disk_number)?;
        buf.write_u32::<LittleEndian>(self.disk_with_cd)?;
        buf.write_u64::<LittleEndian>(self.disk_entries)?;
        buf.write_u64::<LittleEndian>(self.total_entries)?;
        buf.write_u64::<LittleEndian>(self.cd_size)?;
        buf.write_u64::<LittleEndian>(self.cd_offset)?;
        Ok(buf)
    }
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// Data descriptor following entry data when [`FLAG_DATA_DESCRIPTOR`] is set
pub const DATA_DESCRIPTOR_SIGNATURE: &[u8] = b"PK\x07\x08";

/// Parsed ZIP file entry information
#[derive(Debug, Clone)]
pub struct ZipFileEntry {
    pub file_name: String,
    pub compression_method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub lfh_offset: u64,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub is_directory: bool,
    /// Permission bits recorded by a UNIX host, if any.
    pub unix_mode: Option<u32>,
}

impl ZipFileEntry {
    /// Parse modification date to (year, month, day)
    pub fn mod_date(&self) -> (u16, u8, u8) {
        let day = (self.last_mod_date & 0x1F) as u8;
        let month = ((self.last_mod_date >> 5) & 0x0F) as u8;
        let year = ((self.last_mod_date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// Parse modification time to (hour, minute, second)
    pub fn mod_time(&self) -> (u8, u8, u8) {
        let second = ((self.last_mod_time & 0x1F) * 2) as u8;
        let minute = ((self.last_mod_time >> 5) & 0x3F) as u8;
        let hour = ((self.last_mod_time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }
}

/// DOS timestamp as stored in local and central headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosDateTime {
    pub time: u16,
    pub date: u16,
}

impl DosDateTime {
    /// 1980-01-01 00:00:00, the earliest representable instant.
    pub const EPOCH: DosDateTime = DosDateTime {
        time: 0,
        date: (1 << 5) | 1,
    };

    pub fn from_system_time(time: SystemTime) -> Self {
        let local: DateTime<Local> = time.into();
        let year = local.year();
        if !(1980..=2107).contains(&year) {
            return Self::EPOCH;
        }

        let date =
            (((year - 1980) as u16) << 9) | ((local.month() as u16) << 5) | local.day() as u16;
        let time = ((local.hour() as u16) << 11)
            | ((local.minute() as u16) << 5)
            | (local.second() as u16 / 2);
        Self { time, date }
    }
}

/// Local File Header as emitted by the writer.
///
/// Sizes and CRC are left zero; the data descriptor after the entry data
/// carries the real values.
pub struct LocalFileHeader<'a> {
    pub version_needed: u16,
    pub flags: u16,
    pub method: CompressionMethod,
    pub modified: DosDateTime,
    pub file_name: &'a str,
    /// Reserve a ZIP64 extra field for entries that may pass 4 GiB.
    pub zip64: bool,
}

impl LocalFileHeader<'_> {
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let name = self.file_name.as_bytes();
        let extra_len: u16 = if self.zip64 { 20 } else { 0 };
        let size_marker = if self.zip64 { ZIP64_MARKER_32 } else { 0 };

        let mut buf = Vec::with_capacity(LFH_SIZE + name.len() + extra_len as usize);
        buf.extend_from_slice(LFH_SIGNATURE);
        buf.write_u16::<LittleEndian>(self.version_needed)?;
        buf.write_u16::<LittleEndian>(self.flags)?;
        buf.write_u16::<LittleEndian>(self.method.as_u16())?;
        buf.write_u16::<LittleEndian>(self.modified.time)?;
        buf.write_u16::<LittleEndian>(self.modified.date)?;
        buf.write_u32::<LittleEndian>(0)?;
        buf.write_u32::<LittleEndian>(size_marker)?;
        buf.write_u32::<LittleEndian>(size_marker)?;
        buf.write_u16::<LittleEndian>(name_len(name)?)?;
        buf.write_u16::<LittleEndian>(extra_len)?;
        buf.extend_from_slice(name);
        if self.zip64 {
            buf.write_u16::<LittleEndian>(ZIP64_EXTRA_ID)?;
            buf.write_u16::<LittleEndian>(16)?;
            buf.write_u64::<LittleEndian>(0)?;
            buf.write_u64::<LittleEndian>(0)?;
        }
        Ok(buf)
    }
}

/// Data descriptor written after each entry's compressed data.
pub struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    /// ZIP64 descriptors use 8-byte sizes.
    pub zip64: bool,
}

impl DataDescriptor {
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(24);
        buf.extend_from_slice(DATA_DESCRIPTOR_SIGNATURE);
        buf.write_u32::<LittleEndian>(self.crc32)?;
        if self.zip64 {
            buf.write_u64::<LittleEndian>(self.compressed_size)?;
            buf.write_u64::<LittleEndian>(self.uncompressed_size)?;
        } else {
            buf.write_u32::<LittleEndian>(to_u32(self.compressed_size)?)?;
            buf.write_u32::<LittleEndian>(to_u32(self.uncompressed_size)?)?;
        }
        Ok(buf)
    }
}

/// Central Directory File Header as emitted by the writer.
pub struct CentralDirectoryHeader<'a> {
    pub flags: u16,
    pub method: CompressionMethod,
    pub modified: DosDateTime,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub lfh_offset: u64,
    pub unix_mode: u32,
    pub file_name: &'a str,
}

impl CentralDirectoryHeader<'_> {
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let name = self.file_name.as_bytes();

        // ZIP64 extra field lists only the values that overflowed, in this order.
        let mut zip64_fields = Vec::new();
        let uncompressed = overflow(self.uncompressed_size, &mut zip64_fields);
        let compressed = overflow(self.compressed_size, &mut zip64_fields);
        let offset = overflow(self.lfh_offset, &mut zip64_fields);

        let mut extra = Vec::new();
        if !zip64_fields.is_empty() {
            extra.write_u16::<LittleEndian>(ZIP64_EXTRA_ID)?;
            extra.write_u16::<LittleEndian>((zip64_fields.len() * 8) as u16)?;
            for value in &zip64_fields {
                extra.write_u64::<LittleEndian>(*value)?;
            }
        }
        let version = if zip64_fields.is_empty() {
            VERSION_DEFLATE
        } else {
            VERSION_ZIP64
        };

        let mut buf = Vec::with_capacity(CDFH_MIN_SIZE + name.len() + extra.len());
        buf.extend_from_slice(CDFH_SIGNATURE);
        buf.write_u16::<LittleEndian>((HOST_UNIX << 8) | version)?;
        buf.write_u16::<LittleEndian>(version)?;
        buf.write_u16::<LittleEndian>(self.flags)?;
        buf.write_u16::<LittleEndian>(self.method.as_u16())?;
        buf.write_u16::<LittleEndian>(self.modified.time)?;
        buf.write_u16::<LittleEndian>(self.modified.date)?;
        buf.write_u32::<LittleEndian>(self.crc32)?;
        buf.write_u32::<LittleEndian>(compressed)?;
        buf.write_u32::<LittleEndian>(uncompressed)?;
        buf.write_u16::<LittleEndian>(name_len(name)?)?;
        buf.write_u16::<LittleEndian>(extra.len() as u16)?;
        buf.write_u16::<LittleEndian>(0)?; // comment length
        buf.write_u16::<LittleEndian>(0)?; // disk number start
        buf.write_u16::<LittleEndian>(0)?; // internal attributes
        buf.write_u32::<LittleEndian>(self.unix_mode << 16)?;
        buf.write_u32::<LittleEndian>(offset)?;
        buf.extend_from_slice(name);
        buf.extend_from_slice(&extra);
        Ok(buf)
    }
}

/// Store `value` in a 32-bit field, pushing it into the ZIP64 list when it overflows.
fn overflow(value: u64, zip64_fields: &mut Vec<u64>) -> u32 {
    match u32::try_from(value) {
        Ok(v) if v != ZIP64_MARKER_32 => v,
        _ => {
            zip64_fields.push(value);
            ZIP64_MARKER_32
        }
    }
}

fn name_len(name: &[u8]) -> io::Result<u16> {
    u16::try_from(name.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "entry name longer than 65535 bytes"))
}

fn to_u32(value: u64) -> io::Result<u32> {
    u32::try_from(value).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "entry exceeded 4 GiB without ZIP64 headers",
        )
    })
}

pub(crate) fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidArchive(message.into())
}

pub(crate) fn truncated(_: io::Error) -> Error {
    invalid("truncated record")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn dos_time_round_trips_through_entry_accessors() {
        let local = Local.with_ymd_and_hms(2024, 5, 17, 13, 45, 30).unwrap();
        let dos = DosDateTime::from_system_time(local.into());

        let entry = ZipFileEntry {
            file_name: "a.txt".into(),
            compression_method: CompressionMethod::Deflate,
            compressed_size: 0,
            uncompressed_size: 0,
            crc32: 0,
            lfh_offset: 0,
            last_mod_time: dos.time,
            last_mod_date: dos.date,
            is_directory: false,
            unix_mode: None,
        };
        assert_eq!(entry.mod_date(), (2024, 5, 17));
        assert_eq!(entry.mod_time(), (13, 45, 30));
    }

    #[test]
    fn pre_1980_times_clamp_to_dos_epoch() {
        assert_eq!(
            DosDateTime::from_system_time(SystemTime::UNIX_EPOCH),
            DosDateTime::EPOCH
        );
    }

    #[test]
    fn eocd_serializes_and_parses() {
        let eocd = EndOfCentralDirectory::for_directory(3, 150, 4096);
        let bytes = eocd.to_bytes().unwrap();
        assert_eq!(bytes.len(), EndOfCentralDirectory::SIZE);

        let parsed = EndOfCentralDirectory::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.total_entries, 3);
        assert_eq!(parsed.cd_size, 150);
        assert_eq!(parsed.cd_offset, 4096);
        assert!(!parsed.is_zip64());
    }

    #[test]
    fn eocd_saturates_to_zip64_markers() {
        let eocd = EndOfCentralDirectory::for_directory(70_000, 10, 5_000_000_000);
        assert!(eocd.is_zip64());
        assert_eq!(eocd.total_entries, ZIP64_MARKER_16);
        assert_eq!(eocd.cd_offset, ZIP64_MARKER_32);
        assert_eq!(eocd.cd_size, 10);
    }

    #[test]
    fn zip64_records_parse_back() {
        let record = Zip64EOCD::for_directory(70_000, 1234, 5_000_000_000);
        let bytes = record.to_bytes().unwrap();
        assert_eq!(bytes.len(), Zip64EOCD::MIN_SIZE);
        let parsed = Zip64EOCD::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.total_entries, 70_000);
        assert_eq!(parsed.cd_offset, 5_000_000_000);

        let locator = Zip64EOCDLocator {
            disk_with_eocd64: 0,
            eocd64_offset: 5_000_001_234,
            total_disks: 1,
        };
        let parsed = Zip64EOCDLocator::from_bytes(&locator.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed.eocd64_offset, 5_000_001_234);
    }

    #[test]
    fn central_header_moves_large_offset_into_extra_field() {
        let header = CentralDirectoryHeader {
            flags: FLAG_DATA_DESCRIPTOR,
            method: CompressionMethod::Deflate,
            modified: DosDateTime::EPOCH,
            crc32: 7,
            compressed_size: 10,
            uncompressed_size: 20,
            lfh_offset: 6_000_000_000,
            unix_mode: 0o100644,
            file_name: "big/offset.bin",
        };
        let bytes = header.to_bytes().unwrap();
        // fixed header + name + extra header + one u64
        assert_eq!(bytes.len(), CDFH_MIN_SIZE + 14 + 4 + 8);
        assert_eq!(&bytes[42..46], &ZIP64_MARKER_32.to_le_bytes());
    }

    #[test]
    fn small_descriptor_rejects_oversized_values() {
        let descriptor = DataDescriptor {
            crc32: 0,
            compressed_size: 5_000_000_000,
            uncompressed_size: 1,
            zip64: false,
        };
        assert!(descriptor.to_bytes().is_err());
    }
}
