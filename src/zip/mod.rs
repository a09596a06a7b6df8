//! ZIP archive reading and writing.
//!
//! ## Architecture
//!
//! - [`structures`]: ZIP format records (EOCD, headers, descriptors) with
//!   parsing and serialization
//! - [`parser`]: Low-level reading of the Central Directory
//! - [`extractor`]: Streaming extraction with path validation
//! - [`writer`]: Streaming archive creation
//! - [`compression`]: The DEFLATE filter every written entry goes through
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! Reading starts from the EOCD, then the Central Directory, so listing an
//! archive never touches entry data. Writing appends each entry followed by a
//! data descriptor and emits the directory last.
//!
//! ## Supported Features
//!
//! - ZIP64 extensions in both directions
//! - STORED and DEFLATE on extraction, DEFLATE at maximum level on creation
//! - UNIX permission bits in external attributes
//!
//! ## Limitations
//!
//! - No encryption support
//! - No multi-disk archive support
//! - No BZIP2, LZMA, or other compression methods

mod compression;
mod extractor;
mod parser;
mod structures;
mod writer;

pub use compression::MaxCompressionWriter;
pub use extractor::ZipExtractor;
pub use parser::{DirectoryLocation, ZipParser};
pub use structures::*;
pub use writer::{EntryHeader, ZipWriter};
