//! ZIP jobs on the local filesystem.
//!
//! Compression runs in two sequential phases: [`scan_source`] walks the
//! source once and records every regular file with its size, mode and
//! timestamp; [`write_zip`] then streams those files into the archive. The
//! scan result doubles as the pre-computed total for progress reporting.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::BufWriter;
use walkdir::WalkDir;

use crate::error::{Error, IoContext, Result};
use crate::io::{LocalFileReader, ProgressTracker, ProgressWriter, blocking};
use crate::zip::{DosDateTime, EntryHeader, ZipExtractor, ZipFileEntry, ZipWriter};

/// A regular file found while scanning a compression source.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    /// POSIX-style path relative to the source root.
    pub name: String,
    pub size: u64,
    pub unix_mode: u32,
    pub modified: DosDateTime,
}

/// What a finished compression wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: usize,
    pub uncompressed_size: u64,
    pub archive_size: u64,
}

/// Sum of the sizes of scanned files.
pub fn total_size(files: &[SourceFile]) -> u64 {
    files.iter().map(|f| f.size).sum()
}

/// Enumerate the regular files under `source` in a stable order.
///
/// A single file yields one entry named after its base name. Symlinks and
/// special files are skipped. `exclude`, when it already exists, is left out
/// so an archive written inside its own source tree does not include itself.
pub async fn scan_source(source: &Path, is_dir: bool, exclude: &Path) -> Result<Vec<SourceFile>> {
    let root = source.to_path_buf();
    let exclude = exclude.canonicalize().ok();
    blocking(source, move || scan_blocking(&root, is_dir, exclude.as_deref())).await
}

fn scan_blocking(source: &Path, is_dir: bool, exclude: Option<&Path>) -> Result<Vec<SourceFile>> {
    if !is_dir {
        let metadata = std::fs::metadata(source).at(source)?;
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::Path {
                path: source.to_path_buf(),
                source: std::io::Error::other("source has no file name"),
            })?;
        return Ok(vec![source_file(source, name, &metadata)]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(source).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(source).to_path_buf();
            Error::Io {
                path,
                source: e.into(),
            }
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if let Some(exclude) = exclude {
            if path.canonicalize().ok().as_deref() == Some(exclude) {
                log::debug!("skipping the archive itself: {}", path.display());
                continue;
            }
        }

        let relative = path.strip_prefix(source).unwrap_or(path);
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let metadata = entry.metadata().map_err(|e| Error::Io {
            path: path.to_path_buf(),
            source: e.into(),
        })?;
        files.push(source_file(path, name, &metadata));
    }
    Ok(files)
}

fn source_file(path: &Path, name: String, metadata: &std::fs::Metadata) -> SourceFile {
    let modified = metadata
        .modified()
        .map(DosDateTime::from_system_time)
        .unwrap_or(DosDateTime::EPOCH);
    SourceFile {
        path: path.to_path_buf(),
        name,
        size: metadata.len(),
        unix_mode: file_mode(metadata),
        modified,
    }
}

#[cfg(unix)]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode()
}

#[cfg(not(unix))]
fn file_mode(metadata: &std::fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o100444
    } else {
        0o100644
    }
}

/// Write `files` into a new ZIP archive at `dest`.
///
/// Every byte that reaches the archive file is counted on `tracker`. The
/// total must already be set. A failed job removes the partial archive.
pub async fn write_zip(
    files: &[SourceFile],
    dest: &Path,
    tracker: &mut ProgressTracker,
    buffer_size: usize,
) -> Result<ArchiveSummary> {
    let result = write_entries(files, dest, tracker, buffer_size).await;
    if result.is_err() {
        let _ = fs::remove_file(dest).await;
    }
    let (entries, uncompressed_size) = result?;

    let archive_size = fs::metadata(dest).await.at(dest)?.len();
    log::info!(
        "wrote {} entries to '{}' ({} -> {} bytes)",
        entries,
        dest.display(),
        uncompressed_size,
        archive_size
    );
    Ok(ArchiveSummary {
        entries,
        uncompressed_size,
        archive_size,
    })
}

async fn write_entries(
    files: &[SourceFile],
    dest: &Path,
    tracker: &mut ProgressTracker,
    buffer_size: usize,
) -> Result<(usize, u64)> {
    let file = fs::File::create(dest).await.at(dest)?;
    let sink = ProgressWriter::new(BufWriter::new(file), tracker);
    let mut writer = ZipWriter::new(sink, dest);
    let mut buffer = vec![0u8; buffer_size.max(1)];
    let mut stored = 0u64;

    for file in files {
        let mut input = fs::File::open(&file.path).await.at(&file.path)?;
        let header = EntryHeader {
            name: file.name.clone(),
            origin: file.path.clone(),
            unix_mode: file.unix_mode,
            modified: file.modified,
            size_hint: file.size,
        };
        stored += writer.write_entry(header, &mut input, &mut buffer).await?;
    }

    let count = writer.len();
    writer.finish().await?;
    Ok((count, stored))
}

/// Extract the ZIP archive at `archive` below `dest`, creating it if needed.
pub async fn extract_zip(
    archive: &Path,
    dest: &Path,
    tracker: &mut ProgressTracker,
    buffer_size: usize,
) -> Result<Vec<ZipFileEntry>> {
    fs::create_dir_all(dest).await.at(dest)?;
    let reader = Arc::new(LocalFileReader::new(archive)?);
    let extractor = ZipExtractor::new(reader);
    let entries = extractor
        .extract_all(dest, tracker, buffer_size.max(1))
        .await?;
    log::info!(
        "extracted {} entries from '{}' into '{}'",
        entries.len(),
        archive.display(),
        dest.display()
    );
    Ok(entries)
}

/// Read the Central Directory of `archive` without extracting anything.
pub async fn list_zip(archive: &Path) -> Result<Vec<ZipFileEntry>> {
    let reader = Arc::new(LocalFileReader::new(archive)?);
    ZipExtractor::new(reader).list_files().await
}
