//! Extraction target validation.
//!
//! Every path written during extraction must be a strict descendant of the
//! destination root. Entry names are resolved component by component against
//! the canonical root, and the nearest existing ancestor of each target is
//! re-checked after canonicalization so a symlink planted inside the
//! destination cannot redirect writes elsewhere.

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, IoContext, Result};

/// Canonical absolute form of the destination root.
pub fn canonical_root(root: &Path) -> Result<PathBuf> {
    root.canonicalize().at(root)
}

/// Resolve an archive entry name to an on-disk path below `root`.
///
/// `root` must already be canonical. Absolute names, drive prefixes, and any
/// `..` that climbs out of the root are rejected, as are names that resolve
/// to the root itself.
pub fn resolve_entry_path(root: &Path, entry_name: &str) -> Result<PathBuf> {
    let illegal = || Error::IllegalPath {
        entry: entry_name.to_string(),
        root: root.to_path_buf(),
    };

    if entry_name.contains('\0') {
        return Err(illegal());
    }

    // Archives written on Windows may use backslashes as separators
    let portable = entry_name.replace('\\', "/");

    let mut relative = PathBuf::new();
    for component in Path::new(&portable).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !relative.pop() {
                    return Err(illegal());
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(illegal()),
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(illegal());
    }

    let resolved = root.join(&relative);
    if !is_strict_descendant(root, &resolved) {
        return Err(illegal());
    }
    Ok(resolved)
}

/// Check that the nearest existing ancestor of `path` (or `path` itself)
/// still lies inside `root` once symlinks are resolved.
///
/// Called before anything is created for an entry, so a symlink already
/// present in the destination cannot redirect the write.
pub fn ensure_contained(root: &Path, path: &Path, entry_name: &str) -> Result<()> {
    let illegal = || Error::IllegalPath {
        entry: entry_name.to_string(),
        root: root.to_path_buf(),
    };

    let mut probe = path;
    loop {
        // symlink_metadata sees dangling links that exists() would skip
        if probe.symlink_metadata().is_ok() {
            let canonical = probe.canonicalize().map_err(|_| illegal())?;
            if canonical == root || is_strict_descendant(root, &canonical) {
                return Ok(());
            }
            return Err(illegal());
        }
        match probe.parent() {
            Some(parent) if parent.starts_with(root) => probe = parent,
            _ => return Err(illegal()),
        }
    }
}

fn is_strict_descendant(root: &Path, path: &Path) -> bool {
    path != root && path.starts_with(root)
}
