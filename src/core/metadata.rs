/*!
 * Attribute preservation (permissions, ownership, timestamps)
 */

use crate::error::{CollateError, Result};
use filetime::{set_file_times, set_symlink_file_times, FileTime};
use std::fs::Metadata;
use std::path::Path;

/// Preserve file or directory attributes from source to destination
///
/// Ownership is best effort: unprivileged users cannot give files away, and
/// that must not fail the copy.
pub fn preserve_metadata(source_path: &Path, dest_path: &Path) -> Result<()> {
    let metadata = std::fs::metadata(source_path).map_err(|e| {
        CollateError::Metadata(format!(
            "Failed to read metadata of {}: {}",
            source_path.display(),
            e
        ))
    })?;

    preserve_ownership(&metadata, dest_path, false);

    // Permissions after ownership: chown may clear setuid bits
    std::fs::set_permissions(dest_path, metadata.permissions()).map_err(|e| {
        CollateError::Metadata(format!(
            "Failed to set permissions on {}: {}",
            dest_path.display(),
            e
        ))
    })?;

    let accessed = FileTime::from_last_access_time(&metadata);
    let modified = FileTime::from_last_modification_time(&metadata);

    set_file_times(dest_path, accessed, modified).map_err(|e| {
        CollateError::Metadata(format!(
            "Failed to set timestamps on {}: {}",
            dest_path.display(),
            e
        ))
    })
}

/// Preserve the attributes of a symbolic link itself, not its target
pub fn preserve_symlink_metadata(source_path: &Path, dest_path: &Path) -> Result<()> {
    let metadata = std::fs::symlink_metadata(source_path).map_err(|e| {
        CollateError::Metadata(format!(
            "Failed to read link metadata of {}: {}",
            source_path.display(),
            e
        ))
    })?;

    preserve_ownership(&metadata, dest_path, true);

    let accessed = FileTime::from_last_access_time(&metadata);
    let modified = FileTime::from_last_modification_time(&metadata);

    set_symlink_file_times(dest_path, accessed, modified).map_err(|e| {
        CollateError::Metadata(format!(
            "Failed to set link timestamps on {}: {}",
            dest_path.display(),
            e
        ))
    })
}

#[cfg(unix)]
fn preserve_ownership(metadata: &Metadata, dest_path: &Path, is_link: bool) {
    use std::os::unix::fs::{chown, lchown, MetadataExt};

    let (uid, gid) = (Some(metadata.uid()), Some(metadata.gid()));
    let result = if is_link {
        lchown(dest_path, uid, gid)
    } else {
        chown(dest_path, uid, gid)
    };
    if let Err(e) = result {
        tracing::debug!("Keeping ownership of {}: {}", dest_path.display(), e);
    }
}

#[cfg(not(unix))]
fn preserve_ownership(_metadata: &Metadata, _dest_path: &Path, _is_link: bool) {}
