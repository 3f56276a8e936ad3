use std::path::Path;

use aurora_protocol::constants::MAP_FILE_EXTENSION;
use tracing::debug;

use crate::TransferError;

/// Checks that a download can write its map file to `path`.
///
/// Rejects:
/// - Empty paths and directories
/// - Missing or non-directory parents
/// - Read-only parents or read-only existing files
pub fn validate_download_target(path: &Path) -> Result<(), TransferError> {
    if path.as_os_str().is_empty() {
        return Err(TransferError::InvalidPath("empty path".into()));
    }
    if path.is_dir() {
        return Err(TransferError::InvalidPath(format!(
            "{} is a directory",
            path.display()
        )));
    }

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let parent_meta = std::fs::metadata(parent).map_err(|e| {
        TransferError::InvalidPath(format!("parent of {}: {e}", path.display()))
    })?;
    if !parent_meta.is_dir() {
        return Err(TransferError::InvalidPath(format!(
            "parent of {} is not a directory",
            path.display()
        )));
    }
    if parent_meta.permissions().readonly() {
        return Err(TransferError::InvalidPath(format!(
            "{} is not writable",
            parent.display()
        )));
    }

    if let Ok(meta) = std::fs::metadata(path)
        && meta.permissions().readonly()
    {
        return Err(TransferError::InvalidPath(format!(
            "{} is read-only",
            path.display()
        )));
    }

    note_extension(path);
    Ok(())
}

/// Checks that an upload can read a non-empty map file from `path`.
pub fn validate_upload_source(path: &Path) -> Result<(), TransferError> {
    if path.as_os_str().is_empty() {
        return Err(TransferError::InvalidPath("empty path".into()));
    }
    if !path.is_file() {
        return Err(TransferError::InvalidPath(format!(
            "{} is not a file",
            path.display()
        )));
    }

    let file = std::fs::File::open(path)
        .map_err(|e| TransferError::InvalidPath(format!("{}: {e}", path.display())))?;
    let size = file.metadata()?.len();
    if size == 0 {
        return Err(TransferError::InvalidPath(format!(
            "{} is empty",
            path.display()
        )));
    }

    note_extension(path);
    Ok(())
}

fn note_extension(path: &Path) {
    let matches = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(MAP_FILE_EXTENSION));
    if !matches {
        debug!(path = %path.display(), "map file without .{MAP_FILE_EXTENSION} extension");
    }
}
