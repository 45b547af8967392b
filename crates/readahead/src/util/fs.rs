use std::{io, path::Path};

/// Best-effort removal of a file or a directory tree.
///
/// Returns whether the path is gone afterwards. Failures are logged and swallowed:
/// storage hygiene must never block playback.
pub fn try_delete(path: &Path) -> bool {
    let result = match path.symlink_metadata() {
        Ok(metadata) if metadata.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return true,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => {
            log::debug!("Failed to delete {}: {e}", path.display());
            false
        }
    }
}
