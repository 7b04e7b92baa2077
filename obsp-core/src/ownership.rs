// obsp-core/src/ownership.rs
use std::os::unix::fs::lchown;
use std::path::Path;

use obsp_common::error::{ObspError, Result};
use tracing::debug;
use walkdir::WalkDir;

/// Hands `root` and everything below it to `uid:gid`. Symlinks are re-owned
/// themselves, never followed. Returns how many entries were changed; a
/// missing `root` changes nothing.
pub fn chown_recursive(root: &Path, uid: u32, gid: u32) -> Result<usize> {
    if root.symlink_metadata().is_err() {
        debug!("{} does not exist, nothing to chown", root.display());
        return Ok(0);
    }
    let mut changed = 0;
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| {
            ObspError::Generic(format!("Failed to walk {}: {}", root.display(), e))
        })?;
        lchown(entry.path(), Some(uid), Some(gid)).map_err(|e| {
            ObspError::Io(std::sync::Arc::new(std::io::Error::new(
                e.kind(),
                format!("Failed to chown {}: {}", entry.path().display(), e),
            )))
        })?;
        changed += 1;
    }
    debug!(
        "Changed ownership of {} entr(y/ies) under {} to {}:{}",
        changed,
        root.display(),
        uid,
        gid
    );
    Ok(changed)
}
