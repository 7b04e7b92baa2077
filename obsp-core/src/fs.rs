// obsp-core/src/fs.rs
// Filesystem primitives shared by extraction, rules and the orchestrator.
use std::fs;
use std::io;
use std::os::unix::fs::symlink;
use std::path::Path;

use obsp_common::error::{ObspError, Result};
use tracing::{debug, error};

/// Checks if a path exists without following symlinks.
pub fn check_symlink_exists(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

/// Creates a directory and all its parent components if they are missing.
pub fn create_dir_all(path: &Path) -> Result<()> {
    debug!("Creating directory recursively: {}", path.display());
    fs::create_dir_all(path).map_err(|e| {
        error!("Failed create dir {}: {}", path.display(), e);
        ObspError::Io(std::sync::Arc::new(io::Error::new(
            e.kind(),
            format!("Failed to create {}: {}", path.display(), e),
        )))
    })
}

/// Removes whatever is at `path`: a directory tree, a file or a symlink
/// (the link itself, never its target). Returns whether anything was removed.
pub fn remove_path(path: &Path) -> Result<bool> {
    let meta = match path.symlink_metadata() {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(ObspError::from(e)),
    };
    if meta.is_dir() {
        debug!("Removing directory recursively: {}", path.display());
        fs::remove_dir_all(path)
    } else {
        debug!("Removing file: {}", path.display());
        fs::remove_file(path)
    }
    .map_err(|e| {
        error!("Failed to remove {}: {}", path.display(), e);
        ObspError::Io(std::sync::Arc::new(io::Error::new(
            e.kind(),
            format!("Failed to remove {}: {}", path.display(), e),
        )))
    })?;
    Ok(true)
}

/// Wipes `path` and recreates it empty.
pub fn recreate_dir(path: &Path) -> Result<()> {
    if remove_path(path)? {
        debug!("Wiped {}", path.display());
    }
    create_dir_all(path)
}

/// Creates (or repoints) a symlink at `link` pointing to `target`.
pub fn create_symlink(target: &Path, link: &Path) -> Result<()> {
    if let Ok(existing) = fs::read_link(link) {
        if existing == target {
            debug!("Symlink {} already points to {}", link.display(), target.display());
            return Ok(());
        }
    }
    remove_path(link)?;
    if let Some(parent) = link.parent() {
        create_dir_all(parent)?;
    }
    debug!("Creating symlink {} -> {}", link.display(), target.display());
    symlink(target, link).map_err(|e| {
        error!(
            "Failed create symlink {} -> {}: {}",
            link.display(),
            target.display(),
            e
        );
        ObspError::from(e)
    })
}

/// Renames `from` to `to`, replacing anything already at `to`.
pub fn replace_with(from: &Path, to: &Path) -> Result<()> {
    remove_path(to)?;
    if let Some(parent) = to.parent() {
        create_dir_all(parent)?;
    }
    debug!("Moving {} -> {}", from.display(), to.display());
    fs::rename(from, to).map_err(|e| {
        error!("Failed to move {} to {}: {}", from.display(), to.display(), e);
        ObspError::from(e)
    })
}
