// obsp-core/src/install/sevenz.rs
// 7z archives have no reader in our dependency stack, so the p7zip CLI does
// the work and its technical listing tells us what was written.
use std::path::{Component, Path, PathBuf};

use obsp_common::error::{ObspError, Result};
use tracing::debug;

use super::extract::ExtractedSet;
use crate::process::{run_command, stderr_tail};

const CANDIDATES: &[&str] = &["7z", "7za"];

fn locate_7z() -> Result<PathBuf> {
    CANDIDATES
        .iter()
        .find_map(|name| which::which(name).ok())
        .ok_or_else(|| {
            ObspError::Extraction(
                "No 7z executable found in PATH (install p7zip-full)".to_string(),
            )
        })
}

pub(crate) fn extract(archive_path: &Path, target_dir: &Path) -> Result<ExtractedSet> {
    let tool = locate_7z()?;
    let tool = tool.to_string_lossy();
    let archive = archive_path.to_string_lossy();
    debug!("Using {} for {}", tool, archive);

    let listing = run_command(&tool, &["l", "-ba", "-slt", &archive], None, &[])?;
    if !listing.status.success() {
        return Err(ObspError::Extraction(format!(
            "Cannot list {}: {}",
            archive,
            stderr_tail(&listing)
        )));
    }

    let out_flag = format!("-o{}", target_dir.display());
    let output = run_command(&tool, &["x", "-y", &out_flag, &archive], None, &[])?;
    if !output.status.success() {
        return Err(ObspError::Extraction(format!(
            "7z failed on {} ({}): {}",
            archive,
            output.status,
            stderr_tail(&output)
        )));
    }

    let mut extracted = ExtractedSet::default();
    for path in parse_7z_listing(&String::from_utf8_lossy(&listing.stdout)) {
        extracted.record(target_dir, &path);
    }
    debug!(
        "Extracted {} with {} top-level path(s)",
        archive,
        extracted.len()
    );
    Ok(extracted)
}

/// Entry paths from `7z l -slt` output. Without `-ba` a header block
/// describing the archive itself precedes a dashed separator; it is skipped.
pub fn parse_7z_listing(listing: &str) -> Vec<PathBuf> {
    let body = match listing.find("\n----------") {
        Some(pos) => &listing[pos..],
        None => listing,
    };
    body.lines()
        .filter_map(|line| line.strip_prefix("Path = "))
        .map(|p| PathBuf::from(p.trim()))
        .filter(|p| {
            p.components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        })
        .collect()
}
