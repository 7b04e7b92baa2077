// obsp-core/src/install/extract.rs
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek};
use std::os::unix::fs as unix_fs;
use std::path::{Component, Path, PathBuf};

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use glob::Pattern;
use obsp_common::error::{ObspError, Result};
use obsp_common::model::ArchiveKind;
use obsp_common::CacheEntry;
use tar::{Archive, EntryType};
use tracing::{debug, error, warn};
use xz2::read::XzDecoder;
use zip::read::ZipArchive;

use super::sevenz;
use crate::pkg::{PackageInstaller, PackageSource};

/// Top-level paths an extraction wrote under its target directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedSet {
    roots: BTreeSet<PathBuf>,
}

impl ExtractedSet {
    pub fn roots(&self) -> impl Iterator<Item = &Path> {
        self.roots.iter().map(PathBuf::as_path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.roots.contains(path)
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Records `relative` (a safe in-archive path) as written below `target_dir`.
    pub(crate) fn record(&mut self, target_dir: &Path, relative: &Path) {
        if let Some(Component::Normal(first)) = relative
            .components()
            .find(|c| !matches!(c, Component::CurDir))
        {
            self.roots.insert(target_dir.join(first));
        }
    }
}

/// Compression wrapped around a tarball.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TarCompression {
    None,
    Gzip,
    Xz,
    Bzip2,
}

impl TarCompression {
    pub fn from_file_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::Gzip)
        } else if name.ends_with(".tar.xz") || name.ends_with(".txz") {
            Some(Self::Xz)
        } else if name.ends_with(".tar.bz2") || name.ends_with(".tbz2") || name.ends_with(".tbz")
        {
            Some(Self::Bzip2)
        } else if name.ends_with(".tar") {
            Some(Self::None)
        } else {
            None
        }
    }

    pub fn sniff(head: &[u8]) -> Option<Self> {
        match infer::get(head).map(|t| t.mime_type()) {
            Some("application/gzip") => Some(Self::Gzip),
            Some("application/x-xz") => Some(Self::Xz),
            Some("application/x-bzip2") => Some(Self::Bzip2),
            Some("application/x-tar") => Some(Self::None),
            _ => None,
        }
    }
}

/// Extracts archives into place; `deb` archives go to the package manager.
pub struct ArchiveExtractor<'a> {
    installer: &'a PackageInstaller<'a>,
}

impl<'a> ArchiveExtractor<'a> {
    pub fn new(installer: &'a PackageInstaller<'a>) -> Self {
        Self { installer }
    }

    /// Extracts `entry` as `kind`. `target_dir` is required for every kind
    /// but `deb`; `filter` is a glob over in-archive paths.
    pub fn extract(
        &self,
        kind: ArchiveKind,
        entry: &CacheEntry,
        target_dir: Option<&Path>,
        filter: Option<&str>,
    ) -> Result<ExtractedSet> {
        if kind == ArchiveKind::Deb {
            self.installer.install(PackageSource::File(&entry.path))?;
            return Ok(ExtractedSet::default());
        }
        let target_dir = target_dir.ok_or_else(|| {
            ObspError::Extraction(format!(
                "No target directory for {} archive {}",
                kind, entry.filename
            ))
        })?;
        extract_archive(kind, &entry.path, target_dir, filter)
    }
}

/// Extracts a non-`deb` archive. Every failure is reported as
/// [`ObspError::Extraction`].
pub fn extract_archive(
    kind: ArchiveKind,
    archive_path: &Path,
    target_dir: &Path,
    filter: Option<&str>,
) -> Result<ExtractedSet> {
    debug!(
        "Extracting {} archive '{}' to '{}' (filter: {:?})",
        kind,
        archive_path.display(),
        target_dir.display(),
        filter
    );
    extract_inner(kind, archive_path, target_dir, filter).map_err(|e| match e {
        e @ ObspError::Extraction(_) => e,
        other => ObspError::Extraction(format!("{}: {}", archive_path.display(), other)),
    })
}

fn extract_inner(
    kind: ArchiveKind,
    archive_path: &Path,
    target_dir: &Path,
    filter: Option<&str>,
) -> Result<ExtractedSet> {
    let filter = filter
        .map(|f| {
            Pattern::new(f).map_err(|e| {
                ObspError::Extraction(format!("Invalid sub-path filter '{f}': {e}"))
            })
        })
        .transpose()?;

    fs::create_dir_all(target_dir).map_err(|e| {
        ObspError::Io(std::sync::Arc::new(io::Error::new(
            e.kind(),
            format!(
                "Failed to create target directory {}: {}",
                target_dir.display(),
                e
            ),
        )))
    })?;

    if kind == ArchiveKind::SevenZip {
        return sevenz::extract(archive_path, target_dir);
    }

    let file = File::open(archive_path).map_err(|e| {
        ObspError::Io(std::sync::Arc::new(io::Error::new(
            e.kind(),
            format!("Failed to open archive {}: {}", archive_path.display(), e),
        )))
    })?;
    let name = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    match kind {
        ArchiveKind::Zip => extract_zip_archive(file, target_dir, filter.as_ref(), archive_path),
        ArchiveKind::Tar => {
            let reader = tar_stream(file, &name)?;
            extract_tar_archive(reader, target_dir, filter.as_ref(), archive_path)
        }
        ArchiveKind::NestedTarInZip => {
            extract_nested_tar(file, target_dir, filter.as_ref(), archive_path)
        }
        ArchiveKind::Deb | ArchiveKind::SevenZip => Err(ObspError::Extraction(format!(
            "{} archives are not handled by the archive reader",
            kind
        ))),
    }
}

/// Wraps `reader` in the decoder matching `name`, sniffing the first bytes
/// when the name does not tell.
fn tar_stream<'r, R: Read + 'r>(mut reader: R, name: &str) -> Result<Box<dyn Read + 'r>> {
    let (compression, reader): (TarCompression, Box<dyn Read + 'r>) =
        match TarCompression::from_file_name(name) {
            Some(c) => (c, Box::new(reader)),
            None => {
                let mut head = Vec::with_capacity(512);
                reader.by_ref().take(512).read_to_end(&mut head)?;
                let c = TarCompression::sniff(&head).ok_or_else(|| {
                    ObspError::Extraction(format!("'{name}' is not a recognised tarball"))
                })?;
                (c, Box::new(Cursor::new(head).chain(reader)))
            }
        };
    debug!("Tarball '{}' uses {:?} compression", name, compression);
    Ok(match compression {
        TarCompression::None => reader,
        TarCompression::Gzip => Box::new(GzDecoder::new(reader)),
        TarCompression::Xz => Box::new(XzDecoder::new(reader)),
        TarCompression::Bzip2 => Box::new(BzDecoder::new(reader)),
    })
}

/// A zip whose single member is a tarball, streamed straight into the tar
/// reader.
fn extract_nested_tar<R: Read + Seek>(
    reader: R,
    target_dir: &Path,
    filter: Option<&Pattern>,
    archive_path_for_log: &Path,
) -> Result<ExtractedSet> {
    let mut archive = ZipArchive::new(reader).map_err(|e| {
        ObspError::Extraction(format!(
            "Failed to open ZIP {}: {}",
            archive_path_for_log.display(),
            e
        ))
    })?;

    let mut members = Vec::new();
    for i in 0..archive.len() {
        let file = archive.by_index_raw(i).map_err(|e| {
            ObspError::Extraction(format!(
                "Error reading ZIP index {} in {}: {}",
                i,
                archive_path_for_log.display(),
                e
            ))
        })?;
        if !file.is_dir() {
            members.push(i);
        }
    }
    let index = match members.as_slice() {
        [only] => *only,
        _ => {
            return Err(ObspError::Extraction(format!(
                "Expected exactly one tarball inside {}, found {} file(s)",
                archive_path_for_log.display(),
                members.len()
            )))
        }
    };

    let member = archive.by_index(index).map_err(|e| {
        ObspError::Extraction(format!(
            "Error reading ZIP index {} in {}: {}",
            index,
            archive_path_for_log.display(),
            e
        ))
    })?;
    let member_name = member.name().to_string();
    debug!(
        "Streaming nested tarball '{}' from {}",
        member_name,
        archive_path_for_log.display()
    );
    let stream = tar_stream(member, &member_name)?;
    extract_tar_archive(stream, target_dir, filter, archive_path_for_log)
}

/// Joins a relative in-archive path onto `target_dir`, refusing anything that
/// could land outside of it.
fn safe_join(target_dir: &Path, path_in_archive: &Path) -> std::result::Result<PathBuf, String> {
    let mut out = target_dir.to_path_buf();
    for comp in path_in_archive.components() {
        match comp {
            Component::Normal(p) => out.push(p),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(format!(
                    "Unsafe '..' in archive path {}",
                    path_in_archive.display()
                ))
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(format!(
                    "Disallowed component {:?} in archive path {}",
                    comp,
                    path_in_archive.display()
                ))
            }
        }
    }
    if out == target_dir {
        return Err(format!("Empty archive path {}", path_in_archive.display()));
    }
    Ok(out)
}

/// Fails when the deepest existing ancestor of `path` (itself included when
/// `include_self`) resolves outside `target_dir`. A symlink left by an earlier
/// entry or an earlier run must not redirect a write.
fn ensure_within(
    target_dir: &Path,
    path: &Path,
    include_self: bool,
) -> std::result::Result<(), String> {
    let root = target_dir
        .canonicalize()
        .map_err(|e| format!("Cannot resolve {}: {}", target_dir.display(), e))?;
    let mut current = if include_self { Some(path) } else { path.parent() };
    while let Some(dir) = current {
        if dir.symlink_metadata().is_ok() {
            let resolved = dir
                .canonicalize()
                .map_err(|e| format!("Cannot resolve {}: {}", dir.display(), e))?;
            if resolved.starts_with(&root) {
                return Ok(());
            }
            return Err(format!(
                "Archive path {} resolves outside {} (via {})",
                path.display(),
                target_dir.display(),
                resolved.display()
            ));
        }
        current = dir.parent();
    }
    Err(format!("{} does not exist", target_dir.display()))
}

/// Symlink targets must be relative and stay below `target_dir` when
/// resolved from the link's directory.
fn check_link_target(
    target_dir: &Path,
    link_path: &Path,
    link_target: &Path,
) -> std::result::Result<(), String> {
    let escapes = || {
        format!(
            "Symlink {} -> {} points outside {}",
            link_path.display(),
            link_target.display(),
            target_dir.display()
        )
    };
    let mut depth = link_path
        .parent()
        .and_then(|p| p.strip_prefix(target_dir).ok())
        .map_or(0, |p| p.components().count());
    for comp in link_target.components() {
        match comp {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => depth = depth.checked_sub(1).ok_or_else(escapes)?,
            Component::Prefix(_) | Component::RootDir => return Err(escapes()),
        }
    }
    Ok(())
}

/// An entry passes when the pattern matches it or any of its ancestors, so
/// `linux` selects the whole directory and `linux/*` its contents.
fn selected(filter: Option<&Pattern>, path_in_archive: &Path) -> bool {
    let Some(pattern) = filter else {
        return true;
    };
    path_in_archive
        .ancestors()
        .filter(|p| !p.as_os_str().is_empty())
        .any(|p| pattern.matches_path(p))
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                ObspError::Io(std::sync::Arc::new(io::Error::new(
                    e.kind(),
                    format!("Failed create parent dir {}: {}", parent.display(), e),
                )))
            })?;
        }
    }
    Ok(())
}

/// Represents a hardlink operation that was deferred.
struct DeferredHardLink {
    link_path: PathBuf,
    target_path: PathBuf,
}

fn extract_tar_archive<R: Read>(
    reader: R,
    target_dir: &Path,
    filter: Option<&Pattern>,
    archive_path_for_log: &Path,
) -> Result<ExtractedSet> {
    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    debug!(
        "Starting TAR extraction for {}",
        archive_path_for_log.display()
    );

    let mut extracted = ExtractedSet::default();
    let mut deferred_hardlinks: Vec<DeferredHardLink> = Vec::new();
    let mut errors: Vec<String> = Vec::new();

    let entries = archive.entries().map_err(|e| {
        ObspError::Extraction(format!(
            "Failed to read TAR {}: {}",
            archive_path_for_log.display(),
            e
        ))
    })?;
    for entry_result in entries {
        let mut entry = entry_result.map_err(|e| {
            ObspError::Extraction(format!(
                "Error reading TAR entry from {}: {}",
                archive_path_for_log.display(),
                e
            ))
        })?;

        let path_in_archive: PathBuf = entry
            .path()
            .map_err(|e| {
                ObspError::Extraction(format!(
                    "Invalid path in TAR entry from {}: {}",
                    archive_path_for_log.display(),
                    e
                ))
            })?
            .into_owned();

        if path_in_archive
            .components()
            .all(|c| matches!(c, Component::CurDir))
        {
            continue;
        }
        if !selected(filter, &path_in_archive) {
            debug!("Skipping TAR entry outside filter: {:?}", path_in_archive);
            continue;
        }
        let target_path = match safe_join(target_dir, &path_in_archive) {
            Ok(p) => p,
            Err(msg) => {
                error!("{} in {}", msg, archive_path_for_log.display());
                errors.push(msg);
                continue;
            }
        };
        let entry_type = entry.header().entry_type();
        if let Err(msg) = ensure_within(target_dir, &target_path, entry_type.is_dir()) {
            error!("{} in {}", msg, archive_path_for_log.display());
            errors.push(msg);
            continue;
        }
        if entry_type == EntryType::Symlink {
            let verdict = match entry.link_name() {
                Ok(Some(link_name)) => check_link_target(target_dir, &target_path, &link_name),
                _ => Err(format!(
                    "Symlink entry '{}' has no link target name",
                    path_in_archive.display()
                )),
            };
            if let Err(msg) = verdict {
                error!("{} in {}", msg, archive_path_for_log.display());
                errors.push(msg);
                continue;
            }
        }
        create_parent(&target_path)?;
        extracted.record(target_dir, &path_in_archive);

        if entry_type == EntryType::Link {
            match entry.link_name() {
                Ok(Some(link_name)) => match safe_join(target_dir, &link_name) {
                    Ok(link_target) => {
                        debug!(
                            "Deferring hardlink: '{}' -> '{}'",
                            target_path.display(),
                            link_target.display()
                        );
                        deferred_hardlinks.push(DeferredHardLink {
                            link_path: target_path,
                            target_path: link_target,
                        });
                    }
                    Err(msg) => {
                        error!("{}", msg);
                        errors.push(msg);
                    }
                },
                _ => {
                    let msg = format!(
                        "Hardlink entry '{}' in {} has no link target name.",
                        path_in_archive.display(),
                        archive_path_for_log.display()
                    );
                    warn!("{}", msg);
                    errors.push(msg);
                }
            }
            continue;
        }

        // A previous run may have left a file or link where this entry goes.
        if !entry_type.is_dir() {
            if let Ok(meta) = target_path.symlink_metadata() {
                if !meta.is_dir() {
                    fs::remove_file(&target_path)?;
                }
            }
        }

        match entry.unpack(&target_path) {
            Ok(_) => debug!("Unpacked TAR entry to: {}", target_path.display()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!("Entry already exists at {}", target_path.display());
            }
            Err(e) => {
                let msg = format!(
                    "Failed to unpack entry {:?} to {}: {}. Entry type: {:?}",
                    path_in_archive,
                    target_path.display(),
                    e,
                    entry_type
                );
                error!("{}", msg);
                errors.push(msg);
            }
        }
    }

    for deferred in deferred_hardlinks {
        if let Err(msg) = ensure_within(target_dir, &deferred.target_path, true) {
            error!("{}", msg);
            errors.push(msg);
            continue;
        }
        if !deferred.target_path.exists() {
            let msg = format!(
                "Target '{}' for hardlink '{}' does not exist.",
                deferred.target_path.display(),
                deferred.link_path.display()
            );
            error!("{}", msg);
            errors.push(msg);
            continue;
        }
        if deferred.link_path.symlink_metadata().is_ok() {
            if let Err(e) = fs::remove_file(&deferred.link_path) {
                warn!(
                    "Could not remove existing file at hardlink destination {}: {}",
                    deferred.link_path.display(),
                    e
                );
            }
        }
        if let Err(e) = fs::hard_link(&deferred.target_path, &deferred.link_path) {
            let msg = format!(
                "Failed to create hardlink '{}' -> '{}': {}",
                deferred.link_path.display(),
                deferred.target_path.display(),
                e
            );
            error!("{}", msg);
            errors.push(msg);
        }
    }

    if !errors.is_empty() {
        return Err(ObspError::Extraction(format!(
            "Failed during TAR extraction for {} with {} error(s): {}",
            archive_path_for_log.display(),
            errors.len(),
            errors.join("; ")
        )));
    }

    debug!(
        "Finished TAR extraction for {} ({} top-level path(s))",
        archive_path_for_log.display(),
        extracted.len()
    );
    Ok(extracted)
}

fn extract_zip_archive<R: Read + Seek>(
    reader: R,
    target_dir: &Path,
    filter: Option<&Pattern>,
    archive_path_for_log: &Path,
) -> Result<ExtractedSet> {
    let mut archive = ZipArchive::new(reader).map_err(|e| {
        ObspError::Extraction(format!(
            "Failed to open ZIP {}: {}",
            archive_path_for_log.display(),
            e
        ))
    })?;
    debug!(
        "Starting ZIP extraction for {}",
        archive_path_for_log.display()
    );

    let mut extracted = ExtractedSet::default();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(|e| {
            ObspError::Extraction(format!(
                "Error reading ZIP index {} in {}: {}",
                i,
                archive_path_for_log.display(),
                e
            ))
        })?;

        let path_in_archive = match file.enclosed_name() {
            Some(p) => p.to_path_buf(),
            None => {
                return Err(ObspError::Extraction(format!(
                    "Unsafe ZIP entry name '{}' in {}",
                    file.name(),
                    archive_path_for_log.display()
                )));
            }
        };
        if !selected(filter, &path_in_archive) {
            debug!(
                "Skipping ZIP entry outside filter: {}",
                path_in_archive.display()
            );
            continue;
        }
        let target_path = safe_join(target_dir, &path_in_archive)
            .and_then(|p| ensure_within(target_dir, &p, file.is_dir()).map(|()| p))
            .map_err(|msg| {
                error!("{} in {}", msg, archive_path_for_log.display());
                ObspError::Extraction(msg)
            })?;
        create_parent(&target_path)?;
        extracted.record(target_dir, &path_in_archive);

        if file.is_dir() {
            if !target_path.exists() {
                fs::create_dir_all(&target_path).map_err(|e| {
                    ObspError::Io(std::sync::Arc::new(io::Error::new(
                        e.kind(),
                        format!("Failed create dir {}: {}", target_path.display(), e),
                    )))
                })?;
            }
            continue;
        }

        if let Ok(meta) = target_path.symlink_metadata() {
            if meta.is_dir() {
                return Err(ObspError::Extraction(format!(
                    "Directory in the way of ZIP entry {}",
                    target_path.display()
                )));
            }
            fs::remove_file(&target_path)?;
        }

        if file.is_symlink() {
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)?;
            let link_target = PathBuf::from(String::from_utf8_lossy(&buf).to_string());
            check_link_target(target_dir, &target_path, &link_target).map_err(|msg| {
                error!("{} in {}", msg, archive_path_for_log.display());
                ObspError::Extraction(msg)
            })?;
            unix_fs::symlink(&link_target, &target_path).map_err(|e| {
                debug!(
                    "Failed to create symlink {} -> {}: {}",
                    target_path.display(),
                    link_target.display(),
                    e
                );
                ObspError::Io(std::sync::Arc::new(e))
            })?;
            continue;
        }

        let mut out_file = File::create(&target_path).map_err(|e| {
            ObspError::Io(std::sync::Arc::new(io::Error::new(
                e.kind(),
                format!("Failed create file {}: {}", target_path.display(), e),
            )))
        })?;
        io::copy(&mut file, &mut out_file)?;
        if let Some(mode) = file.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target_path, fs::Permissions::from_mode(mode & 0o7777))?;
        }
    }
    debug!(
        "Finished ZIP extraction for {} ({} top-level path(s))",
        archive_path_for_log.display(),
        extracted.len()
    );
    Ok(extracted)
}
