// obsp-core/src/pkg/mod.rs
//! System package handling: the package-manager seam and the installer
//! built on top of it.

pub mod apt;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use obsp_common::error::{ObspError, Result};
use tracing::{debug, info, warn};

pub use self::apt::AptPackageManager;

/// What the package database says about a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageState {
    NotInstalled,
    Installed,
    /// Removed, but its configuration files are still registered.
    ConfigFiles,
    /// Half-installed, unpacked, triggers pending and similar.
    Partial,
}

/// Capabilities required from the host package manager.
pub trait PackageManager {
    fn update(&self) -> Result<()>;
    fn add_repository(&self, identifier: &str) -> Result<()>;
    /// Fetches (without installing) `name` into `dir`.
    fn download_to_directory(&self, name: &str, dir: &Path) -> Result<()>;
    fn install_by_name(&self, name: &str) -> Result<()>;
    fn install_by_path(&self, path: &Path) -> Result<()>;
    /// Installs whatever dependencies a previous install left unresolved.
    fn fix_broken(&self) -> Result<()>;
    fn state(&self, name: &str) -> Result<PackageState>;
    fn remove(&self, name: &str, purge: bool) -> Result<()>;
}

/// A package addressed by repository name or by a local archive file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageSource<'a> {
    Name(&'a str),
    File(&'a Path),
}

impl std::fmt::Display for PackageSource<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

pub struct PackageInstaller<'a> {
    manager: &'a dyn PackageManager,
    cache_dir: PathBuf,
}

impl<'a> PackageInstaller<'a> {
    pub fn new(manager: &'a dyn PackageManager, cache_dir: &Path) -> Self {
        Self {
            manager,
            cache_dir: cache_dir.to_path_buf(),
        }
    }

    pub fn manager(&self) -> &'a dyn PackageManager {
        self.manager
    }

    /// Downloads `name` into the cache directory and returns the archive
    /// file the package manager produced for it. Files written by this
    /// download win over older cached ones; among those the highest version
    /// is picked.
    pub fn download_package(&self, name: &str) -> Result<PathBuf> {
        debug!(
            "Downloading package {} into {}",
            name,
            self.cache_dir.display()
        );
        let before = package_files(&self.cache_dir, name)?;
        self.manager.download_to_directory(name, &self.cache_dir)?;
        let after = package_files(&self.cache_dir, name)?;

        let fresh: Vec<&PathBuf> = after
            .iter()
            .filter(|(path, modified)| before.get(*path) != Some(*modified))
            .map(|(path, _)| path)
            .collect();
        let pool: Vec<&PathBuf> = if fresh.is_empty() {
            debug!("Download of {} wrote no new file, using the cache", name);
            after.keys().collect()
        } else {
            fresh
        };
        pool.into_iter()
            .max_by(|a, b| {
                compare_versions(&package_version(a, name), &package_version(b, name))
                    .then_with(|| a.cmp(b))
            })
            .cloned()
            .ok_or_else(|| ObspError::PackageNotFound(name.to_string()))
    }

    /// Installs a package. A local file whose install fails gets one
    /// dependency-resolution pass; if that succeeds, so did the install.
    pub fn install(&self, source: PackageSource<'_>) -> Result<()> {
        info!("Installing {}", source);
        match source {
            PackageSource::Name(name) => self.manager.install_by_name(name),
            PackageSource::File(path) => match self.manager.install_by_path(path) {
                Ok(()) => Ok(()),
                Err(original) => {
                    warn!(
                        "Install of {} failed ({}), attempting to resolve dependencies",
                        path.display(),
                        original
                    );
                    match self.manager.fix_broken() {
                        Ok(()) => {
                            debug!("Dependency resolution completed {}", path.display());
                            Ok(())
                        }
                        Err(e) => {
                            debug!("Dependency resolution failed: {}", e);
                            Err(original)
                        }
                    }
                }
            },
        }
    }

    pub fn install_all(&self, names: &[String]) -> Result<()> {
        for name in names {
            self.install(PackageSource::Name(name))?;
        }
        Ok(())
    }

    pub fn is_installed(&self, name: &str) -> Result<bool> {
        Ok(self.manager.state(name)? == PackageState::Installed)
    }

    /// Removes `name` and its now-unneeded dependents. Packages left only as
    /// configuration files are purged; absent packages are left alone.
    pub fn remove(&self, name: &str, purge: bool) -> Result<()> {
        match self.manager.state(name)? {
            PackageState::NotInstalled => {
                debug!("Package {} is not installed, nothing to remove", name);
                Ok(())
            }
            PackageState::ConfigFiles => {
                info!("Purging leftover configuration of {}", name);
                self.manager.remove(name, true)
            }
            PackageState::Installed | PackageState::Partial => {
                info!("Removing package {}", name);
                self.manager.remove(name, purge)
            }
        }
    }
}

/// Every `<name>_*.deb` in `dir` with its modification time.
fn package_files(dir: &Path, name: &str) -> Result<HashMap<PathBuf, Option<SystemTime>>> {
    let prefix = format!("{name}_");
    let mut files = HashMap::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        if file_name.starts_with(&prefix) && file_name.ends_with(".deb") {
            let modified = entry.metadata().and_then(|m| m.modified()).ok();
            files.insert(entry.path(), modified);
        }
    }
    Ok(files)
}

/// Version part of `<name>_<version>_<arch>.deb`. apt escapes the epoch
/// colon as `%3a`.
fn package_version(path: &Path, name: &str) -> String {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let rest = file_name
        .strip_prefix(name)
        .and_then(|r| r.strip_prefix('_'))
        .and_then(|r| r.strip_suffix(".deb"))
        .unwrap_or_default();
    let version = rest.rsplit_once('_').map_or(rest, |(v, _arch)| v);
    version.replace("%3a", ":").replace("%3A", ":")
}

/// Orders Debian package versions (`[epoch:]upstream[-revision]`) the way
/// dpkg does: `~` sorts before everything, digit runs compare numerically.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let (epoch_a, upstream_a, revision_a) = split_version(a);
    let (epoch_b, upstream_b, revision_b) = split_version(b);
    epoch_a
        .cmp(&epoch_b)
        .then_with(|| compare_fragment(upstream_a, upstream_b))
        .then_with(|| compare_fragment(revision_a, revision_b))
}

fn split_version(v: &str) -> (u64, &str, &str) {
    let (epoch, rest) = match v.split_once(':') {
        Some((e, rest)) => (e.parse().unwrap_or(0), rest),
        None => (0, v),
    };
    match rest.rsplit_once('-') {
        Some((upstream, revision)) => (epoch, upstream, revision),
        None => (epoch, rest, ""),
    }
}

fn char_order(c: Option<u8>) -> i32 {
    match c {
        None => 0,
        Some(b'~') => -1,
        Some(c) if c.is_ascii_digit() => 0,
        Some(c) if c.is_ascii_alphabetic() => i32::from(c),
        Some(c) => i32::from(c) + 256,
    }
}

fn compare_fragment(a: &str, b: &str) -> Ordering {
    let (mut a, mut b) = (a.as_bytes(), b.as_bytes());
    while !a.is_empty() || !b.is_empty() {
        loop {
            let ca = a.first().copied().filter(|c| !c.is_ascii_digit());
            let cb = b.first().copied().filter(|c| !c.is_ascii_digit());
            if ca.is_none() && cb.is_none() {
                break;
            }
            let ord = char_order(ca).cmp(&char_order(cb));
            if ord != Ordering::Equal {
                return ord;
            }
            if ca.is_some() {
                a = &a[1..];
            }
            if cb.is_some() {
                b = &b[1..];
            }
        }

        let digits_a = a.iter().take_while(|c| c.is_ascii_digit()).count();
        let digits_b = b.iter().take_while(|c| c.is_ascii_digit()).count();
        let trim = |d: &[u8]| -> usize { d.iter().take_while(|c| **c == b'0').count() };
        let num_a = &a[trim(&a[..digits_a])..digits_a];
        let num_b = &b[trim(&b[..digits_b])..digits_b];
        let ord = num_a.len().cmp(&num_b.len()).then_with(|| num_a.cmp(num_b));
        if ord != Ordering::Equal {
            return ord;
        }
        a = &a[digits_a..];
        b = &b[digits_b..];
    }
    Ordering::Equal
}
