// obsp-core/tests/common/mod.rs
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use obsp_common::error::{ObspError, Result};
use obsp_core::pkg::{PackageManager, PackageState};
use obsp_net::{TransferOutcome, Transport};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Serves fixed bodies by URL and records every request.
#[derive(Default)]
pub struct StubTransport {
    bodies: HashMap<String, Vec<u8>>,
    pub requests: RefCell<Vec<String>>,
}

impl StubTransport {
    pub fn serve(mut self, url: &str, body: Vec<u8>) -> Self {
        self.bodies.insert(url.to_string(), body);
        self
    }
}

impl Transport for StubTransport {
    async fn download(&self, url: &str, offset: u64, dest: &Path) -> Result<TransferOutcome> {
        self.requests.borrow_mut().push(url.to_string());
        let body = self.bodies.get(url).ok_or_else(|| ObspError::DownloadError {
            url: url.to_string(),
            cause: "Resource not found (404)".into(),
        })?;
        let mut data = if offset > 0 { fs::read(dest)? } else { Vec::new() };
        data.extend_from_slice(&body[offset as usize..]);
        fs::write(dest, &data)?;
        Ok(TransferOutcome::Written {
            resumed: offset > 0,
            bytes: body.len() as u64 - offset,
        })
    }
}

/// Package database in memory. A `.deb` fixture is a file whose content is
/// `package:<name>`.
#[derive(Default)]
pub struct FakeApt {
    pub installed: RefCell<BTreeSet<String>>,
    pub calls: RefCell<Vec<String>>,
    /// Names `install_by_name` refuses, as apt does for unknown packages.
    pub unavailable: BTreeSet<String>,
}

impl FakeApt {
    pub fn with_installed(names: &[&str]) -> Self {
        let apt = Self::default();
        apt.installed
            .borrow_mut()
            .extend(names.iter().map(|n| n.to_string()));
        apt
    }

    pub fn without(mut self, names: &[&str]) -> Self {
        self.unavailable.extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn has(&self, name: &str) -> bool {
        self.installed.borrow().contains(name)
    }

    fn log(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }
}

pub fn deb_fixture(package: &str) -> Vec<u8> {
    format!("package:{package}").into_bytes()
}

impl PackageManager for FakeApt {
    fn update(&self) -> Result<()> {
        self.log("update".into());
        Ok(())
    }

    fn add_repository(&self, identifier: &str) -> Result<()> {
        self.log(format!("add-repository {identifier}"));
        Ok(())
    }

    fn download_to_directory(&self, name: &str, dir: &Path) -> Result<()> {
        self.log(format!("download {name}"));
        fs::write(dir.join(format!("{name}_30.0_amd64.deb")), deb_fixture(name))?;
        Ok(())
    }

    fn install_by_name(&self, name: &str) -> Result<()> {
        self.log(format!("install {name}"));
        if self.unavailable.contains(name) {
            return Err(ObspError::InstallError {
                target: name.to_string(),
                exit_code: Some(100),
            });
        }
        self.installed.borrow_mut().insert(name.to_string());
        Ok(())
    }

    fn install_by_path(&self, path: &Path) -> Result<()> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.log(format!("install-file {file_name}"));
        let content = fs::read_to_string(path)?;
        match content.strip_prefix("package:") {
            Some(name) => {
                self.installed.borrow_mut().insert(name.to_string());
                Ok(())
            }
            None => Err(ObspError::InstallError {
                target: path.display().to_string(),
                exit_code: Some(1),
            }),
        }
    }

    fn fix_broken(&self) -> Result<()> {
        self.log("fix-broken".into());
        Err(ObspError::InstallError {
            target: "dependencies".into(),
            exit_code: Some(100),
        })
    }

    fn state(&self, name: &str) -> Result<PackageState> {
        self.log(format!("state {name}"));
        Ok(if self.has(name) {
            PackageState::Installed
        } else {
            PackageState::NotInstalled
        })
    }

    fn remove(&self, name: &str, purge: bool) -> Result<()> {
        self.log(format!("remove {name} purge={purge}"));
        self.installed.borrow_mut().remove(name);
        Ok(())
    }
}

pub fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (path, data) in files {
        zip.start_file(*path, SimpleFileOptions::default()).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

pub fn tar_gz_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, path, *data).unwrap();
    }
    let tar = builder.into_inner().unwrap();
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(&tar).unwrap();
    enc.finish().unwrap()
}

/// Sorted relative paths of everything below `root`; empty when absent.
pub fn listing(root: &Path) -> Vec<String> {
    if !root.exists() {
        return Vec::new();
    }
    let mut out: Vec<String> = walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|e| {
            e.unwrap()
                .path()
                .strip_prefix(root)
                .unwrap()
                .display()
                .to_string()
        })
        .collect();
    out.sort();
    out
}
