// obsp-core/src/pkg/apt.rs
use std::path::Path;

use obsp_common::error::{ObspError, Result};
use tracing::debug;

use super::{PackageManager, PackageState};
use crate::process::{run_command, stderr_tail};

const NONINTERACTIVE: &[(&str, &str)] = &[("DEBIAN_FRONTEND", "noninteractive")];

/// `apt-get`/`dpkg` backed package manager.
#[derive(Debug, Default, Clone, Copy)]
pub struct AptPackageManager;

impl AptPackageManager {
    pub fn new() -> Self {
        Self
    }

    fn run(&self, program: &str, args: &[&str], cwd: Option<&Path>) -> Result<()> {
        let output = run_command(program, args, cwd, NONINTERACTIVE)?;
        if output.status.success() {
            Ok(())
        } else {
            Err(ObspError::CommandExecError(format!(
                "{} {} exited with {}: {}",
                program,
                args.join(" "),
                output.status,
                stderr_tail(&output)
            )))
        }
    }

    fn install(&self, program: &str, args: &[&str], target: &str) -> Result<()> {
        let output = run_command(program, args, None, NONINTERACTIVE)?;
        if output.status.success() {
            Ok(())
        } else {
            debug!("{} failed: {}", target, stderr_tail(&output));
            Err(ObspError::InstallError {
                target: target.to_string(),
                exit_code: output.status.code(),
            })
        }
    }
}

impl PackageManager for AptPackageManager {
    fn update(&self) -> Result<()> {
        self.run("apt-get", &["update", "-q"], None)
    }

    fn add_repository(&self, identifier: &str) -> Result<()> {
        // -n defers the index refresh to update()
        self.run("add-apt-repository", &["-y", "-n", identifier], None)
    }

    fn download_to_directory(&self, name: &str, dir: &Path) -> Result<()> {
        self.run("apt-get", &["download", name], Some(dir))
    }

    fn install_by_name(&self, name: &str) -> Result<()> {
        self.install("apt-get", &["install", "-y", "-q", name], name)
    }

    fn install_by_path(&self, path: &Path) -> Result<()> {
        let display = path.display().to_string();
        let path_str = path.to_str().ok_or_else(|| {
            ObspError::Generic(format!("Package path is not valid UTF-8: {display}"))
        })?;
        self.install("dpkg", &["-i", path_str], &display)
    }

    fn fix_broken(&self) -> Result<()> {
        self.install("apt-get", &["install", "-f", "-y", "-q"], "dependencies")
    }

    fn state(&self, name: &str) -> Result<PackageState> {
        let output = run_command(
            "dpkg-query",
            &["-W", "-f=${Status}", name],
            None,
            NONINTERACTIVE,
        )?;
        if !output.status.success() {
            // dpkg-query exits non-zero for packages it has never seen
            return Ok(PackageState::NotInstalled);
        }
        let status = String::from_utf8_lossy(&output.stdout);
        let state = parse_dpkg_status(&status);
        debug!("dpkg status of {}: '{}' -> {:?}", name, status.trim(), state);
        Ok(state)
    }

    fn remove(&self, name: &str, purge: bool) -> Result<()> {
        let action = if purge { "purge" } else { "remove" };
        self.run("apt-get", &[action, "-y", "-q", "--autoremove", name], None)
    }
}

/// Maps a `dpkg-query ${Status}` line ("want flag status") to a state.
pub fn parse_dpkg_status(status: &str) -> PackageState {
    match status.split_whitespace().nth(2) {
        Some("installed") => PackageState::Installed,
        Some("config-files") => PackageState::ConfigFiles,
        Some("not-installed") | None => PackageState::NotInstalled,
        Some(_) => PackageState::Partial,
    }
}
