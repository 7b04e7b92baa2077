// obsp-core/src/platform.rs
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use obsp_common::config::{Config, TOOLKIT_ENV};
use obsp_common::error::{ObspError, Result};
use obsp_common::model::Manifest;
use obsp_common::platform::PlatformContext;
use tracing::{debug, info, warn};

use crate::pkg::{PackageManager, PackageState};
use crate::process::{run_command, stderr_tail};

pub const OS_RELEASE_PATH: &str = "/etc/os-release";
pub const LSB_RELEASE_BIN: &str = "lsb_release";
pub const LSB_RELEASE_PACKAGE: &str = "lsb-release";
const OBS_PACKAGE: &str = "obs-studio";
/// Qt core runtime packages by toolkit major, newest naming first.
const QT_RUNTIMES: &[(u8, &[&str])] = &[
    (6, &["libqt6core6t64", "libqt6core6"]),
    (5, &["libqt5core5t64", "libqt5core5a"]),
];

/// Reports which distribution the host runs.
pub trait PlatformIdentity {
    fn distribution_id(&self) -> Result<String>;
    fn distribution_codename(&self) -> Result<String>;
}

/// Platform identity via the `lsb_release` utility.
#[derive(Debug, Default, Clone, Copy)]
pub struct LsbRelease;

impl LsbRelease {
    fn query(&self, flag: &str) -> Result<String> {
        let output = run_command(LSB_RELEASE_BIN, &[flag], None, &[])?;
        if !output.status.success() {
            return Err(ObspError::Precondition(format!(
                "{LSB_RELEASE_BIN} {flag} failed: {}",
                stderr_tail(&output)
            )));
        }
        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if value.is_empty() {
            return Err(ObspError::Precondition(format!(
                "{LSB_RELEASE_BIN} {flag} printed nothing"
            )));
        }
        Ok(value)
    }
}

impl PlatformIdentity for LsbRelease {
    fn distribution_id(&self) -> Result<String> {
        self.query("-is")
    }

    fn distribution_codename(&self) -> Result<String> {
        self.query("-cs")
    }
}

/// Parsed `/etc/os-release`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsRelease {
    fields: HashMap<String, String>,
}

impl OsRelease {
    pub fn parse(content: &str) -> Self {
        let fields = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .filter_map(|l| l.split_once('='))
            .map(|(k, v)| {
                let v = v.trim();
                let v = v
                    .strip_prefix('"')
                    .and_then(|s| s.strip_suffix('"'))
                    .or_else(|| v.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
                    .unwrap_or(v);
                (k.trim().to_string(), v.to_string())
            })
            .collect();
        Self { fields }
    }

    /// Reads the release file; a host without one is not supported.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ObspError::Precondition(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Ok(Self::parse(&content))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Codename of the Ubuntu base a derivative is built on.
    pub fn ubuntu_codename(&self) -> Option<&str> {
        self.get("UBUNTU_CODENAME")
    }
}

/// Toolkit major of an OBS Studio already on the host, judged by which Qt
/// core runtime is installed next to it. `None` when OBS is absent or the
/// package database cannot tell.
pub fn installed_toolkit(manager: &dyn PackageManager) -> Option<u8> {
    let installed = |name: &str| match manager.state(name) {
        Ok(state) => state == PackageState::Installed,
        Err(e) => {
            debug!("Cannot query {}: {}", name, e);
            false
        }
    };
    if !installed(OBS_PACKAGE) {
        return None;
    }
    QT_RUNTIMES
        .iter()
        .find(|(_, packages)| packages.iter().any(|&p| installed(p)))
        .map(|(major, _)| *major)
}

/// Checks the host against the manifest and derives the toolkit version.
/// The codename table names the toolkit the repository's OBS build uses; an
/// installed OBS on another toolkit is replaced by the base install, so it is
/// only reported.
pub fn resolve_platform(
    identity: &dyn PlatformIdentity,
    os_release: &OsRelease,
    manifest: &Manifest,
    config: &Config,
    installed: Option<u8>,
) -> Result<PlatformContext> {
    let distribution = identity.distribution_id()?;
    if !manifest.supports_distribution(&distribution) {
        return Err(ObspError::Precondition(format!(
            "Unsupported distribution '{}' (supported: {})",
            distribution,
            manifest.distributions.join(", ")
        )));
    }

    let codename = match os_release.ubuntu_codename() {
        Some(c) => {
            debug!("Using UBUNTU_CODENAME '{}' from os-release", c);
            c.to_string()
        }
        None => identity.distribution_codename()?,
    };
    let table_major = manifest.toolkit_for(&codename).ok_or_else(|| {
        ObspError::Precondition(format!(
            "Unsupported codename '{}' (supported: {})",
            codename,
            manifest
                .codenames
                .keys()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        ))
    })?;

    match installed {
        Some(major) if major != table_major => warn!(
            "Installed OBS Studio uses Qt {}; {} ships Qt {}, which replaces it",
            major, codename, table_major
        ),
        Some(major) => debug!("Installed OBS Studio already uses Qt {}", major),
        None => debug!("No installed OBS Studio to cross-check Qt {}", table_major),
    }

    let toolkit_major = match config.toolkit_override {
        Some(forced) if forced != table_major => {
            info!(
                "{} forces toolkit {} instead of {} on {}",
                TOOLKIT_ENV, forced, table_major, codename
            );
            forced
        }
        _ => table_major,
    };
    Ok(PlatformContext::new(&distribution, &codename, toolkit_major))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str, &'static str);

    impl PlatformIdentity for Fixed {
        fn distribution_id(&self) -> Result<String> {
            Ok(self.0.to_string())
        }
        fn distribution_codename(&self) -> Result<String> {
            Ok(self.1.to_string())
        }
    }

    const MINT: &str = r#"NAME="Linux Mint"
VERSION="21.3 (Virginia)"
ID=linuxmint
ID_LIKE="ubuntu debian"
# comment
VERSION_CODENAME=virginia
UBUNTU_CODENAME=jammy
"#;

    #[test]
    fn os_release_fields_are_unquoted() {
        let release = OsRelease::parse(MINT);
        assert_eq!(release.get("NAME"), Some("Linux Mint"));
        assert_eq!(release.get("ID"), Some("linuxmint"));
        assert_eq!(release.ubuntu_codename(), Some("jammy"));
        assert_eq!(release.get("MISSING"), None);
    }

    #[test]
    fn missing_os_release_is_a_precondition_failure() {
        let err = OsRelease::load(Path::new("/nonexistent/os-release")).unwrap_err();
        assert!(matches!(err, ObspError::Precondition(_)));
    }

    #[test]
    fn derivative_uses_its_ubuntu_base() {
        let manifest = Manifest::embedded().unwrap();
        let config = Config::with_home("alice", Path::new("/home/alice"));
        let platform = resolve_platform(
            &Fixed("Linuxmint", "virginia"),
            &OsRelease::parse(MINT),
            &manifest,
            &config,
            None,
        )
        .unwrap();
        assert_eq!(platform, PlatformContext::new("Linuxmint", "jammy", 6));
    }

    #[test]
    fn codename_table_and_override_pick_the_toolkit() {
        let manifest = Manifest::embedded().unwrap();
        let mut config = Config::with_home("alice", Path::new("/home/alice"));
        let empty = OsRelease::default();

        let focal =
            resolve_platform(&Fixed("Ubuntu", "focal"), &empty, &manifest, &config, None).unwrap();
        assert_eq!(focal.toolkit_major, 5);

        config.toolkit_override = Some(6);
        let forced =
            resolve_platform(&Fixed("Ubuntu", "focal"), &empty, &manifest, &config, None).unwrap();
        assert_eq!(forced.toolkit_major, 6);
    }

    #[test]
    fn unsupported_hosts_are_rejected() {
        let manifest = Manifest::embedded().unwrap();
        let config = Config::with_home("alice", Path::new("/home/alice"));
        let empty = OsRelease::default();

        let err = resolve_platform(&Fixed("Fedora", "forty"), &empty, &manifest, &config, None)
            .unwrap_err();
        assert!(matches!(err, ObspError::Precondition(m) if m.contains("Fedora")));

        let err = resolve_platform(&Fixed("Ubuntu", "bionic"), &empty, &manifest, &config, None)
            .unwrap_err();
        assert!(matches!(err, ObspError::Precondition(m) if m.contains("bionic")));

        assert!(resolve_platform(&Fixed("ubuntu", "noble"), &empty, &manifest, &config, None).is_ok());
    }

    #[derive(Default)]
    struct Installed(Vec<&'static str>);

    impl PackageManager for Installed {
        fn update(&self) -> Result<()> {
            Ok(())
        }
        fn add_repository(&self, _identifier: &str) -> Result<()> {
            Ok(())
        }
        fn download_to_directory(&self, _name: &str, _dir: &Path) -> Result<()> {
            Ok(())
        }
        fn install_by_name(&self, _name: &str) -> Result<()> {
            Ok(())
        }
        fn install_by_path(&self, _path: &Path) -> Result<()> {
            Ok(())
        }
        fn fix_broken(&self) -> Result<()> {
            Ok(())
        }
        fn state(&self, name: &str) -> Result<PackageState> {
            Ok(if self.0.iter().any(|n| *n == name) {
                PackageState::Installed
            } else {
                PackageState::NotInstalled
            })
        }
        fn remove(&self, _name: &str, _purge: bool) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn installed_obs_reports_its_qt() {
        assert_eq!(installed_toolkit(&Installed::default()), None);
        assert_eq!(installed_toolkit(&Installed(vec!["libqt6core6"])), None);
        assert_eq!(
            installed_toolkit(&Installed(vec!["obs-studio", "libqt5core5a"])),
            Some(5)
        );
        assert_eq!(
            installed_toolkit(&Installed(vec!["obs-studio", "libqt5core5a", "libqt6core6t64"])),
            Some(6)
        );
        assert_eq!(installed_toolkit(&Installed(vec!["obs-studio"])), None);
    }

    #[test]
    fn repository_toolkit_wins_over_installed_obs() {
        let manifest = Manifest::embedded().unwrap();
        let config = Config::with_home("alice", Path::new("/home/alice"));
        let empty = OsRelease::default();
        let jammy =
            resolve_platform(&Fixed("Ubuntu", "jammy"), &empty, &manifest, &config, Some(5))
                .unwrap();
        assert_eq!(jammy.toolkit_major, 6);
    }
}

