// obsp-common/src/model/artifact.rs
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::rule::RulePath;
use crate::config::Config;
use crate::platform::PlatformContext;

/// Packaging format of a downloaded artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveKind {
    Deb,
    Zip,
    /// A zip whose only member is a (compressed) tarball.
    NestedTarInZip,
    Tar,
    #[serde(rename = "7z")]
    SevenZip,
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Deb => "deb",
            Self::Zip => "zip",
            Self::NestedTarInZip => "nested-tar-in-zip",
            Self::Tar => "tar",
            Self::SevenZip => "7z",
        };
        f.write_str(s)
    }
}

/// Where an artifact ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallTarget {
    Plugins,
    Themes,
    /// The application config root; used by archives already laid out like it.
    Config,
    /// The system package database.
    Packages,
}

impl InstallTarget {
    /// Directory archives are extracted into, `None` for package installs.
    pub fn dir(&self, config: &Config) -> Option<PathBuf> {
        match self {
            Self::Plugins => Some(config.plugin_dir()),
            Self::Themes => Some(config.theme_dir()),
            Self::Config => Some(config.config_dir().to_path_buf()),
            Self::Packages => None,
        }
    }
}

/// One manifest entry. Never mutated after the manifest is loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    pub id: String,
    pub kind: ArchiveKind,
    pub url: String,
    #[serde(default)]
    pub filename: Option<String>,
    /// Glob relative to the archive root restricting what gets extracted.
    #[serde(default)]
    pub sub_path: Option<String>,
    pub target: InstallTarget,
    #[serde(default)]
    pub rule: Option<String>,
    /// Only install when the UI toolkit has this major version.
    #[serde(default)]
    pub toolkit: Option<u8>,
    /// Only install on these distribution codenames.
    #[serde(default)]
    pub codenames: Option<Vec<String>>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Package name registered by a `deb` artifact.
    #[serde(default)]
    pub package: Option<String>,
    /// Paths an archive artifact owns, deleted when the artifact is retired.
    #[serde(default)]
    pub provides: Vec<RulePath>,
}

impl ArtifactDescriptor {
    /// Cache file name: the explicit `filename`, else the URL basename.
    pub fn cache_filename(&self) -> String {
        if let Some(name) = self.filename.as_ref().filter(|n| !n.is_empty()) {
            return name.clone();
        }
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| {
                u.path_segments()
                    .and_then(|mut segments| segments.next_back().map(str::to_string))
            })
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                tracing::debug!(
                    "URL {} has no file name component, using fallback name for '{}'",
                    self.url,
                    self.id
                );
                format!("{}-download", self.id)
            })
    }

    pub fn is_eligible(&self, platform: &PlatformContext) -> bool {
        let toolkit_ok = self
            .toolkit
            .is_none_or(|major| major == platform.toolkit_major);
        let codename_ok = self
            .codenames
            .as_ref()
            .is_none_or(|names| names.iter().any(|n| n == &platform.codename));
        toolkit_ok && codename_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(url: &str) -> ArtifactDescriptor {
        ArtifactDescriptor {
            id: "obs-gstreamer".into(),
            kind: ArchiveKind::Zip,
            url: url.into(),
            filename: None,
            sub_path: None,
            target: InstallTarget::Plugins,
            rule: None,
            toolkit: None,
            codenames: None,
            dependencies: vec![],
            package: None,
            provides: vec![],
        }
    }

    #[test]
    fn cache_filename_defaults_to_url_basename() {
        let d = descriptor("https://github.com/fzwoch/obs-gstreamer/releases/download/v0.4.0/obs-gstreamer.zip");
        assert_eq!(d.cache_filename(), "obs-gstreamer.zip");

        let mut named = d.clone();
        named.filename = Some("obs-gstreamer-0.4.0.zip".into());
        assert_eq!(named.cache_filename(), "obs-gstreamer-0.4.0.zip");

        let bare = descriptor("https://example.com/");
        assert_eq!(bare.cache_filename(), "obs-gstreamer-download");
    }

    #[test]
    fn eligibility_honours_toolkit_and_codename_gates() {
        let qt6 = PlatformContext::new("Ubuntu", "jammy", 6);
        let mut d = descriptor("https://example.com/a.zip");
        assert!(d.is_eligible(&qt6));

        d.toolkit = Some(5);
        assert!(!d.is_eligible(&qt6));
        d.toolkit = Some(6);
        assert!(d.is_eligible(&qt6));

        d.codenames = Some(vec!["noble".into()]);
        assert!(!d.is_eligible(&qt6));
        d.codenames = Some(vec!["noble".into(), "jammy".into()]);
        assert!(d.is_eligible(&qt6));
    }

    #[test]
    fn kinds_use_manifest_spelling() {
        let kind: ArchiveKind = serde_json::from_str("\"nested-tar-in-zip\"").unwrap();
        assert_eq!(kind, ArchiveKind::NestedTarInZip);
        let kind: ArchiveKind = serde_json::from_str("\"7z\"").unwrap();
        assert_eq!(kind, ArchiveKind::SevenZip);
        assert_eq!(ArchiveKind::SevenZip.to_string(), "7z");
    }
}
