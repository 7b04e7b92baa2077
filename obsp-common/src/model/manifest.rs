// obsp-common/src/model/manifest.rs
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::artifact::{ArchiveKind, ArtifactDescriptor, InstallTarget};
use super::rule::{PostInstallRule, RulePath};
use crate::config::Config;
use crate::error::{ObspError, Result};
use crate::platform::PlatformContext;
use crate::validation::validate_url;

const EMBEDDED_MANIFEST: &str = include_str!("../../data/manifest.json");

/// What a previous run on another toolkit branch may have left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retirement<'a> {
    pub artifact: &'a ArtifactDescriptor,
    /// Package to remove; set for deb artifacts only.
    pub package: Option<&'a str>,
    /// Owned paths that no eligible artifact declares.
    pub paths: Vec<&'a RulePath>,
}

/// The static, ordered description of everything a run installs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Extra package repository registered before the index refresh.
    pub repository: String,
    /// Supported OS identities, compared case-insensitively.
    pub distributions: Vec<String>,
    /// Supported codenames and the UI-toolkit major version each ships.
    pub codenames: BTreeMap<String, u8>,
    /// Core application packages, installed in this order.
    pub base_packages: Vec<String>,
    pub artifacts: Vec<ArtifactDescriptor>,
    #[serde(default)]
    pub rules: BTreeMap<String, PostInstallRule>,
}

impl Manifest {
    pub fn embedded() -> Result<Self> {
        Self::from_json_str(EMBEDDED_MANIFEST)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        debug!("Reading manifest from {}", path.display());
        let raw = fs::read_to_string(path).map_err(|e| {
            ObspError::Config(format!("Failed to read manifest {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let manifest: Manifest = serde_json::from_str(raw)
            .map_err(|e| ObspError::Config(format!("Malformed manifest: {e}")))?;
        manifest.validate()?;
        debug!(
            "Manifest loaded: {} artifact(s), {} rule(s)",
            manifest.artifacts.len(),
            manifest.rules.len()
        );
        Ok(manifest)
    }

    /// The manifest named by `OBSP_MANIFEST`, else the embedded one.
    pub fn load(config: &Config) -> Result<Self> {
        match &config.manifest_path {
            Some(path) => Self::from_path(path),
            None => Self::embedded(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.repository.trim().is_empty() {
            return Err(ObspError::Config("Manifest has no repository".into()));
        }
        if self.distributions.is_empty() || self.codenames.is_empty() {
            return Err(ObspError::Config(
                "Manifest must list supported distributions and codenames".into(),
            ));
        }
        let toolkits: HashSet<u8> = self.codenames.values().copied().collect();

        for (id, rule) in &self.rules {
            if rule.variants.is_empty() {
                return Err(ObspError::Config(format!("Rule '{id}' has no variants")));
            }
            if let Some(major) = rule
                .variants
                .iter()
                .filter_map(|v| v.toolkit)
                .find(|major| !toolkits.contains(major))
            {
                return Err(ObspError::Config(format!(
                    "Rule '{id}' gates on unknown toolkit version {major}"
                )));
            }
        }

        let mut branches: HashMap<&str, Vec<Option<u8>>> = HashMap::new();
        for artifact in &self.artifacts {
            self.validate_artifact(artifact, &toolkits)?;
            let gates = branches.entry(artifact.id.as_str()).or_default();
            // Same id twice is only allowed as mutually exclusive toolkit branches.
            if gates
                .iter()
                .any(|g| g.is_none() || artifact.toolkit.is_none() || *g == artifact.toolkit)
            {
                return Err(ObspError::Config(format!(
                    "Artifact '{}' is declared more than once for the same toolkit branch",
                    artifact.id
                )));
            }
            gates.push(artifact.toolkit);
        }
        Ok(())
    }

    fn validate_artifact(&self, a: &ArtifactDescriptor, toolkits: &HashSet<u8>) -> Result<()> {
        let fail = |msg: String| Err(ObspError::Config(format!("Artifact '{}': {}", a.id, msg)));

        if a.id.trim().is_empty() {
            return Err(ObspError::Config("Artifact with empty id".into()));
        }
        validate_url(&a.url).or_else(|e| fail(e.to_string()))?;

        let filename = a.cache_filename();
        if filename.contains('/') || filename.starts_with('.') {
            return fail(format!("invalid cache file name '{filename}'"));
        }

        let is_deb = a.kind == ArchiveKind::Deb;
        if is_deb != (a.target == InstallTarget::Packages) {
            return fail("only deb artifacts may target the package database".into());
        }
        if is_deb && a.package.as_deref().is_none_or(str::is_empty) {
            return fail("deb artifacts must name their package".into());
        }
        if let Some(pattern) = &a.sub_path {
            if matches!(a.kind, ArchiveKind::Deb | ArchiveKind::SevenZip) {
                return fail(format!("sub_path is not supported for {} artifacts", a.kind));
            }
            if let Err(e) = glob::Pattern::new(pattern) {
                return fail(format!("invalid sub_path glob '{pattern}': {e}"));
            }
        }
        if let Some(rule) = &a.rule {
            if !self.rules.contains_key(rule) {
                return fail(format!("unknown rule '{rule}'"));
            }
        }
        if let Some(major) = a.toolkit {
            if !toolkits.contains(&major) {
                return fail(format!("gated on unknown toolkit version {major}"));
            }
        }
        if let Some(names) = &a.codenames {
            if let Some(unknown) = names.iter().find(|n| !self.codenames.contains_key(*n)) {
                return fail(format!("gated on unsupported codename '{unknown}'"));
            }
        }
        Ok(())
    }

    pub fn supports_distribution(&self, distribution: &str) -> bool {
        self.distributions
            .iter()
            .any(|d| d.eq_ignore_ascii_case(distribution))
    }

    /// Toolkit major version shipped on `codename`, `None` if unsupported.
    pub fn toolkit_for(&self, codename: &str) -> Option<u8> {
        self.codenames.get(codename).copied()
    }

    pub fn rule(&self, id: &str) -> Option<&PostInstallRule> {
        self.rules.get(id)
    }

    /// Artifacts to install on `platform`, in declaration order.
    pub fn eligible<'a>(&'a self, platform: &PlatformContext) -> Vec<&'a ArtifactDescriptor> {
        self.artifacts
            .iter()
            .filter(|a| a.is_eligible(platform))
            .collect()
    }

    /// Leftovers of toolkit branches other than `platform`'s: packages and
    /// owned paths that nothing eligible on `platform` declares. Branches may
    /// share an artifact id and still install different packages.
    pub fn retired<'a>(&'a self, platform: &PlatformContext) -> Vec<Retirement<'a>> {
        let eligible = self.eligible(platform);
        let mut kept_packages: HashSet<&str> =
            self.base_packages.iter().map(String::as_str).collect();
        kept_packages.extend(eligible.iter().filter_map(|a| a.package.as_deref()));
        let mut kept_paths: HashSet<&RulePath> =
            eligible.iter().flat_map(|a| a.provides.iter()).collect();

        let mut retired = Vec::new();
        for artifact in &self.artifacts {
            if artifact
                .toolkit
                .is_none_or(|major| major == platform.toolkit_major)
            {
                continue;
            }
            let package = match (artifact.kind, artifact.package.as_deref()) {
                (ArchiveKind::Deb, Some(name)) if kept_packages.insert(name) => Some(name),
                _ => None,
            };
            let paths: Vec<&RulePath> = artifact
                .provides
                .iter()
                .filter(|p| kept_paths.insert(*p))
                .collect();
            if package.is_some() || !paths.is_empty() {
                retired.push(Retirement {
                    artifact,
                    package,
                    paths,
                });
            }
        }
        retired
    }
}
