// obsp-core/src/install/mod.rs
//! Per-artifact install pipeline: fetch, extract or install, post-install rule,
//! extra dependencies.

pub mod extract;
pub mod rules;
pub mod sevenz;

use obsp_common::config::Config;
use obsp_common::error::{ObspError, Result};
use obsp_common::model::{ArtifactDescriptor, Manifest, Retirement};
use obsp_common::platform::PlatformContext;
use obsp_net::{ArtifactFetcher, Transport};
use tracing::{debug, info, warn};

pub use self::extract::{extract_archive, ArchiveExtractor, ExtractedSet, TarCompression};
pub use self::rules::apply_rule;
use crate::fs;
use crate::pkg::PackageInstaller;

/// How an artifact that did not abort the run ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactOutcome {
    Installed { extracted: ExtractedSet },
    /// Extraction failed; rule and dependencies were skipped.
    ExtractionFailed,
    /// The post-install rule or one of its dependency installs failed.
    RuleFailed,
}

impl ArtifactOutcome {
    pub fn is_installed(&self) -> bool {
        matches!(self, Self::Installed { .. })
    }
}

pub struct ArtifactPipeline<'a, T: Transport> {
    config: &'a Config,
    platform: &'a PlatformContext,
    manifest: &'a Manifest,
    fetcher: &'a ArtifactFetcher<T>,
    installer: &'a PackageInstaller<'a>,
}

impl<'a, T: Transport> ArtifactPipeline<'a, T> {
    pub fn new(
        config: &'a Config,
        platform: &'a PlatformContext,
        manifest: &'a Manifest,
        fetcher: &'a ArtifactFetcher<T>,
        installer: &'a PackageInstaller<'a>,
    ) -> Self {
        Self {
            config,
            platform,
            manifest,
            fetcher,
            installer,
        }
    }

    /// Installs one artifact. Download and package failures are returned;
    /// extraction, rule and extra dependency failures are logged and reported
    /// in the outcome.
    pub async fn install(&self, artifact: &ArtifactDescriptor) -> Result<ArtifactOutcome> {
        info!("Installing {} ({})", artifact.id, artifact.kind);
        let entry = self
            .fetcher
            .fetch(&artifact.url, &artifact.cache_filename())
            .await?;

        let target_dir = artifact.target.dir(self.config);
        if let Some(dir) = &target_dir {
            fs::create_dir_all(dir)?;
        }

        let extractor = ArchiveExtractor::new(self.installer);
        let extracted = match extractor.extract(
            artifact.kind,
            &entry,
            target_dir.as_deref(),
            artifact.sub_path.as_deref(),
        ) {
            Ok(set) => set,
            Err(e) if !e.is_fatal() => {
                warn!("Skipping {}: {}", artifact.id, e);
                return Ok(ArtifactOutcome::ExtractionFailed);
            }
            Err(e) => return Err(e),
        };
        debug!(
            "{} wrote {} top-level path(s)",
            artifact.id,
            extracted.len()
        );

        let mut dependencies: Vec<String> = artifact.dependencies.clone();
        if let Some(rule_id) = &artifact.rule {
            match self.manifest.rule(rule_id) {
                Some(rule) => {
                    match apply_rule(rule_id, rule, self.platform, self.config, self.installer) {
                        Ok(Some(variant)) => {
                            dependencies.extend(variant.dependencies.iter().cloned())
                        }
                        Ok(None) => {}
                        Err(e) if !e.is_fatal() => {
                            warn!("Post-install for {} failed: {}", artifact.id, e);
                            return Ok(ArtifactOutcome::RuleFailed);
                        }
                        Err(e) => return Err(e),
                    }
                }
                None => warn!("Unknown rule '{}' for {}", rule_id, artifact.id),
            }
        }

        if !dependencies.is_empty() {
            debug!("Installing dependencies of {}: {:?}", artifact.id, dependencies);
            if let Err(e) = self.installer.install_all(&dependencies) {
                let e = ObspError::PostInstall(format!(
                    "dependencies of '{}': {}",
                    artifact.id, e
                ));
                warn!("Post-install for {} failed: {}", artifact.id, e);
                return Ok(ArtifactOutcome::RuleFailed);
            }
        }
        Ok(ArtifactOutcome::Installed { extracted })
    }

    /// Removes what an artifact of the other toolkit branch left behind.
    pub fn retire(&self, retirement: &Retirement<'_>) -> Result<()> {
        let id = &retirement.artifact.id;
        if let Some(package) = retirement.package {
            self.installer.remove(package, false)?;
        }
        for owned in &retirement.paths {
            let path = owned.resolve(self.config);
            if fs::remove_path(&path)? {
                info!("Removed {} left by {}", path.display(), id);
            }
        }
        Ok(())
    }
}
