// obsp-core/src/orchestrator.rs
use obsp_common::cache::Cache;
use obsp_common::config::Config;
use obsp_common::error::{ObspError, Result};
use obsp_common::model::Manifest;
use obsp_common::platform::PlatformContext;
use obsp_net::{ArtifactFetcher, HttpTransport, Transport};
use tracing::{debug, info, warn};

use crate::fs;
use crate::install::{ArtifactOutcome, ArtifactPipeline};
use crate::ownership::chown_recursive;
use crate::pkg::{AptPackageManager, PackageInstaller, PackageManager, PackageSource};
use crate::platform::LsbRelease;
use crate::preflight;

/// Drives a run once preflight has resolved configuration and platform.
pub struct Orchestrator<'a, T: Transport> {
    config: &'a Config,
    platform: &'a PlatformContext,
    manifest: &'a Manifest,
    manager: &'a dyn PackageManager,
    fetcher: ArtifactFetcher<T>,
}

impl<'a, T: Transport> Orchestrator<'a, T> {
    pub fn new(
        config: &'a Config,
        platform: &'a PlatformContext,
        manifest: &'a Manifest,
        manager: &'a dyn PackageManager,
        transport: T,
    ) -> Result<Self> {
        let cache = Cache::new(config)?;
        Ok(Self {
            config,
            platform,
            manifest,
            manager,
            fetcher: ArtifactFetcher::new(transport, cache),
        })
    }

    pub fn fetcher(&self) -> &ArtifactFetcher<T> {
        &self.fetcher
    }

    fn installer(&self) -> PackageInstaller<'a> {
        PackageInstaller::new(self.manager, self.config.cache_dir())
    }

    pub fn setup_repository(&self) -> Result<()> {
        info!("Adding package repository {}", self.manifest.repository);
        self.manager
            .add_repository(&self.manifest.repository)
            .map_err(|e| {
                ObspError::Precondition(format!(
                    "Could not add repository {}: {}",
                    self.manifest.repository, e
                ))
            })?;
        info!("Refreshing package index");
        self.manager
            .update()
            .map_err(|e| ObspError::Precondition(format!("Package index refresh failed: {e}")))
    }

    /// Themes are rebuilt from scratch every run; plugins and cache persist.
    pub fn prepare_directories(&self) -> Result<()> {
        let themes = self.config.theme_dir();
        debug!("Recreating {}", themes.display());
        fs::recreate_dir(&themes)?;
        fs::create_dir_all(self.config.cache_dir())?;
        fs::create_dir_all(&self.config.plugin_dir())
    }

    /// Core packages, strictly in manifest order.
    pub fn install_base_packages(&self) -> Result<()> {
        let installer = self.installer();
        for name in &self.manifest.base_packages {
            let path = installer.download_package(name)?;
            installer.install(PackageSource::File(&path))?;
        }
        Ok(())
    }

    /// Retires the other toolkit branch, then installs every eligible
    /// artifact in declaration order.
    pub async fn install_manifest(&self) -> Result<Vec<(String, ArtifactOutcome)>> {
        let installer = self.installer();
        let pipeline = ArtifactPipeline::new(
            self.config,
            self.platform,
            self.manifest,
            &self.fetcher,
            &installer,
        );

        for retirement in self.manifest.retired(self.platform) {
            let artifact = retirement.artifact;
            debug!(
                "Retiring {} from toolkit branch {:?}",
                artifact.id, artifact.toolkit
            );
            if let Err(e) = pipeline.retire(&retirement) {
                warn!("Could not retire {}: {}", artifact.id, e);
            }
        }

        let eligible = self.manifest.eligible(self.platform);
        let mut outcomes = Vec::with_capacity(eligible.len());
        for artifact in eligible {
            let outcome = pipeline.install(artifact).await?;
            outcomes.push((artifact.id.clone(), outcome));
        }
        Ok(outcomes)
    }

    pub fn finalize(&self) -> Result<()> {
        let user = &self.config.user;
        info!("Handing files over to {}", user.name);
        chown_recursive(self.config.config_dir(), user.uid, user.gid)?;
        chown_recursive(self.config.cache_dir(), user.uid, user.gid)?;
        Ok(())
    }

    /// Everything after preflight.
    pub async fn execute(&self) -> Result<()> {
        self.setup_repository()?;
        self.prepare_directories()?;
        self.install_base_packages()?;
        let outcomes = self.install_manifest().await?;
        debug!(
            "{} of {} artifact(s) fully installed",
            outcomes.iter().filter(|(_, o)| o.is_installed()).count(),
            outcomes.len()
        );
        self.finalize()?;
        info!("OBS Studio and plugins installed for {}", self.config.user.name);
        Ok(())
    }
}

/// A full provisioning run against the live system.
pub async fn run() -> Result<()> {
    let manager = AptPackageManager::new();
    let checked = preflight::run(&manager, &LsbRelease)?;
    let transport = HttpTransport::new()?;
    let orchestrator = Orchestrator::new(
        &checked.config,
        &checked.platform,
        &checked.manifest,
        &manager,
        transport,
    )?;
    orchestrator.execute().await
}
