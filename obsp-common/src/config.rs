// obsp-common/src/config.rs
use std::env;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::{ObspError, Result};

const APP_CONFIG_SUBDIR: &str = ".config/obs-studio";
const CACHE_SUBDIR: &str = ".cache/obsp";

pub const CACHE_DIR_ENV: &str = "OBSP_CACHE_DIR";
pub const MANIFEST_ENV: &str = "OBSP_MANIFEST";
pub const TOOLKIT_ENV: &str = "OBSP_TOOLKIT_MAJOR";

/// The non-root user the run is performed on behalf of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokingUser {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub user: InvokingUser,
    pub config_root: PathBuf,
    pub cache_root: PathBuf,
    pub manifest_path: Option<PathBuf>,
    pub toolkit_override: Option<u8>,
}

impl Config {
    /// Builds the configuration for `user`, honouring the `OBSP_*` overrides.
    pub fn for_user(user: InvokingUser) -> Result<Self> {
        debug!("Loading obsp configuration for user '{}'", user.name);

        let cache_root = env::var(CACHE_DIR_ENV)
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| user.home.join(CACHE_SUBDIR));
        debug!("Effective cache directory: {}", cache_root.display());

        let manifest_path = env::var(MANIFEST_ENV)
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        if let Some(path) = &manifest_path {
            debug!("Manifest override requested: {}", path.display());
        }

        let toolkit_override = match env::var(TOOLKIT_ENV).ok().filter(|s| !s.is_empty()) {
            Some(raw) => Some(raw.trim().parse::<u8>().map_err(|e| {
                ObspError::Config(format!("{TOOLKIT_ENV} must be a major version number, got '{raw}': {e}"))
            })?),
            None => None,
        };

        let config_root = user.home.join(APP_CONFIG_SUBDIR);
        debug!("Configuration loaded successfully.");
        Ok(Self {
            user,
            config_root,
            cache_root,
            manifest_path,
            toolkit_override,
        })
    }

    /// Configuration rooted at `home` without consulting the environment.
    pub fn with_home(user_name: &str, home: &Path) -> Self {
        let user = InvokingUser {
            name: user_name.to_string(),
            uid: 1000,
            gid: 1000,
            home: home.to_path_buf(),
        };
        Self {
            config_root: home.join(APP_CONFIG_SUBDIR),
            cache_root: home.join(CACHE_SUBDIR),
            user,
            manifest_path: None,
            toolkit_override: None,
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_root
    }

    pub fn plugin_dir(&self) -> PathBuf {
        self.config_root.join("plugins")
    }

    pub fn theme_dir(&self) -> PathBuf {
        self.config_root.join("themes")
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_root
    }

    pub fn home_dir(&self) -> &Path {
        &self.user.home
    }
}
