// obsp-common/src/model/rule.rs
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::ObspError;
use crate::platform::PlatformContext;

/// Directory a [`RulePath`] is relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathRoot {
    Plugins,
    Themes,
    Config,
    Cache,
}

impl PathRoot {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Plugins => "plugins",
            Self::Themes => "themes",
            Self::Config => "config",
            Self::Cache => "cache",
        }
    }
}

impl FromStr for PathRoot {
    type Err = ObspError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plugins" => Ok(Self::Plugins),
            "themes" => Ok(Self::Themes),
            "config" => Ok(Self::Config),
            "cache" => Ok(Self::Cache),
            other => Err(ObspError::Config(format!("Unknown path root '{other}'"))),
        }
    }
}

/// A path in a rule, written `root:relative/path` or as an absolute path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RulePath {
    root: Option<PathRoot>,
    relative: PathBuf,
}

impl RulePath {
    pub fn resolve(&self, config: &Config) -> PathBuf {
        let base = match self.root {
            None => return self.relative.clone(),
            Some(PathRoot::Plugins) => config.plugin_dir(),
            Some(PathRoot::Themes) => config.theme_dir(),
            Some(PathRoot::Config) => config.config_dir().to_path_buf(),
            Some(PathRoot::Cache) => config.cache_dir().to_path_buf(),
        };
        if self.relative.as_os_str().is_empty() {
            base
        } else {
            base.join(&self.relative)
        }
    }

    pub fn root(&self) -> Option<PathRoot> {
        self.root
    }

    pub fn relative(&self) -> &Path {
        &self.relative
    }
}

impl FromStr for RulePath {
    type Err = ObspError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (root, relative) = if s.starts_with('/') {
            (None, PathBuf::from(s))
        } else {
            let (root, rest) = s.split_once(':').ok_or_else(|| {
                ObspError::Config(format!(
                    "Rule path '{s}' must be absolute or of the form root:relative"
                ))
            })?;
            let rest = PathBuf::from(rest);
            if rest.is_absolute() {
                return Err(ObspError::Config(format!(
                    "Rule path '{s}' has an absolute part after its root"
                )));
            }
            (Some(root.parse::<PathRoot>()?), rest)
        };
        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(ObspError::Config(format!(
                "Rule path '{s}' must not contain '..'"
            )));
        }
        Ok(Self { root, relative })
    }
}

impl TryFrom<String> for RulePath {
    type Error = ObspError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RulePath> for String {
    fn from(value: RulePath) -> Self {
        value.to_string()
    }
}

impl fmt::Display for RulePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.root {
            Some(root) => write!(f, "{}:{}", root.as_str(), self.relative.display()),
            None => write!(f, "{}", self.relative.display()),
        }
    }
}

/// A single layout operation performed after extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RuleStep {
    CreateDir {
        path: RulePath,
    },
    Move {
        from: RulePath,
        to: RulePath,
    },
    Remove {
        path: RulePath,
    },
    Symlink {
        target: RulePath,
        link: RulePath,
    },
    RemovePackage {
        name: String,
        #[serde(default)]
        purge: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleVariant {
    #[serde(default)]
    pub toolkit: Option<u8>,
    #[serde(default)]
    pub steps: Vec<RuleStep>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Post-install handling for one artifact identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostInstallRule {
    pub variants: Vec<RuleVariant>,
}

impl PostInstallRule {
    /// First variant whose toolkit gate matches, ungated variants match always.
    pub fn select(&self, platform: &PlatformContext) -> Option<&RuleVariant> {
        self.variants.iter().find(|v| {
            v.toolkit
                .is_none_or(|major| major == platform.toolkit_major)
        })
    }
}
