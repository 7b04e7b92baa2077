// obsp-common/src/platform.rs
use std::fmt;

/// Facts about the host resolved once during preflight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformContext {
    pub distribution: String,
    pub codename: String,
    pub toolkit_major: u8,
}

impl PlatformContext {
    pub fn new(distribution: &str, codename: &str, toolkit_major: u8) -> Self {
        Self {
            distribution: distribution.to_string(),
            codename: codename.to_string(),
            toolkit_major,
        }
    }
}

impl fmt::Display for PlatformContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (Qt {})",
            self.distribution, self.codename, self.toolkit_major
        )
    }
}
