// obsp-common/src/model/mod.rs
pub mod artifact;
pub mod manifest;
pub mod rule;

pub use artifact::{ArchiveKind, ArtifactDescriptor, InstallTarget};
pub use manifest::{Manifest, Retirement};
pub use rule::{PathRoot, PostInstallRule, RulePath, RuleStep, RuleVariant};
