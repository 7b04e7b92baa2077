// obsp-core/src/lib.rs
pub mod fs;
pub mod install;
pub mod orchestrator;
pub mod ownership;
pub mod pkg;
pub mod platform;
pub mod preflight;
pub mod process;

pub use install::{ArchiveExtractor, ArtifactOutcome, ArtifactPipeline, ExtractedSet};
pub use orchestrator::{run, Orchestrator};
pub use pkg::{AptPackageManager, PackageInstaller, PackageManager, PackageSource, PackageState};
pub use platform::{LsbRelease, OsRelease, PlatformIdentity};
