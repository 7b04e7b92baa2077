// obsp-common/src/lib.rs
pub mod cache;
pub mod config;
pub mod error;
pub mod model;
pub mod platform;
pub mod validation;

// Re-export key types
pub use cache::{Cache, CacheEntry};
pub use config::{Config, InvokingUser};
pub use error::{ObspError, Result};
pub use model::{ArchiveKind, ArtifactDescriptor, InstallTarget, Manifest, PostInstallRule};
pub use platform::PlatformContext;
