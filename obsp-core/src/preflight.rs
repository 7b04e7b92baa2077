// obsp-core/src/preflight.rs
//! Environment checks run before anything is changed on the host.
use std::env;
use std::path::PathBuf;

use obsp_common::config::{Config, InvokingUser};
use obsp_common::error::{ObspError, Result};
use obsp_common::model::Manifest;
use obsp_common::platform::PlatformContext;
use tracing::{debug, info, warn};

use crate::pkg::PackageManager;
use crate::platform::{
    installed_toolkit, resolve_platform, OsRelease, PlatformIdentity, LSB_RELEASE_BIN,
    LSB_RELEASE_PACKAGE, OS_RELEASE_PATH,
};
use crate::process::{run_command, stderr_tail};

pub const SUDO_USER_ENV: &str = "SUDO_USER";

/// Everything later steps need, resolved once.
#[derive(Debug, Clone)]
pub struct Preflight {
    pub config: Config,
    pub manifest: Manifest,
    pub platform: PlatformContext,
}

pub fn check_privileges() -> Result<()> {
    // SAFETY: geteuid has no preconditions and cannot fail.
    let euid = unsafe { libc::geteuid() };
    ensure_root(euid)
}

fn ensure_root(euid: u32) -> Result<()> {
    if euid == 0 {
        Ok(())
    } else {
        Err(ObspError::Precondition(
            "obsp must be run with root privileges (try sudo)".to_string(),
        ))
    }
}

/// Name of the user who invoked sudo; running as root directly is refused.
pub fn invoking_user_name(sudo_user: Option<String>) -> Result<String> {
    match sudo_user.map(|s| s.trim().to_string()) {
        Some(name) if !name.is_empty() && name != "root" => Ok(name),
        _ => Err(ObspError::Precondition(format!(
            "Run obsp through sudo from a regular user account ({SUDO_USER_ENV} is unset or root)"
        ))),
    }
}

/// Parses a `name:passwd:uid:gid:gecos:home:shell` passwd record.
pub fn parse_passwd_line(line: &str) -> Result<InvokingUser> {
    let fields: Vec<&str> = line.trim_end().split(':').collect();
    if fields.len() < 7 {
        return Err(ObspError::Precondition(format!(
            "Malformed passwd entry: '{line}'"
        )));
    }
    let number = |field: &str, what: &str| {
        field.parse::<u32>().map_err(|e| {
            ObspError::Precondition(format!("Bad {what} '{field}' in passwd entry: {e}"))
        })
    };
    Ok(InvokingUser {
        name: fields[0].to_string(),
        uid: number(fields[2], "uid")?,
        gid: number(fields[3], "gid")?,
        home: PathBuf::from(fields[5]),
    })
}

/// Looks `name` up in the passwd database.
pub fn lookup_user(name: &str) -> Result<InvokingUser> {
    let output = run_command("getent", &["passwd", name], None, &[])?;
    if !output.status.success() {
        return Err(ObspError::Precondition(format!(
            "User '{}' not found in passwd database {}",
            name,
            stderr_tail(&output)
        )));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout.lines().next().unwrap_or_default();
    let user = parse_passwd_line(line)?;
    if !user.home.is_dir() {
        return Err(ObspError::Precondition(format!(
            "Home directory {} of '{}' does not exist",
            user.home.display(),
            user.name
        )));
    }
    debug!(
        "Invoking user {} (uid {}, gid {}), home {}",
        user.name,
        user.uid,
        user.gid,
        user.home.display()
    );
    Ok(user)
}

/// Makes sure `binary` exists, installing `package` when it does not. The
/// install is attempted twice before giving up.
pub fn ensure_tool(
    manager: &dyn PackageManager,
    binary: &str,
    package: &str,
    present: &dyn Fn() -> bool,
) -> Result<()> {
    if present() {
        debug!("{} is available", binary);
        return Ok(());
    }
    for attempt in 1..=2 {
        info!("{} not found, installing {} (attempt {})", binary, package, attempt);
        match manager.install_by_name(package) {
            Ok(()) if present() => return Ok(()),
            Ok(()) => warn!("{} installed but {} is still missing", package, binary),
            Err(e) => warn!("Installing {} failed: {}", package, e),
        }
    }
    Err(ObspError::Precondition(format!(
        "{binary} is required and could not be installed"
    )))
}

pub fn ensure_platform_tool(manager: &dyn PackageManager) -> Result<()> {
    ensure_tool(manager, LSB_RELEASE_BIN, LSB_RELEASE_PACKAGE, &|| {
        which::which(LSB_RELEASE_BIN).is_ok()
    })
}

/// Runs every check and resolves configuration, manifest and platform.
pub fn run(manager: &dyn PackageManager, identity: &dyn PlatformIdentity) -> Result<Preflight> {
    check_privileges()?;
    let name = invoking_user_name(env::var(SUDO_USER_ENV).ok())?;
    let user = lookup_user(&name)?;
    let config = Config::for_user(user)?;
    let manifest = Manifest::load(&config)?;

    ensure_platform_tool(manager)?;
    let os_release = OsRelease::load(std::path::Path::new(OS_RELEASE_PATH))?;
    let platform = resolve_platform(
        identity,
        &os_release,
        &manifest,
        &config,
        installed_toolkit(manager),
    )?;
    info!("Detected {}", platform);

    Ok(Preflight {
        config,
        manifest,
        platform,
    })
}
