// obsp-core/src/install/rules.rs
use obsp_common::config::Config;
use obsp_common::error::{ObspError, Result};
use obsp_common::model::{PostInstallRule, RuleStep, RuleVariant};
use obsp_common::platform::PlatformContext;
use tracing::debug;

use crate::fs;
use crate::pkg::PackageInstaller;

/// Runs the variant of `rule` matching `platform` and returns it, or `None`
/// when no variant applies. Any failing step aborts the rule with
/// [`ObspError::PostInstall`].
pub fn apply_rule<'r>(
    rule_id: &str,
    rule: &'r PostInstallRule,
    platform: &PlatformContext,
    config: &Config,
    installer: &PackageInstaller<'_>,
) -> Result<Option<&'r RuleVariant>> {
    let Some(variant) = rule.select(platform) else {
        debug!(
            "Rule '{}' has no variant for toolkit {}, nothing to do",
            rule_id, platform.toolkit_major
        );
        return Ok(None);
    };
    debug!(
        "Applying rule '{}' ({} step(s))",
        rule_id,
        variant.steps.len()
    );
    for (index, step) in variant.steps.iter().enumerate() {
        apply_step(step, config, installer).map_err(|e| {
            ObspError::PostInstall(format!(
                "rule '{}' step {} ({}): {}",
                rule_id,
                index + 1,
                describe(step),
                e
            ))
        })?;
    }
    Ok(Some(variant))
}

fn describe(step: &RuleStep) -> String {
    match step {
        RuleStep::CreateDir { path } => format!("create_dir {path}"),
        RuleStep::Move { from, to } => format!("move {from} -> {to}"),
        RuleStep::Remove { path } => format!("remove {path}"),
        RuleStep::Symlink { target, link } => format!("symlink {link} -> {target}"),
        RuleStep::RemovePackage { name, purge } => {
            format!("remove_package {name} (purge: {purge})")
        }
    }
}

fn apply_step(step: &RuleStep, config: &Config, installer: &PackageInstaller<'_>) -> Result<()> {
    match step {
        RuleStep::CreateDir { path } => fs::create_dir_all(&path.resolve(config)),
        RuleStep::Move { from, to } => {
            let from = from.resolve(config);
            let to = to.resolve(config);
            if fs::check_symlink_exists(&from) {
                return fs::replace_with(&from, &to);
            }
            if fs::check_symlink_exists(&to) {
                debug!("{} already in place", to.display());
                return Ok(());
            }
            Err(ObspError::Generic(format!(
                "{} does not exist",
                from.display()
            )))
        }
        RuleStep::Remove { path } => {
            let path = path.resolve(config);
            if !fs::remove_path(&path)? {
                debug!("{} already absent", path.display());
            }
            Ok(())
        }
        RuleStep::Symlink { target, link } => {
            fs::create_symlink(&target.resolve(config), &link.resolve(config))
        }
        RuleStep::RemovePackage { name, purge } => installer.remove(name, *purge),
    }
}
