//! System packages the client libraries need (`libaio`, `unzip`, ...).

use oraprov_core::desired_state::PackageManager;

use crate::error::{ProvisionError, Result};
use crate::exec::CommandSpec;
use crate::info_log;
use crate::runner::{Context, Step, StepStatus};

pub const STEP_NAME: &str = "os_packages";

pub struct OsPackagesStep;

impl Step for OsPackagesStep {
    fn name(&self) -> &'static str {
        STEP_NAME
    }

    fn check(&self, ctx: &Context) -> Result<StepStatus> {
        let spec = &ctx.state.os_packages;
        if spec.packages.is_empty() {
            return Ok(StepStatus::Skipped("no packages listed".to_string()));
        }
        let manager = match resolve_manager(spec.manager) {
            Ok(Some(manager)) => manager,
            Ok(None) => return Ok(StepStatus::Skipped("package manager disabled".to_string())),
            // apply reports the error
            Err(e) => return Ok(StepStatus::Pending(e.to_string())),
        };
        let missing = missing_packages(ctx, manager, &spec.packages)?;
        if missing.is_empty() {
            Ok(StepStatus::Satisfied)
        } else {
            Ok(StepStatus::Pending(format!(
                "missing {} package(s): {}",
                manager.as_str(),
                missing.join(", ")
            )))
        }
    }

    fn apply(&self, ctx: &mut Context) -> Result<()> {
        let spec = &ctx.state.os_packages;
        let Some(manager) = resolve_manager(spec.manager)? else {
            return Ok(());
        };
        let missing = missing_packages(ctx, manager, &spec.packages)?;
        if missing.is_empty() {
            return Ok(());
        }
        for cmd in install_commands(manager, &missing, spec.update_index) {
            info_log!("[{}] {}", STEP_NAME, cmd.display());
            ctx.runner.run(&cmd)?.ensure_success(&cmd).map_err(|e| {
                ProvisionError::Dependency(format!("{} failed: {}", manager.as_str(), e))
            })?;
        }
        Ok(())
    }
}

/// `auto` searches `PATH`; `none` disables the step. Auto-detection that finds
/// nothing is a `Dependency` error.
pub fn resolve_manager(configured: PackageManager) -> Result<Option<PackageManager>> {
    resolve_manager_with(configured, |bin| which::which(bin).is_ok())
}

fn resolve_manager_with(
    configured: PackageManager,
    has: impl Fn(&str) -> bool,
) -> Result<Option<PackageManager>> {
    match configured {
        PackageManager::None => Ok(None),
        PackageManager::Auto => detect_manager(has).map(Some).ok_or_else(|| {
            ProvisionError::Dependency(
                "no supported package manager found (apt-get, microdnf, dnf, yum, apk); \
                 set os_packages.manager, or `none` if the image already has the packages"
                    .to_string(),
            )
        }),
        other => Ok(Some(other)),
    }
}

fn detect_manager(has: impl Fn(&str) -> bool) -> Option<PackageManager> {
    [
        ("apt-get", PackageManager::Apt),
        ("microdnf", PackageManager::Microdnf),
        ("dnf", PackageManager::Dnf),
        ("yum", PackageManager::Yum),
        ("apk", PackageManager::Apk),
    ]
    .into_iter()
    .find(|(bin, _)| has(bin))
    .map(|(_, m)| m)
}

fn query_command(manager: PackageManager, package: &str) -> CommandSpec {
    match manager {
        PackageManager::Apt => CommandSpec::new("dpkg").args(["-s", package]),
        PackageManager::Apk => CommandSpec::new("apk").args(["info", "-e", package]),
        _ => CommandSpec::new("rpm").args(["-q", package]),
    }
}

/// Packages the query tool reports as not installed.
fn missing_packages(ctx: &Context, manager: PackageManager, packages: &[String]) -> Result<Vec<String>> {
    let mut missing = Vec::new();
    for package in packages {
        let out = ctx.runner.run(&query_command(manager, package))?;
        // dpkg -s exits 0 for deinstalled packages too
        let installed = out.success()
            && (manager != PackageManager::Apt || out.stdout.contains("install ok installed"));
        if !installed {
            missing.push(package.clone());
        }
    }
    Ok(missing)
}

fn install_commands(manager: PackageManager, packages: &[String], update_index: bool) -> Vec<CommandSpec> {
    let pkgs = packages.iter().cloned();
    match manager {
        PackageManager::Apt => {
            let mut cmds = Vec::new();
            if update_index {
                cmds.push(
                    CommandSpec::new("apt-get")
                        .arg("update")
                        .env("DEBIAN_FRONTEND", "noninteractive"),
                );
            }
            cmds.push(
                CommandSpec::new("apt-get")
                    .args(["install", "-y", "--no-install-recommends"])
                    .args(pkgs)
                    .env("DEBIAN_FRONTEND", "noninteractive"),
            );
            cmds
        }
        PackageManager::Apk => {
            vec![CommandSpec::new("apk").args(["add", "--no-cache"]).args(pkgs)]
        }
        other => vec![CommandSpec::new(other.as_str()).args(["install", "-y"]).args(pkgs)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_prefers_apt_then_microdnf() {
        assert_eq!(detect_manager(|b| b == "apt-get" || b == "dnf"), Some(PackageManager::Apt));
        assert_eq!(
            detect_manager(|b| b == "microdnf" || b == "dnf"),
            Some(PackageManager::Microdnf)
        );
        assert_eq!(detect_manager(|_| false), None);
    }

    #[test]
    fn test_none_disables() {
        assert_eq!(resolve_manager(PackageManager::None).unwrap(), None);
        assert_eq!(
            resolve_manager(PackageManager::Apk).unwrap(),
            Some(PackageManager::Apk)
        );
    }

    #[test]
    fn test_auto_without_manager_is_dependency_error() {
        let err = resolve_manager_with(PackageManager::Auto, |_| false).unwrap_err();
        assert!(matches!(err, ProvisionError::Dependency(_)));
        assert_eq!(
            resolve_manager_with(PackageManager::Auto, |b| b == "apk").unwrap(),
            Some(PackageManager::Apk)
        );
    }

    #[test]
    fn test_apt_install_commands() {
        let cmds = install_commands(PackageManager::Apt, &["libaio1t64".to_string()], true);
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].display(), "apt-get update");
        assert_eq!(
            cmds[1].display(),
            "apt-get install -y --no-install-recommends libaio1t64"
        );
        assert!(cmds[1]
            .env
            .contains(&("DEBIAN_FRONTEND".to_string(), "noninteractive".to_string())));
    }

    #[test]
    fn test_rpm_family_install_commands() {
        let cmds = install_commands(PackageManager::Microdnf, &["libaio".to_string()], true);
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].display(), "microdnf install -y libaio");
        assert_eq!(query_command(PackageManager::Microdnf, "libaio").display(), "rpm -q libaio");
    }
}
