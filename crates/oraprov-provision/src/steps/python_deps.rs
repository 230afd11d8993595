//! Python dependency manifest: optional venv, then `pip install -r`.

use oraprov_core::desired_state::DesiredState;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ProvisionError, Result};
use crate::exec::{CommandRunner, CommandSpec};
use crate::info_log;
use crate::runner::{Context, Step, StepStatus};
use crate::runtime_resolver::RuntimePaths;
use crate::state::fingerprint;

pub const STEP_NAME: &str = "python_deps";
const LEDGER_KEY: &str = "python_deps";

pub struct PythonDepsStep;

/// Requirement lines, comments and blanks removed.
pub fn read_requirements(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path).map_err(|e| {
        ProvisionError::Dependency(format!(
            "cannot read requirements manifest {}: {}",
            path.display(),
            e
        ))
    })?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(String::from)
        .collect())
}

fn manifest_path(state: &DesiredState) -> PathBuf {
    state.resolve(&state.python.requirements)
}

/// Manifest content + interpreter + pip arguments.
fn deps_fingerprint(state: &DesiredState, paths: &RuntimePaths, manifest: &[u8]) -> String {
    let python = paths.effective_python();
    let extra = state.python.extra_args.join("\0");
    fingerprint(&[
        manifest,
        python.to_string_lossy().as_bytes(),
        extra.as_bytes(),
    ])
}

/// `<python> -m venv <dir>` unless the venv interpreter already exists.
pub fn ensure_venv(runner: &dyn CommandRunner, paths: &RuntimePaths) -> Result<bool> {
    let Some(ref venv) = paths.venv_dir else {
        return Ok(false);
    };
    if paths.effective_python().exists() {
        return Ok(false);
    }
    let cmd = CommandSpec::new(&paths.python)
        .args(["-m", "venv"])
        .arg(venv.to_string_lossy());
    info_log!("[{}] {}", STEP_NAME, cmd.display());
    runner
        .run(&cmd)?
        .ensure_success(&cmd)
        .map_err(|e| ProvisionError::Dependency(format!("venv creation failed: {}", e)))?;
    Ok(true)
}

pub fn pip_install_command(state: &DesiredState, paths: &RuntimePaths, manifest: &Path) -> CommandSpec {
    let mut cmd = CommandSpec::new(paths.effective_python())
        .args(["-m", "pip", "install"])
        .args(state.python.extra_args.iter().cloned())
        .arg("-r")
        .arg(manifest.to_string_lossy())
        .current_dir(&state.base_dir);
    if let Some(ref venv) = paths.venv_dir {
        cmd = cmd.env("VIRTUAL_ENV", venv.to_string_lossy());
    }
    cmd
}

impl Step for PythonDepsStep {
    fn name(&self) -> &'static str {
        STEP_NAME
    }

    fn check(&self, ctx: &Context) -> Result<StepStatus> {
        if !ctx.state.python.enabled {
            return Ok(StepStatus::Skipped("python dependencies disabled".to_string()));
        }
        let manifest = manifest_path(ctx.state);
        let Ok(content) = fs::read(&manifest) else {
            return Ok(StepStatus::Pending(format!("{} is missing", manifest.display())));
        };
        let paths = ctx.runtime_paths();
        if paths.venv_dir.is_some() && !paths.effective_python().exists() {
            return Ok(StepStatus::Pending("virtual environment not created".to_string()));
        }
        if ctx
            .ledger
            .matches(LEDGER_KEY, &deps_fingerprint(ctx.state, &paths, &content))
        {
            Ok(StepStatus::Satisfied)
        } else {
            Ok(StepStatus::Pending(format!(
                "{} changed since the last install",
                manifest.display()
            )))
        }
    }

    fn apply(&self, ctx: &mut Context) -> Result<()> {
        let manifest = manifest_path(ctx.state);
        if !manifest.is_file() {
            return Err(ProvisionError::Dependency(format!(
                "requirements manifest {} not found",
                manifest.display()
            )));
        }
        let requirements = read_requirements(&manifest)?;
        let content = fs::read(&manifest).map_err(|e| ProvisionError::io_at(&manifest, e))?;
        let paths = ctx.runtime_paths();
        ensure_venv(ctx.runner, &paths)?;

        if requirements.is_empty() {
            info_log!("[{}] {} lists no packages", STEP_NAME, manifest.display());
        } else {
            let cmd = pip_install_command(ctx.state, &paths, &manifest);
            info_log!(
                "[{}] installing {} requirement(s): {}",
                STEP_NAME,
                requirements.len(),
                cmd.display()
            );
            ctx.runner
                .run(&cmd)?
                .ensure_success(&cmd)
                .map_err(|e| ProvisionError::Dependency(format!("pip install failed: {}", e)))?;
        }

        let fp = deps_fingerprint(ctx.state, &paths, &content);
        ctx.ledger.record(
            LEDGER_KEY,
            fp,
            Some(format!("{} requirement(s)", requirements.len())),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> DesiredState {
        DesiredState::from_yaml_str(
            "instant_client:\n  url: file:///tmp/ic.zip\npython:\n  venv: /opt/venv\n",
        )
        .unwrap()
    }

    #[test]
    fn test_read_requirements_skips_comments() {
        let dir = tempfile::tempdir().unwrap();
        let req = dir.path().join("requirements.txt");
        fs::write(&req, "# web\nflask==3.0.3\n\n  oracledb>=2 \n").unwrap();
        assert_eq!(read_requirements(&req).unwrap(), vec!["flask==3.0.3", "oracledb>=2"]);
    }

    #[test]
    fn test_missing_manifest_is_dependency_error() {
        let err = read_requirements(Path::new("/nonexistent/requirements.txt")).unwrap_err();
        assert!(matches!(err, ProvisionError::Dependency(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_pip_command_uses_venv_python() {
        let state = state();
        let paths = RuntimePaths::new(Some("python3"), Some(Path::new("/opt/venv")));
        let cmd = pip_install_command(&state, &paths, Path::new("/app/requirements.txt"));
        assert_eq!(
            cmd.display(),
            "/opt/venv/bin/python -m pip install --no-cache-dir -r /app/requirements.txt"
        );
        assert!(cmd.env.contains(&("VIRTUAL_ENV".to_string(), "/opt/venv".to_string())));
    }

    #[test]
    fn test_fingerprint_tracks_manifest() {
        let state = state();
        let paths = RuntimePaths::new(Some("python3"), None);
        assert_ne!(
            deps_fingerprint(&state, &paths, b"flask"),
            deps_fingerprint(&state, &paths, b"flask\noracledb")
        );
    }
}
