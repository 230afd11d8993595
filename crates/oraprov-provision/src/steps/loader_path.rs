//! Dynamic loader search path for the client libraries.
//!
//! The exported variables are derived from the desired state and the
//! detected library directory, so `plan`, `env`, `apply` and `serve` all
//! agree on them without a previous run in the same process.

use oraprov_core::config::env_keys::runtime as runtime_keys;
use oraprov_core::config::env_optional;
use oraprov_core::desired_state::DesiredState;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ProvisionError, Result};
use crate::exec::CommandSpec;
use crate::info_log;
use crate::runner::{Context, Step, StepStatus};

pub const STEP_NAME: &str = "loader_path";

/// Loader search variable of the current platform.
pub fn loader_var() -> &'static str {
    if cfg!(target_os = "macos") {
        "DYLD_LIBRARY_PATH"
    } else if cfg!(windows) {
        runtime_keys::PATH
    } else {
        runtime_keys::LD_LIBRARY_PATH
    }
}

fn list_separator() -> char {
    if cfg!(windows) {
        ';'
    } else {
        ':'
    }
}

/// `dir` followed by the entries of `current`, duplicates and empties dropped.
pub fn prepend_path(dir: &Path, current: Option<&str>) -> String {
    let sep = list_separator();
    let mut seen = vec![dir.to_string_lossy().to_string()];
    for part in current.unwrap_or("").split(sep) {
        if !part.is_empty() && !seen.iter().any(|s| s == part) {
            seen.push(part.to_string());
        }
    }
    seen.join(&sep.to_string())
}

/// Variables exported to the supervisor, from the process environment.
pub fn exported_environment(state: &DesiredState, library_dir: &Path) -> Vec<(String, String)> {
    exported_environment_with(state, library_dir, |k| env_optional(k, &[]))
}

pub fn exported_environment_with(
    state: &DesiredState,
    library_dir: &Path,
    current: impl Fn(&str) -> Option<String>,
) -> Vec<(String, String)> {
    let mut vars = Vec::new();
    let loader = loader_var();
    vars.push((
        loader.to_string(),
        prepend_path(library_dir, current(loader).as_deref()),
    ));
    if state.environment.export_path && loader != runtime_keys::PATH {
        vars.push((
            runtime_keys::PATH.to_string(),
            prepend_path(library_dir, current(runtime_keys::PATH).as_deref()),
        ));
    }
    if state.wallet.enabled && state.wallet.export_tns_admin {
        vars.push((
            runtime_keys::TNS_ADMIN.to_string(),
            absolute(&state.resolve(&state.wallet.dir)).to_string_lossy().to_string(),
        ));
    }
    vars
}

fn absolute(p: &Path) -> PathBuf {
    if p.is_absolute() {
        return p.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(p))
        .unwrap_or_else(|_| p.to_path_buf())
}

/// Single-quoted `export` lines for `eval "$(oraprov env)"`.
pub fn render_exports(vars: &[(String, String)]) -> String {
    vars.iter()
        .map(|(k, v)| format!("export {}='{}'\n", k, v.replace('\'', r"'\''")))
        .collect()
}

/// Login-shell profile: prepends to the variables at source time.
fn profile_script(state: &DesiredState, library_dir: &Path) -> String {
    let dir = library_dir.display();
    let loader = loader_var();
    let mut out = String::from("# Managed by oraprov. Local edits are overwritten.\n");
    out.push_str(&format!(
        "export {loader}=\"{dir}${{{loader}:+:${{{loader}}}}}\"\n"
    ));
    if state.environment.export_path && loader != runtime_keys::PATH {
        out.push_str(&format!("export PATH=\"{dir}:${{PATH}}\"\n"));
    }
    if state.wallet.enabled && state.wallet.export_tns_admin {
        out.push_str(&format!(
            "export TNS_ADMIN=\"{}\"\n",
            absolute(&state.resolve(&state.wallet.dir)).display()
        ));
    }
    out
}

/// Files this step manages and their desired contents.
fn managed_files(state: &DesiredState, library_dir: &Path) -> Vec<(PathBuf, String)> {
    let env = &state.environment;
    let mut files = Vec::new();
    if let Some(ref p) = env.profile_script {
        files.push((state.resolve(p), profile_script(state, library_dir)));
    }
    if let Some(ref p) = env.ld_so_conf {
        files.push((state.resolve(p), format!("{}\n", library_dir.display())));
    }
    files
}

pub struct LoaderPathStep;

impl Step for LoaderPathStep {
    fn name(&self) -> &'static str {
        STEP_NAME
    }

    fn check(&self, ctx: &Context) -> Result<StepStatus> {
        let env = &ctx.state.environment;
        if env.profile_script.is_none() && env.ld_so_conf.is_none() {
            return Ok(StepStatus::Skipped(format!(
                "no loader files configured; {} is passed to the supervisor",
                loader_var()
            )));
        }
        let Some(lib_dir) = ctx.library_dir() else {
            return Ok(StepStatus::Pending("Instant Client library dir not present yet".to_string()));
        };
        for (path, content) in managed_files(ctx.state, &lib_dir) {
            if fs::read_to_string(&path).ok().as_deref() != Some(content.as_str()) {
                return Ok(StepStatus::Pending(format!("{} is out of date", path.display())));
            }
        }
        Ok(StepStatus::Satisfied)
    }

    fn apply(&self, ctx: &mut Context) -> Result<()> {
        let lib_dir = ctx.library_dir().ok_or_else(|| {
            ProvisionError::Config(
                "Instant Client library directory not found; the fetch step has not run".to_string(),
            )
        })?;
        for (path, content) in managed_files(ctx.state, &lib_dir) {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| ProvisionError::io_at(parent, e))?;
            }
            fs::write(&path, content).map_err(|e| ProvisionError::io_at(&path, e))?;
            info_log!("[{}] wrote {}", STEP_NAME, path.display());
        }
        if ctx.state.environment.ld_so_conf.is_some() {
            let cmd = CommandSpec::new("ldconfig");
            ctx.runner.run(&cmd)?.ensure_success(&cmd)?;
        }
        Ok(())
    }
}
