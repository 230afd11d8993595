//! Wallet directory: permissions and material from the environment.
//!
//! Hosting platforms inject the wallet as base64 variables; each decoded
//! file lands in the wallet directory. The directory and every regular file
//! in it are forced to the configured modes on each run, so a volume mounted
//! with `0700` still converges to `0755`.

use base64::Engine;
use oraprov_core::config::env_keys::wallet as wallet_keys;
use oraprov_core::config::env_optional;
use oraprov_core::desired_state::{FileMode, WalletSpec};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ProvisionError, Result};
use crate::info_log;
use crate::runner::{Context, Step, StepStatus};

pub const STEP_NAME: &str = "wallet";

/// One base64 variable and the file it decodes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletMaterial {
    pub var: String,
    pub file_name: String,
    pub encoded: String,
}

impl WalletMaterial {
    pub fn new(var: &str, file_name: &str, encoded: &str) -> Self {
        Self {
            var: var.to_string(),
            file_name: file_name.to_string(),
            encoded: encoded.to_string(),
        }
    }

    /// Whitespace (line wrapping from `base64` CLIs) is ignored.
    pub fn decode(&self) -> Result<Vec<u8>> {
        let compact: String = self.encoded.chars().filter(|c| !c.is_whitespace()).collect();
        base64::engine::general_purpose::STANDARD
            .decode(compact)
            .map_err(|e| ProvisionError::Config(format!("{} is not valid base64: {}", self.var, e)))
    }
}

pub struct WalletStep {
    material: Vec<WalletMaterial>,
}

impl WalletStep {
    /// Reads `CWALLET_SSO_B64`, `EWALLET_P12_B64`, `TNSNAMES_ORA_B64` and
    /// `SQLNET_ORA_B64`; unset ones are ignored.
    pub fn from_process_env() -> Self {
        let material = wallet_keys::FILES
            .iter()
            .filter_map(|(var, file)| {
                env_optional(var, &[]).map(|encoded| WalletMaterial::new(var, file, &encoded))
            })
            .collect();
        Self { material }
    }

    pub fn with_material(material: Vec<WalletMaterial>) -> Self {
        Self { material }
    }

    fn active_material<'s>(&'s self, spec: &WalletSpec) -> &'s [WalletMaterial] {
        if spec.from_env {
            &self.material
        } else {
            &[]
        }
    }
}

impl Step for WalletStep {
    fn name(&self) -> &'static str {
        STEP_NAME
    }

    fn check(&self, ctx: &Context) -> Result<StepStatus> {
        let spec = &ctx.state.wallet;
        if !spec.enabled {
            return Ok(StepStatus::Skipped("wallet disabled".to_string()));
        }
        let dir = ctx.state.resolve(&spec.dir);
        if !dir.is_dir() {
            return Ok(StepStatus::Pending(format!("{} does not exist", dir.display())));
        }
        if let Some(mode) = mode_of(&dir) {
            if mode != spec.dir_mode {
                return Ok(StepStatus::Pending(format!(
                    "{} has mode {}, want {}",
                    dir.display(),
                    mode,
                    spec.dir_mode
                )));
            }
        }
        for m in self.active_material(spec) {
            let path = dir.join(&m.file_name);
            if fs::read(&path).ok() != Some(m.decode()?) {
                return Ok(StepStatus::Pending(format!(
                    "{} differs from {}",
                    path.display(),
                    m.var
                )));
            }
        }
        for file in regular_files(&dir)? {
            if let Some(mode) = mode_of(&file) {
                if mode != spec.file_mode {
                    return Ok(StepStatus::Pending(format!(
                        "{} has mode {}, want {}",
                        file.display(),
                        mode,
                        spec.file_mode
                    )));
                }
            }
        }
        Ok(StepStatus::Satisfied)
    }

    fn apply(&self, ctx: &mut Context) -> Result<()> {
        let spec = &ctx.state.wallet;
        let dir = ctx.state.resolve(&spec.dir);
        fs::create_dir_all(&dir).map_err(|e| ProvisionError::io_at(&dir, e))?;
        set_mode(&dir, spec.dir_mode)?;

        for m in self.active_material(spec) {
            let bytes = m.decode()?;
            let path = dir.join(&m.file_name);
            fs::write(&path, &bytes).map_err(|e| ProvisionError::io_at(&path, e))?;
            info_log!("[{}] wrote {} from {}", STEP_NAME, path.display(), m.var);
        }
        for file in regular_files(&dir)? {
            set_mode(&file, spec.file_mode)?;
        }
        info_log!("[{}] {} ready (mode {})", STEP_NAME, dir.display(), spec.dir_mode);
        Ok(())
    }
}

fn regular_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| ProvisionError::io_at(dir, e))? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(unix)]
fn mode_of(path: &Path) -> Option<FileMode> {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .ok()
        .map(|m| FileMode(m.permissions().mode() & 0o7777))
}

#[cfg(not(unix))]
fn mode_of(_path: &Path) -> Option<FileMode> {
    None
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: FileMode) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode.bits()))
        .map_err(|e| ProvisionError::io_at(path, e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: FileMode) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{CommandOutput, CommandRunner, CommandSpec};
    use crate::fetch::FileFetcher;
    use crate::state::Ledger;
    use oraprov_core::desired_state::DesiredState;

    struct NoopRunner;
    impl CommandRunner for NoopRunner {
        fn run(&self, _spec: &CommandSpec) -> Result<CommandOutput> {
            Ok(CommandOutput::default())
        }
        fn launch(&self, _spec: &CommandSpec) -> Result<i32> {
            Ok(0)
        }
    }

    fn state(dir: &Path) -> DesiredState {
        DesiredState::from_yaml_str(&format!(
            "instant_client:\n  url: file:///tmp/ic.zip\nwallet:\n  dir: {}\n",
            dir.display()
        ))
        .unwrap()
    }

    #[test]
    fn test_decode_ignores_line_wrapping() {
        let m = WalletMaterial::new("TNSNAMES_ORA_B64", "tnsnames.ora", "aGVs\nbG8=\n");
        assert_eq!(m.decode().unwrap(), b"hello");
    }

    #[test]
    fn test_invalid_base64_names_variable() {
        let m = WalletMaterial::new("CWALLET_SSO_B64", "cwallet.sso", "***");
        let err = m.decode().unwrap_err();
        assert!(err.to_string().contains("CWALLET_SSO_B64"));
    }

    #[test]
    fn test_materializes_files() {
        let tmp = tempfile::tempdir().unwrap();
        let wallet = tmp.path().join("wallet");
        let state = state(&wallet);
        let step = WalletStep::with_material(vec![WalletMaterial::new(
            "TNSNAMES_ORA_B64",
            "tnsnames.ora",
            "aGVsbG8=",
        )]);
        let mut ctx = Context::new(&state, &NoopRunner, &FileFetcher, Ledger::in_memory());
        assert!(step.check(&ctx).unwrap().is_pending());
        step.apply(&mut ctx).unwrap();
        assert_eq!(fs::read(wallet.join("tnsnames.ora")).unwrap(), b"hello");
        assert_eq!(step.check(&ctx).unwrap(), StepStatus::Satisfied);
    }

    #[cfg(unix)]
    #[test]
    fn test_restrictive_dir_converges_to_755() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempfile::tempdir().unwrap();
        let wallet = tmp.path().join("wallet");
        fs::create_dir(&wallet).unwrap();
        fs::write(wallet.join("cwallet.sso"), b"sso").unwrap();
        fs::set_permissions(&wallet, fs::Permissions::from_mode(0o700)).unwrap();
        fs::set_permissions(wallet.join("cwallet.sso"), fs::Permissions::from_mode(0o600)).unwrap();

        let state = state(&wallet);
        let step = WalletStep::with_material(Vec::new());
        let mut ctx = Context::new(&state, &NoopRunner, &FileFetcher, Ledger::in_memory());
        assert!(step.check(&ctx).unwrap().is_pending());
        step.apply(&mut ctx).unwrap();

        let dir_mode = fs::metadata(&wallet).unwrap().permissions().mode() & 0o777;
        let file_mode = fs::metadata(wallet.join("cwallet.sso")).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o755);
        assert_eq!(file_mode, 0o644);
        assert_eq!(step.check(&ctx).unwrap(), StepStatus::Satisfied);
    }

    #[test]
    fn test_disabled_is_skipped() {
        let mut state = state(Path::new("/nonexistent/wallet"));
        state.wallet.enabled = false;
        let ctx = Context::new(&state, &NoopRunner, &FileFetcher, Ledger::in_memory());
        let status = WalletStep::with_material(Vec::new()).check(&ctx).unwrap();
        assert!(matches!(status, StepStatus::Skipped(_)));
    }
}
