//! Command handlers. Each returns `anyhow::Result` and adds context at the
//! boundary; typed errors come from `oraprov-provision`.

pub mod apply;
pub mod env;
pub mod init;
pub mod plan;

use anyhow::{Context, Result};
use oraprov_core::config::PathsConfig;
use oraprov_core::desired_state::DesiredState;
use oraprov_provision::state::Ledger;

pub(crate) fn load_state(paths: &PathsConfig) -> Result<DesiredState> {
    let path = &paths.desired_state_file;
    DesiredState::load(path).with_context(|| {
        format!(
            "Failed to load desired state from {} (run `oraprov init` to create one)",
            path.display()
        )
    })
}

pub(crate) fn open_ledger(paths: &PathsConfig) -> Result<Ledger> {
    Ledger::load(&paths.state_dir)
        .with_context(|| format!("Failed to open state ledger in {}", paths.state_dir.display()))
}
