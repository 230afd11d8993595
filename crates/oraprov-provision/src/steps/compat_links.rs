//! Library name compatibility links.
//!
//! Newer distributions rename some shared objects (Ubuntu 24.04 ships
//! `libaio.so.1t64` where the client loads `libaio.so.1`). A link is only
//! created when the expected name cannot be found; an existing file is
//! never touched.

use oraprov_core::desired_state::{CompatLink, DesiredState};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ProvisionError, Result};
use crate::info_log;
use crate::runner::{Context, Step, StepStatus};

pub const STEP_NAME: &str = "compat_links";

pub struct CompatLinksStep;

impl Step for CompatLinksStep {
    fn name(&self) -> &'static str {
        STEP_NAME
    }

    fn check(&self, ctx: &Context) -> Result<StepStatus> {
        let links = &ctx.state.compat_links;
        if links.is_empty() {
            return Ok(StepStatus::Skipped("no compatibility links configured".to_string()));
        }
        let missing: Vec<&str> = links
            .iter()
            .filter(|l| find_in(&l.expected, &expected_dirs(ctx.state, l)).is_none())
            .map(|l| l.expected.as_str())
            .collect();
        if missing.is_empty() {
            Ok(StepStatus::Satisfied)
        } else {
            Ok(StepStatus::Pending(format!("missing {}", missing.join(", "))))
        }
    }

    fn apply(&self, ctx: &mut Context) -> Result<()> {
        for link in &ctx.state.compat_links {
            ensure_link(ctx.state, link)?;
        }
        Ok(())
    }
}

fn search_dirs(state: &DesiredState, link: &CompatLink) -> Vec<PathBuf> {
    link.search_dirs.iter().map(|d| state.resolve(d)).collect()
}

/// Where `expected` counts as present: the search dirs plus `link_dir`.
fn expected_dirs(state: &DesiredState, link: &CompatLink) -> Vec<PathBuf> {
    let mut dirs = search_dirs(state, link);
    if let Some(ref d) = link.link_dir {
        let d = state.resolve(d);
        if !dirs.contains(&d) {
            dirs.push(d);
        }
    }
    dirs
}

/// First `dir/name` that exists (following links).
fn find_in(name: &str, dirs: &[PathBuf]) -> Option<PathBuf> {
    dirs.iter().map(|d| d.join(name)).find(|p| p.exists())
}

/// Returns the created link, or `None` when `expected` was already present.
pub fn ensure_link(state: &DesiredState, link: &CompatLink) -> Result<Option<PathBuf>> {
    if let Some(existing) = find_in(&link.expected, &expected_dirs(state, link)) {
        tracing::debug!("{} already present at {}", link.expected, existing.display());
        return Ok(None);
    }
    let dirs = search_dirs(state, link);
    let provided = find_in(&link.provided, &dirs).ok_or_else(|| ProvisionError::Link {
        expected: link.expected.clone(),
        reason: format!(
            "neither {} nor {} found in {}",
            link.expected,
            link.provided,
            dirs.iter()
                .map(|d| d.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    })?;
    let provided_dir = provided.parent().unwrap_or(Path::new("/")).to_path_buf();
    let link_dir = link
        .link_dir
        .as_ref()
        .map(|d| state.resolve(d))
        .unwrap_or_else(|| provided_dir.clone());
    fs::create_dir_all(&link_dir).map_err(|e| ProvisionError::io_at(&link_dir, e))?;

    let dest = link_dir.join(&link.expected);
    // Dangling link from an earlier layout.
    if fs::symlink_metadata(&dest).is_ok() {
        fs::remove_file(&dest).map_err(|e| ProvisionError::io_at(&dest, e))?;
    }
    let target = if link_dir == provided_dir {
        PathBuf::from(&link.provided)
    } else {
        provided.clone()
    };
    symlink(&target, &dest).map_err(|e| ProvisionError::Link {
        expected: link.expected.clone(),
        reason: format!("cannot create {}: {}", dest.display(), e),
    })?;
    info_log!("[{}] {} -> {}", STEP_NAME, dest.display(), target.display());
    Ok(Some(dest))
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink(_target: &Path, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "library links are only supported on Unix",
    ))
}
