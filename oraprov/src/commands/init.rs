//! `oraprov init`: write a preset desired-state file.

use anyhow::{Context, Result};
use oraprov_core::presets::{preset, Variant};
use std::path::Path;

pub fn cmd_init(path: &Path, variant: Variant, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    let yaml = render(variant)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, yaml).with_context(|| format!("Failed to write {}", path.display()))?;
    eprintln!("✓ Wrote {} ({})", path.display(), variant);
    eprintln!("  Pin the archive: add `sha256:` under instant_client (see `oraprov apply` output).");
    Ok(())
}

fn render(variant: Variant) -> Result<String> {
    let body = preset(variant).to_yaml()?;
    Ok(format!(
        "# oraprov desired state ({}). Generated by `oraprov init`.\n{}",
        variant, body
    ))
}
