//! Environment commands: print exported variables, clean the download cache.
//!
//! Cached archives live in `~/.cache/oraprov/downloads/` (or `$ORAPROV_CACHE_DIR`),
//! one file per archive URL.

use anyhow::Result;
use oraprov_core::config::PathsConfig;
use oraprov_provision::steps::fetch::installed_library_dir;
use oraprov_provision::steps::loader_path::{exported_environment, render_exports};
use std::fs;
use std::path::{Path, PathBuf};

use super::{load_state, open_ledger};

/// `oraprov env [--format shell|json]`
pub fn cmd_env(paths: &PathsConfig, format: &str) -> Result<()> {
    let state = load_state(paths)?;
    let ledger = open_ledger(paths)?;
    let lib_dir = installed_library_dir(&state, &ledger).ok_or_else(|| {
        anyhow::anyhow!(
            "Instant Client not installed under {}; run `oraprov apply` first",
            state.resolve(&state.instant_client.install_dir).display()
        )
    })?;
    let vars = exported_environment(&state, &lib_dir);
    if format == "json" {
        let map: serde_json::Map<String, serde_json::Value> = vars
            .into_iter()
            .map(|(k, v)| (k, serde_json::Value::String(v)))
            .collect();
        println!("{}", serde_json::to_string_pretty(&map)?);
    } else {
        print!("{}", render_exports(&vars));
    }
    Ok(())
}

/// `oraprov clean-cache`
pub fn cmd_clean(paths: &PathsConfig, dry_run: bool, force: bool) -> Result<()> {
    let cache_dir = paths.download_cache_dir();

    if !cache_dir.exists() {
        eprintln!("No cached archives found at {}", cache_dir.display());
        return Ok(());
    }

    let entries = cache_entries(&cache_dir);
    let total_size: u64 = entries.iter().map(|(_, size)| size).sum();

    if entries.is_empty() {
        eprintln!("No cached archives found at {}", cache_dir.display());
        return Ok(());
    }

    eprintln!(
        "🗂  Cached archives ({}) in {}:",
        entries.len(),
        cache_dir.display()
    );
    eprintln!();
    for (path, size) in &entries {
        let name = path.file_name().unwrap_or_default().to_string_lossy();
        eprintln!("  • {} ({})", name, format_size(*size));
    }
    eprintln!();
    eprintln!("Total: {} ({} archives)", format_size(total_size), entries.len());

    if dry_run {
        eprintln!();
        eprintln!("(Dry run: no files removed. Remove --dry-run to delete.)");
        return Ok(());
    }

    if !force {
        eprint!("\nRemove all cached archives? [y/N] ");
        let mut answer = String::new();
        std::io::stdin().read_line(&mut answer)?;
        if !matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") {
            eprintln!("Cancelled.");
            return Ok(());
        }
    }

    let (removed, errors) = remove_entries(&entries);

    eprintln!();
    if errors == 0 {
        eprintln!(
            "✓ Removed {} cached archive(s), freed {}",
            removed,
            format_size(total_size)
        );
    } else {
        eprintln!(
            "⚠ Removed {}/{} archives ({} errors)",
            removed,
            entries.len(),
            errors
        );
    }

    Ok(())
}

/// Top-level cache entries with their sizes, sorted by name.
fn cache_entries(cache_dir: &Path) -> Vec<(PathBuf, u64)> {
    let mut entries: Vec<(PathBuf, u64)> = Vec::new();
    if let Ok(dir_entries) = fs::read_dir(cache_dir) {
        for entry in dir_entries.flatten() {
            let path = entry.path();
            let size = if path.is_dir() {
                dir_size(&path)
            } else {
                path.metadata().map(|m| m.len()).unwrap_or(0)
            };
            entries.push((path, size));
        }
    }
    entries.sort_by_key(|e| e.0.file_name().unwrap_or_default().to_os_string());
    entries
}

fn remove_entries(entries: &[(PathBuf, u64)]) -> (usize, usize) {
    let mut removed = 0;
    let mut errors = 0;
    for (path, _) in entries {
        let result = if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => {
                let name = path.file_name().unwrap_or_default().to_string_lossy();
                eprintln!("  ✗ Failed to remove {}: {}", name, e);
                errors += 1;
            }
        }
    }
    (removed, errors)
}

/// Compute total size of a directory recursively.
fn dir_size(path: &Path) -> u64 {
    let mut total: u64 = 0;
    if let Ok(entries) = fs::read_dir(path) {
        for entry in entries.flatten() {
            let p = entry.path();
            if p.is_dir() {
                total += dir_size(&p);
            } else if let Ok(meta) = p.metadata() {
                total += meta.len();
            }
        }
    }
    total
}

/// Format byte size to human-readable string.
fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
