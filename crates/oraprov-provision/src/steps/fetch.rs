//! Fetch, verify and extract the Instant Client archive.

use oraprov_core::desired_state::DesiredState;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tempfile::TempPath;

use crate::error::{ProvisionError, Result};
use crate::extract::{self, ArchiveKind};
use crate::fetch::{download_verified, hash_file, verify, Expected};
use crate::info_log;
use crate::runner::{Context, Step, StepStatus};
use crate::state::{fingerprint, Ledger};

pub const STEP_NAME: &str = "fetch";
const LEDGER_KEY: &str = "instant_client";

pub struct FetchStep;

impl Step for FetchStep {
    fn name(&self) -> &'static str {
        STEP_NAME
    }

    fn check(&self, ctx: &Context) -> Result<StepStatus> {
        let install = ctx.state.resolve(&ctx.state.instant_client.install_dir);
        let Some(lib_dir) = ctx.library_dir() else {
            return Ok(StepStatus::Pending(format!(
                "Instant Client not installed under {}",
                install.display()
            )));
        };
        if ctx.ledger.matches(LEDGER_KEY, &install_fingerprint(ctx.state)) {
            Ok(StepStatus::Satisfied)
        } else {
            Ok(StepStatus::Pending(format!(
                "{} was not installed from the pinned archive",
                lib_dir.display()
            )))
        }
    }

    fn apply(&self, ctx: &mut Context) -> Result<()> {
        let ic = &ctx.state.instant_client;
        let url = ic.url.trim();
        let kind = ArchiveKind::from_name(url).ok_or_else(|| {
            ProvisionError::Config(format!(
                "cannot tell the archive type of '{}' (expected .zip, .tar.gz or .tar)",
                url
            ))
        })?;
        let install = ctx.state.resolve(&ic.install_dir);
        fs::create_dir_all(&install).map_err(|e| ProvisionError::io_at(&install, e))?;

        let expected = Expected {
            sha256: ic.sha256.as_deref(),
            size: ic.size,
        };
        let archive = obtain_archive(ctx, url, kind, &install, &expected)?;
        let previous: Vec<String> = ctx
            .ledger
            .get(LEDGER_KEY)
            .map(|e| e.artifacts.clone())
            .unwrap_or_default();

        let staging = tempfile::Builder::new()
            .prefix(".oraprov-extract-")
            .tempdir_in(&install)
            .map_err(|e| ProvisionError::io_at(&install, e))?;
        let entries = extract::extract(archive.path(), kind, staging.path())?;

        // The old install is about to be replaced; drop its marker first.
        ctx.ledger.forget(LEDGER_KEY);
        ctx.ledger.save()?;
        let mut names: Vec<String> = entries
            .iter()
            .filter_map(|e| e.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect();
        for old in previous.iter().filter(|o| !names.contains(o)) {
            if !is_bare_name(old) {
                continue;
            }
            let stale = install.join(old);
            info_log!("[fetch] removing previous install {}", stale.display());
            remove_existing(&stale)?;
        }
        let mut moved = Vec::with_capacity(entries.len());
        for (entry, name) in entries.iter().zip(&names) {
            let dest = install.join(name);
            remove_existing(&dest)?;
            fs::rename(entry, &dest).map_err(|e| ProvisionError::io_at(&dest, e))?;
            moved.push(dest);
        }
        drop(staging);

        match archive {
            Archive::Cached(path) => {
                info_log!("[fetch] archive kept in cache at {}", path.display());
            }
            Archive::Temp(tmp) if ic.keep_archive => {
                let file_name = archive_file_name(url, kind);
                let kept = install.join(&file_name);
                tmp.persist(&kept)
                    .map_err(|e| ProvisionError::io_at(&kept, e.error))?;
                info_log!("[fetch] archive kept at {}", kept.display());
                names.push(file_name);
            }
            Archive::Temp(tmp) => {
                tmp.close().map_err(|e| ProvisionError::io_at(&install, e))?;
                info_log!("[fetch] archive removed");
            }
        }

        let lib_dir = if ic.library_dir.is_some() {
            detect_library_dir(ctx.state)
        } else {
            newest_client_dir(moved).or_else(|| has_client_libs(&install).then(|| install.clone()))
        };
        let lib_dir = lib_dir.ok_or_else(|| ProvisionError::Extract {
            archive: PathBuf::from(url),
            reason: format!(
                "no Instant Client libraries (libclntsh*) found under {}",
                install.display()
            ),
        })?;
        info_log!("[fetch] Instant Client ready in {}", lib_dir.display());

        let fp = install_fingerprint(ctx.state);
        ctx.ledger
            .record(LEDGER_KEY, fp, Some(lib_dir.to_string_lossy().to_string()));
        ctx.ledger.set_artifacts(LEDGER_KEY, names);
        Ok(())
    }
}

enum Archive {
    Temp(TempPath),
    Cached(PathBuf),
}

impl Archive {
    fn path(&self) -> &Path {
        match self {
            Archive::Temp(p) => p,
            Archive::Cached(p) => p,
        }
    }
}

fn obtain_archive(
    ctx: &Context,
    url: &str,
    kind: ArchiveKind,
    install: &Path,
    expected: &Expected,
) -> Result<Archive> {
    let Some(ref cache_dir) = ctx.cache_dir else {
        let tmp = temp_download(install, kind)?;
        info_log!("[fetch] downloading {}", url);
        download_verified(ctx.fetcher, url, &tmp, expected)?;
        return Ok(Archive::Temp(tmp));
    };

    fs::create_dir_all(cache_dir).map_err(|e| ProvisionError::io_at(cache_dir, e))?;
    let cached = cache_dir.join(format!(
        "{}-{}",
        &fingerprint(&[url.as_bytes()])[..16],
        archive_file_name(url, kind)
    ));
    if cached.exists() {
        let actual = hash_file(&cached)?;
        match verify(url, &actual, expected) {
            Ok(()) => {
                info_log!("[fetch] using cached archive {}", cached.display());
                return Ok(Archive::Cached(cached));
            }
            Err(e) => {
                tracing::warn!("discarding cached archive {}: {}", cached.display(), e);
                fs::remove_file(&cached).map_err(|e| ProvisionError::io_at(&cached, e))?;
            }
        }
    }
    let tmp = temp_download(cache_dir, kind)?;
    info_log!("[fetch] downloading {}", url);
    download_verified(ctx.fetcher, url, &tmp, expected)?;
    tmp.persist(&cached)
        .map_err(|e| ProvisionError::io_at(&cached, e.error))?;
    Ok(Archive::Cached(cached))
}

fn temp_download(dir: &Path, kind: ArchiveKind) -> Result<TempPath> {
    Ok(tempfile::Builder::new()
        .prefix(".oraprov-download-")
        .suffix(kind.extension())
        .tempfile_in(dir)
        .map_err(|e| ProvisionError::io_at(dir, e))?
        .into_temp_path())
}

fn remove_existing(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            fs::remove_dir_all(path).map_err(|e| ProvisionError::io_at(path, e))
        }
        Ok(_) => fs::remove_file(path).map_err(|e| ProvisionError::io_at(path, e)),
        Err(_) => Ok(()),
    }
}

/// Last path segment of the URL, without query string.
fn archive_file_name(url: &str, kind: ArchiveKind) -> String {
    url.split(['?', '#'])
        .next()
        .and_then(|u| u.rsplit('/').next())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .unwrap_or_else(|| format!("instantclient{}", kind.extension()))
}

/// URL + pinned checksum + install location.
fn install_fingerprint(state: &DesiredState) -> String {
    let ic = &state.instant_client;
    let install = state.resolve(&ic.install_dir);
    fingerprint(&[
        ic.url.trim().as_bytes(),
        ic.sha256.as_deref().unwrap_or("").to_lowercase().as_bytes(),
        install.to_string_lossy().as_bytes(),
    ])
}

/// Library dir of the pinned install: the directory recorded by the last
/// successful fetch of this URL and checksum, else [`detect_library_dir`].
pub fn installed_library_dir(state: &DesiredState, ledger: &Ledger) -> Option<PathBuf> {
    if state.instant_client.library_dir.is_none() {
        let recorded = ledger
            .get(LEDGER_KEY)
            .filter(|e| e.fingerprint == install_fingerprint(state))
            .and_then(|e| e.detail.as_deref())
            .map(PathBuf::from);
        if let Some(dir) = recorded.filter(|d| has_client_libs(d)) {
            return Some(dir);
        }
    }
    detect_library_dir(state)
}

/// Directory holding the client shared libraries: the configured
/// `library_dir`, else the newest `instantclient_*` directory under
/// `install_dir`, else `install_dir` itself for flat archives.
pub fn detect_library_dir(state: &DesiredState) -> Option<PathBuf> {
    let ic = &state.instant_client;
    if let Some(ref explicit) = ic.library_dir {
        let p = state.resolve(explicit);
        return has_client_libs(&p).then_some(p);
    }
    let install = state.resolve(&ic.install_dir);
    let entries = fs::read_dir(&install).ok()?.flatten().map(|e| e.path());
    newest_client_dir(entries).or_else(|| has_client_libs(&install).then_some(install))
}

fn newest_client_dir(paths: impl IntoIterator<Item = PathBuf>) -> Option<PathBuf> {
    paths
        .into_iter()
        .filter(|p| {
            p.is_dir()
                && p.file_name()
                    .map(|n| n.to_string_lossy().starts_with("instantclient"))
                    .unwrap_or(false)
                && has_client_libs(p)
        })
        .max_by_key(|p| version_key(p))
}

/// A single normal path component, as recorded in the ledger.
fn is_bare_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

fn has_client_libs(dir: &Path) -> bool {
    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };
    entries.flatten().any(|e| {
        let name = e.file_name().to_string_lossy().to_lowercase();
        name.starts_with("libclntsh") || name == "oci.dll"
    })
}

/// `instantclient_21_13` → [21, 13]
fn version_key(p: &Path) -> Vec<u32> {
    p.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
        .split(|c: char| !c.is_ascii_digit())
        .filter_map(|s| s.parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_install(dir: &Path) -> DesiredState {
        let yaml = format!(
            "instant_client:\n  url: file:///tmp/ic.zip\n  install_dir: {}\n",
            dir.display()
        );
        DesiredState::from_yaml_str(&yaml).unwrap()
    }

    #[test]
    fn test_detect_prefers_newest_version() {
        let dir = tempfile::tempdir().unwrap();
        for v in ["instantclient_21_9", "instantclient_21_13", "instantclient_19_24"] {
            fs::create_dir_all(dir.path().join(v)).unwrap();
            fs::write(dir.path().join(v).join("libclntsh.so"), b"").unwrap();
        }
        let state = state_with_install(dir.path());
        assert_eq!(
            detect_library_dir(&state),
            Some(dir.path().join("instantclient_21_13"))
        );
    }

    #[test]
    fn test_detect_flat_layout() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("libclntsh.so.23.1"), b"").unwrap();
        let state = state_with_install(dir.path());
        assert_eq!(detect_library_dir(&state), Some(dir.path().to_path_buf()));
    }

    #[test]
    fn test_detect_ignores_dirs_without_libs() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("instantclient_23_5")).unwrap();
        let state = state_with_install(dir.path());
        assert_eq!(detect_library_dir(&state), None);
    }

    #[test]
    fn test_recorded_library_dir_wins_over_newest() {
        let dir = tempfile::tempdir().unwrap();
        for v in ["instantclient_21_13", "instantclient_23_5"] {
            fs::create_dir_all(dir.path().join(v)).unwrap();
            fs::write(dir.path().join(v).join("libclntsh.so"), b"").unwrap();
        }
        let state = state_with_install(dir.path());
        let pinned = dir.path().join("instantclient_21_13");
        let mut ledger = Ledger::in_memory();
        assert_eq!(
            installed_library_dir(&state, &ledger),
            Some(dir.path().join("instantclient_23_5"))
        );

        ledger.record(
            LEDGER_KEY,
            install_fingerprint(&state),
            Some(pinned.to_string_lossy().to_string()),
        );
        assert_eq!(installed_library_dir(&state, &ledger), Some(pinned.clone()));

        // a record for another pin is ignored
        ledger.record(LEDGER_KEY, "other".into(), Some(pinned.to_string_lossy().to_string()));
        assert_eq!(
            installed_library_dir(&state, &ledger),
            Some(dir.path().join("instantclient_23_5"))
        );
    }

    #[test]
    fn test_bare_name() {
        assert!(is_bare_name("instantclient_21_13"));
        assert!(!is_bare_name("../etc"));
        assert!(!is_bare_name("a/b"));
        assert!(!is_bare_name("/opt"));
        assert!(!is_bare_name(""));
    }

    #[test]
    fn test_archive_file_name() {
        assert_eq!(
            archive_file_name("https://h/p/instantclient-basic.zip?x=1", ArchiveKind::Zip),
            "instantclient-basic.zip"
        );
        assert_eq!(archive_file_name("https://h/", ArchiveKind::Zip), "instantclient.zip");
    }

    #[test]
    fn test_fingerprint_changes_with_pin() {
        let dir = tempfile::tempdir().unwrap();
        let a = state_with_install(dir.path());
        let mut b = a.clone();
        b.instant_client.sha256 = Some("a".repeat(64));
        assert_ne!(install_fingerprint(&a), install_fingerprint(&b));
    }
}
