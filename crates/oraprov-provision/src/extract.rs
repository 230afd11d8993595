//! Archive extraction (zip as shipped by Oracle, plus tar.gz).
//!
//! Entries that would land outside the destination are skipped, and an entry
//! reached through a symlink from the same archive fails the extraction. Unix
//! modes and in-archive symlinks (`libclntsh.so -> libclntsh.so.21.1`) are kept.

use crate::error::{ProvisionError, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
    Tar,
}

impl ArchiveKind {
    /// Guess from the URL or file name.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name
            .split(['?', '#'])
            .next()
            .unwrap_or(name)
            .to_lowercase();
        if name.ends_with(".zip") {
            Some(Self::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".tar") {
            Some(Self::Tar)
        } else {
            None
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Zip => ".zip",
            Self::TarGz => ".tar.gz",
            Self::Tar => ".tar",
        }
    }
}

/// Extract `archive` into `dest` (created if needed) and return the
/// top-level entries it produced.
pub fn extract(archive: &Path, kind: ArchiveKind, dest: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dest).map_err(|e| ProvisionError::io_at(dest, e))?;
    let fail = |reason: String| ProvisionError::Extract {
        archive: archive.to_path_buf(),
        reason,
    };
    match kind {
        ArchiveKind::Zip => extract_zip(archive, dest).map_err(|e| fail(e.to_string()))?,
        ArchiveKind::TarGz => {
            let file = File::open(archive).map_err(|e| fail(e.to_string()))?;
            unpack_tar(tar::Archive::new(GzDecoder::new(file)), dest).map_err(|e| fail(e.to_string()))?
        }
        ArchiveKind::Tar => {
            let file = File::open(archive).map_err(|e| fail(e.to_string()))?;
            unpack_tar(tar::Archive::new(file), dest).map_err(|e| fail(e.to_string()))?
        }
    }
    let mut top = Vec::new();
    for entry in fs::read_dir(dest).map_err(|e| ProvisionError::io_at(dest, e))? {
        top.push(entry?.path());
    }
    top.sort();
    if top.is_empty() {
        return Err(fail("archive is empty".to_string()));
    }
    Ok(top)
}

fn unpack_tar<R: Read>(mut archive: tar::Archive<R>, dest: &Path) -> io::Result<()> {
    archive.set_preserve_permissions(true);
    // `unpack` refuses entries escaping `dest`.
    archive.unpack(dest)
}

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

fn extract_zip(archive: &Path, dest: &Path) -> io::Result<()> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file).map_err(zip_err)?;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(zip_err)?;
        let Some(rel) = entry.enclosed_name().map(Path::to_path_buf) else {
            tracing::warn!("skipping unsafe archive entry '{}'", entry.name());
            continue;
        };
        let out_path = dest.join(&rel);
        let mode = entry.unix_mode();

        let parent_rel = if entry.is_dir() {
            rel.as_path()
        } else {
            rel.parent().unwrap_or(Path::new(""))
        };
        if crosses_symlink(dest, parent_rel) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("entry '{}' passes through a symlink", rel.display()),
            ));
        }

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }

        if mode.map(|m| m & S_IFMT == S_IFLNK).unwrap_or(false) {
            let mut target = String::new();
            entry.read_to_string(&mut target)?;
            if !is_contained_link(&rel, Path::new(&target)) {
                tracing::warn!("skipping symlink '{}' -> '{}' escaping the archive", rel.display(), target);
                continue;
            }
            let link_dir = out_path.parent().unwrap_or(dest);
            if crosses_symlink(link_dir, Path::new(&target).parent().unwrap_or(Path::new(""))) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("symlink '{}' -> '{}' resolves through another symlink", rel.display(), target),
                ));
            }
            create_symlink(Path::new(&target), &out_path)?;
            continue;
        }

        // Never write through a link left by an earlier entry.
        if fs::symlink_metadata(&out_path).map(|m| m.file_type().is_symlink()).unwrap_or(false) {
            fs::remove_file(&out_path)?;
        }
        let mut out = File::create(&out_path)?;
        io::copy(&mut entry, &mut out)?;
        #[cfg(unix)]
        {
            if let Some(m) = mode {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&out_path, fs::Permissions::from_mode(m & 0o7777))?;
            }
        }
    }
    Ok(())
}

fn zip_err(e: zip::result::ZipError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e.to_string())
}

/// A relative link target that stays inside the archive root.
fn is_contained_link(entry: &Path, target: &Path) -> bool {
    if target.is_absolute() {
        return false;
    }
    let mut depth: i64 = entry.components().count() as i64 - 1;
    for c in target.components() {
        match c {
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return false;
                }
            }
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

/// Whether walking `rel` from `base` steps onto an existing symlink.
fn crosses_symlink(base: &Path, rel: &Path) -> bool {
    let mut cur = base.to_path_buf();
    for c in rel.components() {
        match c {
            Component::Normal(name) => {
                cur.push(name);
                let is_link = fs::symlink_metadata(&cur)
                    .map(|m| m.file_type().is_symlink())
                    .unwrap_or(false);
                if is_link {
                    return true;
                }
            }
            Component::ParentDir => {
                cur.pop();
            }
            _ => {}
        }
    }
    false
}

fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    if fs::symlink_metadata(link).is_ok() {
        fs::remove_file(link)?;
    }
    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(target, link)
    }
    #[cfg(not(unix))]
    {
        // Fall back to a copy of the link target.
        let resolved = link.parent().unwrap_or(Path::new(".")).join(target);
        fs::copy(resolved, link).map(|_| ())
    }
}
