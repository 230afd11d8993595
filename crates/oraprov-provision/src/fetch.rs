//! Archive download with integrity verification.
//!
//! The archive is streamed to disk while being hashed; the SHA-256 and size
//! are compared against the pinned values before anything is extracted.

use crate::error::{ProvisionError, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

pub trait ArchiveFetcher: Send + Sync {
    /// Stream the resource at `url` into `dest`; returns bytes written.
    fn fetch(&self, url: &str, dest: &mut dyn Write) -> Result<u64>;
}

/// `file://` URLs only (air-gapped builds, tests).
#[derive(Debug, Clone, Copy, Default)]
pub struct FileFetcher;

impl ArchiveFetcher for FileFetcher {
    fn fetch(&self, url: &str, dest: &mut dyn Write) -> Result<u64> {
        let Some(path) = file_url_path(url) else {
            return Err(ProvisionError::Fetch {
                url: url.to_string(),
                reason: "only file:// URLs are supported without the http feature".to_string(),
            });
        };
        let mut src = File::open(&path).map_err(|e| ProvisionError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        io::copy(&mut src, dest).map_err(|e| ProvisionError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

pub fn file_url_path(url: &str) -> Option<PathBuf> {
    url.strip_prefix("file://").map(PathBuf::from)
}

#[cfg(feature = "http")]
pub struct HttpFetcher {
    agent: ureq::Agent,
}

#[cfg(feature = "http")]
impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout_connect(std::time::Duration::from_secs(10))
                .timeout_read(std::time::Duration::from_secs(300))
                .build(),
        }
    }
}

#[cfg(feature = "http")]
impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "http")]
impl ArchiveFetcher for HttpFetcher {
    fn fetch(&self, url: &str, dest: &mut dyn Write) -> Result<u64> {
        if url.starts_with("file://") {
            return FileFetcher.fetch(url, dest);
        }
        let response = self.agent.get(url).call().map_err(|e| match &e {
            ureq::Error::Status(code, _) => ProvisionError::Fetch {
                url: url.to_string(),
                reason: format!("HTTP {} (archive moved or removed upstream?)", code),
            },
            ureq::Error::Transport(_) => ProvisionError::Fetch {
                url: url.to_string(),
                reason: e.to_string(),
            },
        })?;
        let mut reader = response.into_reader();
        io::copy(&mut reader, dest).map_err(|e| ProvisionError::Fetch {
            url: url.to_string(),
            reason: format!("download interrupted: {}", e),
        })
    }
}

/// HTTP(S) + file fetcher when built with `http`, file-only otherwise.
pub fn default_fetcher() -> Box<dyn ArchiveFetcher> {
    #[cfg(feature = "http")]
    {
        Box::new(HttpFetcher::new())
    }
    #[cfg(not(feature = "http"))]
    {
        Box::new(FileFetcher)
    }
}

/// Writer adapter computing SHA-256 and byte count of everything written.
pub struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
    bytes: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes: 0,
        }
    }

    /// Returns the inner writer, the hex digest and the byte count.
    pub fn finish(self) -> (W, String, u64) {
        (self.inner, hex::encode(self.hasher.finalize()), self.bytes)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Pinned expectations for a download.
#[derive(Debug, Clone, Default)]
pub struct Expected<'a> {
    pub sha256: Option<&'a str>,
    pub size: Option<u64>,
}

/// Digest and size of a verified download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verified {
    pub sha256: String,
    pub size: u64,
}

/// Download `url` into `dest` and verify it. On mismatch `dest` is left for
/// the caller to discard.
pub fn download_verified(
    fetcher: &dyn ArchiveFetcher,
    url: &str,
    dest: &Path,
    expected: &Expected,
) -> Result<Verified> {
    let file = File::create(dest).map_err(|e| ProvisionError::io_at(dest, e))?;
    let mut writer = HashingWriter::new(BufWriter::new(file));
    fetcher.fetch(url, &mut writer)?;
    writer.flush().map_err(|e| ProvisionError::io_at(dest, e))?;
    let (_, sha256, size) = writer.finish();
    let verified = Verified { sha256, size };
    verify(url, &verified, expected)?;
    Ok(verified)
}

/// Hash a file already on disk (cached archive).
pub fn hash_file(path: &Path) -> Result<Verified> {
    let mut file = File::open(path).map_err(|e| ProvisionError::io_at(path, e))?;
    let mut writer = HashingWriter::new(io::sink());
    io::copy(&mut file, &mut writer).map_err(|e| ProvisionError::io_at(path, e))?;
    let (_, sha256, size) = writer.finish();
    Ok(Verified { sha256, size })
}

pub fn verify(url: &str, actual: &Verified, expected: &Expected) -> Result<()> {
    if actual.size == 0 {
        return Err(ProvisionError::Fetch {
            url: url.to_string(),
            reason: "empty response body".to_string(),
        });
    }
    if let Some(size) = expected.size {
        if size != actual.size {
            return Err(ProvisionError::Integrity {
                url: url.to_string(),
                expected: format!("{} bytes", size),
                actual: format!("{} bytes", actual.size),
            });
        }
    }
    match expected.sha256 {
        Some(sum) if !sum.trim().eq_ignore_ascii_case(&actual.sha256) => {
            Err(ProvisionError::Integrity {
                url: url.to_string(),
                expected: format!("sha256 {}", sum.trim().to_lowercase()),
                actual: format!("sha256 {}", actual.sha256),
            })
        }
        Some(_) => Ok(()),
        None => {
            tracing::warn!(
                "{} is not pinned; add `sha256: {}` to the desired state",
                url,
                actual.sha256
            );
            Ok(())
        }
    }
}
