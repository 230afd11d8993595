//! Convergence ledger.
//!
//! Persists one fingerprint per step key to `<state_dir>/state.json`. A step
//! whose inputs hash to the recorded fingerprint (and whose artifacts still
//! exist) is satisfied and is not re-executed.

use crate::error::{ProvisionError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const STATE_FILE_NAME: &str = "state.json";
const LEDGER_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerEntry {
    pub fingerprint: String,
    pub recorded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Top-level names the step created, removed when it is applied again.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    version: u32,
    entries: BTreeMap<String, LedgerEntry>,
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self {
            version: LEDGER_VERSION,
            entries: BTreeMap::new(),
            path: None,
        }
    }
}

impl Ledger {
    /// Load `<state_dir>/state.json`. A missing file yields an empty ledger;
    /// an unreadable one is discarded with a warning so the run re-converges.
    pub fn load(state_dir: &Path) -> Result<Self> {
        let path = state_dir.join(STATE_FILE_NAME);
        let mut ledger = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|e| ProvisionError::io_at(&path, e))?;
            match serde_json::from_str::<Ledger>(&content) {
                Ok(l) if l.version == LEDGER_VERSION => l,
                Ok(l) => {
                    tracing::warn!(
                        "state ledger {} has version {}, expected {}; starting fresh",
                        path.display(),
                        l.version,
                        LEDGER_VERSION
                    );
                    Ledger::default()
                }
                Err(e) => {
                    tracing::warn!("state ledger {} is corrupt ({}); starting fresh", path.display(), e);
                    Ledger::default()
                }
            }
        } else {
            Ledger::default()
        };
        ledger.path = Some(path);
        Ok(ledger)
    }

    /// Ledger that is never persisted (plans, tests).
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<&LedgerEntry> {
        self.entries.get(key)
    }

    pub fn matches(&self, key: &str, fingerprint: &str) -> bool {
        self.entries
            .get(key)
            .map(|e| e.fingerprint == fingerprint)
            .unwrap_or(false)
    }

    pub fn record(&mut self, key: &str, fingerprint: String, detail: Option<String>) {
        self.entries.insert(
            key.to_string(),
            LedgerEntry {
                fingerprint,
                recorded_at: Utc::now(),
                detail,
                artifacts: Vec::new(),
            },
        );
    }

    pub fn set_artifacts(&mut self, key: &str, artifacts: Vec<String>) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.artifacts = artifacts;
        }
    }

    pub fn forget(&mut self, key: &str) {
        self.entries.remove(key);
    }

    /// Write atomically (temp file in the same directory, then rename).
    pub fn save(&self) -> Result<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        let parent = path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(parent).map_err(|e| ProvisionError::io_at(parent, e))?;
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ProvisionError::Config(format!("serialize ledger: {}", e)))?;
        let mut tmp =
            tempfile::NamedTempFile::new_in(parent).map_err(|e| ProvisionError::io_at(parent, e))?;
        tmp.write_all(content.as_bytes())?;
        tmp.persist(path)
            .map_err(|e| ProvisionError::io_at(path, e.error))?;
        Ok(())
    }
}

/// SHA-256 over length-prefixed parts, so `["ab", "c"]` and `["a", "bc"]` differ.
pub fn fingerprint(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}
