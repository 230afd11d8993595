//! Config structs grouped by concern, loaded from environment variables.

use super::env_keys::{observability as obv_keys, paths as path_keys};
use super::loader::{env_bool, env_optional, env_or};
use std::path::PathBuf;

pub const DEFAULT_DESIRED_STATE_FILE: &str = "provision.yaml";

/// Desired-state file, state ledger and download cache locations.
#[derive(Debug, Clone)]
pub struct PathsConfig {
    pub desired_state_file: PathBuf,
    pub state_dir: PathBuf,
    /// Download cache. `None` means archives are fetched to a temp file and
    /// removed after extraction.
    pub cache_dir: Option<PathBuf>,
}

impl PathsConfig {
    pub fn from_env() -> Self {
        super::loader::load_dotenv();
        let desired_state_file = PathBuf::from(env_or(
            path_keys::ORAPROV_FILE,
            path_keys::FILE_ALIASES,
            || DEFAULT_DESIRED_STATE_FILE.to_string(),
        ));
        let state_dir = env_optional(path_keys::ORAPROV_STATE_DIR, &[])
            .map(PathBuf::from)
            .unwrap_or_else(default_state_dir);
        let cache_dir = env_optional(path_keys::ORAPROV_CACHE_DIR, path_keys::CACHE_DIR_ALIASES)
            .map(PathBuf::from);
        Self {
            desired_state_file,
            state_dir,
            cache_dir,
        }
    }

    /// Cache directory used for listing/cleaning, even when caching is off.
    pub fn download_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from(".").join(".cache"))
                .join("oraprov")
                .join("downloads")
        })
    }
}

fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("oraprov"))
        .unwrap_or_else(|| PathBuf::from(".oraprov"))
}

/// Raw port override for the served application.
#[derive(Debug, Clone, Default)]
pub struct ServerEnv {
    pub port: Option<String>,
}

impl ServerEnv {
    /// Read the port variable named in the desired state (usually `PORT`).
    pub fn from_env(port_env: &str) -> Self {
        super::loader::load_dotenv();
        Self {
            port: env_optional(port_env, &[]),
        }
    }
}

/// Observability: quiet, log_level, log_json, journal
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub quiet: bool,
    pub log_level: String,
    pub log_json: bool,
    pub journal: Option<String>,
}

impl ObservabilityConfig {
    pub fn from_env() -> &'static Self {
        use std::sync::OnceLock;
        static CACHE: OnceLock<ObservabilityConfig> = OnceLock::new();
        CACHE.get_or_init(|| {
            super::loader::load_dotenv();
            Self {
                quiet: env_bool(obv_keys::ORAPROV_QUIET, obv_keys::QUIET_ALIASES, false),
                log_level: env_or(
                    obv_keys::ORAPROV_LOG_LEVEL,
                    obv_keys::LOG_LEVEL_ALIASES,
                    || "oraprov=info".to_string(),
                ),
                log_json: env_bool(obv_keys::ORAPROV_LOG_JSON, &[], false),
                journal: env_optional(obv_keys::ORAPROV_JOURNAL, &[]),
            }
        })
    }
}
