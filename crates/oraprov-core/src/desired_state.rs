//! Desired-state description of a provisioned runtime.
//!
//! A `provision.yaml` lists everything the environment must converge to:
//! OS prerequisites, the pinned Instant Client archive, library-name
//! compatibility links, loader path export, Python manifest, wallet
//! directory and the process supervisor settings.

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DesiredStateError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse desired state: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid desired state: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, DesiredStateError>;

// ─── Permission bits ────────────────────────────────────────────────────────

/// Unix permission bits, written as an octal string (`"755"`) in YAML.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMode(pub u32);

impl FileMode {
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let digits = s
            .strip_prefix("0o")
            .or_else(|| s.strip_prefix("0O"))
            .unwrap_or(s);
        if digits.is_empty() {
            return None;
        }
        let bits = u32::from_str_radix(digits, 8).ok()?;
        (bits <= 0o7777).then_some(Self(bits))
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:o}", self.0)
    }
}

impl Serialize for FileMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FileMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        // Read the scalar as written so bare `755` and `0o755` keep their octal digits.
        let text = String::deserialize(deserializer)?;
        FileMode::parse(&text).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid permission mode '{}': expected octal such as \"755\"",
                text
            ))
        })
    }
}

// ─── Sections ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    #[default]
    Auto,
    Apt,
    Dnf,
    Yum,
    Microdnf,
    Apk,
    None,
}

impl PackageManager {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Apt => "apt",
            Self::Dnf => "dnf",
            Self::Yum => "yum",
            Self::Microdnf => "microdnf",
            Self::Apk => "apk",
            Self::None => "none",
        }
    }
}

/// OS-level prerequisites (download tool, unzip, async I/O shim).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OsPackages {
    pub manager: PackageManager,
    pub packages: Vec<String>,
    /// Refresh the package index before installing (apt only).
    pub update_index: bool,
}

impl Default for OsPackages {
    fn default() -> Self {
        Self {
            manager: PackageManager::Auto,
            packages: Vec::new(),
            update_index: true,
        }
    }
}

/// The pinned Instant Client archive and where it is extracted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstantClient {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default = "default_install_dir")]
    pub install_dir: PathBuf,
    #[serde(default)]
    pub keep_archive: bool,
    /// Directory holding the shared libraries after extraction. When unset it
    /// is detected (`instantclient_*` under `install_dir`, or `install_dir`
    /// itself for flat archives).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub library_dir: Option<PathBuf>,
}

fn default_install_dir() -> PathBuf {
    PathBuf::from("/opt/oracle")
}

/// Library name the driver expects → name the distribution ships.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompatLink {
    pub expected: String,
    pub provided: String,
    #[serde(default = "default_search_dirs")]
    pub search_dirs: Vec<PathBuf>,
    /// Where the link is created; defaults to the directory holding `provided`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_dir: Option<PathBuf>,
}

pub fn default_search_dirs() -> Vec<PathBuf> {
    [
        "/usr/lib/x86_64-linux-gnu",
        "/usr/lib/aarch64-linux-gnu",
        "/usr/lib64",
        "/usr/lib",
        "/lib/x86_64-linux-gnu",
        "/lib64",
        "/lib",
    ]
    .iter()
    .map(PathBuf::from)
    .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnvironmentExport {
    /// Also prepend the library dir to `PATH` (sqlplus and friends).
    pub export_path: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_script: Option<PathBuf>,
    /// Loader config file (e.g. `/etc/ld.so.conf.d/oracle-instantclient.conf`); runs `ldconfig`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ld_so_conf: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PythonDeps {
    pub enabled: bool,
    pub requirements: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub venv: Option<PathBuf>,
    pub extra_args: Vec<String>,
}

impl Default for PythonDeps {
    fn default() -> Self {
        Self {
            enabled: true,
            requirements: PathBuf::from("requirements.txt"),
            interpreter: None,
            venv: None,
            extra_args: vec!["--no-cache-dir".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WalletSpec {
    pub enabled: bool,
    pub dir: PathBuf,
    pub dir_mode: FileMode,
    pub file_mode: FileMode,
    /// Materialize wallet files from `*_B64` environment variables.
    pub from_env: bool,
    pub export_tns_admin: bool,
}

impl Default for WalletSpec {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("wallet"),
            dir_mode: FileMode(0o755),
            file_mode: FileMode(0o644),
            from_env: true,
            export_tns_admin: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSpec {
    pub program: String,
    pub app: String,
    pub host: String,
    pub default_port: u16,
    pub port_env: String,
    pub workers: u32,
    pub timeout_secs: u64,
    pub extra_args: Vec<String>,
}

impl Default for ServerSpec {
    fn default() -> Self {
        Self {
            program: "gunicorn".to_string(),
            app: "app:app".to_string(),
            host: "0.0.0.0".to_string(),
            default_port: 10000,
            port_env: "PORT".to_string(),
            workers: 1,
            timeout_secs: 120,
            extra_args: Vec::new(),
        }
    }
}

// ─── Root ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DesiredState {
    #[serde(default)]
    pub os_packages: OsPackages,
    pub instant_client: InstantClient,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compat_links: Vec<CompatLink>,
    #[serde(default)]
    pub environment: EnvironmentExport,
    #[serde(default)]
    pub python: PythonDeps,
    #[serde(default)]
    pub wallet: WalletSpec,
    #[serde(default)]
    pub server: ServerSpec,
    /// Directory relative paths are resolved against (the file's directory).
    #[serde(skip)]
    pub base_dir: PathBuf,
}

fn sha256_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9a-fA-F]{64}$").expect("static regex sha256"))
}

impl DesiredState {
    /// Read, parse and validate a desired-state file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| DesiredStateError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut state = Self::from_yaml_str(&content)?;
        state.base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(state)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let mut state: DesiredState = serde_yaml::from_str(content)?;
        state.base_dir = PathBuf::from(".");
        state.validate()?;
        Ok(state)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Resolve a possibly-relative path against `base_dir`.
    pub fn resolve(&self, p: &Path) -> PathBuf {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.base_dir.join(p)
        }
    }

    pub fn validate(&self) -> Result<()> {
        let ic = &self.instant_client;
        let url = ic.url.trim();
        if url.is_empty() {
            return Err(invalid("instant_client.url must not be empty"));
        }
        if !["http://", "https://", "file://"]
            .iter()
            .any(|scheme| url.starts_with(scheme))
        {
            return Err(invalid(format!(
                "instant_client.url '{}' must use http, https or file scheme",
                url
            )));
        }
        if let Some(ref sum) = ic.sha256 {
            if !sha256_re().is_match(sum.trim()) {
                return Err(invalid(format!(
                    "instant_client.sha256 '{}' is not a 64-digit hex digest",
                    sum
                )));
            }
        }
        if ic.size == Some(0) {
            return Err(invalid("instant_client.size must be greater than zero"));
        }
        for link in &self.compat_links {
            for name in [&link.expected, &link.provided] {
                if name.trim().is_empty() || name.contains('/') {
                    return Err(invalid(format!(
                        "compat link names must be bare file names, got '{}'",
                        name
                    )));
                }
            }
            if link.expected == link.provided {
                return Err(invalid(format!(
                    "compat link '{}' points at itself",
                    link.expected
                )));
            }
        }
        let server = &self.server;
        if server.program.trim().is_empty() || server.app.trim().is_empty() {
            return Err(invalid("server.program and server.app must not be empty"));
        }
        if server.default_port == 0 {
            return Err(invalid("server.default_port must be in 1..=65535"));
        }
        if server.workers == 0 {
            return Err(invalid("server.workers must be at least 1"));
        }
        if server.timeout_secs == 0 {
            return Err(invalid("server.timeout_secs must be at least 1"));
        }
        if server.port_env.trim().is_empty() {
            return Err(invalid("server.port_env must not be empty"));
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> DesiredStateError {
    DesiredStateError::Invalid(msg.into())
}
