//! RuntimeResolver trait: locates the Python interpreter and the executables
//! the provisioned environment runs (pip, the process supervisor).
//!
//! A configured venv wins over the system `PATH`.

use std::path::{Path, PathBuf};

/// Resolved executable and any extra env vars it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRuntime {
    /// Executable to run: the venv python, pip, or the process supervisor
    /// (e.g. /opt/venv/bin/gunicorn)
    pub program: PathBuf,
    /// Extra environment variables (e.g. VIRTUAL_ENV)
    pub extra_env: Vec<(String, String)>,
}

pub trait RuntimeResolver: Send + Sync {
    /// Resolve an executable by name. Returns `None` when it cannot be found.
    fn resolve(&self, name: &str) -> Option<ResolvedRuntime>;
}

/// Interpreter and optional venv of the provisioned Python environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimePaths {
    /// Interpreter used to create the venv / run pip when no venv is set.
    pub python: PathBuf,
    pub venv_dir: Option<PathBuf>,
}

impl RuntimePaths {
    /// `interpreter` is the configured name or path; `None` picks `python3`
    /// or `python` from `PATH`.
    pub fn new(interpreter: Option<&str>, venv_dir: Option<&Path>) -> Self {
        let python = interpreter
            .map(PathBuf::from)
            .or_else(|| {
                ["python3", "python"]
                    .iter()
                    .find_map(|n| which::which(n).ok())
            })
            .unwrap_or_else(|| PathBuf::from("python3"));
        Self {
            python,
            venv_dir: venv_dir.map(Path::to_path_buf),
        }
    }

    /// `bin/` (or `Scripts/` on Windows) of the venv.
    pub fn venv_bin(&self) -> Option<PathBuf> {
        let venv = self.venv_dir.as_ref()?;
        if cfg!(windows) {
            Some(venv.join("Scripts"))
        } else {
            Some(venv.join("bin"))
        }
    }

    /// Python that should run pip and the app: venv python if a venv is set.
    pub fn effective_python(&self) -> PathBuf {
        match self.venv_bin() {
            Some(bin) if cfg!(windows) => bin.join("python.exe"),
            Some(bin) => bin.join("python"),
            None => self.python.clone(),
        }
    }

    fn venv_env(&self) -> Vec<(String, String)> {
        self.venv_dir
            .as_ref()
            .map(|v| vec![("VIRTUAL_ENV".to_string(), v.to_string_lossy().to_string())])
            .unwrap_or_default()
    }
}

impl RuntimeResolver for RuntimePaths {
    fn resolve(&self, name: &str) -> Option<ResolvedRuntime> {
        if name == "python" || name == "python3" {
            return Some(ResolvedRuntime {
                program: self.effective_python(),
                extra_env: self.venv_env(),
            });
        }
        if Path::new(name).is_absolute() {
            return Path::new(name).exists().then(|| ResolvedRuntime {
                program: PathBuf::from(name),
                extra_env: self.venv_env(),
            });
        }
        if let Some(bin) = self.venv_bin() {
            let candidate = bin.join(name);
            if candidate.exists() {
                return Some(ResolvedRuntime {
                    program: candidate,
                    extra_env: self.venv_env(),
                });
            }
        }
        which::which(name).ok().map(|program| ResolvedRuntime {
            program,
            extra_env: Vec::new(),
        })
    }
}
