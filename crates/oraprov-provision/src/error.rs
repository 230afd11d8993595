//! Provisioning failures, grouped by what broke.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("integrity check failed for {url}: expected {expected}, got {actual}")]
    Integrity {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("failed to extract {archive}: {reason}")]
    Extract { archive: PathBuf, reason: String },

    #[error("dependency installation failed: {0}")]
    Dependency(String),

    #[error("permission error on {path}: {source}")]
    Permission {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("compatibility link {expected}: {reason}")]
    Link { expected: String, reason: String },

    #[error("`{program}` exited with status {status}: {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("step '{step}' failed: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<ProvisionError>,
    },
}

impl ProvisionError {
    pub fn in_step(self, step: &str) -> Self {
        match self {
            already @ ProvisionError::Step { .. } => already,
            other => ProvisionError::Step {
                step: step.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Map an io error on `path` to `Permission` when it is one, else keep it as `Io`.
    pub fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path: PathBuf = path.into();
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            ProvisionError::Permission { path, source }
        } else {
            ProvisionError::Io(std::io::Error::new(
                source.kind(),
                format!("{}: {}", path.display(), source),
            ))
        }
    }

    /// Name of the step that failed, when wrapped.
    pub fn step(&self) -> Option<&str> {
        match self {
            ProvisionError::Step { step, .. } => Some(step),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProvisionError>;
