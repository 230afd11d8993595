//! oraprov-provision: converge a host or image to an Oracle Instant Client
//! runtime and launch the application under its process supervisor.
//!
//! - `runner`: Step trait, Provisioner (plan / apply / provision)
//! - `steps`: os_packages, fetch, compat_links, loader_path, python_deps, wallet, supervisor
//! - `fetch` / `extract`: verified download and archive unpacking
//! - `exec`: CommandRunner seam over std::process
//! - `state`: fingerprint ledger for convergence

pub mod error;
pub mod exec;
pub mod extract;
pub mod fetch;
pub mod log;
pub mod runner;
pub mod runtime_resolver;
pub mod state;
pub mod steps;

pub use error::{ProvisionError, Result};
pub use runner::{Context, Provisioner, StepStatus};
