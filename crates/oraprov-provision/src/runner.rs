//! Ordered, fail-fast convergence of provisioning steps.
//!
//! Each step first checks whether the desired state already holds and only
//! applies when it does not. The first failing step aborts the run; nothing
//! that already happened is rolled back.

use oraprov_core::desired_state::DesiredState;
use oraprov_core::observability;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;

use crate::error::{ProvisionError, Result};
use crate::exec::CommandRunner;
use crate::fetch::ArchiveFetcher;
use crate::info_log;
use crate::runtime_resolver::RuntimePaths;
use crate::state::Ledger;
use crate::steps;

/// Everything a step may read or touch.
pub struct Context<'a> {
    pub state: &'a DesiredState,
    pub runner: &'a dyn CommandRunner,
    pub fetcher: &'a dyn ArchiveFetcher,
    pub ledger: Ledger,
    /// Keep downloaded archives here instead of deleting them.
    pub cache_dir: Option<PathBuf>,
}

impl<'a> Context<'a> {
    pub fn new(
        state: &'a DesiredState,
        runner: &'a dyn CommandRunner,
        fetcher: &'a dyn ArchiveFetcher,
        ledger: Ledger,
    ) -> Self {
        Self {
            state,
            runner,
            fetcher,
            ledger,
            cache_dir: None,
        }
    }

    pub fn with_cache_dir(mut self, cache_dir: Option<PathBuf>) -> Self {
        self.cache_dir = cache_dir;
        self
    }

    /// Directory holding the Instant Client shared libraries, if installed.
    pub fn library_dir(&self) -> Option<PathBuf> {
        steps::fetch::installed_library_dir(self.state, &self.ledger)
    }

    pub fn runtime_paths(&self) -> RuntimePaths {
        let py = &self.state.python;
        let venv = py.venv.as_ref().map(|v| self.state.resolve(v));
        RuntimePaths::new(py.interpreter.as_deref(), venv.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum StepStatus {
    Satisfied,
    Pending(String),
    Skipped(String),
}

impl StepStatus {
    pub fn is_pending(&self) -> bool {
        matches!(self, StepStatus::Pending(_))
    }
}

pub trait Step {
    fn name(&self) -> &'static str;

    /// Inspect the system without changing it.
    fn check(&self, ctx: &Context) -> Result<StepStatus>;

    /// Converge to the desired state.
    fn apply(&self, ctx: &mut Context) -> Result<()>;
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedStep {
    pub step: &'static str,
    #[serde(flatten)]
    pub status: StepStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Applied,
    Satisfied,
    Skipped,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Applied => "applied",
            Outcome::Satisfied => "satisfied",
            Outcome::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step: &'static str,
    pub outcome: Outcome,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub steps: Vec<StepReport>,
}

impl RunReport {
    pub fn applied(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.steps
            .iter()
            .filter(|s| s.outcome == Outcome::Applied)
            .map(|s| s.step)
    }
}

pub struct Provisioner {
    steps: Vec<Box<dyn Step>>,
    skip: HashSet<String>,
}

impl Provisioner {
    /// OS packages → fetch/extract → compat links → loader path → Python
    /// manifest → wallet. The supervisor launch follows in [`Provisioner::provision`].
    pub fn standard() -> Self {
        Self::with_steps(vec![
            Box::new(steps::os_packages::OsPackagesStep),
            Box::new(steps::fetch::FetchStep),
            Box::new(steps::compat_links::CompatLinksStep),
            Box::new(steps::loader_path::LoaderPathStep),
            Box::new(steps::python_deps::PythonDepsStep),
            Box::new(steps::wallet::WalletStep::from_process_env()),
        ])
    }

    pub fn with_steps(steps: Vec<Box<dyn Step>>) -> Self {
        Self {
            steps,
            skip: HashSet::new(),
        }
    }

    /// Disable steps by name. Unknown names are a configuration error.
    pub fn skip<I, S>(mut self, names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            let name = name.into();
            if !self.steps.iter().any(|s| s.name() == name) {
                return Err(ProvisionError::Config(format!(
                    "unknown step '{}' (steps: {})",
                    name,
                    self.step_names().join(", ")
                )));
            }
            self.skip.insert(name);
        }
        Ok(self)
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Status of every step; changes nothing.
    pub fn plan(&self, ctx: &Context) -> Result<Vec<PlannedStep>> {
        let mut planned = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            let status = if self.skip.contains(step.name()) {
                StepStatus::Skipped("disabled on the command line".to_string())
            } else {
                step.check(ctx).map_err(|e| e.in_step(step.name()))?
            };
            planned.push(PlannedStep {
                step: step.name(),
                status,
            });
        }
        Ok(planned)
    }

    /// Converge every step in order, stopping at the first failure.
    pub fn apply(&self, ctx: &mut Context) -> Result<RunReport> {
        let mut report = RunReport::default();
        for step in &self.steps {
            let name = step.name();
            let started = Instant::now();
            let outcome = match self.run_step(step.as_ref(), ctx) {
                Ok(outcome) => outcome,
                Err(e) => {
                    let e = e.in_step(name);
                    tracing::error!(step = name, "{}", e);
                    observability::journal_run_failed(name, &e.to_string());
                    return Err(e);
                }
            };
            let duration_ms = started.elapsed().as_millis() as u64;
            observability::journal_step_finished(name, outcome.as_str(), duration_ms);
            report.steps.push(StepReport {
                step: name,
                outcome,
                duration_ms,
            });
        }
        Ok(report)
    }

    fn run_step(&self, step: &dyn Step, ctx: &mut Context) -> Result<Outcome> {
        let name = step.name();
        if self.skip.contains(name) {
            info_log!("[{}] skipped (disabled)", name);
            return Ok(Outcome::Skipped);
        }
        match step.check(ctx)? {
            StepStatus::Satisfied => {
                info_log!("[{}] already satisfied", name);
                Ok(Outcome::Satisfied)
            }
            StepStatus::Skipped(reason) => {
                info_log!("[{}] skipped: {}", name, reason);
                Ok(Outcome::Skipped)
            }
            StepStatus::Pending(reason) => {
                info_log!("[{}] applying: {}", name, reason);
                step.apply(ctx)?;
                ctx.ledger.save()?;
                Ok(Outcome::Applied)
            }
        }
    }

    /// Full provisioning run: converge, then launch the process supervisor in
    /// the foreground and return its exit code. The supervisor is never
    /// started when a step fails.
    pub fn provision(&self, ctx: &mut Context, port_override: Option<u16>) -> Result<(RunReport, i32)> {
        let report = self.apply(ctx)?;
        let plan = steps::supervisor::plan_launch(ctx, port_override)
            .map_err(|e| e.in_step(steps::supervisor::STEP_NAME))?;
        let code = steps::supervisor::launch(ctx, &plan)
            .map_err(|e| e.in_step(steps::supervisor::STEP_NAME))?;
        Ok((report, code))
    }
}
