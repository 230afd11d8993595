//! `oraprov apply`, `oraprov up` and `oraprov serve`

use anyhow::Result;
use oraprov_core::config::PathsConfig;
use oraprov_core::observability;
use oraprov_provision::exec::SystemRunner;
use oraprov_provision::fetch::default_fetcher;
use oraprov_provision::runner::{Context, Outcome, Provisioner, RunReport};
use oraprov_provision::steps::supervisor;

use super::{load_state, open_ledger};

pub fn cmd_apply(paths: &PathsConfig, skip: &[String]) -> Result<()> {
    let state = load_state(paths)?;
    observability::journal_run_started("apply", &paths.desired_state_file.to_string_lossy());

    let runner = SystemRunner::new();
    let fetcher = default_fetcher();
    let mut ctx = Context::new(&state, &runner, fetcher.as_ref(), open_ledger(paths)?)
        .with_cache_dir(paths.cache_dir.clone());
    let report = Provisioner::standard()
        .skip(skip.iter().cloned())?
        .apply(&mut ctx)?;
    eprintln!("{}", summarize(&report));
    Ok(())
}

/// Converge, then hand the process over to the supervisor. On Unix the
/// supervisor replaces this process; elsewhere its exit code is returned.
pub fn cmd_up(paths: &PathsConfig, skip: &[String], port: Option<u16>) -> Result<i32> {
    let state = load_state(paths)?;
    observability::journal_run_started("up", &paths.desired_state_file.to_string_lossy());

    let runner = SystemRunner::with_exec(true);
    let fetcher = default_fetcher();
    let mut ctx = Context::new(&state, &runner, fetcher.as_ref(), open_ledger(paths)?)
        .with_cache_dir(paths.cache_dir.clone());
    let (_, code) = Provisioner::standard()
        .skip(skip.iter().cloned())?
        .provision(&mut ctx, port)?;
    Ok(code)
}

pub fn cmd_serve(paths: &PathsConfig, port: Option<u16>) -> Result<i32> {
    let state = load_state(paths)?;
    observability::journal_run_started("serve", &paths.desired_state_file.to_string_lossy());

    let runner = SystemRunner::with_exec(true);
    let fetcher = default_fetcher();
    let ctx = Context::new(&state, &runner, fetcher.as_ref(), open_ledger(paths)?);
    let plan = supervisor::plan_launch(&ctx, port)?;
    Ok(supervisor::launch(&ctx, &plan)?)
}

fn summarize(report: &RunReport) -> String {
    let count = |o: Outcome| report.steps.iter().filter(|s| s.outcome == o).count();
    let applied: Vec<&str> = report.applied().collect();
    if applied.is_empty() {
        format!(
            "✓ Already converged ({} satisfied, {} skipped)",
            count(Outcome::Satisfied),
            count(Outcome::Skipped)
        )
    } else {
        format!(
            "✓ Converged: applied {} ({} satisfied, {} skipped)",
            applied.join(", "),
            count(Outcome::Satisfied),
            count(Outcome::Skipped)
        )
    }
}
