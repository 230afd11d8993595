//! `oraprov plan` and `oraprov check`

use anyhow::Result;
use oraprov_core::config::PathsConfig;
use oraprov_provision::exec::SystemRunner;
use oraprov_provision::fetch::default_fetcher;
use oraprov_provision::runner::{Context, PlannedStep, Provisioner, StepStatus};

use super::{load_state, open_ledger};

fn plan(paths: &PathsConfig) -> Result<Vec<PlannedStep>> {
    let state = load_state(paths)?;
    let runner = SystemRunner::new();
    let fetcher = default_fetcher();
    let ctx = Context::new(&state, &runner, fetcher.as_ref(), open_ledger(paths)?);
    Ok(Provisioner::standard().plan(&ctx)?)
}

pub fn cmd_plan(paths: &PathsConfig, json: bool) -> Result<()> {
    let planned = plan(paths)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&planned)?);
    } else {
        eprintln!("Plan for {}:", paths.desired_state_file.display());
        print!("{}", render_table(&planned));
    }
    Ok(())
}

pub fn cmd_check(paths: &PathsConfig) -> Result<()> {
    let planned = plan(paths)?;
    print!("{}", render_table(&planned));
    let pending: Vec<&str> = planned
        .iter()
        .filter(|p| p.status.is_pending())
        .map(|p| p.step)
        .collect();
    if !pending.is_empty() {
        anyhow::bail!("{} step(s) not converged: {}", pending.len(), pending.join(", "));
    }
    eprintln!("✓ All steps converged");
    Ok(())
}

fn render_table(planned: &[PlannedStep]) -> String {
    planned
        .iter()
        .map(|p| {
            let (label, reason) = match &p.status {
                StepStatus::Satisfied => ("ok", ""),
                StepStatus::Pending(r) => ("pending", r.as_str()),
                StepStatus::Skipped(r) => ("skipped", r.as_str()),
            };
            let line = format!("  {:<14} {:<8} {}", p.step, label, reason);
            format!("{}\n", line.trim_end())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_table() {
        let planned = vec![
            PlannedStep {
                step: "fetch",
                status: StepStatus::Pending("not installed".into()),
            },
            PlannedStep {
                step: "wallet",
                status: StepStatus::Satisfied,
            },
        ];
        assert_eq!(
            render_table(&planned),
            "  fetch          pending  not installed\n  wallet         ok\n"
        );
    }
}
