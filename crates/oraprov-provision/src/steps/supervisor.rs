//! Foreground launch of the application process supervisor.

use oraprov_core::config::ServerEnv;
use oraprov_core::desired_state::ServerSpec;
use oraprov_core::observability;
use std::path::PathBuf;

use crate::error::{ProvisionError, Result};
use crate::exec::CommandSpec;
use crate::info_log;
use crate::runner::Context;
use crate::runtime_resolver::RuntimeResolver;
use crate::steps::loader_path::exported_environment;

pub const STEP_NAME: &str = "supervisor";

/// Command line override, then the port variable, then the default.
/// A set but unparsable variable is an error rather than a silent fallback.
pub fn resolve_port(server: &ServerSpec, cli_override: Option<u16>, env_value: Option<&str>) -> Result<u16> {
    if let Some(port) = cli_override {
        return Ok(port);
    }
    match env_value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(server.default_port),
        Some(raw) => match raw.parse::<u16>() {
            Ok(port) if port > 0 => Ok(port),
            _ => Err(ProvisionError::Config(format!(
                "{}='{}' is not a valid TCP port",
                server.port_env, raw
            ))),
        },
    }
}

#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub command: CommandSpec,
    pub port: u16,
    pub bind: String,
}

/// Build the supervisor command. Refuses when the client libraries are not
/// installed, since the application could not load its driver.
pub fn plan_launch(ctx: &Context, port_override: Option<u16>) -> Result<LaunchPlan> {
    let lib_dir = ctx.library_dir().ok_or_else(|| {
        ProvisionError::Config(format!(
            "Instant Client libraries not found under {}; run `oraprov apply` first",
            ctx.state
                .resolve(&ctx.state.instant_client.install_dir)
                .display()
        ))
    })?;
    let server = &ctx.state.server;
    let env = ServerEnv::from_env(&server.port_env);
    let port = resolve_port(server, port_override, env.port.as_deref())?;
    let bind = format!("{}:{}", server.host, port);

    let paths = ctx.runtime_paths();
    let (program, mut extra_env) = match paths.resolve(&server.program) {
        Some(rt) => (rt.program, rt.extra_env),
        None => {
            tracing::warn!(
                "{} not found in the venv or on PATH; launching by name",
                server.program
            );
            (PathBuf::from(&server.program), Vec::new())
        }
    };

    let mut vars = exported_environment(ctx.state, &lib_dir);
    vars.append(&mut extra_env);
    vars.push((server.port_env.clone(), port.to_string()));

    let command = CommandSpec::new(program)
        .arg("--bind")
        .arg(bind.as_str())
        .arg("--workers")
        .arg(server.workers.to_string())
        .arg("--timeout")
        .arg(server.timeout_secs.to_string())
        .args(server.extra_args.iter().cloned())
        .arg(server.app.as_str())
        .envs(&vars)
        .current_dir(&ctx.state.base_dir);

    Ok(LaunchPlan {
        command,
        port,
        bind,
    })
}

/// Run the supervisor in the foreground and return its exit code.
pub fn launch(ctx: &Context, plan: &LaunchPlan) -> Result<i32> {
    let server = &ctx.state.server;
    info_log!("[{}] {}", STEP_NAME, plan.command.display());
    observability::journal_supervisor_launched(
        &plan.command.program_name(),
        &plan.bind,
        server.workers,
        server.timeout_secs,
    );
    ctx.runner.launch(&plan.command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_precedence() {
        let server = ServerSpec::default();
        assert_eq!(resolve_port(&server, None, None).unwrap(), 10000);
        assert_eq!(resolve_port(&server, None, Some("8080")).unwrap(), 8080);
        assert_eq!(resolve_port(&server, Some(9000), Some("8080")).unwrap(), 9000);
        assert_eq!(resolve_port(&server, None, Some("  ")).unwrap(), 10000);
    }

    #[test]
    fn test_invalid_port_is_config_error() {
        let server = ServerSpec::default();
        for raw in ["http", "0", "70000"] {
            let err = resolve_port(&server, None, Some(raw)).unwrap_err();
            assert!(matches!(err, ProvisionError::Config(_)), "{raw}");
        }
    }
}
