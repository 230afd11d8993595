//! oraprov CLI library: argument parsing and command dispatch.

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use oraprov_core::config::PathsConfig;

/// Run the CLI: parse args, initialise logging and dispatch.
pub fn run_cli() -> Result<()> {
    // `.env` first so clap's env fallbacks see it.
    oraprov_core::config::load_dotenv();
    let cli = Cli::parse();
    oraprov_core::observability::init_tracing();

    let paths = resolve_paths(&cli);
    match cli.command {
        Commands::Init { variant, force } => {
            commands::init::cmd_init(&paths.desired_state_file, variant, force)?;
        }
        Commands::Plan { json } => {
            commands::plan::cmd_plan(&paths, json)?;
        }
        Commands::Check => {
            commands::plan::cmd_check(&paths)?;
        }
        Commands::Apply { skip } => {
            commands::apply::cmd_apply(&paths, &skip)?;
        }
        Commands::Up { skip, port } => {
            let code = commands::apply::cmd_up(&paths, &skip, port)?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Serve { port } => {
            let code = commands::apply::cmd_serve(&paths, port)?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Env { format } => {
            commands::env::cmd_env(&paths, &format)?;
        }
        Commands::CleanCache { dry_run, force } => {
            commands::env::cmd_clean(&paths, dry_run, force)?;
        }
    }
    Ok(())
}

/// Command line > environment (incl. legacy names) > defaults.
fn resolve_paths(cli: &Cli) -> PathsConfig {
    let mut paths = PathsConfig::from_env();
    if let Some(ref f) = cli.file {
        paths.desired_state_file = f.clone();
    }
    if let Some(ref d) = cli.state_dir {
        paths.state_dir = d.clone();
    }
    if let Some(ref d) = cli.cache_dir {
        paths.cache_dir = Some(d.clone());
    }
    paths
}
