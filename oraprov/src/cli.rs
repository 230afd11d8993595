use clap::{Parser, Subcommand};
use oraprov_core::presets::Variant;
use std::path::PathBuf;

/// oraprov - converge a host or image to an Oracle Instant Client runtime and serve the app
#[derive(Parser, Debug)]
#[command(name = "oraprov")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Desired-state file (default: provision.yaml)
    #[arg(long, global = true, env = "ORAPROV_FILE", value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Directory holding the convergence ledger
    #[arg(long, global = true, env = "ORAPROV_STATE_DIR", value_name = "DIR")]
    pub state_dir: Option<PathBuf>,

    /// Keep downloaded archives in this directory and reuse them
    #[arg(long, global = true, env = "ORAPROV_CACHE_DIR", value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a preset desired-state file for a base image
    Init {
        /// debian, ubuntu-noble or oraclelinux
        #[arg(long, short, default_value = "debian")]
        variant: Variant,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show what each step would do, without changing anything
    Plan {
        /// Emit JSON instead of a table
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Exit non-zero when any step is not converged
    Check,

    /// Converge every provisioning step
    Apply {
        /// Step to leave out (repeatable)
        #[arg(long = "skip", value_name = "STEP")]
        skip: Vec<String>,
    },

    /// Converge, then run the application under its process supervisor
    Up {
        /// Step to leave out (repeatable)
        #[arg(long = "skip", value_name = "STEP")]
        skip: Vec<String>,

        /// Listen port (overrides the port variable and the default)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Run the application without provisioning
    Serve {
        /// Listen port (overrides the port variable and the default)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Print the variables exported to the application
    Env {
        #[arg(long, default_value = "shell", value_parser = ["shell", "json"])]
        format: String,
    },

    /// Remove cached Instant Client archives
    #[command(name = "clean-cache")]
    CleanCache {
        /// Dry run: show what would be removed without deleting
        #[arg(long)]
        dry_run: bool,

        /// Force removal without confirmation
        #[arg(long, short)]
        force: bool,
    },
}
