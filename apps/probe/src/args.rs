//! # CLI Argument Definitions

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// The main CLI structure parsing command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "rundial-probe")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(arg_required_else_help = true)]
#[command(about = "Resolve and dial peer services the way rundial clients do")]
pub struct Cli {
    /// Configuration file (TOML). `RUNDIAL__*` variables apply on top.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the target each service resolves to
    Resolve {
        #[arg(required = true)]
        services: Vec<String>,
    },
    /// Dial every service and report the established connections
    Dial(DialArgs),
}

#[derive(Debug, Args)]
pub struct DialArgs {
    #[arg(required = true)]
    pub services: Vec<String>,

    /// Dial without TLS
    #[arg(long)]
    pub plaintext: bool,

    /// Skip identity-token injection
    #[arg(long)]
    pub no_auth: bool,

    /// Overall deadline for authentication and dialing
    #[arg(long, value_name = "N")]
    pub timeout_secs: Option<u64>,

    /// Create channels that connect on first use
    #[arg(long)]
    pub lazy: bool,
}
