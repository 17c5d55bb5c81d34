// src/cli/mod.rs — CLI definition (clap derive)

pub mod probe;
pub mod serve;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "fusionbridge",
    about = "FusionSolar energy-flow bridge with webhook notifications",
    version
)]
pub struct Cli {
    /// Config file path
    #[arg(long)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Poll the portal, send webhooks and serve the local API (default)
    Serve,
    /// Log in once and print the session details
    Login,
    /// Log in, read one energy-flow snapshot and print it as JSON
    Snapshot,
}

impl Cli {
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Serve)
    }
}
