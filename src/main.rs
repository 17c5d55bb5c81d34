// src/main.rs — fusionbridge entry point

use clap::Parser;

use fusionbridge::cli::{self, Cli, Commands};
use fusionbridge::infra::config::Config;
use fusionbridge::infra::logger;

#[tokio::main]
async fn main() {
    // RUST_LOG wins over the default level
    logger::init_logging("info");

    if let Err(e) = run().await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Cli::parse();

    // Environment overrides are applied by both loaders
    let config = match args.config.as_deref() {
        Some(path) => Config::load_from(std::path::Path::new(path))?,
        None => Config::load()?,
    };

    match args.command() {
        Commands::Serve => cli::serve::run_serve(config).await,
        Commands::Login => cli::probe::run_login(&config).await,
        Commands::Snapshot => cli::probe::run_snapshot(&config).await,
    }
}
