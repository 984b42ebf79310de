//! pinion CLI

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pinion_cli::{Cli, Commands, cmd};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so they never interleave with rendered progress.
    let filter = if cli.verbose {
        EnvFilter::new("pinion=debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init {
            upgrade,
            plugin_dirs,
            config,
            state,
            lock_file,
        } => {
            let opts = pinion_core::InitOptions {
                root: cli.root,
                config,
                state,
                lock_file,
                plugin_dirs,
                upgrade,
            };
            cmd::init::init(&opts).await
        }
        Commands::Providers { config, state } => {
            let opts = pinion_core::InitOptions {
                root: cli.root,
                config,
                state,
                ..pinion_core::InitOptions::default()
            };
            cmd::providers::providers(&opts)
        }
    }
}
