//! pinion - provider installer and dependency lock manager
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
//!
//! Reads a configuration tree (`pinion.toml`), resolves every provider it
//! requires against the lock file and the configured package sources,
//! installs them into `.pinion/providers`, and keeps `.pinion.lock` current.
//!
//! # Directory Layout
//!
//! ```text
//! <root>/
//! ├── pinion.toml      # configuration tree
//! ├── .pinion.lock     # dependency lock file
//! └── .pinion/
//!     └── providers/   # working set
//!
//! ~/.pinion/
//! ├── config.toml      # CLI settings
//! ├── plugins/         # implicit local mirror
//! └── plugin-cache/    # shared package cache
//! ```

pub mod cmd;
pub mod ui;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "pinion")]
#[command(author, version, about = "pinion - provider installer and dependency lock manager")]
pub struct Cli {
    /// Root configuration directory
    #[arg(short = 'C', long = "chdir", global = true, default_value = ".")]
    pub root: PathBuf,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Install the providers the configuration requires and update the lock file
    Init {
        /// Select the newest allowed version of every provider, ignoring the lock file
        #[arg(long)]
        upgrade: bool,
        /// Install only from these directories (repeatable); disables the registry
        #[arg(long = "plugin-dir")]
        plugin_dirs: Vec<PathBuf>,
        /// Configuration tree file (default: <root>/pinion.toml)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Prior state file whose resources also require providers
        #[arg(long)]
        state: Option<PathBuf>,
        /// Lock file path, or a directory to hold .pinion.lock
        #[arg(long)]
        lock_file: Option<PathBuf>,
    },
    /// Show the providers the configuration requires, per module
    Providers {
        /// Configuration tree file (default: <root>/pinion.toml)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Prior state file whose resources also require providers
        #[arg(long)]
        state: Option<PathBuf>,
    },
}
