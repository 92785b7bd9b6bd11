//! CLI parser and command dispatch.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Settings;
use crate::registry::JobRegistry;

#[derive(Parser)]
#[command(name = "context-crawler")]
#[command(about = "Documentation crawling service producing JSON knowledge files")]
#[command(version)]
pub struct Cli {
    /// Job registry file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP submission API
    Serve {
        /// Bind address: port, host, or host:port (overrides API_HOST/API_PORT)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run the worker pool that executes queued crawl tasks
    Worker,

    /// Run a named job directly and aggregate its output
    Crawl {
        /// Registered job name
        name: String,
    },

    /// List registered jobs and their task counts
    Jobs,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_env();
    let registry = JobRegistry::discover(cli.config.as_deref(), &settings.root)?;

    match cli.command {
        Commands::Serve { bind } => commands::serve::cmd_serve(settings, registry, bind).await,
        Commands::Worker => commands::worker::cmd_worker(settings, registry).await,
        Commands::Crawl { name } => commands::crawl::cmd_crawl(settings, registry, &name).await,
        Commands::Jobs => commands::jobs::cmd_jobs(&registry),
    }
}
