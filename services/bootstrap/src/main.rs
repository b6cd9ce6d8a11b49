//! `transit` command line
//!
//! Usage:
//!   transit --config config/transit.toml serve
//!   transit --config config/transit.toml call --target /address --query "Darmstadt Hbf"

use anyhow::{Context, Result};
use bootstrap::{init_logging, request_message, Instance};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use transit_config::TransitConfig;

#[derive(Parser, Debug)]
#[command(name = "transit")]
#[command(about = "Multi-modal transit controller")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Worker threads per call, overrides runtime.num_threads
    #[arg(short, long)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run until interrupted, serving peers when a server is configured
    Serve,
    /// Issue a single call and print the response as JSON
    Call {
        #[arg(long)]
        target: String,

        /// Address query sent as the request payload
        #[arg(long)]
        query: Option<String>,
    },
}

/// How long `call` waits for remotes before dispatching anyway
const REMOTE_WAIT: Duration = Duration::from_secs(10);

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = TransitConfig::load(Some(&args.config))?;
    if let Some(threads) = args.threads {
        config.runtime.num_threads = threads.max(1);
    }
    init_logging(&config.logging)?;
    info!(config = %args.config.display(), "Starting transit");

    let mut instance = Instance::from_config(config)?;

    match args.command {
        Command::Serve => {
            // Calls block, so the signal gets its own runtime
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("Failed to build signal runtime")?
                .block_on(tokio::signal::ctrl_c())
                .context("Failed to listen for ctrl-c")?;
            info!("Received shutdown signal");
        }
        Command::Call { target, query } => {
            if !instance.config().remotes.is_empty() && !instance.wait_for_remotes(REMOTE_WAIT) {
                warn!("Dispatching before all remotes registered");
            }
            let response = instance
                .call(request_message(&target, query.as_deref()))
                .with_context(|| format!("Call to {} failed", target))?;
            println!("{}", serde_json::to_string_pretty(&*response)?);
        }
    }

    instance.shutdown();
    Ok(())
}
