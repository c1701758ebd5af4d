//! engram - a per-developer memory service for coding assistants
//!
//! Thin invocation surface over engram-core: the two assistant hooks, the
//! background worker, skill management, and operator status.

mod commands;
mod hooks;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use engram_core::Config;

#[derive(Parser)]
#[command(name = "engram", version, about = "Per-developer memory for coding assistants")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Retrieve context for a prompt
    Retrieve {
        /// Read hook JSON from stdin (prompt hook mode)
        #[arg(long)]
        hook: bool,
        /// Manual query for testing
        #[arg(long, short)]
        query: Option<String>,
        /// Simulate a working directory
        #[arg(long)]
        cwd: Option<String>,
        /// Token budget override
        #[arg(long)]
        tokens: Option<usize>,
    },
    /// Record assistant sessions
    Record {
        /// Read hook JSON from stdin (stop hook mode)
        #[arg(long)]
        hook: bool,
        /// Scan and record all transcripts on disk
        #[arg(long)]
        all: bool,
    },
    /// Run the background worker
    Worker {
        /// Process currently-queued jobs and exit
        #[arg(long)]
        once: bool,
    },
    /// Manage skills
    Skill {
        #[command(subcommand)]
        command: commands::SkillCommand,
    },
    /// Manage the active project selection
    Project {
        #[command(subcommand)]
        command: commands::ProjectCommand,
    },
    /// Show queue and session status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let is_hook = matches!(
        cli.command,
        Command::Retrieve { hook: true, .. } | Command::Record { hook: true, .. }
    );

    // Hooks must stay silent on any failure: a corrupt or unreadable
    // config falls back to defaults instead of blocking the assistant.
    let config = match Config::load() {
        Ok(config) => config,
        Err(_) if is_hook => {
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
        Err(e) => return Err(e).context("failed to load configuration"),
    };

    let _log_guard = match engram_core::logging::init(&config.general) {
        Ok(guard) => Some(guard),
        Err(e) => {
            if !is_hook {
                eprintln!("warning: logging disabled: {}", e);
            }
            None
        }
    };

    match cli.command {
        Command::Retrieve {
            hook: true, ..
        } => {
            hooks::prompt_hook(&config).await;
            Ok(())
        }
        Command::Retrieve {
            query,
            cwd,
            tokens,
            ..
        } => commands::retrieve_manual(&config, query, cwd, tokens).await,
        Command::Record { hook: true, .. } => {
            hooks::stop_hook(&config).await;
            Ok(())
        }
        Command::Record { all, .. } => commands::record_all(&config, all).await,
        Command::Worker { once } => commands::run_worker(&config, once).await,
        Command::Skill { command } => commands::run_skill(&config, command).await,
        Command::Project { command } => commands::run_project(&config, command).await,
        Command::Status => commands::status(&config).await,
    }
}
