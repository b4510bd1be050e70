//! tomei - declarative developer-environment reconciler CLI

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Parser)]
#[command(name = "tomei")]
#[command(author, version, about = "Declarative, idempotent developer environments")]
struct Cli {
    /// Output format for plans, state, and events
    #[arg(long, global = true, value_enum, default_value_t = Output::Text)]
    output: Output,

    /// Disable colored diagnostics
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Output {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the managed directories and an empty state file
    Init,
    /// Reconcile the machine with the manifests
    Apply {
        /// Manifest files or directories (default: the config directory)
        #[arg(short, long)]
        file: Vec<PathBuf>,
        /// Re-resolve tools with floating versions
        #[arg(long)]
        update_tools: bool,
        /// Re-resolve runtimes with floating versions
        #[arg(long)]
        update_runtimes: bool,
        /// Re-resolve both tools and runtimes
        #[arg(long)]
        update_all: bool,
        /// Re-install everything that was requested as latest
        #[arg(long)]
        sync: bool,
        /// Maximum concurrent installs (default: CPU count)
        #[arg(long)]
        parallelism: Option<usize>,
    },
    /// Show what apply would do, without doing it
    Plan {
        #[arg(short, long)]
        file: Vec<PathBuf>,
        #[arg(long)]
        update_tools: bool,
        #[arg(long)]
        update_runtimes: bool,
        #[arg(long)]
        update_all: bool,
        #[arg(long)]
        sync: bool,
    },
    /// Validate manifests without touching state
    Validate {
        #[arg(short, long)]
        file: Vec<PathBuf>,
    },
    /// Print installed resources from state
    Get {
        /// Resource kind: runtime, tool, installer, repository
        kind: cmd::get::GetKind,
        /// Resource name (all of the kind when omitted)
        name: Option<String>,
    },
    /// Print shell exports for the managed environment
    Env,
    /// Show failure logs from past applies
    Logs {
        /// Session directory name (latest when omitted)
        session: Option<String>,
    },
    /// Check the health of the managed directories and state
    Doctor,
    /// State maintenance commands
    State {
        #[command(subcommand)]
        command: StateCommands,
    },
    /// Remove everything tomei manages
    Uninit {
        /// Confirm removal
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum StateCommands {
    /// Diff the current state against the pre-apply backup
    Diff,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("TOMEI_LOG")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_ansi(!cli.no_color)
        .with_writer(std::io::stderr)
        .init();

    let json = cli.output == Output::Json;
    let result: Result<()> = match cli.command {
        Commands::Init => cmd::init::run(),
        Commands::Apply {
            file,
            update_tools,
            update_runtimes,
            update_all,
            sync,
            parallelism,
        } => {
            let flags = tomei::plan::PlanFlags {
                sync,
                update_tools: update_tools || update_all,
                update_runtimes: update_runtimes || update_all,
            };
            cmd::apply::run(file, flags, parallelism, json).await
        }
        Commands::Plan { file, update_tools, update_runtimes, update_all, sync } => {
            let flags = tomei::plan::PlanFlags {
                sync,
                update_tools: update_tools || update_all,
                update_runtimes: update_runtimes || update_all,
            };
            cmd::plan::run(file, flags, json)
        }
        Commands::Validate { file } => cmd::validate::run(file),
        Commands::Get { kind, name } => cmd::get::run(kind, name, json),
        Commands::Env => cmd::env::run(),
        Commands::Logs { session } => cmd::logs::run(session),
        Commands::Doctor => cmd::doctor::run(),
        Commands::State { command: StateCommands::Diff } => cmd::state::diff(json),
        Commands::Uninit { yes } => cmd::uninit::run(yes),
    };

    if let Err(error) = result {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}
