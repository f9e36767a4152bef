mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::token::TokenSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "holdfast",
    about = "Durable actors: locked-on-failure setup, retry backoff, single-flight follow-ups and human review",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .holdfast/)
    #[arg(long, global = true, env = "HOLDFAST_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize holdfast in the current project
    Init,

    /// Run the HTTP/WebSocket server and the scheduler loop
    Serve {
        /// Port to listen on (default: server.port from config; 0 = OS-assigned)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Call a method on an actor
    Call {
        kind: String,
        id: String,
        method: String,
        /// JSON payload (default: {})
        #[arg(long)]
        payload: Option<String>,
    },

    /// Fire every scheduled task that is due now, once
    Tick,

    /// List scheduled tasks
    Tasks {
        /// Only tasks for this actor (kind/id)
        #[arg(long)]
        actor: Option<String>,
    },

    /// Show an actor's migration, single-flight and review state
    Status { kind: String, id: String },

    /// Work with intervention tokens
    Token {
        #[command(subcommand)]
        subcommand: TokenSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Serve { port } => cmd::serve::run(&root, port),
        Commands::Call {
            kind,
            id,
            method,
            payload,
        } => cmd::call::run(&root, &kind, &id, &method, payload.as_deref()),
        Commands::Tick => cmd::tick::run(&root, cli.json),
        Commands::Tasks { actor } => cmd::tasks::run(&root, actor.as_deref(), cli.json),
        Commands::Status { kind, id } => cmd::status::run(&root, &kind, &id, cli.json),
        Commands::Token { subcommand } => cmd::token::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
