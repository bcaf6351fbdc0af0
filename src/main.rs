mod cli;
mod server;
mod tools;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use verity::config::VerityConfig;

const DEFAULT_BASE_PROMPT: &str = "You are a helpful voice assistant.";

#[derive(Parser)]
#[command(name = "verity", version, about = "Deterministic fact memory for voice assistants")]
struct Cli {
    /// Config file (default: ~/.verity/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the MCP server (stdio transport unless --http)
    Serve {
        /// Serve Streamable HTTP on server.host:server.port instead of stdio
        #[arg(long)]
        http: bool,
    },
    /// Extract and store facts from a message
    Extract {
        #[arg(long)]
        user: String,
        /// Source message ID recorded as provenance
        #[arg(long)]
        message_id: Option<String>,
        /// JSON file with an array of {message_id, content} to process as a batch
        #[arg(long, conflicts_with = "text")]
        batch: Option<PathBuf>,
        /// Message text
        #[arg(required_unless_present = "batch")]
        text: Vec<String>,
    },
    /// Show a user's critical facts and entities
    Facts {
        #[arg(long)]
        user: String,
        /// Show the full history of one attribute instead
        #[arg(long)]
        history: Option<String>,
    },
    /// Show one entity with aliases and audit trail
    Inspect {
        #[arg(long)]
        user: String,
        entity_id: String,
    },
    /// Forget (deactivate) an entity
    Forget {
        #[arg(long)]
        user: String,
        entity_id: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Print the system prompt with the user's critical facts
    Prompt {
        #[arg(long)]
        user: String,
        #[arg(long, default_value = DEFAULT_BASE_PROMPT)]
        base: String,
        /// Also fetch advisory context for this query
        #[arg(long)]
        query: Option<String>,
    },
    /// Run the read-only fact accuracy self-test
    Selftest {
        #[arg(long)]
        user: String,
    },
    /// Per-user diagnostics
    Diag {
        #[arg(long)]
        user: String,
    },
    /// Run the conflict resolver and list pending conflicts
    Resolve {
        #[arg(long)]
        user: String,
        /// Mark a pending conflict as confirmed by the user
        #[arg(long)]
        dismiss: Option<String>,
    },
    /// Check database health
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => VerityConfig::load_from(path)?,
        None => VerityConfig::load()?,
    };

    // Log to stderr so stdout stays clean for MCP JSON-RPC.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve { http } => {
            if http || config.server.transport == "http" {
                server::serve_http(config).await?;
            } else {
                server::serve_stdio(config).await?;
            }
        }
        Command::Extract { user, message_id, batch, text } => match batch {
            Some(path) => cli::extract::extract_batch(&config, &user, &path).await?,
            None => {
                cli::extract::extract(&config, &user, &text.join(" "), message_id.as_deref()).await?
            }
        },
        Command::Facts { user, history } => {
            cli::facts::facts(&config, &user, history.as_deref()).await?;
        }
        Command::Inspect { user, entity_id } => {
            cli::facts::inspect(&config, &user, &entity_id).await?;
        }
        Command::Forget { user, entity_id, reason } => {
            cli::facts::forget(&config, &user, &entity_id, reason.as_deref()).await?;
        }
        Command::Prompt { user, base, query } => {
            cli::prompt::prompt(&config, &user, &base, query.as_deref()).await?;
        }
        Command::Selftest { user } => cli::selftest::selftest(&config, &user).await?,
        Command::Diag { user } => cli::diag::diag(&config, &user).await?,
        Command::Resolve { user, dismiss } => {
            cli::resolve::resolve(&config, &user, dismiss.as_deref()).await?;
        }
        Command::Doctor => cli::doctor::doctor(&config)?,
    }

    Ok(())
}
