//! Grimoire CLI — the main entry point.
//!
//! Commands:
//! - `chat`     — Talk to an NPC
//! - `tools`    — Let an NPC detect and run tool calls for one message
//! - `catalog`  — List the tools an NPC can use
//! - `init`     — Print or write a default config

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "grimoire",
    about = "Grimoire — LLM NPCs that call tools",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: ~/.grimoire/config.toml)
    #[arg(long, global = true, env = "GRIMOIRE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with an NPC
    Chat {
        /// Agent profile to use
        #[arg(short, long)]
        agent: Option<String>,

        /// Wait for whole answers instead of streaming
        #[arg(long)]
        no_stream: bool,

        /// Read the NPC's system instructions from a file
        #[arg(long, value_name = "FILE")]
        instructions: Option<PathBuf>,
    },

    /// Detect and execute tool calls for a single message
    Tools {
        /// Agent profile to use
        #[arg(short, long)]
        agent: Option<String>,

        /// Ask before every tool invocation
        #[arg(short, long)]
        confirm: bool,

        /// Also load tools from a remote server
        #[arg(long)]
        remote: Option<String>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,

        /// Read the tool-run instructions from a file
        #[arg(long, value_name = "FILE")]
        instructions: Option<PathBuf>,

        /// The message to send
        #[arg(required = true, trailing_var_arg = true)]
        message: Vec<String>,
    },

    /// List the active tool catalog
    Catalog {
        /// Also load tools from a remote server
        #[arg(long)]
        remote: Option<String>,
    },

    /// Print a default config, or write it with --write
    Init {
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Chat {
            agent,
            no_stream,
            instructions,
        } => {
            commands::chat::run(config, agent.as_deref(), !no_stream, instructions.as_deref())
                .await?
        }
        Commands::Tools {
            agent,
            confirm,
            remote,
            json,
            instructions,
            message,
        } => {
            let options = commands::tools::ToolsOptions {
                agent,
                confirm,
                remote,
                json,
                instructions,
                verbose: cli.verbose,
            };
            commands::tools::run(config, &message.join(" "), options).await?
        }
        Commands::Catalog { remote } => commands::catalog::run(config, remote.as_deref()).await?,
        Commands::Init { write } => commands::init::run(config, write)?,
    }

    Ok(())
}
