use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use loam_cli::llm::{raw_log, ThinkingEffort};
use loam_cli::transport::cli::{self, ChatOptions, DecodeArgs};

#[derive(Parser)]
#[command(name = "loam")]
#[command(author, version, about = "loam - coding-agent CLI for OpenAI-compatible servers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Append raw wire payloads to this file (JSONL)
    #[arg(long, global = true)]
    debug_log: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the configured server (interactive without a message)
    Chat {
        /// Message to send
        message: Option<String>,

        /// Model to use (default from config, "current" otherwise)
        #[arg(short, long)]
        model: Option<String>,

        /// Server base URL, e.g. http://localhost:44468
        #[arg(long)]
        base_url: Option<String>,

        /// Request one complete JSON body instead of an event stream
        #[arg(long)]
        no_stream: bool,

        /// Thinking effort (off, low, medium, high)
        #[arg(long)]
        thinking: Option<ThinkingEffort>,

        /// Do not scan content for <think> / <tool_call> tags
        #[arg(long)]
        no_tags: bool,
    },

    /// Decode a captured response body (SSE or JSON) offline
    Decode {
        /// File holding the raw response body
        file: PathBuf,

        /// Treat the file as one complete JSON body
        #[arg(long)]
        complete: bool,

        /// Do not scan content for <think> / <tool_call> tags
        #[arg(long)]
        no_tags: bool,

        /// Print fragments as JSON lines
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "loam_cli=debug,llm=debug"
    } else {
        "loam_cli=info,llm=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Some(path) = &cli.debug_log {
        tracing::info!("Writing raw wire log to {}", path.display());
        raw_log::set_raw_log_path(Some(path.clone()));
    }

    match cli.command {
        Commands::Chat {
            message,
            model,
            base_url,
            no_stream,
            thinking,
            no_tags,
        } => {
            let options = ChatOptions {
                model,
                base_url,
                no_stream,
                thinking,
                no_tags,
            };
            cli::run_chat(message, options).await?;
        }
        Commands::Decode {
            file,
            complete,
            no_tags,
            json,
        } => {
            cli::run_decode(DecodeArgs {
                file,
                complete,
                no_tags,
                json,
            })
            .await?;
        }
    }

    Ok(())
}
