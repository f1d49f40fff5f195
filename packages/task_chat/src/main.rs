use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::prelude::*;

use task_chat::cli;
use task_chat::config::{self, ClientConfig, FileConfig, RuntimeOverrides};

#[derive(Parser)]
#[command(name = "taskchat")]
#[command(about = "Chat client for issuing tasks to a backend agent")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (defaults to <config dir>/taskchat/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Backend base URL for request/response calls
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// WebSocket URL for live updates (defaults to <base-url>/ws)
    #[arg(long, global = true)]
    channel_url: Option<String>,

    /// Run without the live update channel
    #[arg(long, global = true)]
    no_channel: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat (default)
    Chat(ChatArgs),

    /// List sessions and exit
    Sessions(SessionsArgs),
}

#[derive(Parser)]
struct ChatArgs {
    /// Session to open on start
    #[arg(long)]
    session: Option<String>,
}

#[derive(Parser)]
struct SessionsArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug {
        "taskchat=debug,task_chat=debug,task_convo=debug,warn"
    } else {
        "taskchat=info,task_chat=info,task_convo=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config_path = config::resolve_config_path(cli.config.clone());
    debug!(path = ?config_path, "loading configuration");
    let file_config: FileConfig = config::load_config(config_path.as_deref())
        .extract()
        .context("Failed to load configuration")?;
    let overrides = RuntimeOverrides {
        base_url: cli.base_url,
        channel_url: cli.channel_url,
        disable_channel: cli.no_channel,
    };
    let client_config = ClientConfig::from_file(&file_config.with_overrides(&overrides));

    match cli.command {
        None => cli::chat_command(&client_config, None).await,
        Some(Commands::Chat(args)) => cli::chat_command(&client_config, args.session).await,
        Some(Commands::Sessions(args)) => cli::sessions_command(&client_config, args.json).await,
    }
}
