//! `tvmux` CLI - resolve channels and episodes to playable streams

mod cmd;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tvmux::{AppConfig, Engine};

#[derive(Parser)]
#[command(name = "tvmux")]
#[command(about = "Resolve live channels and VOD episodes across provider adapters")]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.config/tvmux/config.toml)
    #[arg(long, global = true, env = "TVMUX_CONFIG")]
    config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered adapters and their capabilities
    Adapters,

    /// Resolve a channel id to a stream
    Resolve {
        /// Logical channel id
        content_id: String,

        /// Only try this adapter (default: all, in order)
        #[arg(short, long)]
        adapter: Option<String>,
    },

    /// Resolve a channel and print its rewritten HLS playlist
    Playlist {
        /// Logical channel id
        content_id: String,

        #[arg(short, long)]
        adapter: Option<String>,

        /// Print only the playlist body
        #[arg(long)]
        raw: bool,
    },

    /// Browse and resolve on-demand content
    #[command(subcommand)]
    Vod(VodCommand),

    /// Store credentials for an adapter
    Login {
        adapter: String,
        username: String,
        password: String,
    },

    /// Show an adapter's channel map
    Channels {
        adapter: String,

        /// Ask the adapter for a fresh channel list first
        #[arg(long)]
        refresh: bool,
    },

    /// Inspect or clear the stream cache
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Subcommand)]
enum VodCommand {
    /// List shows
    List {
        adapter: String,
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        filter: Option<String>,
        #[arg(short, long)]
        query: Option<String>,
    },
    /// List a show's episodes or seasons
    Show {
        adapter: String,
        show_id: String,
        #[arg(long)]
        filter: Option<String>,
    },
    /// Resolve an episode to a stream
    Episode {
        adapter: String,
        show_id: String,
        episode_id: String,
    },
}

#[derive(Subcommand)]
enum CacheCommand {
    /// List cached streams
    List {
        #[arg(short, long)]
        adapter: Option<String>,
        #[arg(short, long)]
        content: Option<String>,
    },
    /// Remove cached streams matching the filters
    Clear {
        #[arg(short, long)]
        adapter: Option<String>,
        #[arg(short, long)]
        content: Option<String>,
    },
    /// Remove expired entries and report them
    Sweep,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "tvmux=debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            cmd::output::print_error(&cmd::output::error_body(&e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let app = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    let engine = Engine::bootstrap(&app).await?;
    let swept = engine.cache_sweep().await;

    match cli.command {
        Commands::Adapters => cmd::adapters::cmd_adapters(&engine),
        Commands::Resolve {
            content_id,
            adapter,
        } => cmd::resolve::cmd_resolve(&engine, &content_id, adapter.as_deref()).await,
        Commands::Playlist {
            content_id,
            adapter,
            raw,
        } => cmd::resolve::cmd_playlist(&engine, &content_id, adapter.as_deref(), raw).await,
        Commands::Vod(VodCommand::List {
            adapter,
            page,
            filter,
            query,
        }) => cmd::vod::cmd_vod_list(&engine, &adapter, page, filter, query).await,
        Commands::Vod(VodCommand::Show {
            adapter,
            show_id,
            filter,
        }) => cmd::vod::cmd_vod_show(&engine, &adapter, &show_id, filter).await,
        Commands::Vod(VodCommand::Episode {
            adapter,
            show_id,
            episode_id,
        }) => cmd::vod::cmd_vod_episode(&engine, &adapter, &show_id, &episode_id).await,
        Commands::Login {
            adapter,
            username,
            password,
        } => cmd::adapters::cmd_login(&engine, &adapter, &username, &password).await,
        Commands::Channels { adapter, refresh } => {
            cmd::adapters::cmd_channels(&engine, &adapter, refresh).await
        }
        Commands::Cache(CacheCommand::List { adapter, content }) => {
            cmd::cache::cmd_cache_list(&engine, adapter.as_deref(), content.as_deref()).await
        }
        Commands::Cache(CacheCommand::Clear { adapter, content }) => {
            cmd::cache::cmd_cache_clear(&engine, adapter.as_deref(), content.as_deref()).await
        }
        Commands::Cache(CacheCommand::Sweep) => cmd::cache::cmd_cache_sweep(&swept),
    }
}
