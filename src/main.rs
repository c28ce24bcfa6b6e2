mod cli;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use imsearch::config::ImsearchConfig;
use imsearch::embedding::EmbedderKind;
use imsearch::index::IndexKind;

#[derive(Parser)]
#[command(name = "imsearch", version, about = "Content-based image search service")]
struct Cli {
    /// Config file (default: ~/.imsearch/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP search service
    Serve,
    /// Search the catalog for images similar to a file
    Search {
        image: PathBuf,
        #[arg(long)]
        top_k: Option<i64>,
        /// Embedding backend: local | remote
        #[arg(long)]
        embedder: Option<EmbedderKind>,
        /// Index backend: local | remote
        #[arg(long)]
        index: Option<IndexKind>,
    },
    /// Build and inspect the catalog indexes
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },
    /// Manage the embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
    /// Check config, models, indexes, and remote services
    Doctor,
}

#[derive(Subcommand)]
enum IndexAction {
    /// Embed a catalog manifest and rewrite the indexes
    Build {
        manifest: PathBuf,
        /// Also publish the vectors to the qdrant collection
        #[arg(long)]
        remote: bool,
    },
    /// Delete catalog items from the qdrant collection
    Delete {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Show local index, catalog, and qdrant statistics
    Info,
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download the ONNX model to embedding.model_path
    Download {
        /// Override embedding.model_url
        #[arg(long)]
        url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => ImsearchConfig::load_from(path)?,
        None => ImsearchConfig::load()?,
    };

    // Logs go to stderr so `search` and `index info` output stays clean.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve => {
            imsearch::server::serve(config).await?;
        }
        Command::Search {
            image,
            top_k,
            embedder,
            index,
        } => {
            cli::search::search(&config, &image, top_k, embedder, index).await?;
        }
        Command::Index { action } => match action {
            IndexAction::Build { manifest, remote } => {
                cli::index::build(&config, &manifest, remote).await?;
            }
            IndexAction::Delete { ids } => {
                cli::index::delete(&config, &ids).await?;
            }
            IndexAction::Info => {
                cli::index::info(&config).await?;
            }
        },
        Command::Model { action } => match action {
            ModelAction::Download { url } => {
                cli::model_download(&config, url.as_deref()).await?;
            }
        },
        Command::Doctor => {
            cli::doctor::doctor(&config).await?;
        }
    }

    Ok(())
}
