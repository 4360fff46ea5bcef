use clap::{Parser, Subcommand};
use quarry_embed::{EmbedConfig, FastEmbedProvider};
use quarry_retriever::config::RetrieverConfig;
use quarry_retriever::context::RetrieverContext;
use quarry_retriever::index_manager::IndexManager;
use quarry_retriever::query::QueryEngine;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::info;

/// Semantic search over your local notes.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory of notes to index (repeatable).
    #[arg(short, long)]
    root: Vec<PathBuf>,

    /// Optional TOML configuration file; --root adds to its watch roots.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Embedding model name.
    #[arg(long, default_value = "all-MiniLM-L6-v2")]
    model: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one sync cycle and exit.
    Index,
    /// Sync on a cadence until interrupted.
    Watch,
    /// Search the indexed notes.
    Search {
        /// Query text.
        query: String,
        /// Maximum number of results.
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Show index status and the last sync report.
    Status,
    /// Prune cached embeddings no longer referenced by any chunk.
    Compact,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quarry_retriever=info,quarry_embed=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RetrieverConfig::from_toml_path(path)?,
        None => RetrieverConfig::default(),
    };
    config.watch_roots.extend(args.root.iter().cloned());
    if config.watch_roots.is_empty() {
        config.watch_roots.push(PathBuf::from("."));
    }
    config.validate()?;

    let provider = Arc::new(FastEmbedProvider::create(EmbedConfig::new(&args.model)).await?);
    let context = RetrieverContext::new();
    let manager =
        IndexManager::new(config.clone(), provider.clone(), context.clone()).await?;

    match args.command {
        Commands::Index => {
            let report = manager.sync_once().await?;
            println!("{}", report.summary());
        }
        Commands::Watch => {
            let run_context = context.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received; shutting down");
                    run_context.request_shutdown();
                }
            });
            manager.run().await;
        }
        Commands::Search { query, limit } => {
            let engine = QueryEngine::new(
                provider,
                config.retry_policy(),
                context.clone(),
                config.top_k_default,
            );
            let results = engine.search(&query, limit).await?;
            if results.is_empty() {
                println!("No results.");
            } else {
                for (i, result) in results.iter().enumerate() {
                    println!(
                        "{}. {}:{}-{} (score {:.3})",
                        i + 1,
                        result.path,
                        result.start_offset,
                        result.end_offset,
                        result.score
                    );
                    println!("   {}", result.text.replace('\n', " "));
                }
            }
        }
        Commands::Status => {
            let status = manager.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Compact => {
            let pruned = manager.compact_cache().await?;
            println!("Pruned {pruned} cached embedding(s).");
        }
    }

    Ok(())
}
