use anyhow::Result;
use clap::Parser;
use quarry_mcp::{ServerConfig, run_server};
use quarry_retriever::config::RetrieverConfig;
use std::path::PathBuf;

/// Quarry Model Context Protocol server.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory of notes to index and search (repeatable).
    #[arg(short, long)]
    root: Vec<PathBuf>,

    /// Optional TOML configuration file; --root adds to its watch roots.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Embedding model name.
    #[arg(long, default_value = "all-MiniLM-L6-v2")]
    model: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the MCP protocol.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut retriever = match &args.config {
        Some(path) => RetrieverConfig::from_toml_path(path)?,
        None => RetrieverConfig::default(),
    };
    retriever.watch_roots.extend(args.root.iter().cloned());
    if retriever.watch_roots.is_empty() {
        retriever.watch_roots.push(std::env::current_dir()?);
    }

    let config = ServerConfig::default()
        .with_retriever(retriever)
        .with_model_name(args.model);

    run_server(config).await
}
