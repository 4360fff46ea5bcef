//! # quarry-mcp
//!
//! A Model Context Protocol (MCP) server exposing the quarry retrieval
//! core to AI clients. The host-facing surface is a typed tool table
//! registered at startup; the core underneath only knows `search`,
//! `sync`, and `status`.
//!
//! ## MCP Tools
//!
//! - **`search_notes`**: semantic search over the indexed notes, returning
//!   ranked passages with source path, byte offsets, and score
//! - **`sync_notes`**: run one indexing cycle now (the background loop
//!   also syncs on its own cadence)
//! - **`status`**: index health, cache size, and the last sync report
//!
//! ## Quick Start
//!
//! ```bash
//! # Serve your notes directory over MCP stdio
//! quarry-mcp --root ~/notes
//! ```
//!
//! ## Integration with an MCP client
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "quarry": {
//!       "command": "quarry-mcp",
//!       "args": ["--root", "/path/to/your/notes"]
//!     }
//!   }
//! }
//! ```

mod server;
pub mod tools;

use server::QuarryMcpServer;

use anyhow::Result;
use quarry_retriever::config::RetrieverConfig;
use std::path::PathBuf;
use tracing::info;

/// Configuration for the Quarry MCP server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Retrieval core configuration (watch roots, chunking, cadence).
    pub retriever: RetrieverConfig,
    /// Embedding model served to both indexing and queries.
    pub model_name: String,
}

impl ServerConfig {
    /// Configuration watching a single notes directory with defaults
    /// everywhere else.
    pub fn new(root_dir: PathBuf) -> Self {
        Self {
            retriever: RetrieverConfig::new(vec![root_dir]),
            model_name: "all-MiniLM-L6-v2".to_string(),
        }
    }

    pub fn with_retriever(mut self, retriever: RetrieverConfig) -> Self {
        self.retriever = retriever;
        self
    }

    pub fn with_model_name<S: Into<String>>(mut self, model_name: S) -> Self {
        self.model_name = model_name.into();
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}

/// Run the Quarry MCP server over stdio until the client disconnects.
pub async fn run_server(config: ServerConfig) -> Result<()> {
    info!("Starting Quarry MCP server");

    let quarry_server = QuarryMcpServer::new(config).await?;

    info!("Quarry MCP server initialized, starting stdio transport");
    quarry_server.serve_stdio().await?;
    Ok(())
}
