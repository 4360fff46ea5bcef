use crate::ServerConfig;
use crate::tools::{self, search_notes::SearchNotesRequest};
use anyhow::Result;
use quarry_embed::{EmbedConfig, FastEmbedProvider};
use quarry_retriever::config::RetrieverConfig;
use quarry_retriever::context::RetrieverContext;
use quarry_retriever::index_manager::IndexManager;
use quarry_retriever::query::QueryEngine;
use rmcp::{ServerHandler, ServiceExt, model::ServerInfo, tool};
use std::sync::Arc;
use tokio::io::{stdin, stdout};
use tracing::info;

/// Quarry MCP server: semantic search over local notes.
///
/// Capabilities are registered as typed tool handlers at startup; the
/// retrieval core underneath only exposes `search`, `sync`, and `status`.
#[derive(Clone)]
pub struct QuarryMcpServer {
    config: ServerConfig,
    manager: Arc<IndexManager>,
    engine: Arc<QueryEngine>,
    context: Arc<RetrieverContext>,
}

impl QuarryMcpServer {
    /// Wire up the retrieval core and start the background sync loop.
    pub async fn new(config: ServerConfig) -> Result<Self> {
        info!(
            "Initializing Quarry MCP server with roots: {:?}",
            config.retriever.watch_roots
        );

        let retriever_config: RetrieverConfig = config.retriever.clone();
        retriever_config.validate()?;

        let provider = Arc::new(
            FastEmbedProvider::create(EmbedConfig::new(&config.model_name)).await?,
        );
        let context = RetrieverContext::new();
        let manager = Arc::new(
            IndexManager::new(retriever_config.clone(), provider.clone(), context.clone())
                .await?,
        );
        let engine = Arc::new(QueryEngine::new(
            provider,
            retriever_config.retry_policy(),
            context.clone(),
            retriever_config.top_k_default,
        ));

        // One background writer; queries read the published snapshot.
        let background = manager.clone();
        tokio::spawn(async move { background.run().await });

        Ok(Self {
            config,
            manager,
            engine,
            context,
        })
    }

    /// Search tool - semantic search over the indexed notes
    #[tool(
        description = "Search your notes semantically and return ranked passages with file, offsets, and score"
    )]
    async fn search_notes(&self, request: SearchNotesRequest) -> Result<String, String> {
        let indexed = self.context.current_snapshot().len();
        tools::search_notes::search_notes(&self.engine, indexed, request).await
    }

    /// Sync tool - run one indexing cycle now
    #[tool(
        description = "Index the configured note directories now instead of waiting for the next sync cycle"
    )]
    async fn sync_notes(&self) -> Result<String, String> {
        let report = self.manager.sync_once().await.map_err(|e| e.to_string())?;
        Ok(format!(
            "Sync complete: {}\nIndexed chunks now searchable: {}",
            report.summary(),
            self.context.current_snapshot().len()
        ))
    }

    /// Status tool - index health and last sync report
    #[tool(description = "Show index status: documents, chunks, cache size, and the last sync report")]
    async fn status(&self) -> Result<String, String> {
        let status = self.manager.status().await.map_err(|e| e.to_string())?;

        let mut output = format!(
            "Quarry MCP Server Status\n\
            ========================\n\
            Server Version: {}\n\
            Watch Roots: {:?}\n\
            Documents: {}\n\
            Indexed Chunks: {}\n\
            Cached Embeddings: {}\n",
            env!("CARGO_PKG_VERSION"),
            self.config.retriever.watch_roots,
            status.documents,
            status.chunks,
            status.embeddings_cached,
        );

        match &status.last_report {
            Some(report) => {
                output.push_str(&format!("Last Sync: {}\n", report.summary()));
                if report.is_degraded() {
                    output.push_str(
                        "Warning: the last cycle skipped some content; it will be retried.\n",
                    );
                }
            }
            None => output.push_str("Last Sync: none yet this session\n"),
        }

        Ok(output)
    }

    /// Serve the MCP server using stdio transport
    pub async fn serve_stdio(&self) -> Result<()> {
        info!("Starting MCP server with stdio transport");

        let transport = (stdin(), stdout());
        let server = self.clone().serve(transport).await?;
        let quit_reason = server.waiting().await?;

        info!("MCP server quit: {:?}", quit_reason);
        self.context.request_shutdown();
        Ok(())
    }
}

impl ServerHandler for QuarryMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Quarry MCP Server - semantic search over your local notes".into(),
            ),
            ..Default::default()
        }
    }
}
