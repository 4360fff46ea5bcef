//! The `search_notes` tool: semantic search with provenance-tagged output.

use quarry_retriever::query::QueryEngine;
use rmcp::schemars;
use serde::Deserialize;
use tracing::info;

/// Rendered snippets are capped so one result cannot flood the client.
const SNIPPET_LIMIT: usize = 500;

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SearchNotesRequest {
    #[schemars(description = "Natural-language query over the indexed notes")]
    pub query: String,
    #[schemars(description = "Maximum number of passages to return")]
    pub limit: Option<u32>,
}

pub async fn search_notes(
    engine: &QueryEngine,
    indexed_chunks: usize,
    request: SearchNotesRequest,
) -> Result<String, String> {
    info!(
        "search_notes: query='{}', limit={:?}",
        request.query, request.limit
    );

    let results = engine
        .search(&request.query, request.limit.map(|l| l as usize))
        .await
        .map_err(|e| e.to_string())?;

    if results.is_empty() {
        if indexed_chunks == 0 {
            return Ok(
                "No notes indexed yet. Run the sync_notes tool (or wait for the next \
                 sync cycle) and try again."
                    .to_string(),
            );
        }
        return Ok(format!("No passages matched '{}'.", request.query));
    }

    let mut output = format!("Results for '{}':\n\n", request.query);
    for result in &results {
        let snippet: String = result.text.chars().take(SNIPPET_LIMIT).collect();
        let ellipsis = if result.text.chars().count() > SNIPPET_LIMIT {
            "..."
        } else {
            ""
        };
        output.push_str(&format!(
            "--- Source: {} (bytes {}-{}, score {:.3}) ---\n{}{}\n\n",
            result.path,
            result.start_offset,
            result.end_offset,
            result.score,
            snippet.replace('\n', " "),
            ellipsis
        ));
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use quarry_embed::{EmbeddingProvider, EmbeddingResult, RetryPolicy};
    use quarry_retriever::context::RetrieverContext;
    use std::sync::Arc;

    struct UnitProvider;

    #[async_trait]
    impl EmbeddingProvider for UnitProvider {
        async fn embed_text(&self, _text: &str) -> quarry_embed::Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }

        async fn embed_texts(&self, texts: &[String]) -> quarry_embed::Result<EmbeddingResult> {
            Ok(EmbeddingResult::new(vec![vec![1.0, 0.0]; texts.len()]))
        }

        fn embedding_dimension(&self) -> usize {
            2
        }

        fn provider_name(&self) -> &str {
            "unit"
        }
    }

    #[tokio::test]
    async fn empty_index_gets_a_sync_hint() {
        let context = RetrieverContext::new();
        let engine = QueryEngine::new(
            Arc::new(UnitProvider),
            RetryPolicy::default(),
            context,
            3,
        );

        let output = search_notes(
            &engine,
            0,
            SearchNotesRequest {
                query: "anything".to_string(),
                limit: None,
            },
        )
        .await
        .unwrap();
        assert!(output.contains("No notes indexed yet"));
    }
}
