//! Advisory semantic context from an external retrieval service.
//!
//! Provides the [`SemanticRetriever`] trait, a [`NoRetriever`] used when no
//! service is configured, and [`RagServiceRetriever`] for an HTTP service. The
//! retriever is created via [`create_retriever`] from configuration. Its output
//! is never merged with critical facts.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::RetrieverConfig;
use crate::error::{FactError, Result};

/// One retrieved passage. Unverified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisoryChunk {
    pub content: String,
    pub source: Option<String>,
    pub score: f64,
}

#[async_trait]
pub trait SemanticRetriever: Send + Sync {
    async fn search(&self, user_id: &str, query: &str, k: usize) -> Result<Vec<AdvisoryChunk>>;
}

/// Retriever that never returns anything.
pub struct NoRetriever;

#[async_trait]
impl SemanticRetriever for NoRetriever {
    async fn search(&self, _user_id: &str, _query: &str, _k: usize) -> Result<Vec<AdvisoryChunk>> {
        Ok(Vec::new())
    }
}

/// Create the retriever from config. [`NoRetriever`] when no URL is set.
pub fn create_retriever(config: &RetrieverConfig) -> Result<Arc<dyn SemanticRetriever>> {
    match config.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) {
        Some(url) => {
            tracing::info!(url, "advisory retriever enabled");
            Ok(Arc::new(RagServiceRetriever::new(url, config.timeout_ms)?))
        }
        None => Ok(Arc::new(NoRetriever)),
    }
}

/// Client for a RAG service exposing `POST {base}/query`.
pub struct RagServiceRetriever {
    client: reqwest::Client,
    query_url: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    context: Vec<ContextEntry>,
}

#[derive(Debug, Deserialize)]
struct ContextEntry {
    chunk: ChunkBody,
    #[serde(default)]
    score: f64,
}

#[derive(Debug, Deserialize)]
struct ChunkBody {
    content: String,
    #[serde(default)]
    source_uri: Option<String>,
}

impl RagServiceRetriever {
    pub fn new(base_url: &str, timeout_ms: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| FactError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            query_url: format!("{}/query", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl SemanticRetriever for RagServiceRetriever {
    async fn search(&self, user_id: &str, query: &str, k: usize) -> Result<Vec<AdvisoryChunk>> {
        let response = self
            .client
            .post(&self.query_url)
            .json(&json!({"query": query, "k": k}))
            .send()
            .await
            .map_err(|e| FactError::Internal(format!("retriever request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FactError::Internal(format!("retriever returned {}", status.as_u16())));
        }

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| FactError::Internal(format!("retriever sent invalid JSON: {e}")))?;

        let chunks = parse_context(body, k);
        tracing::debug!(user_id, hits = chunks.len(), "advisory context retrieved");
        Ok(chunks)
    }
}

fn parse_context(body: QueryResponse, k: usize) -> Vec<AdvisoryChunk> {
    body.context
        .into_iter()
        .filter(|entry| !entry.chunk.content.trim().is_empty())
        .take(k)
        .map(|entry| AdvisoryChunk {
            content: entry.chunk.content.trim().to_string(),
            source: entry.chunk.source_uri,
            score: entry.score,
        })
        .collect()
}
