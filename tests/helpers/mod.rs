#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::Connection;
use verity::config::VerityConfig;
use verity::db;
use verity::extract::{ExtractedEntity, ExtractedFacts, Extractor, StructuredExtractor};
use verity::facts::types::{EntityType, SourceType};
use verity::retriever::{AdvisoryChunk, NoRetriever, SemanticRetriever};
use verity::{FactEngine, FactError};

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    db::open_memory_database().unwrap()
}

/// Pattern-only engine over a fresh in-memory database.
pub fn test_engine() -> FactEngine {
    FactEngine::with_connection(test_db(), VerityConfig::default())
}

/// Engine whose structured extractor is `llm`, with the given timeout.
pub fn engine_with_llm(llm: Arc<dyn StructuredExtractor>, timeout_ms: u64) -> FactEngine {
    let mut config = VerityConfig::default();
    config.extraction.llm_enabled = true;
    config.extraction.llm_timeout_ms = timeout_ms;
    let extractor = Extractor::new(config.extraction.clone(), Some(llm));
    FactEngine::new(test_db(), config, extractor, Arc::new(NoRetriever))
}

/// Engine whose advisory retriever is `retriever`, with the given timeout.
pub fn engine_with_retriever(retriever: Arc<dyn SemanticRetriever>, timeout_ms: u64) -> FactEngine {
    let mut config = VerityConfig::default();
    config.retriever.timeout_ms = timeout_ms;
    let extractor = Extractor::patterns_only(config.extraction.clone());
    FactEngine::new(test_db(), config, extractor, retriever)
}

/// Structured extractor that answers after `delay` with a fixed result.
pub struct ScriptedExtractor {
    pub delay: Duration,
    pub facts: ExtractedFacts,
}

impl ScriptedExtractor {
    pub fn slow(delay_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            facts: ExtractedFacts::default(),
        }
    }

    pub fn returning(facts: ExtractedFacts) -> Self {
        Self {
            delay: Duration::ZERO,
            facts,
        }
    }
}

#[async_trait]
impl StructuredExtractor for ScriptedExtractor {
    async fn extract(&self, _message: &str) -> verity::Result<ExtractedFacts> {
        tokio::time::sleep(self.delay).await;
        Ok(self.facts.clone())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Structured extractor that always fails.
pub struct FailingExtractor;

#[async_trait]
impl StructuredExtractor for FailingExtractor {
    async fn extract(&self, _message: &str) -> verity::Result<ExtractedFacts> {
        Err(FactError::Internal("model unavailable".into()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Retriever that answers after `delay` with fixed chunks.
pub struct ScriptedRetriever {
    pub delay: Duration,
    pub chunks: Vec<AdvisoryChunk>,
}

#[async_trait]
impl SemanticRetriever for ScriptedRetriever {
    async fn search(&self, _user_id: &str, _query: &str, k: usize) -> verity::Result<Vec<AdvisoryChunk>> {
        tokio::time::sleep(self.delay).await;
        Ok(self.chunks.iter().take(k).cloned().collect())
    }
}

/// A model-inferred entity.
pub fn inferred(entity_type: EntityType, subtype: Option<&str>, name: &str, confidence: f64) -> ExtractedEntity {
    ExtractedEntity {
        entity_type,
        subtype: subtype.map(str::to_string),
        name: name.to_string(),
        confidence,
        source: SourceType::Inferred,
    }
}
