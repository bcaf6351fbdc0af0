//! The public face of the fact engine.
//!
//! [`FactEngine`] owns the single database connection, the configuration, the
//! extractor and the advisory retriever. Every store access runs on the
//! blocking pool under the connection lock; reads use a transaction so they see
//! either the state before a write or the state after it, and every write goes
//! through a [`WriteScope`]. Model and retriever calls never hold the lock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;
use serde::Serialize;

use crate::config::VerityConfig;
use crate::db;
use crate::error::{FactError, Result};
use crate::extract::{self, BatchReport, Extraction, Extractor, IncomingMessage, StoreSummary};
use crate::facts::cache::{self, CacheKey};
use crate::facts::critical::CriticalFacts;
use crate::facts::forget::{self, ForgetResult};
use crate::facts::relations::{self, AddRelationshipResult};
use crate::facts::resolve::{self, ResolvePolicy, ResolveReport};
use crate::facts::selftest::{self, AccuracyCheck};
use crate::facts::stats::{self, DiagnosticInfo};
use crate::facts::store::{self, StorePolicy, WriteScope};
use crate::facts::types::{
    Alias, Attribute, AttributeKind, AuditEntry, Conflict, Entity, EntityType, RelationshipObject,
    Subject,
};
use crate::prompt::{self, GeneratedPrompt};
use crate::retriever::{self, AdvisoryChunk, NoRetriever, SemanticRetriever};

/// What one `extract_and_store_facts` call did.
#[derive(Debug, Default, Serialize)]
pub struct ExtractionReport {
    pub stored: StoreSummary,
    pub resolved: ResolveReport,
    pub llm_used: bool,
    pub degraded: bool,
}

/// An entity with its aliases and audit history.
#[derive(Debug, Serialize)]
pub struct EntityDetails {
    pub entity: Entity,
    pub aliases: Vec<Alias>,
    pub audit: Vec<AuditEntry>,
}

#[derive(Clone)]
pub struct FactEngine {
    db: Arc<Mutex<Connection>>,
    config: Arc<VerityConfig>,
    extractor: Extractor,
    retriever: Arc<dyn SemanticRetriever>,
}

impl FactEngine {
    pub fn new(
        conn: Connection,
        config: VerityConfig,
        extractor: Extractor,
        retriever: Arc<dyn SemanticRetriever>,
    ) -> Self {
        Self {
            db: Arc::new(Mutex::new(conn)),
            config: Arc::new(config),
            extractor,
            retriever,
        }
    }

    /// Open the configured database and build the extractor and retriever.
    pub fn open(config: VerityConfig) -> anyhow::Result<Self> {
        let db_path = config.resolved_db_path();
        let conn = db::open_database(&db_path)?;
        tracing::info!(db = %db_path.display(), "database ready");

        let llm = extract::create_extractor(&config.extraction)?;
        if let Some(llm) = &llm {
            if let Ok(Some(stored)) = db::migrations::get_extractor_model(&conn) {
                if stored != llm.name() {
                    tracing::info!(stored = %stored, configured = llm.name(), "structured extractor model changed");
                }
            }
            db::migrations::set_extractor_model(&conn, llm.name())?;
        }
        let extractor = Extractor::new(config.extraction.clone(), llm);
        let retriever = retriever::create_retriever(&config.retriever)?;

        Ok(Self::new(conn, config, extractor, retriever))
    }

    /// Pattern-only engine with no retriever, on an existing connection.
    pub fn with_connection(conn: Connection, config: VerityConfig) -> Self {
        let extractor = Extractor::patterns_only(config.extraction.clone());
        Self::new(conn, config, extractor, Arc::new(NoRetriever))
    }

    pub fn config(&self) -> &VerityConfig {
        &self.config
    }

    /// Shared connection handle, for maintenance commands.
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.db)
    }

    fn store_policy(&self) -> StorePolicy {
        StorePolicy::from(&self.config.facts)
    }

    fn resolve_policy(&self) -> ResolvePolicy {
        ResolvePolicy::from(&self.config.facts)
    }

    /// Run `f` in a read transaction on the blocking pool. Cache population on
    /// a miss commits with it.
    async fn read<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let mut conn = db
                .lock()
                .map_err(|e| FactError::Internal(format!("db lock poisoned: {e}")))?;
            let tx = conn.transaction()?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
        .await?
    }

    /// Run `f` inside a write scope for `user_id` on the blocking pool.
    async fn write<T, F>(&self, user_id: &str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&WriteScope<'_>) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        let user_id = user_id.to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = db
                .lock()
                .map_err(|e| FactError::Internal(format!("db lock poisoned: {e}")))?;
            let scope = WriteScope::begin(&mut conn, &user_id)?;
            let value = f(&scope)?;
            scope.commit()?;
            Ok(value)
        })
        .await?
    }

    // ── Guaranteed reads ────────────────────────────────────────────────────

    /// The user's canonical name, or `NotFound`. Never guessed.
    pub async fn get_user_name(&self, user_id: &str) -> Result<String> {
        let user_id = require_user(user_id)?;
        let ttl = self.config.cache.ttl();
        self.read(move |conn| {
            cache::get_or_populate(conn, &user_id, CacheKey::UserName, ttl, |conn| {
                store::get_user_name(conn, &user_id)
            })
        })
        .await
    }

    /// Active pet names in the order they were first mentioned.
    pub async fn get_pet_names(&self, user_id: &str) -> Result<Vec<String>> {
        let user_id = require_user(user_id)?;
        let ttl = self.config.cache.ttl();
        self.read(move |conn| {
            cache::get_or_populate(conn, &user_id, CacheKey::PetNames, ttl, |conn| {
                store::get_pet_names(conn, &user_id)
            })
        })
        .await
    }

    pub async fn get_all_critical_facts(&self, user_id: &str) -> Result<CriticalFacts> {
        let user_id = require_user(user_id)?;
        let ttl = self.config.cache.ttl();
        self.read(move |conn| {
            cache::get_or_populate(conn, &user_id, CacheKey::CriticalFacts, ttl, |conn| {
                CriticalFacts::load(conn, &user_id)
            })
        })
        .await
    }

    // ── Extraction ──────────────────────────────────────────────────────────

    /// Extract facts from one message and store them, resolving conflicts in
    /// the same transaction. A message with no facts writes nothing.
    pub async fn extract_and_store_facts(
        &self,
        content: &str,
        message_id: Option<&str>,
        user_id: &str,
    ) -> Result<ExtractionReport> {
        let user_id = require_user(user_id)?;
        // Extraction (possibly a model call) happens before the lock is taken.
        let extraction = self.extractor.extract(content).await;
        self.store_extraction(extraction, message_id, &user_id).await
    }

    async fn store_extraction(
        &self,
        extraction: Extraction,
        message_id: Option<&str>,
        user_id: &str,
    ) -> Result<ExtractionReport> {
        let Extraction { facts, llm_used, degraded } = extraction;
        if facts.is_empty() {
            tracing::debug!(user_id, message_id, "no facts in message");
            return Ok(ExtractionReport {
                llm_used,
                degraded,
                ..Default::default()
            });
        }

        let store_policy = self.store_policy();
        let resolve_policy = self.resolve_policy();
        let owned_user = user_id.to_string();
        let message_id_owned = message_id.map(str::to_string);
        let (stored, resolved) = self
            .write(user_id, move |scope| {
                let stored = extract::store_facts(
                    scope,
                    &owned_user,
                    message_id_owned.as_deref(),
                    &facts,
                    store_policy,
                )?;
                let resolved = resolve::resolve_user(scope, &owned_user, resolve_policy)?;
                Ok((stored, resolved))
            })
            .await?;

        tracing::info!(
            user_id,
            message_id,
            created = stored.entities_created,
            reinforced = stored.entities_reinforced,
            attributes = stored.attributes_written,
            merged = resolved.merged.len(),
            degraded,
            "facts stored"
        );
        Ok(ExtractionReport {
            stored,
            resolved,
            llm_used,
            degraded,
        })
    }

    /// Process a batch in order. Messages without content, or whose write
    /// fails, are skipped individually; the rest are stored.
    pub async fn extract_batch(&self, user_id: &str, messages: Vec<IncomingMessage>) -> Result<BatchReport> {
        let user_id = require_user(user_id)?;
        let mut report = BatchReport {
            total: messages.len(),
            ..Default::default()
        };

        for message in messages {
            let Some(content) = message.content.as_deref() else {
                tracing::warn!(user_id = %user_id, message_id = %message.message_id, "message has no content, skipped");
                report.skipped.push(message.message_id);
                continue;
            };
            match self
                .extract_and_store_facts(content, Some(&message.message_id), &user_id)
                .await
            {
                Ok(outcome) => {
                    report.processed += 1;
                    report.entities_created += outcome.stored.entities_created;
                    report.attributes_written += outcome.stored.attributes_written;
                }
                Err(e) => {
                    tracing::warn!(user_id = %user_id, message_id = %message.message_id, error = %e, "message skipped");
                    report.skipped.push(message.message_id);
                }
            }
        }

        if let Some(failure) = report.failure() {
            tracing::warn!(user_id = %user_id, skipped = ?report.skipped, "{failure}");
        }
        Ok(report)
    }

    // ── Prompt injection ────────────────────────────────────────────────────

    /// Base prompt plus the verified critical-facts block.
    pub async fn generate_system_prompt_with_facts(
        &self,
        user_id: &str,
        base_prompt: &str,
    ) -> Result<GeneratedPrompt> {
        self.build_prompt(user_id, base_prompt, Vec::new()).await
    }

    /// Like [`Self::generate_system_prompt_with_facts`], followed by a separate
    /// advisory section from the retriever. Retriever errors and timeouts only
    /// drop the advisory section.
    pub async fn generate_system_prompt_with_context(
        &self,
        user_id: &str,
        base_prompt: &str,
        query: &str,
    ) -> Result<GeneratedPrompt> {
        let advisory = self.advisory_context(user_id, query).await;
        self.build_prompt(user_id, base_prompt, advisory).await
    }

    async fn build_prompt(
        &self,
        user_id: &str,
        base_prompt: &str,
        advisory: Vec<AdvisoryChunk>,
    ) -> Result<GeneratedPrompt> {
        let facts = self.get_all_critical_facts(user_id).await?;
        let pending = self.pending_conflicts(user_id).await?;
        let generated = prompt::build_prompt(
            base_prompt,
            &facts,
            &self.config.facts.required_categories,
            &pending,
            &advisory,
        );
        tracing::debug!(
            user_id,
            confidence = generated.confidence,
            missing = generated.missing.len(),
            advisory = advisory.len(),
            "system prompt generated"
        );
        Ok(generated)
    }

    async fn advisory_context(&self, user_id: &str, query: &str) -> Vec<AdvisoryChunk> {
        if query.trim().is_empty() {
            return Vec::new();
        }
        let budget = Duration::from_millis(self.config.retriever.timeout_ms);
        let k = self.config.retriever.k;
        match tokio::time::timeout(budget, self.retriever.search(user_id, query, k)).await {
            Ok(Ok(chunks)) => chunks,
            Ok(Err(e)) => {
                tracing::warn!(user_id, error = %e, "advisory retrieval failed");
                Vec::new()
            }
            Err(_) => {
                tracing::warn!(user_id, timeout_ms = self.config.retriever.timeout_ms, "advisory retrieval timed out");
                Vec::new()
            }
        }
    }

    // ── Diagnostics ─────────────────────────────────────────────────────────

    pub async fn test_fact_accuracy(&self, user_id: &str) -> Result<Vec<AccuracyCheck>> {
        let user_id = require_user(user_id)?;
        self.read(move |conn| selftest::test_fact_accuracy(conn, &user_id)).await
    }

    pub async fn get_diagnostic_info(&self, user_id: &str) -> Result<DiagnosticInfo> {
        let user_id = require_user(user_id)?;
        self.read(move |conn| stats::diagnostic_info(conn, &user_id)).await
    }

    /// Delete expired cache rows for every user.
    pub async fn purge_expired_cache(&self) -> Result<usize> {
        self.read(cache::purge_expired).await
    }

    // ── Conflicts ───────────────────────────────────────────────────────────

    /// Run a resolver pass on demand.
    pub async fn resolve_conflicts(&self, user_id: &str) -> Result<ResolveReport> {
        let user_id = require_user(user_id)?;
        let policy = self.resolve_policy();
        let owned = user_id.clone();
        let report = self
            .write(&user_id, move |scope| resolve::resolve_user(scope, &owned, policy))
            .await?;
        if !report.is_empty() {
            tracing::info!(user_id = %user_id, merged = report.merged.len(), pending = report.contradictions_pending, "conflicts resolved");
        }
        Ok(report)
    }

    pub async fn pending_conflicts(&self, user_id: &str) -> Result<Vec<Conflict>> {
        let user_id = require_user(user_id)?;
        self.read(move |conn| resolve::pending_conflicts(conn, &user_id)).await
    }

    /// Confirm the current value of a pending conflict.
    pub async fn dismiss_conflict(&self, user_id: &str, conflict_id: &str) -> Result<Conflict> {
        let user_id = require_user(user_id)?;
        let owned = user_id.clone();
        let conflict_id = conflict_id.to_string();
        self.write(&user_id, move |scope| resolve::dismiss_conflict(scope, &owned, &conflict_id))
            .await
    }

    // ── Entities and attributes ─────────────────────────────────────────────

    /// User-initiated deletion. The entity is deactivated, never removed.
    pub async fn forget_entity(
        &self,
        user_id: &str,
        entity_id: &str,
        reason: Option<&str>,
    ) -> Result<ForgetResult> {
        let user_id = require_user(user_id)?;
        let owned = user_id.clone();
        let entity_id = entity_id.to_string();
        let reason = reason.map(str::to_string);
        let result = self
            .write(&user_id, move |scope| {
                forget::deactivate_entity(scope, &owned, &entity_id, reason.as_deref())
            })
            .await?;
        tracing::info!(user_id = %user_id, entity_id = %result.id, deactivated = result.deactivated, "entity forgotten");
        Ok(result)
    }

    /// Store a relationship from the user (or one of their entities) to an
    /// entity or a literal value. Exactly one object form must be given.
    pub async fn add_relationship(
        &self,
        user_id: &str,
        subject_entity_id: Option<&str>,
        relationship_type: &str,
        object_entity_id: Option<&str>,
        object_value: Option<&str>,
        confidence: f64,
    ) -> Result<AddRelationshipResult> {
        let user_id = require_user(user_id)?;
        let object = RelationshipObject::from_parts(
            object_entity_id.map(str::to_string),
            object_value.map(str::to_string),
        )?;
        let subject = subject_entity_id.map_or(Subject::User, |id| Subject::Entity(id.to_string()));
        let owned = user_id.clone();
        let relationship_type = relationship_type.to_string();
        self.write(&user_id, move |scope| {
            relations::add_relationship(scope, &owned, &subject, &relationship_type, &object, confidence, None)
        })
        .await
    }

    /// Current value(s) of one of the user's attributes.
    ///
    /// Fails `NotFound` when nothing is known and `ConflictUnresolved` when a
    /// single-valued attribute has a contradiction awaiting review; the error
    /// still carries the most recent value.
    pub async fn current_attribute(&self, user_id: &str, kind: AttributeKind) -> Result<Vec<Attribute>> {
        let user_id = require_user(user_id)?;
        self.read(move |conn| {
            let current = store::current_attributes(conn, &user_id, &Subject::User, &kind)?;
            let Some(latest) = current.first() else {
                return Err(FactError::not_found(format!("{kind} for user {user_id}")));
            };
            if kind.policy().is_single_valued() {
                let pending = resolve::pending_for_attribute(conn, &user_id, kind.as_str())?;
                if !pending.is_empty() {
                    return Err(FactError::ConflictUnresolved {
                        subject: kind.to_string(),
                        current: latest.value.clone(),
                        pending: pending.len(),
                    });
                }
            }
            Ok(current)
        })
        .await
    }

    /// Every value ever recorded for one of the user's attributes, oldest first.
    pub async fn attribute_history(&self, user_id: &str, kind: AttributeKind) -> Result<Vec<Attribute>> {
        let user_id = require_user(user_id)?;
        self.read(move |conn| store::attribute_history(conn, &user_id, &Subject::User, &kind))
            .await
    }

    /// Live entities of one type.
    pub async fn list_entities(&self, user_id: &str, entity_type: EntityType) -> Result<Vec<Entity>> {
        let user_id = require_user(user_id)?;
        self.read(move |conn| store::list_entities(conn, &user_id, entity_type))
            .await
    }

    pub async fn inspect_entity(&self, user_id: &str, entity_id: &str) -> Result<EntityDetails> {
        let user_id = require_user(user_id)?;
        let entity_id = entity_id.to_string();
        self.read(move |conn| {
            let entity = store::get_entity_by_id(conn, &entity_id)?;
            if entity.user_id != user_id {
                return Err(FactError::not_found(format!("entity {entity_id} for user {user_id}")));
            }
            Ok(EntityDetails {
                aliases: store::aliases_of(conn, &entity.id)?,
                audit: store::audit_trail(conn, &entity.id)?,
                entity,
            })
        })
        .await
    }
}

fn require_user(user_id: &str) -> Result<String> {
    let user_id = user_id.trim();
    if user_id.is_empty() {
        return Err(FactError::validation("user_id must not be empty"));
    }
    Ok(user_id.to_string())
}
