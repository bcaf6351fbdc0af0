//! Fact extraction pipeline.
//!
//! Messages go through the deterministic [`patterns`] first. Complex messages,
//! or ones no rule matched, are also sent to the optional [`StructuredExtractor`]
//! under a timeout. Both result sets are merged and de-duplicated by normalized
//! name, then written through the entity store by [`store_facts`].

pub mod llm;
pub mod patterns;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

pub use llm::{create_extractor, HttpStructuredExtractor, StructuredExtractor};

use crate::config::ExtractionConfig;
use crate::error::{FactError, Result};
use crate::facts::normalize_name;
use crate::facts::relations::add_relationship;
use crate::facts::store::{self, AttributeOutcome, StorePolicy, USER_SUBTYPE};
use crate::facts::types::{
    AttributeKind, EntityCandidate, EntityType, RelationshipObject, SourceType, Subject,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub entity_type: EntityType,
    pub subtype: Option<String>,
    pub name: String,
    pub confidence: f64,
    pub source: SourceType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedAttribute {
    pub kind: AttributeKind,
    pub value: String,
    pub confidence: f64,
    /// `false` for things that used to be true ("I used to live in Boston").
    pub current: bool,
}

/// A relationship from the user to a named entity or a literal value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRelationship {
    pub relationship_type: String,
    /// Name of an extracted entity, resolved to its ID when stored.
    pub object_name: Option<String>,
    pub object_value: Option<String>,
    pub confidence: f64,
}

/// Everything extracted from one message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFacts {
    pub entities: Vec<ExtractedEntity>,
    pub attributes: Vec<ExtractedAttribute>,
    pub relationships: Vec<ExtractedRelationship>,
    /// "call me X": the name the user wants to be addressed by.
    pub preferred_name: Option<(String, f64)>,
}

impl ExtractedFacts {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
            && self.attributes.is_empty()
            && self.relationships.is_empty()
            && self.preferred_name.is_none()
    }

    /// Merge two result sets. Entities are keyed by (type, normalized name),
    /// attributes by (kind, normalized value, current); the higher confidence wins.
    pub fn merge(self, other: ExtractedFacts) -> ExtractedFacts {
        let mut entities: Vec<ExtractedEntity> = Vec::new();
        let mut entity_index: HashMap<(EntityType, String), usize> = HashMap::new();
        for entity in self.entities.into_iter().chain(other.entities) {
            let key = (entity.entity_type, normalize_name(&entity.name));
            match entity_index.get(&key).copied() {
                Some(i) => {
                    let kept = &mut entities[i];
                    if entity.confidence > kept.confidence {
                        let subtype = kept.subtype.take();
                        *kept = entity;
                        if kept.subtype.is_none() {
                            kept.subtype = subtype;
                        }
                    } else if kept.subtype.is_none() {
                        kept.subtype = entity.subtype;
                    }
                }
                None => {
                    entity_index.insert(key, entities.len());
                    entities.push(entity);
                }
            }
        }

        let mut attributes: Vec<ExtractedAttribute> = Vec::new();
        for attribute in self.attributes.into_iter().chain(other.attributes) {
            let same = attributes.iter_mut().find(|a| {
                a.kind == attribute.kind
                    && a.current == attribute.current
                    && normalize_name(&a.value) == normalize_name(&attribute.value)
            });
            match same {
                Some(kept) => kept.confidence = kept.confidence.max(attribute.confidence),
                None => attributes.push(attribute),
            }
        }

        let mut relationships: Vec<ExtractedRelationship> = Vec::new();
        let key = |r: &ExtractedRelationship| {
            (
                r.relationship_type.to_lowercase(),
                r.object_name.as_deref().map(normalize_name),
                r.object_value.as_deref().map(normalize_name),
            )
        };
        for rel in self.relationships.into_iter().chain(other.relationships) {
            let k = key(&rel);
            match relationships.iter().position(|r| key(r) == k) {
                Some(i) => relationships[i].confidence = relationships[i].confidence.max(rel.confidence),
                None => relationships.push(rel),
            }
        }

        let preferred_name = match (self.preferred_name, other.preferred_name) {
            (Some(a), Some(b)) => Some(if b.1 > a.1 { b } else { a }),
            (a, b) => a.or(b),
        };

        ExtractedFacts {
            entities,
            attributes,
            relationships,
            preferred_name,
        }
    }
}

/// Result of running the extraction pipeline on one message.
#[derive(Debug, Clone, Serialize)]
pub struct Extraction {
    pub facts: ExtractedFacts,
    pub llm_used: bool,
    /// The structured extractor was asked but timed out or failed; only pattern
    /// results were kept.
    pub degraded: bool,
}

/// Pattern rules plus the optional model fallback.
#[derive(Clone)]
pub struct Extractor {
    config: ExtractionConfig,
    llm: Option<Arc<dyn StructuredExtractor>>,
}

impl Extractor {
    pub fn new(config: ExtractionConfig, llm: Option<Arc<dyn StructuredExtractor>>) -> Self {
        Self { config, llm }
    }

    /// Extractor with pattern rules only.
    pub fn patterns_only(config: ExtractionConfig) -> Self {
        Self::new(config, None)
    }

    pub fn has_llm(&self) -> bool {
        self.llm.is_some()
    }

    /// Whether a message should also go to the structured extractor.
    fn needs_llm(&self, content: &str, pattern_facts: &ExtractedFacts) -> bool {
        pattern_facts.is_empty()
            || content.split_whitespace().count() >= self.config.complex_message_min_words
    }

    /// Run the pipeline. Never fails: model errors and timeouts degrade to
    /// pattern-only results and are logged.
    pub async fn extract(&self, content: &str) -> Extraction {
        let pattern_facts = patterns::extract(content, self.config.pattern_confidence);

        let Some(llm) = self.llm.as_ref().filter(|_| self.needs_llm(content, &pattern_facts)) else {
            return Extraction {
                facts: pattern_facts,
                llm_used: false,
                degraded: false,
            };
        };

        let budget = Duration::from_millis(self.config.llm_timeout_ms);
        let started = Instant::now();
        let outcome = match tokio::time::timeout(budget, llm.extract(content)).await {
            Ok(result) => result,
            Err(_) => Err(FactError::ExtractionTimeout {
                elapsed_ms: started.elapsed().as_millis() as u64,
            }),
        };

        match outcome {
            Ok(model_facts) => {
                tracing::debug!(
                    extractor = llm.name(),
                    entities = model_facts.entities.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "structured extraction complete"
                );
                Extraction {
                    facts: pattern_facts.merge(model_facts),
                    llm_used: true,
                    degraded: false,
                }
            }
            Err(e) => {
                tracing::warn!(extractor = llm.name(), error = %e, "structured extraction failed, using pattern results");
                Extraction {
                    facts: pattern_facts,
                    llm_used: true,
                    degraded: true,
                }
            }
        }
    }
}

/// Counts of what [`store_facts`] wrote.
#[derive(Debug, Default, Clone, Serialize)]
pub struct StoreSummary {
    pub entities_created: usize,
    pub entities_reinforced: usize,
    pub attributes_written: usize,
    pub relationships_written: usize,
    pub renamed_to: Option<String>,
}

/// Write extracted facts through the entity store, stamping provenance.
pub fn store_facts(
    conn: &Connection,
    user_id: &str,
    message_id: Option<&str>,
    facts: &ExtractedFacts,
    policy: StorePolicy,
) -> Result<StoreSummary> {
    let mut summary = StoreSummary::default();
    let mut ids_by_name: HashMap<String, String> = HashMap::new();

    for entity in &facts.entities {
        let mut candidate = EntityCandidate::new(user_id, entity.entity_type, &entity.name, entity.confidence)
            .source(entity.source)
            .message(message_id);
        candidate.entity_subtype = entity.subtype.clone();

        let outcome = store::upsert_entity(conn, &candidate, policy)?;
        if outcome.created {
            summary.entities_created += 1;
        } else {
            summary.entities_reinforced += 1;
        }

        if entity.entity_type == EntityType::Pet {
            add_relationship(
                conn,
                user_id,
                &Subject::User,
                "owns",
                &RelationshipObject::Entity(outcome.entity_id.clone()),
                entity.confidence,
                message_id,
            )?;
            summary.relationships_written += 1;
        }
        ids_by_name.insert(normalize_name(&entity.name), outcome.entity_id);
    }

    if let Some((name, confidence)) = &facts.preferred_name {
        summary.renamed_to = Some(apply_preferred_name(conn, user_id, name, *confidence, message_id, policy)?);
    }

    for attribute in &facts.attributes {
        let written = if attribute.current {
            store::set_attribute(
                conn,
                user_id,
                &Subject::User,
                &attribute.kind,
                &attribute.value,
                attribute.confidence,
                message_id,
            )? != AttributeOutcome::Reinforced
        } else {
            store::record_past_attribute(
                conn,
                user_id,
                &Subject::User,
                &attribute.kind,
                &attribute.value,
                attribute.confidence,
                message_id,
            )?
        };
        if written {
            summary.attributes_written += 1;
        }
    }

    for rel in &facts.relationships {
        let object = match (&rel.object_name, &rel.object_value) {
            (Some(name), _) => match ids_by_name.get(&normalize_name(name)) {
                Some(id) => RelationshipObject::Entity(id.clone()),
                None => RelationshipObject::Value(name.clone()),
            },
            (None, value) => RelationshipObject::from_parts(None, value.clone())?,
        };
        let result = add_relationship(
            conn,
            user_id,
            &Subject::User,
            &rel.relationship_type,
            &object,
            rel.confidence,
            message_id,
        )?;
        if !result.deduplicated {
            summary.relationships_written += 1;
        }
    }

    Ok(summary)
}

/// "call me X": rename the user entity, or create it if the user never gave a name.
fn apply_preferred_name(
    conn: &Connection,
    user_id: &str,
    name: &str,
    confidence: f64,
    message_id: Option<&str>,
    policy: StorePolicy,
) -> Result<String> {
    match store::user_entity(conn, user_id)? {
        Some(user) => {
            let id = store::rename_entity(conn, &user.id, name, message_id)?;
            tracing::info!(user_id, entity_id = %id, "preferred name applied");
        }
        None => {
            let candidate = EntityCandidate::new(user_id, EntityType::Person, name, confidence)
                .subtype(USER_SUBTYPE)
                .message(message_id);
            store::upsert_entity(conn, &candidate, policy)?;
        }
    }
    Ok(name.to_string())
}

/// One message of a batch. `content` is `None` for malformed messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub message_id: String,
    pub content: Option<String>,
}

impl IncomingMessage {
    pub fn new(message_id: &str, content: &str) -> Self {
        Self {
            message_id: message_id.to_string(),
            content: Some(content.to_string()),
        }
    }
}

/// Outcome of a batch extraction.
#[derive(Debug, Default, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub processed: usize,
    /// Message IDs skipped as malformed or failed to store.
    pub skipped: Vec<String>,
    pub entities_created: usize,
    pub attributes_written: usize,
}

impl BatchReport {
    /// The batch failure, if any message was skipped.
    pub fn failure(&self) -> Option<FactError> {
        (!self.skipped.is_empty()).then(|| FactError::PartialBatchFailure {
            failed: self.skipped.len(),
            total: self.total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn entity(name: &str, confidence: f64, subtype: Option<&str>) -> ExtractedEntity {
        ExtractedEntity {
            entity_type: EntityType::Pet,
            subtype: subtype.map(str::to_string),
            name: name.to_string(),
            confidence,
            source: SourceType::UserStated,
        }
    }

    #[test]
    fn merge_dedups_by_normalized_name() {
        let patterns = ExtractedFacts {
            entities: vec![entity("Holly", 0.9, Some("dog"))],
            ..Default::default()
        };
        let model = ExtractedFacts {
            entities: vec![entity(" holly", 0.95, None), entity("Benny", 0.7, Some("cat"))],
            ..Default::default()
        };

        let merged = patterns.merge(model);
        assert_eq!(merged.entities.len(), 2);
        assert_eq!(merged.entities[0].confidence, 0.95);
        assert_eq!(merged.entities[0].subtype.as_deref(), Some("dog"));
        assert_eq!(merged.entities[1].name, "Benny");
    }

    #[test]
    fn merge_keeps_past_and_current_attributes_apart() {
        let a = ExtractedFacts {
            attributes: vec![ExtractedAttribute {
                kind: AttributeKind::Location,
                value: "Boston".into(),
                confidence: 0.9,
                current: false,
            }],
            ..Default::default()
        };
        let b = ExtractedFacts {
            attributes: vec![
                ExtractedAttribute {
                    kind: AttributeKind::Location,
                    value: "boston".into(),
                    confidence: 0.6,
                    current: false,
                },
                ExtractedAttribute {
                    kind: AttributeKind::Location,
                    value: "Portland".into(),
                    confidence: 0.8,
                    current: true,
                },
            ],
            ..Default::default()
        };
        let merged = a.merge(b);
        assert_eq!(merged.attributes.len(), 2);
        assert_eq!(merged.attributes[0].confidence, 0.9);
    }

    #[test]
    fn store_facts_links_pets_to_user() {
        let conn = db::open_memory_database().unwrap();
        let facts = patterns::extract("Hi, my name is Sarah and I have a cat named Mittens", 0.9);
        let summary = store_facts(&conn, "u1", Some("m1"), &facts, StorePolicy::default()).unwrap();

        assert_eq!(summary.entities_created, 2);
        assert_eq!(summary.relationships_written, 1);
        assert_eq!(store::get_user_name(&conn, "u1").unwrap(), "Sarah");
        assert_eq!(store::get_pet_names(&conn, "u1").unwrap(), vec!["Mittens"]);

        let rels = crate::facts::relations::list_relationships(&conn, "u1").unwrap();
        assert_eq!(rels[0].relationship_type, "owns");
    }

    #[test]
    fn preferred_name_without_prior_name_creates_user() {
        let conn = db::open_memory_database().unwrap();
        let facts = patterns::extract("just call me Sam", 0.9);
        store_facts(&conn, "u1", Some("m1"), &facts, StorePolicy::default()).unwrap();
        assert_eq!(store::get_user_name(&conn, "u1").unwrap(), "Sam");
    }

    #[test]
    fn no_facts_is_a_noop() {
        let conn = db::open_memory_database().unwrap();
        let summary = store_facts(&conn, "u1", None, &ExtractedFacts::default(), StorePolicy::default()).unwrap();
        assert_eq!(summary.entities_created, 0);
        assert!(summary.renamed_to.is_none());
    }

    #[test]
    fn batch_failure_reports_counts() {
        let report = BatchReport {
            total: 5,
            processed: 4,
            skipped: vec!["m3".into()],
            ..Default::default()
        };
        assert!(matches!(
            report.failure(),
            Some(FactError::PartialBatchFailure { failed: 1, total: 5 })
        ));
        assert!(BatchReport::default().failure().is_none());
    }

    #[tokio::test]
    async fn pattern_only_extractor_never_degrades() {
        let extractor = Extractor::patterns_only(ExtractionConfig::default());
        let extraction = extractor.extract("I live in Portland").await;
        assert!(!extraction.llm_used);
        assert!(!extraction.degraded);
        assert_eq!(extraction.facts.attributes[0].value, "Portland");
    }
}
