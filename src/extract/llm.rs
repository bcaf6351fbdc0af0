//! Structured-extraction fallback backed by an LLM.
//!
//! Provides the [`StructuredExtractor`] trait and an HTTP implementation for
//! OpenAI-compatible chat completion endpoints. The extractor is created via
//! [`create_extractor`] from configuration; it is optional.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::patterns::tidy_name;
use super::{ExtractedAttribute, ExtractedEntity, ExtractedFacts, ExtractedRelationship};
use crate::config::ExtractionConfig;
use crate::error::{FactError, Result};
use crate::facts::normalize_name;
use crate::facts::types::{AttributeKind, EntityType, SourceType};

/// Confidence assumed when the model does not score a fact.
const DEFAULT_MODEL_CONFIDENCE: f64 = 0.7;

const SYSTEM_PROMPT: &str = "You extract personal facts the user states about themself. \
Reply with a single JSON object and nothing else, shaped as: \
{\"entities\": [{\"type\": \"person|pet|place|thing\", \"subtype\": string or null, \"name\": string, \"confidence\": number}], \
\"attributes\": [{\"name\": \"location|occupation|employer|birthday|hobby|personal_fact|<other>\", \"value\": string, \"current\": boolean, \"confidence\": number}], \
\"relationships\": [{\"type\": string, \"object\": string, \"confidence\": number}], \
\"preferred_name\": string or null}. \
Use subtype \"user\" for the user's own name and the species for pets. \
Set current to false for facts that used to be true. \
Only include facts stated explicitly; never guess. Confidence is between 0 and 1.";

/// Best-effort, model-scored extraction for messages the pattern rules cannot parse.
#[async_trait]
pub trait StructuredExtractor: Send + Sync {
    async fn extract(&self, message: &str) -> Result<ExtractedFacts>;

    /// Name used in logs.
    fn name(&self) -> &str;
}

/// Create the structured extractor from config, or `None` when disabled.
pub fn create_extractor(config: &ExtractionConfig) -> Result<Option<Arc<dyn StructuredExtractor>>> {
    if !config.llm_enabled {
        return Ok(None);
    }
    let extractor = HttpStructuredExtractor::new(config)?;
    tracing::info!(endpoint = %config.llm_endpoint, model = %config.llm_model, "structured extractor enabled");
    Ok(Some(Arc::new(extractor)))
}

/// Chat-completions client that asks for a JSON object.
pub struct HttpStructuredExtractor {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpStructuredExtractor {
    pub fn new(config: &ExtractionConfig) -> Result<Self> {
        // The pipeline also applies its own timeout; this one bounds the socket.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.llm_timeout_ms.saturating_mul(2)))
            .build()
            .map_err(|e| FactError::Internal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: config.llm_endpoint.clone(),
            model: config.llm_model.clone(),
            api_key: config.llm_api_key.clone(),
        })
    }
}

#[async_trait]
impl StructuredExtractor for HttpStructuredExtractor {
    async fn extract(&self, message: &str) -> Result<ExtractedFacts> {
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": message},
            ],
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FactError::Internal(format!("structured extractor request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(FactError::Internal(format!(
                "structured extractor returned {}: {}",
                status.as_u16(),
                excerpt(&text)
            )));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| FactError::Internal(format!("structured extractor sent invalid JSON: {e}")))?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| FactError::Internal("structured extractor response has no content".into()))?;

        parse_response(content)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// Longest error body quoted back, in characters.
const ERROR_EXCERPT_CHARS: usize = 200;

/// The first [`ERROR_EXCERPT_CHARS`] characters of an error body.
fn excerpt(text: &str) -> String {
    text.chars().take(ERROR_EXCERPT_CHARS).collect()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ModelOutput {
    entities: Vec<ModelEntity>,
    attributes: Vec<ModelAttribute>,
    relationships: Vec<ModelRelationship>,
    preferred_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelEntity {
    #[serde(rename = "type")]
    entity_type: String,
    #[serde(default)]
    subtype: Option<String>,
    name: String,
    #[serde(default)]
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ModelAttribute {
    name: String,
    value: String,
    #[serde(default = "default_current")]
    current: bool,
    #[serde(default)]
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ModelRelationship {
    #[serde(rename = "type")]
    relationship_type: String,
    object: String,
    #[serde(default)]
    confidence: Option<f64>,
}

fn default_current() -> bool {
    true
}

fn score(confidence: Option<f64>) -> f64 {
    confidence
        .filter(|c| c.is_finite())
        .unwrap_or(DEFAULT_MODEL_CONFIDENCE)
        .clamp(0.0, 1.0)
}

/// Parse the model's JSON reply. Tolerates Markdown code fences; entries with
/// unknown types or empty names are dropped.
pub fn parse_response(content: &str) -> Result<ExtractedFacts> {
    let trimmed = content.trim();
    let json_text = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);
    let output: ModelOutput = serde_json::from_str(json_text.trim())?;

    let mut facts = ExtractedFacts::default();
    for entity in output.entities {
        let Ok(entity_type) = entity.entity_type.trim().to_lowercase().parse::<EntityType>() else {
            tracing::debug!(entity_type = %entity.entity_type, "model entity with unknown type dropped");
            continue;
        };
        let name = tidy_name(&entity.name);
        if name.is_empty() {
            continue;
        }
        facts.entities.push(ExtractedEntity {
            entity_type,
            subtype: entity
                .subtype
                .map(|s| normalize_name(&s))
                .filter(|s| !s.is_empty()),
            name,
            confidence: score(entity.confidence),
            source: SourceType::Inferred,
        });
    }

    for attribute in output.attributes {
        let value = attribute.value.trim();
        if attribute.name.trim().is_empty() || value.is_empty() {
            continue;
        }
        facts.attributes.push(ExtractedAttribute {
            kind: AttributeKind::from(attribute.name.as_str()),
            value: value.to_string(),
            confidence: score(attribute.confidence),
            current: attribute.current,
        });
    }

    for rel in output.relationships {
        let object = rel.object.trim();
        if rel.relationship_type.trim().is_empty() || object.is_empty() {
            continue;
        }
        let names_entity = facts
            .entities
            .iter()
            .any(|e| normalize_name(&e.name) == normalize_name(object));
        facts.relationships.push(ExtractedRelationship {
            relationship_type: rel.relationship_type.trim().to_lowercase().replace(' ', "_"),
            object_name: names_entity.then(|| object.to_string()),
            object_value: (!names_entity).then(|| object.to_string()),
            confidence: score(rel.confidence),
        });
    }

    facts.preferred_name = output
        .preferred_name
        .map(|n| tidy_name(&n))
        .filter(|n| !n.is_empty())
        .map(|n| (n, DEFAULT_MODEL_CONFIDENCE));

    Ok(facts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_excerpt_respects_char_boundaries() {
        let body = format!("{}é tail", "a".repeat(199));
        let cut = excerpt(&body);
        assert_eq!(cut.chars().count(), 200);
        assert!(cut.ends_with('é'));

        assert_eq!(excerpt("short"), "short");
        assert_eq!(excerpt(&"ü".repeat(300)).chars().count(), 200);
    }

    #[test]
    fn parses_full_reply() {
        let reply = r#"```json
        {
          "entities": [
            {"type": "person", "subtype": "user", "name": "Clemens", "confidence": 0.95},
            {"type": "pet", "subtype": "Dog", "name": "holly", "confidence": 0.9},
            {"type": "spaceship", "name": "Enterprise"}
          ],
          "attributes": [
            {"name": "city", "value": "Vienna", "current": true, "confidence": 0.85},
            {"name": "location", "value": "Graz", "current": false}
          ],
          "relationships": [
            {"type": "owns", "object": "Holly", "confidence": 0.9},
            {"type": "works at", "object": "Acme"}
          ],
          "preferred_name": null
        }
        ```"#;

        let facts = parse_response(reply).unwrap();
        assert_eq!(facts.entities.len(), 2);
        assert_eq!(facts.entities[1].name, "Holly");
        assert_eq!(facts.entities[1].subtype.as_deref(), Some("dog"));
        assert_eq!(facts.entities[1].source, SourceType::Inferred);

        assert_eq!(facts.attributes[0].kind, AttributeKind::Location);
        assert!(!facts.attributes[1].current);
        assert_eq!(facts.attributes[1].confidence, DEFAULT_MODEL_CONFIDENCE);

        assert_eq!(facts.relationships[0].object_name.as_deref(), Some("Holly"));
        assert_eq!(facts.relationships[1].relationship_type, "works_at");
        assert_eq!(facts.relationships[1].object_value.as_deref(), Some("Acme"));
        assert!(facts.preferred_name.is_none());
    }

    #[test]
    fn clamps_out_of_range_confidence() {
        let facts = parse_response(r#"{"entities": [{"type": "pet", "name": "Rex", "confidence": 7}]}"#).unwrap();
        assert_eq!(facts.entities[0].confidence, 1.0);
    }

    #[test]
    fn garbage_is_a_serialization_error() {
        assert!(matches!(parse_response("sure! here you go"), Err(FactError::Serialization(_))));
    }

    #[test]
    fn disabled_config_creates_nothing() {
        let config = ExtractionConfig::default();
        assert!(create_extractor(&config).unwrap().is_none());
    }
}
