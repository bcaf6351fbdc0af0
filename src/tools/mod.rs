pub mod add_relationship;
pub mod attribute;
pub mod conflicts;
pub mod critical_facts;
pub mod diagnostics;
pub mod extract_facts;
pub mod forget_entity;
pub mod inspect_entity;
pub mod system_prompt;

use add_relationship::AddRelationshipParams;
use attribute::AttributeParams;
use conflicts::ConflictsParams;
use critical_facts::CriticalFactsParams;
use diagnostics::DiagnosticsParams;
use extract_facts::ExtractFactsParams;
use forget_entity::ForgetEntityParams;
use inspect_entity::InspectEntityParams;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{tool, tool_handler, tool_router, ServerHandler};
use serde::Serialize;
use system_prompt::SystemPromptParams;

use verity::engine::FactEngine;
use verity::error::FactError;
use verity::facts::types::AttributeKind;

/// Confidence for relationships added through the tool when none is given.
const DEFAULT_TOOL_CONFIDENCE: f64 = 0.9;

/// The Verity MCP tool handler. Wraps a shared [`FactEngine`] and exposes its
/// operations via the `#[tool_router]` macro.
#[derive(Clone)]
pub struct VerityTools {
    tool_router: ToolRouter<Self>,
    engine: FactEngine,
}

fn to_json<T: Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string(value).map_err(|e| format!("serialization failed: {e}"))
}

/// User-visible errors are phrased as something to ask the user about.
fn tool_error(e: FactError) -> String {
    if e.is_user_visible() {
        format!("{e}. Ask the user to clarify; do not guess.")
    } else {
        e.to_string()
    }
}

#[tool_router]
impl VerityTools {
    pub fn new(engine: FactEngine) -> Self {
        Self {
            tool_router: Self::tool_router(),
            engine,
        }
    }

    #[tool(description = "Extract personal facts (name, pets, location, work, birthday, preferred name) from a user message and store them. Returns what was written and any conflicts resolved.")]
    async fn extract_facts(
        &self,
        Parameters(params): Parameters<ExtractFactsParams>,
    ) -> Result<String, String> {
        tracing::info!(
            user_id = %params.user_id,
            content_len = params.content.len(),
            "extract_facts called"
        );
        let report = self
            .engine
            .extract_and_store_facts(&params.content, params.message_id.as_deref(), &params.user_id)
            .await
            .map_err(tool_error)?;
        to_json(&report)
    }

    #[tool(description = "Get the user's verified critical facts: name, pet names, location and occupation. Missing keys are unknown and must be asked for.")]
    async fn get_critical_facts(
        &self,
        Parameters(params): Parameters<CriticalFactsParams>,
    ) -> Result<String, String> {
        tracing::info!(user_id = %params.user_id, "get_critical_facts called");
        let facts = self
            .engine
            .get_all_critical_facts(&params.user_id)
            .await
            .map_err(tool_error)?;
        to_json(&facts.to_map())
    }

    #[tool(description = "Build a system prompt containing the user's verified critical facts, a confidence score, and optionally a separate unverified advisory section.")]
    async fn system_prompt(
        &self,
        Parameters(params): Parameters<SystemPromptParams>,
    ) -> Result<String, String> {
        tracing::info!(user_id = %params.user_id, with_context = params.query.is_some(), "system_prompt called");
        let generated = match params.query.as_deref() {
            Some(query) => {
                self.engine
                    .generate_system_prompt_with_context(&params.user_id, &params.base_prompt, query)
                    .await
            }
            None => {
                self.engine
                    .generate_system_prompt_with_facts(&params.user_id, &params.base_prompt)
                    .await
            }
        }
        .map_err(tool_error)?;
        to_json(&generated)
    }

    #[tool(description = "Get the current value of one of the user's attributes, or its full history. Fails when the value is unknown or has an unresolved contradiction.")]
    async fn get_attribute(
        &self,
        Parameters(params): Parameters<AttributeParams>,
    ) -> Result<String, String> {
        let kind = AttributeKind::from(params.name.as_str());
        tracing::info!(user_id = %params.user_id, attribute = %kind, "get_attribute called");
        let rows = if params.history.unwrap_or(false) {
            self.engine.attribute_history(&params.user_id, kind).await
        } else {
            self.engine.current_attribute(&params.user_id, kind).await
        }
        .map_err(tool_error)?;
        to_json(&rows)
    }

    #[tool(description = "Forget an entity the user asked to delete. The entity is deactivated; its history is kept.")]
    async fn forget_entity(
        &self,
        Parameters(params): Parameters<ForgetEntityParams>,
    ) -> Result<String, String> {
        tracing::info!(user_id = %params.user_id, entity_id = %params.entity_id, "forget_entity called");
        let result = self
            .engine
            .forget_entity(&params.user_id, &params.entity_id, params.reason.as_deref())
            .await
            .map_err(tool_error)?;
        to_json(&result)
    }

    #[tool(description = "Record a relationship from the user (or one of their entities) to an entity or a literal value, e.g. 'owns', 'sibling_of'.")]
    async fn add_relationship(
        &self,
        Parameters(params): Parameters<AddRelationshipParams>,
    ) -> Result<String, String> {
        tracing::info!(
            user_id = %params.user_id,
            relationship_type = %params.relationship_type,
            "add_relationship called"
        );
        let result = self
            .engine
            .add_relationship(
                &params.user_id,
                params.subject_entity_id.as_deref(),
                &params.relationship_type,
                params.object_entity_id.as_deref(),
                params.object_value.as_deref(),
                params.confidence.unwrap_or(DEFAULT_TOOL_CONFIDENCE),
            )
            .await
            .map_err(tool_error)?;
        to_json(&result)
    }

    #[tool(description = "List the user's pending fact conflicts. Optionally run the resolver first, or mark a conflict as confirmed by the user.")]
    async fn conflicts(
        &self,
        Parameters(params): Parameters<ConflictsParams>,
    ) -> Result<String, String> {
        tracing::info!(user_id = %params.user_id, "conflicts called");
        let resolved = if params.resolve.unwrap_or(false) {
            Some(self.engine.resolve_conflicts(&params.user_id).await.map_err(tool_error)?)
        } else {
            None
        };
        let dismissed = match params.dismiss.as_deref() {
            Some(id) => Some(self.engine.dismiss_conflict(&params.user_id, id).await.map_err(tool_error)?),
            None => None,
        };
        let pending = self
            .engine
            .pending_conflicts(&params.user_id)
            .await
            .map_err(tool_error)?;
        to_json(&serde_json::json!({
            "resolved": resolved,
            "dismissed": dismissed,
            "pending": pending,
        }))
    }

    #[tool(description = "Diagnostics for a user's fact store: counts, cache entries, last update, and optionally the fact accuracy self-test.")]
    async fn fact_diagnostics(
        &self,
        Parameters(params): Parameters<DiagnosticsParams>,
    ) -> Result<String, String> {
        tracing::info!(user_id = %params.user_id, "fact_diagnostics called");
        let info = self
            .engine
            .get_diagnostic_info(&params.user_id)
            .await
            .map_err(tool_error)?;
        let checks = if params.self_test.unwrap_or(false) {
            Some(self.engine.test_fact_accuracy(&params.user_id).await.map_err(tool_error)?)
        } else {
            None
        };
        to_json(&serde_json::json!({ "diagnostics": info, "self_test": checks }))
    }

    #[tool(description = "Inspect one entity: canonical name, status, aliases and audit history.")]
    async fn inspect_entity(
        &self,
        Parameters(params): Parameters<InspectEntityParams>,
    ) -> Result<String, String> {
        tracing::info!(user_id = %params.user_id, entity_id = %params.entity_id, "inspect_entity called");
        let details = self
            .engine
            .inspect_entity(&params.user_id, &params.entity_id)
            .await
            .map_err(tool_error)?;
        to_json(&details)
    }
}

#[tool_handler]
impl ServerHandler for VerityTools {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            instructions: Some(
                "Verity keeps a user's critical facts exact. Call extract_facts on every user \
                 message, and system_prompt (or get_critical_facts) before answering. Use the \
                 verified values verbatim; when a fact is missing, ask the user."
                    .into(),
            ),
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_visible_errors_ask_for_clarification() {
        let msg = tool_error(FactError::not_found("user name for u1"));
        assert!(msg.starts_with("not found: user name for u1"));
        assert!(msg.ends_with("Ask the user to clarify; do not guess."));
    }

    #[test]
    fn internal_errors_pass_through() {
        let msg = tool_error(FactError::Internal("db lock poisoned".into()));
        assert_eq!(msg, "internal error: db lock poisoned");
    }
}
