use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SystemPromptParams {
    #[schemars(description = "Opaque ID of the user")]
    pub user_id: String,

    #[schemars(description = "The assistant's base system prompt")]
    pub base_prompt: String,

    #[schemars(
        description = "Optional query for advisory context. When set, the retriever is consulted and its results are appended as a separate, unverified section."
    )]
    pub query: Option<String>,
}
