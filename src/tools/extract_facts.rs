use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ExtractFactsParams {
    #[schemars(description = "Opaque ID of the user the message belongs to")]
    pub user_id: String,

    #[schemars(description = "The user's message text")]
    pub content: String,

    #[schemars(description = "Optional ID of the source message, stored as provenance")]
    pub message_id: Option<String>,
}
