use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ConflictsParams {
    #[schemars(description = "Opaque ID of the user")]
    pub user_id: String,

    #[schemars(description = "Run a resolver pass before listing (default: false)")]
    pub resolve: Option<bool>,

    #[schemars(description = "ID of a pending conflict the user has confirmed; it is marked resolved")]
    pub dismiss: Option<String>,
}
