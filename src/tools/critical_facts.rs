use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct CriticalFactsParams {
    #[schemars(description = "Opaque ID of the user")]
    pub user_id: String,
}
