use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ForgetEntityParams {
    #[schemars(description = "Opaque ID of the user")]
    pub user_id: String,

    #[schemars(description = "ID of the entity to forget")]
    pub entity_id: String,

    #[schemars(description = "Why the user asked to forget it")]
    pub reason: Option<String>,
}
