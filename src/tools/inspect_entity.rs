use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct InspectEntityParams {
    #[schemars(description = "Opaque ID of the user")]
    pub user_id: String,

    #[schemars(description = "ID of the entity to inspect")]
    pub entity_id: String,
}
