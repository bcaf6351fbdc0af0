use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct AttributeParams {
    #[schemars(description = "Opaque ID of the user")]
    pub user_id: String,

    #[schemars(
        description = "Attribute name: 'location', 'occupation', 'employer', 'birthday', 'hobby', 'personal_fact', or any custom name"
    )]
    pub name: String,

    #[schemars(description = "Return every recorded value, oldest first, instead of only the current one")]
    pub history: Option<bool>,
}
