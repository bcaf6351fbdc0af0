use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct AddRelationshipParams {
    #[schemars(description = "Opaque ID of the user")]
    pub user_id: String,

    #[schemars(description = "Entity the relationship starts from. Omit for the user themself.")]
    pub subject_entity_id: Option<String>,

    #[schemars(description = "Relationship type, e.g. 'owns', 'sibling_of', 'works_at'")]
    pub relationship_type: String,

    #[schemars(description = "Target entity ID. Give exactly one of object_entity_id and object_value.")]
    pub object_entity_id: Option<String>,

    #[schemars(description = "Literal target value. Give exactly one of object_entity_id and object_value.")]
    pub object_value: Option<String>,

    #[schemars(description = "Confidence 0.0-1.0. Defaults to 0.9.")]
    pub confidence: Option<f64>,
}
