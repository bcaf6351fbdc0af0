use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct DiagnosticsParams {
    #[schemars(description = "Opaque ID of the user")]
    pub user_id: String,

    #[schemars(description = "Also run the read-only fact accuracy self-test (default: false)")]
    pub self_test: Option<bool>,
}
