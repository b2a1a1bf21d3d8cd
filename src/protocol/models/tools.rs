use serde::{Deserialize, Serialize};

use super::JsonSchema;

/// Tool announced in `session.update`. The relay only declares functions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Tool {
    Function {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        parameters: JsonSchema,
    },
}
