use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{AudioConfig, Tool};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    #[default]
    Realtime,
    Transcription,
}

/// Body of a `session.update`. Partial: unset fields are left as they are.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionUpdate {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<SessionKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
}

/// Session as reported by `session.created` / `session.updated`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Remaining fields, kept for logging.
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}
