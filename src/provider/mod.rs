//! Contract between the orchestrator and a realtime conversational provider.

pub mod openai;
#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::error::{Result, ServerError};
use crate::events::ConversationRole;
use crate::protocol::models::{AudioFormat, TurnDetection};

pub use openai::OpenAiRealtime;

/// Provider identity, exposed explicitly so callers never dig into a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderMetadata {
    pub provider: String,
    pub endpoint: String,
    pub model: String,
}

/// A function tool as announced to the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDescriptor {
    pub name: String,
    pub description: Option<String>,
    pub parameters: Value,
}

/// Fixed configuration of one provider session, applied once before the first
/// response is requested.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub model: String,
    pub instructions: Option<String>,
    pub voice: Option<String>,
    pub input_audio_format: AudioFormat,
    pub output_audio_format: AudioFormat,
    pub turn_detection: Option<TurnDetection>,
    pub input_transcription_model: Option<String>,
    pub tools: Vec<FunctionDescriptor>,
}

impl SessionOptions {
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            instructions: None,
            voice: None,
            input_audio_format: AudioFormat::pcm_24khz(),
            output_audio_format: AudioFormat::pcm_24khz(),
            turn_detection: Some(TurnDetection::server_vad_default()),
            input_transcription_model: None,
            tools: Vec::new(),
        }
    }
}

/// Item injected into the provider's conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationItem {
    Message {
        role: ConversationRole,
        content: Vec<String>,
    },
    FunctionOutput {
        call_id: String,
        output: String,
    },
}

/// A finished output item as reported by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinishedItem {
    pub item_id: Option<String>,
    pub function_name: Option<String>,
    pub call_id: Option<String>,
    pub arguments: Option<String>,
}

impl FinishedItem {
    /// Function name, if present and non-empty.
    #[must_use]
    pub fn function_name(&self) -> Option<&str> {
        self.function_name.as_deref().filter(|name| !name.is_empty())
    }
}

/// Streaming update from a provider session.
#[derive(Debug, Clone)]
pub enum ProviderUpdate {
    SessionConfigured,
    PartDelta {
        item_id: Option<String>,
        output_index: u32,
        content_index: u32,
        audio: Option<Vec<u8>>,
        transcript: Option<String>,
        text: Option<String>,
        function_arguments: Option<String>,
    },
    InputSpeechStarted {
        item_id: Option<String>,
        audio_start_ms: u32,
    },
    InputSpeechStopped {
        item_id: Option<String>,
        audio_end_ms: u32,
    },
    InputTranscriptionFinished {
        item_id: Option<String>,
        content_index: u32,
        transcript: String,
    },
    OutputTranscriptionFinished {
        item_id: Option<String>,
        output_index: u32,
        content_index: u32,
        transcript: String,
    },
    ItemFinished {
        output_index: u32,
        item: FinishedItem,
    },
    ResponseFinished {
        response_id: Option<String>,
        items: Vec<FinishedItem>,
        usage: Option<Value>,
    },
    Error {
        error: ServerError,
    },
    Other {
        kind: String,
    },
}

/// Field-less tag of a [`ProviderUpdate`], used to key handler registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateKind {
    SessionConfigured,
    PartDelta,
    InputSpeechStarted,
    InputSpeechStopped,
    InputTranscriptionFinished,
    OutputTranscriptionFinished,
    ItemFinished,
    ResponseFinished,
    Error,
    Other,
}

impl UpdateKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SessionConfigured => "session_configured",
            Self::PartDelta => "part_delta",
            Self::InputSpeechStarted => "input_speech_started",
            Self::InputSpeechStopped => "input_speech_stopped",
            Self::InputTranscriptionFinished => "input_transcription_finished",
            Self::OutputTranscriptionFinished => "output_transcription_finished",
            Self::ItemFinished => "item_finished",
            Self::ResponseFinished => "response_finished",
            Self::Error => "error",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ProviderUpdate {
    #[must_use]
    pub const fn kind(&self) -> UpdateKind {
        match self {
            Self::SessionConfigured => UpdateKind::SessionConfigured,
            Self::PartDelta { .. } => UpdateKind::PartDelta,
            Self::InputSpeechStarted { .. } => UpdateKind::InputSpeechStarted,
            Self::InputSpeechStopped { .. } => UpdateKind::InputSpeechStopped,
            Self::InputTranscriptionFinished { .. } => UpdateKind::InputTranscriptionFinished,
            Self::OutputTranscriptionFinished { .. } => UpdateKind::OutputTranscriptionFinished,
            Self::ItemFinished { .. } => UpdateKind::ItemFinished,
            Self::ResponseFinished { .. } => UpdateKind::ResponseFinished,
            Self::Error { .. } => UpdateKind::Error,
            Self::Other { .. } => UpdateKind::Other,
        }
    }
}

/// Commands accepted by a live session. Shared between the loops of one
/// orchestrator, so every method takes `&self`.
#[async_trait]
pub trait SessionCommands: Send + Sync {
    async fn send_audio(&self, audio: &[u8]) -> Result<()>;

    async fn add_item(&self, item: ConversationItem) -> Result<()>;

    async fn start_response(&self) -> Result<()>;

    /// Close the underlying connection. Further commands fail.
    async fn close(&self) -> Result<()>;
}

pub type UpdateStream = BoxStream<'static, Result<ProviderUpdate>>;

/// A started session: the command handle plus its single-consumer update stream.
pub struct ProviderSession {
    pub commands: Arc<dyn SessionCommands>,
    pub updates: UpdateStream,
}

impl std::fmt::Debug for ProviderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSession").finish_non_exhaustive()
    }
}

#[async_trait]
pub trait RealtimeProvider: Send + Sync {
    fn metadata(&self) -> ProviderMetadata;

    /// Open and configure a session.
    ///
    /// # Errors
    /// Returns an error if the connection or the initial configuration fails.
    async fn start_session(&self, options: &SessionOptions) -> Result<ProviderSession>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_function_names_do_not_count() {
        let item = FinishedItem {
            function_name: Some(String::new()),
            ..FinishedItem::default()
        };
        assert_eq!(item.function_name(), None);

        let item = FinishedItem {
            function_name: Some("BookRoom".to_string()),
            ..FinishedItem::default()
        };
        assert_eq!(item.function_name(), Some("BookRoom"));
    }

    #[test]
    fn update_kinds_match_variants() {
        assert_eq!(ProviderUpdate::SessionConfigured.kind(), UpdateKind::SessionConfigured);
        let other = ProviderUpdate::Other {
            kind: "rate_limits.updated".to_string(),
        };
        assert_eq!(other.kind().to_string(), "other");
    }
}
