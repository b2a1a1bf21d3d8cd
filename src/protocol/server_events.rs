use serde::Deserialize;
use serde_json::Value;

use super::models::{Item, Response, Session};
use crate::error::{Result, ServerError};

/// Server events the relay understands. Everything else parses to `Unknown`
/// with the raw payload, so new event types never break the session.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        event_id: String,
        error: ServerError,
    },
    #[serde(rename = "session.created")]
    SessionCreated { event_id: String, session: Session },
    #[serde(rename = "session.updated")]
    SessionUpdated { event_id: String, session: Session },
    #[serde(rename = "input_audio_buffer.speech_started")]
    InputAudioBufferSpeechStarted {
        event_id: String,
        audio_start_ms: u32,
        item_id: String,
    },
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    InputAudioBufferSpeechStopped {
        event_id: String,
        audio_end_ms: u32,
        item_id: String,
    },
    #[serde(
        rename = "conversation.item.input_audio_transcription.completed",
        alias = "input_audio_transcription.completed"
    )]
    InputAudioTranscriptionCompleted {
        event_id: String,
        item_id: String,
        content_index: u32,
        transcript: String,
    },
    #[serde(rename = "response.created")]
    ResponseCreated { event_id: String, response: Response },
    #[serde(rename = "response.done")]
    ResponseDone { event_id: String, response: Response },
    #[serde(rename = "response.output_item.done")]
    ResponseOutputItemDone {
        event_id: String,
        response_id: String,
        output_index: u32,
        item: Item,
    },
    #[serde(rename = "response.output_text.delta")]
    ResponseOutputTextDelta {
        event_id: String,
        response_id: String,
        item_id: String,
        output_index: u32,
        content_index: u32,
        delta: String,
    },
    #[serde(rename = "response.output_audio.delta")]
    ResponseOutputAudioDelta {
        event_id: String,
        response_id: String,
        item_id: String,
        output_index: u32,
        content_index: u32,
        delta: String,
    },
    #[serde(rename = "response.output_audio_transcript.delta")]
    ResponseOutputAudioTranscriptDelta {
        event_id: String,
        response_id: String,
        item_id: String,
        output_index: u32,
        content_index: u32,
        delta: String,
    },
    #[serde(rename = "response.output_audio_transcript.done")]
    ResponseOutputAudioTranscriptDone {
        event_id: String,
        response_id: String,
        item_id: String,
        output_index: u32,
        content_index: u32,
        transcript: String,
    },
    #[serde(rename = "response.function_call_arguments.delta")]
    ResponseFunctionCallArgumentsDelta {
        event_id: String,
        response_id: String,
        item_id: String,
        output_index: u32,
        call_id: String,
        delta: String,
    },
    #[serde(skip_deserializing)]
    Unknown(Value),
}

impl ServerEvent {
    /// Parses one text frame.
    ///
    /// # Errors
    /// Fails only when the frame is not JSON at all; well-formed JSON that does
    /// not match a known event becomes `Unknown`.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        match Self::deserialize(&value) {
            Ok(event) => Ok(event),
            Err(err) => {
                let event_type = value.get("type").and_then(Value::as_str).unwrap_or("?");
                tracing::debug!(event_type, "Unhandled server event: {err}");
                Ok(Self::Unknown(value))
            }
        }
    }

    /// Wire name of the event.
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Error { .. } => "error",
            Self::SessionCreated { .. } => "session.created",
            Self::SessionUpdated { .. } => "session.updated",
            Self::InputAudioBufferSpeechStarted { .. } => "input_audio_buffer.speech_started",
            Self::InputAudioBufferSpeechStopped { .. } => "input_audio_buffer.speech_stopped",
            Self::InputAudioTranscriptionCompleted { .. } => {
                "conversation.item.input_audio_transcription.completed"
            }
            Self::ResponseCreated { .. } => "response.created",
            Self::ResponseDone { .. } => "response.done",
            Self::ResponseOutputItemDone { .. } => "response.output_item.done",
            Self::ResponseOutputTextDelta { .. } => "response.output_text.delta",
            Self::ResponseOutputAudioDelta { .. } => "response.output_audio.delta",
            Self::ResponseOutputAudioTranscriptDelta { .. } => {
                "response.output_audio_transcript.delta"
            }
            Self::ResponseOutputAudioTranscriptDone { .. } => {
                "response.output_audio_transcript.done"
            }
            Self::ResponseFunctionCallArgumentsDelta { .. } => {
                "response.function_call_arguments.delta"
            }
            Self::Unknown(value) => value.get("type").and_then(Value::as_str).unwrap_or("unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_known_events() {
        let text = json!({
            "type": "input_audio_buffer.speech_started",
            "event_id": "evt_1",
            "audio_start_ms": 120,
            "item_id": "item_1"
        })
        .to_string();
        let event = ServerEvent::parse(&text).unwrap();
        assert!(matches!(
            event,
            ServerEvent::InputAudioBufferSpeechStarted { audio_start_ms: 120, .. }
        ));
    }

    #[test]
    fn accepts_short_transcription_name() {
        let text = json!({
            "type": "input_audio_transcription.completed",
            "event_id": "evt_2",
            "item_id": "item_1",
            "content_index": 0,
            "transcript": "hello"
        })
        .to_string();
        let event = ServerEvent::parse(&text).unwrap();
        assert!(matches!(event, ServerEvent::InputAudioTranscriptionCompleted { .. }));
    }

    #[test]
    fn unknown_and_malformed_events_fall_back() {
        let event = ServerEvent::parse(r#"{"type":"rate_limits.updated","event_id":"e"}"#).unwrap();
        assert_eq!(event.kind(), "rate_limits.updated");
        assert!(matches!(event, ServerEvent::Unknown(_)));

        let missing_fields = ServerEvent::parse(r#"{"type":"response.done"}"#).unwrap();
        assert!(matches!(missing_fields, ServerEvent::Unknown(_)));

        assert!(ServerEvent::parse("not json").is_err());
    }

    #[test]
    fn unhandled_events_are_logged_with_their_type() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            let typed = ServerEvent::parse(r#"{"type":"rate_limits.updated"}"#).unwrap();
            assert_eq!(typed.kind(), "rate_limits.updated");

            let untyped = ServerEvent::parse(r#"{"event_id":"e"}"#).unwrap();
            assert_eq!(untyped.kind(), "unknown");
        });
    }
}
