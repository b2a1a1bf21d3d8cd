//! Events exchanged between conversation participants.
//!
//! Every event carries a fresh UUIDv7 identifier (time ordered, so identifiers
//! sort in creation order) plus the provider-facing metadata of the update it
//! was translated from. Fields are set while the event is built and are
//! read-only afterwards.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConversationRole {
    #[default]
    User,
    Assistant,
    System,
}

impl std::fmt::Display for ConversationRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventKind {
    AudioDelta {
        #[serde(default, with = "base64_bytes")]
        audio: Option<Vec<u8>>,
        role: ConversationRole,
        transcript: Option<String>,
    },
    Message {
        content: Vec<String>,
        role: ConversationRole,
    },
    TranscriptFinished {
        transcript: String,
        role: ConversationRole,
    },
    MetricDelta {
        metric: Option<Value>,
    },
    ParticipantStartedSpeaking {
        role: ConversationRole,
    },
    VideoDelta {
        #[serde(default, with = "base64_bytes")]
        video: Option<Vec<u8>>,
        role: ConversationRole,
    },
    UserIntentDiscovered {
        participant_id: String,
        intent: String,
    },
    UserIntentFulfilled {
        role: ConversationRole,
        participant_id: String,
    },
}

impl EventKind {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AudioDelta { .. } => "audio_delta",
            Self::Message { .. } => "message",
            Self::TranscriptFinished { .. } => "transcript_finished",
            Self::MetricDelta { .. } => "metric_delta",
            Self::ParticipantStartedSpeaking { .. } => "participant_started_speaking",
            Self::VideoDelta { .. } => "video_delta",
            Self::UserIntentDiscovered { .. } => "user_intent_discovered",
            Self::UserIntentFulfilled { .. } => "user_intent_fulfilled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    id: Uuid,
    service_event_type: String,
    author_id: String,
    author_name: Option<String>,
    output_index: u32,
    content_index: u32,
    #[serde(flatten)]
    kind: EventKind,
}

impl Event {
    #[must_use]
    pub fn new(kind: EventKind) -> Self {
        Self {
            id: Uuid::now_v7(),
            service_event_type: String::new(),
            author_id: String::new(),
            author_name: None,
            output_index: 0,
            content_index: 0,
            kind,
        }
    }

    #[must_use]
    pub fn audio_delta(audio: Option<Vec<u8>>, role: ConversationRole, transcript: Option<String>) -> Self {
        Self::new(EventKind::AudioDelta { audio, role, transcript })
    }

    #[must_use]
    pub fn message(content: Vec<String>, role: ConversationRole) -> Self {
        Self::new(EventKind::Message { content, role })
    }

    #[must_use]
    pub fn transcript_finished(transcript: impl Into<String>, role: ConversationRole) -> Self {
        Self::new(EventKind::TranscriptFinished { transcript: transcript.into(), role })
    }

    #[must_use]
    pub fn metric_delta(metric: Option<Value>) -> Self {
        Self::new(EventKind::MetricDelta { metric })
    }

    #[must_use]
    pub fn participant_started_speaking(role: ConversationRole) -> Self {
        Self::new(EventKind::ParticipantStartedSpeaking { role })
    }

    #[must_use]
    pub fn video_delta(video: Option<Vec<u8>>, role: ConversationRole) -> Self {
        Self::new(EventKind::VideoDelta { video, role })
    }

    #[must_use]
    pub fn user_intent_discovered(participant_id: impl Into<String>, intent: impl Into<String>) -> Self {
        Self::new(EventKind::UserIntentDiscovered {
            participant_id: participant_id.into(),
            intent: intent.into(),
        })
    }

    #[must_use]
    pub fn user_intent_fulfilled(role: ConversationRole, participant_id: impl Into<String>) -> Self {
        Self::new(EventKind::UserIntentFulfilled { role, participant_id: participant_id.into() })
    }

    #[must_use]
    pub fn with_service_event_type(mut self, service_event_type: impl Into<String>) -> Self {
        self.service_event_type = service_event_type.into();
        self
    }

    #[must_use]
    pub fn with_author(mut self, author_id: impl Into<String>, author_name: Option<String>) -> Self {
        self.author_id = author_id.into();
        self.author_name = author_name;
        self
    }

    #[must_use]
    pub const fn with_indices(mut self, output_index: u32, content_index: u32) -> Self {
        self.output_index = output_index;
        self.content_index = content_index;
        self
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn service_event_type(&self) -> &str {
        &self.service_event_type
    }

    #[must_use]
    pub fn author_id(&self) -> &str {
        &self.author_id
    }

    #[must_use]
    pub fn author_name(&self) -> Option<&str> {
        self.author_name.as_deref()
    }

    #[must_use]
    pub const fn output_index(&self) -> u32 {
        self.output_index
    }

    #[must_use]
    pub const fn content_index(&self) -> u32 {
        self.content_index
    }

    #[must_use]
    pub const fn kind(&self) -> &EventKind {
        &self.kind
    }

    #[must_use]
    pub fn into_kind(self) -> EventKind {
        self.kind
    }

    /// True for an audio delta without audio bytes; false for every other kind.
    #[must_use]
    pub fn is_audio_empty(&self) -> bool {
        match &self.kind {
            EventKind::AudioDelta { audio, .. } => audio.as_ref().is_none_or(Vec::is_empty),
            _ => false,
        }
    }

    /// True when forwarding the event would carry nothing meaningful.
    ///
    /// Intent events carry no media payload and always report empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match &self.kind {
            EventKind::AudioDelta { transcript, .. } => {
                self.is_audio_empty() && transcript.as_deref().is_none_or(str::is_empty)
            }
            EventKind::Message { content, .. } => content.is_empty(),
            EventKind::TranscriptFinished { transcript, .. } => transcript.trim().is_empty(),
            EventKind::MetricDelta { metric } => metric.is_none(),
            EventKind::ParticipantStartedSpeaking { .. } => false,
            EventKind::VideoDelta { video, .. } => video.as_ref().is_none_or(Vec::is_empty),
            EventKind::UserIntentDiscovered { .. } | EventKind::UserIntentFulfilled { .. } => true,
        }
    }
}

mod base64_bytes {
    use base64::Engine as _;
    use base64::engine::general_purpose;
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<S>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match bytes {
            Some(bytes) => serializer.serialize_some(&general_purpose::STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<String>::deserialize(deserializer)?
            .map(|encoded| general_purpose::STANDARD.decode(encoded).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_are_unique_and_creation_ordered() {
        let events: Vec<Event> = (0..64)
            .map(|_| Event::participant_started_speaking(ConversationRole::User))
            .collect();
        for pair in events.windows(2) {
            assert!(pair[0].id() < pair[1].id());
        }
    }

    #[test]
    fn audio_delta_emptiness() {
        let empty = Event::audio_delta(None, ConversationRole::Assistant, None);
        assert!(empty.is_audio_empty());
        assert!(empty.is_empty());

        let transcript_only =
            Event::audio_delta(None, ConversationRole::Assistant, Some("hel".to_string()));
        assert!(transcript_only.is_audio_empty());
        assert!(!transcript_only.is_empty());

        let audio = Event::audio_delta(Some(vec![1, 2]), ConversationRole::User, None);
        assert!(!audio.is_audio_empty());
        assert!(!audio.is_empty());
    }

    #[test]
    fn variant_emptiness() {
        assert!(Event::message(Vec::new(), ConversationRole::User).is_empty());
        assert!(Event::transcript_finished("  ", ConversationRole::User).is_empty());
        assert!(!Event::transcript_finished("hi", ConversationRole::User).is_empty());
        assert!(Event::metric_delta(None).is_empty());
        assert!(!Event::participant_started_speaking(ConversationRole::User).is_empty());
        assert!(Event::video_delta(Some(Vec::new()), ConversationRole::User).is_empty());
        assert!(Event::user_intent_discovered("p1", "book").is_empty());
        assert!(!Event::participant_started_speaking(ConversationRole::User).is_audio_empty());
    }

    #[test]
    fn serializes_with_flattened_kind_and_base64_audio() {
        let event = Event::audio_delta(Some(vec![0, 1, 2]), ConversationRole::Assistant, None)
            .with_author("agent", Some("Agent".to_string()))
            .with_indices(1, 2);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "audio_delta");
        assert_eq!(json["audio"], "AAEC");
        assert_eq!(json["author_id"], "agent");
        assert_eq!(json["output_index"], 1);

        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
