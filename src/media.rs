//! JSON envelopes of the telephony media socket.
//!
//! Frames are discriminated by `kind`; the payload sits under a camel-cased
//! key named after the kind (`audioData`, `stopAudio`). Kinds the relay does
//! not act on (`AudioMetadata`, DTMF, ...) parse to [`MediaFrame::Unknown`].

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AudioData {
    /// Base64 PCM payload.
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(
        rename = "participantRawID",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub participant_raw_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub silent: bool,
}

impl AudioData {
    #[must_use]
    pub fn from_pcm(pcm: &[u8]) -> Self {
        Self {
            data: STANDARD.encode(pcm),
            ..Self::default()
        }
    }

    /// Decoded payload. A payload that is not valid base64 decodes to `None`.
    #[must_use]
    pub fn pcm(&self) -> Option<Vec<u8>> {
        match STANDARD.decode(&self.data) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                tracing::debug!("Dropping media frame with invalid base64 payload: {err}");
                None
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MediaFrame {
    AudioData(AudioData),
    StopAudio,
    Unknown(Value),
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind")]
enum FrameRepr {
    AudioData {
        #[serde(rename = "audioData")]
        audio_data: AudioData,
    },
    StopAudio {
        #[serde(rename = "stopAudio", default)]
        stop_audio: Value,
    },
}

impl MediaFrame {
    /// Parse one text frame. Trailing NUL padding is ignored.
    ///
    /// # Errors
    /// Returns an error when the frame is not JSON at all.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text.trim_end_matches('\0'))?;
        match serde_json::from_value::<FrameRepr>(value.clone()) {
            Ok(FrameRepr::AudioData { audio_data }) => Ok(Self::AudioData(audio_data)),
            Ok(FrameRepr::StopAudio { .. }) => Ok(Self::StopAudio),
            Err(_) => Ok(Self::Unknown(value)),
        }
    }

    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        let json = match self {
            Self::AudioData(audio_data) => serde_json::to_string(&FrameRepr::AudioData {
                audio_data: audio_data.clone(),
            })?,
            Self::StopAudio => serde_json::to_string(&FrameRepr::StopAudio {
                stop_audio: Value::Object(serde_json::Map::new()),
            })?,
            Self::Unknown(value) => serde_json::to_string(value)?,
        };
        Ok(json)
    }

    #[must_use]
    pub const fn is_silent(&self) -> bool {
        matches!(self, Self::AudioData(AudioData { silent: true, .. }))
    }
}
