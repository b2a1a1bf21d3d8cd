//! Relay configuration: defaults, environment, and a consuming builder.

use std::net::SocketAddr;

use crate::error::{Error, Result};
use crate::protocol::models::{AudioFormat, DEFAULT_MODEL, TurnDetection};
use crate::provider::SessionOptions;
use crate::transport::ws::DEFAULT_ENDPOINT;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_VOICE: &str = "coral";
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen_addr: SocketAddr,
    pub api_key: String,
    pub endpoint: String,
    pub model: String,
    pub instructions: Option<String>,
    pub voice: String,
    pub input_audio_format: AudioFormat,
    pub output_audio_format: AudioFormat,
    pub turn_detection: Option<TurnDetection>,
    pub input_transcription_model: Option<String>,
    /// Append the failure message to tool error outputs sent to the model.
    pub detailed_tool_errors: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            api_key: String::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            instructions: None,
            voice: DEFAULT_VOICE.to_string(),
            input_audio_format: AudioFormat::pcm_24khz(),
            output_audio_format: AudioFormat::pcm_24khz(),
            turn_detection: Some(TurnDetection::server_vad_default()),
            input_transcription_model: Some(DEFAULT_TRANSCRIPTION_MODEL.to_string()),
            detailed_tool_errors: false,
        }
    }
}

impl RelayConfig {
    #[must_use]
    pub fn builder() -> RelayConfigBuilder {
        RelayConfigBuilder::new()
    }

    /// Read `OPENAI_API_KEY` and the `RELAY_*` variables over the defaults.
    ///
    /// # Errors
    /// Returns an error if a variable is malformed or the result is invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut builder = Self::builder();
        if let Some(key) = lookup("OPENAI_API_KEY") {
            builder = builder.api_key(key);
        }
        if let Some(addr) = lookup("RELAY_LISTEN_ADDR") {
            let addr = addr
                .parse()
                .map_err(|e| Error::Config(format!("RELAY_LISTEN_ADDR: {e}")))?;
            builder = builder.listen_addr(addr);
        }
        if let Some(model) = lookup("RELAY_MODEL") {
            builder = builder.model(model);
        }
        if let Some(endpoint) = lookup("RELAY_ENDPOINT") {
            builder = builder.endpoint(endpoint);
        }
        if let Some(instructions) = lookup("RELAY_INSTRUCTIONS") {
            builder = builder.instructions(instructions);
        }
        if let Some(voice) = lookup("RELAY_VOICE") {
            builder = builder.voice(voice);
        }
        if let Some(flag) = lookup("RELAY_DETAILED_TOOL_ERRORS") {
            let flag = flag
                .parse()
                .map_err(|e| Error::Config(format!("RELAY_DETAILED_TOOL_ERRORS: {e}")))?;
            builder = builder.detailed_tool_errors(flag);
        }
        builder.build()
    }

    /// Provider session configuration. Tools are added by the orchestrator.
    #[must_use]
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            model: self.model.clone(),
            instructions: self.instructions.clone(),
            voice: Some(self.voice.clone()),
            input_audio_format: self.input_audio_format.clone(),
            output_audio_format: self.output_audio_format.clone(),
            turn_detection: self.turn_detection.clone(),
            input_transcription_model: self.input_transcription_model.clone(),
            tools: Vec::new(),
        }
    }

    /// # Errors
    /// Returns `Error::Config` for a missing API key or unsupported audio formats.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(Error::Config("api_key required".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(Error::Config("model must not be empty".to_string()));
        }
        for format in [&self.input_audio_format, &self.output_audio_format] {
            format.validate().map_err(|e| Error::Config(e.to_string()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RelayConfigBuilder {
    config: RelayConfig,
}

impl RelayConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = key.into();
        self
    }

    #[must_use]
    pub const fn listen_addr(mut self, addr: SocketAddr) -> Self {
        self.config.listen_addr = addr;
        self
    }

    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    #[must_use]
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.config.instructions = Some(instructions.into());
        self
    }

    #[must_use]
    pub fn voice(mut self, voice: impl Into<String>) -> Self {
        self.config.voice = voice.into();
        self
    }

    #[must_use]
    pub const fn input_audio_format(mut self, format: AudioFormat) -> Self {
        self.config.input_audio_format = format;
        self
    }

    #[must_use]
    pub const fn output_audio_format(mut self, format: AudioFormat) -> Self {
        self.config.output_audio_format = format;
        self
    }

    #[must_use]
    pub const fn turn_detection(mut self, turn_detection: Option<TurnDetection>) -> Self {
        self.config.turn_detection = turn_detection;
        self
    }

    #[must_use]
    pub fn input_transcription_model(mut self, model: Option<String>) -> Self {
        self.config.input_transcription_model = model;
        self
    }

    #[must_use]
    pub const fn detailed_tool_errors(mut self, enabled: bool) -> Self {
        self.config.detailed_tool_errors = enabled;
        self
    }

    /// # Errors
    /// Returns `Error::Config` when the configuration is invalid.
    pub fn build(self) -> Result<RelayConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
