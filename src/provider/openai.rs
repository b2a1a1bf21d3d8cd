//! OpenAI Realtime implementation of the provider contract.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose;
use futures::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;

use super::{
    ConversationItem, FinishedItem, ProviderMetadata, ProviderSession, ProviderUpdate,
    RealtimeProvider, SessionCommands, SessionOptions,
};
use crate::audio::MemoryChunkSource;
use crate::error::Result;
use crate::events::ConversationRole;
use crate::protocol::client_events::ClientEvent;
use crate::protocol::models::{
    AudioConfig, InputAudioConfig, InputAudioTranscription, Item, OutputAudioConfig,
    Role, SessionKind, SessionUpdate, Tool, Voice,
};
use crate::protocol::server_events::ServerEvent;
use crate::transport::ws::DEFAULT_ENDPOINT;
use crate::transport::{RealtimeClient, RealtimeSender};

const PROVIDER_NAME: &str = "openai";

#[derive(Clone)]
pub struct OpenAiRealtime {
    api_key: String,
    endpoint: String,
    model: String,
}

impl std::fmt::Debug for OpenAiRealtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiRealtime")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl OpenAiRealtime {
    #[must_use]
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: model.into(),
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Configure a session over an already connected client.
    ///
    /// # Errors
    /// Returns an error if the `session.update` cannot be sent.
    pub async fn open<S>(client: RealtimeClient<S>, options: &SessionOptions) -> Result<ProviderSession>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sender, receiver) = client.split();
        sender
            .send(ClientEvent::SessionUpdate {
                event_id: None,
                session: Box::new(session_update(options)),
            })
            .await?;

        let updates = receiver
            .try_into_stream()
            .map(|event| event.map(map_server_event))
            .boxed();
        let commands: Arc<dyn SessionCommands> = Arc::new(OpenAiCommands {
            sender: Mutex::new(sender),
        });
        Ok(ProviderSession { commands, updates })
    }
}

#[async_trait]
impl RealtimeProvider for OpenAiRealtime {
    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            provider: PROVIDER_NAME.to_string(),
            endpoint: self.endpoint.clone(),
            model: self.model.clone(),
        }
    }

    async fn start_session(&self, options: &SessionOptions) -> Result<ProviderSession> {
        let model = if options.model.is_empty() {
            self.model.as_str()
        } else {
            options.model.as_str()
        };
        let client = RealtimeClient::connect(&self.endpoint, &self.api_key, model).await?;
        Self::open(client, options).await
    }
}

struct OpenAiCommands<S> {
    sender: Mutex<RealtimeSender<S>>,
}

#[async_trait]
impl<S> SessionCommands for OpenAiCommands<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send_audio(&self, audio: &[u8]) -> Result<()> {
        let mut chunks = MemoryChunkSource::new(audio);
        let mut sender = self.sender.lock().await;
        while let Some(chunk) = chunks.next_slice() {
            sender
                .send(ClientEvent::InputAudioBufferAppend {
                    event_id: None,
                    audio: general_purpose::STANDARD.encode(chunk),
                })
                .await?;
        }
        Ok(())
    }

    async fn add_item(&self, item: ConversationItem) -> Result<()> {
        let item = match item {
            ConversationItem::Message { role, content } => {
                Item::text_message(protocol_role(role), content)
            }
            ConversationItem::FunctionOutput { call_id, output } => {
                Item::function_call_output(call_id, output)
            }
        };
        self.send(ClientEvent::ConversationItemCreate {
            event_id: None,
            previous_item_id: None,
            item: Box::new(item),
        })
        .await
    }

    async fn start_response(&self) -> Result<()> {
        self.send(ClientEvent::ResponseCreate { event_id: None }).await
    }

    async fn close(&self) -> Result<()> {
        self.sender.lock().await.close().await
    }
}

impl<S> OpenAiCommands<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&self, event: ClientEvent) -> Result<()> {
        self.sender.lock().await.send(event).await
    }
}

const fn protocol_role(role: ConversationRole) -> Role {
    match role {
        ConversationRole::User => Role::User,
        ConversationRole::Assistant => Role::Assistant,
        ConversationRole::System => Role::System,
    }
}

/// Disabled turn detection or transcription is sent as an explicit `null`.
fn session_update(options: &SessionOptions) -> SessionUpdate {
    let transcription = options
        .input_transcription_model
        .clone()
        .map(|model| InputAudioTranscription {
            model: Some(model),
            ..InputAudioTranscription::default()
        });
    let tools = options
        .tools
        .iter()
        .map(|tool| Tool::Function {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
        })
        .collect::<Vec<_>>();

    SessionUpdate {
        kind: Some(SessionKind::Realtime),
        instructions: options.instructions.clone(),
        audio: Some(AudioConfig {
            input: Some(InputAudioConfig {
                format: Some(options.input_audio_format.clone()),
                turn_detection: Some(options.turn_detection.clone().into()),
                transcription: Some(transcription.into()),
            }),
            output: Some(OutputAudioConfig {
                format: Some(options.output_audio_format.clone()),
                voice: options.voice.clone().map(Voice::from),
                speed: None,
            }),
        }),
        tools: (!tools.is_empty()).then_some(tools),
    }
}

fn map_server_event(event: ServerEvent) -> ProviderUpdate {
    match event {
        ServerEvent::SessionUpdated { .. } => ProviderUpdate::SessionConfigured,
        ServerEvent::ResponseOutputAudioDelta {
            item_id,
            output_index,
            content_index,
            delta,
            ..
        } => {
            let audio = match general_purpose::STANDARD.decode(delta.as_bytes()) {
                Ok(pcm) => Some(pcm),
                Err(err) => {
                    tracing::warn!(%item_id, "Dropping undecodable audio delta: {err}");
                    None
                }
            };
            part_delta(item_id, output_index, content_index, |part| part.audio = audio)
        }
        ServerEvent::ResponseOutputAudioTranscriptDelta {
            item_id,
            output_index,
            content_index,
            delta,
            ..
        } => part_delta(item_id, output_index, content_index, |part| {
            part.transcript = Some(delta);
        }),
        ServerEvent::ResponseOutputTextDelta {
            item_id,
            output_index,
            content_index,
            delta,
            ..
        } => part_delta(item_id, output_index, content_index, |part| part.text = Some(delta)),
        ServerEvent::ResponseFunctionCallArgumentsDelta {
            item_id,
            output_index,
            delta,
            ..
        } => part_delta(item_id, output_index, 0, |part| {
            part.function_arguments = Some(delta);
        }),
        ServerEvent::InputAudioBufferSpeechStarted {
            item_id,
            audio_start_ms,
            ..
        } => ProviderUpdate::InputSpeechStarted {
            item_id: Some(item_id),
            audio_start_ms,
        },
        ServerEvent::InputAudioBufferSpeechStopped {
            item_id,
            audio_end_ms,
            ..
        } => ProviderUpdate::InputSpeechStopped {
            item_id: Some(item_id),
            audio_end_ms,
        },
        ServerEvent::InputAudioTranscriptionCompleted {
            item_id,
            content_index,
            transcript,
            ..
        } => ProviderUpdate::InputTranscriptionFinished {
            item_id: Some(item_id),
            content_index,
            transcript,
        },
        ServerEvent::ResponseOutputAudioTranscriptDone {
            item_id,
            output_index,
            content_index,
            transcript,
            ..
        } => ProviderUpdate::OutputTranscriptionFinished {
            item_id: Some(item_id),
            output_index,
            content_index,
            transcript,
        },
        ServerEvent::ResponseOutputItemDone {
            output_index, item, ..
        } => ProviderUpdate::ItemFinished {
            output_index,
            item: finished_item(&item),
        },
        ServerEvent::ResponseDone { response, .. } => ProviderUpdate::ResponseFinished {
            response_id: Some(response.id),
            items: response
                .output
                .iter()
                .flatten()
                .map(finished_item)
                .collect(),
            usage: response.usage,
        },
        ServerEvent::Error { error, .. } => ProviderUpdate::Error { error },
        other => ProviderUpdate::Other {
            kind: other.kind().to_string(),
        },
    }
}

#[derive(Default)]
struct DeltaParts {
    audio: Option<Vec<u8>>,
    transcript: Option<String>,
    text: Option<String>,
    function_arguments: Option<String>,
}

fn part_delta(
    item_id: String,
    output_index: u32,
    content_index: u32,
    fill: impl FnOnce(&mut DeltaParts),
) -> ProviderUpdate {
    let mut parts = DeltaParts::default();
    fill(&mut parts);
    ProviderUpdate::PartDelta {
        item_id: Some(item_id),
        output_index,
        content_index,
        audio: parts.audio,
        transcript: parts.transcript,
        text: parts.text,
        function_arguments: parts.function_arguments,
    }
}

fn finished_item(item: &Item) -> FinishedItem {
    match item {
        Item::FunctionCall {
            id,
            name,
            call_id,
            arguments,
            ..
        } => FinishedItem {
            item_id: id.clone(),
            function_name: Some(name.clone()),
            call_id: Some(call_id.clone()),
            arguments: Some(arguments.clone()),
        },
        Item::Message { id, .. } | Item::FunctionCallOutput { id, .. } => FinishedItem {
            item_id: id.clone(),
            ..FinishedItem::default()
        },
        Item::Unknown(value) => FinishedItem {
            item_id: value.get("id").and_then(Value::as_str).map(str::to_string),
            ..FinishedItem::default()
        },
    }
}
