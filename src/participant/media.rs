//! Participant bridging the telephony media WebSocket.
//!
//! Ingress turns `AudioData` frames into user `AudioDelta` events and drops
//! silent ones. Egress re-encodes `AudioDelta` events as `AudioData` frames
//! and turns `ParticipantStartedSpeaking` into a `StopAudio` frame, in queue
//! order, so playback stops before any audio queued after the interruption.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use super::{EventQueue, Participant, ParticipantCore, ParticipantState, QueueReader};
use crate::error::{Error, Result};
use crate::events::{ConversationRole, Event, EventKind};
use crate::media::{AudioData, MediaFrame};

/// Receive buffer of the media socket. Frames are small and frequent.
pub const MEDIA_READ_BUFFER_SIZE: usize = 2 * 1024;

const AUDIO_DATA_KIND: &str = "AudioData";

/// Socket configuration for accepted media connections.
#[must_use]
pub fn media_socket_config() -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.read_buffer_size = MEDIA_READ_BUFFER_SIZE;
    config
}

pub struct MediaParticipant<S> {
    core: ParticipantCore,
    sink: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    stream: parking_lot::Mutex<Option<SplitStream<WebSocketStream<S>>>>,
}

impl<S> std::fmt::Debug for MediaParticipant<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaParticipant")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<S> MediaParticipant<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, socket: WebSocketStream<S>) -> Self {
        let (sink, stream) = socket.split();
        Self {
            core: ParticipantCore::new(id, name),
            sink: Mutex::new(sink),
            stream: parking_lot::Mutex::new(Some(stream)),
        }
    }

    async fn ingress(
        &self,
        mut stream: SplitStream<WebSocketStream<S>>,
        scope: &CancellationToken,
    ) -> Result<()> {
        loop {
            let message = tokio::select! {
                biased;
                () = scope.cancelled() => return Err(Error::Cancelled),
                message = stream.next() => message,
            };
            match message {
                None
                | Some(Err(
                    tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed,
                )) => {
                    tracing::info!(participant_id = %self.core.id(), "Media socket ended");
                    scope.cancel();
                    return Ok(());
                }
                Some(Err(err)) => return Err(err.into()),
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(participant_id = %self.core.id(), ?frame, "Media socket closed by peer");
                    scope.cancel();
                    return Ok(());
                }
                Some(Ok(Message::Text(text))) => self.on_frame(&text)?,
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => self.on_frame(text)?,
                    Err(_) => tracing::debug!(participant_id = %self.core.id(), "Ignoring non-UTF-8 binary frame"),
                },
                Some(Ok(_)) => {}
            }
        }
    }

    fn on_frame(&self, text: &str) -> Result<()> {
        let frame = match MediaFrame::parse(text) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::debug!(participant_id = %self.core.id(), "Ignoring malformed media frame: {err}");
                return Ok(());
            }
        };
        match frame {
            MediaFrame::AudioData(audio) if audio.silent => Ok(()),
            MediaFrame::AudioData(audio) => {
                let event = Event::audio_delta(audio.pcm(), ConversationRole::User, None)
                    .with_service_event_type(AUDIO_DATA_KIND)
                    .with_author(self.core.id(), Some(self.core.name().to_string()));
                if event.is_audio_empty() {
                    return Ok(());
                }
                self.core.outbound().send(event)
            }
            MediaFrame::StopAudio => Ok(()),
            MediaFrame::Unknown(value) => {
                let kind = value.get("kind").and_then(|kind| kind.as_str()).unwrap_or("<none>");
                tracing::debug!(participant_id = %self.core.id(), kind, "Ignoring media frame");
                Ok(())
            }
        }
    }

    async fn egress(&self, mut inbound: QueueReader<Event>, scope: &CancellationToken) -> Result<()> {
        loop {
            let event = tokio::select! {
                biased;
                () = scope.cancelled() => return Err(Error::Cancelled),
                event = inbound.recv() => event,
            };
            let Some(event) = event else {
                return Ok(());
            };
            match event.kind() {
                EventKind::AudioDelta {
                    audio: Some(audio), ..
                } if !audio.is_empty() => {
                    self.send_frame(&MediaFrame::AudioData(AudioData::from_pcm(audio)))
                        .await?;
                }
                EventKind::ParticipantStartedSpeaking { role } => {
                    tracing::debug!(participant_id = %self.core.id(), %role, "Interrupting playback");
                    self.send_frame(&MediaFrame::StopAudio).await?;
                }
                _ => {}
            }
        }
    }

    async fn send_frame(&self, frame: &MediaFrame) -> Result<()> {
        let json = frame.to_json()?;
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(json.into())).await?;
        Ok(())
    }

    async fn close_socket(&self) {
        if let Err(err) = self.sink.lock().await.close().await {
            tracing::debug!(participant_id = %self.core.id(), "Closing media socket failed: {err}");
        }
    }
}

#[async_trait]
impl<S> Participant for MediaParticipant<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn id(&self) -> &str {
        self.core.id()
    }

    fn name(&self) -> &str {
        self.core.name()
    }

    fn inbound(&self) -> &EventQueue {
        self.core.inbound()
    }

    fn outbound(&self) -> &EventQueue {
        self.core.outbound()
    }

    fn state(&self) -> ParticipantState {
        self.core.state()
    }

    async fn start(&self, cancel: CancellationToken) -> Result<()> {
        let stream = self.stream.lock().take();
        let (Some(stream), Some(inbound)) = (stream, self.core.inbound().take_reader()) else {
            return Err(Error::AlreadyStarted(self.core.id().to_string()));
        };
        let scope = self.core.scope();
        let result = self
            .core
            .supervise(&cancel, self.ingress(stream, scope), self.egress(inbound, scope))
            .await;
        self.close_socket().await;
        result
    }

    fn stop(&self) {
        self.core.stop();
    }
}
