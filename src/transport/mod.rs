//! Provider-side WebSocket client.

pub mod ws;

use futures::stream::{BoxStream, SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::error::{Error, Result};
use crate::protocol::client_events::ClientEvent;
use crate::protocol::models::SessionUpdate;
use crate::protocol::server_events::ServerEvent;

pub(crate) const TRACE_LOG_MAX_BYTES: usize = 1024;
const MAX_INPUT_AUDIO_CHUNK_BYTES: usize = 15 * 1024 * 1024;
const TRACE_TRUNCATE_SUFFIX: &str = "... (truncated)";

/// A connected Realtime socket speaking [`ClientEvent`] / [`ServerEvent`].
#[must_use]
pub struct RealtimeClient<S> {
    stream: WebSocketStream<S>,
}

impl RealtimeClient<ws::ProviderSocket> {
    /// Connect to a Realtime endpoint.
    ///
    /// # Errors
    /// Returns an error if the connection fails or if the URL is invalid.
    pub async fn connect(endpoint: &str, api_key: &str, model: &str) -> Result<Self> {
        let stream = ws::connect(endpoint, api_key, model).await?;
        Ok(Self { stream })
    }
}

impl<S> RealtimeClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap an already established socket.
    pub const fn from_stream(stream: WebSocketStream<S>) -> Self {
        Self { stream }
    }

    /// Split the client into a sender and a receiver for concurrent usage.
    pub fn split(self) -> (RealtimeSender<S>, RealtimeReceiver<S>) {
        let (write, read) = self.stream.split();
        (RealtimeSender { write }, RealtimeReceiver { read })
    }
}

/// The sending half of a split `RealtimeClient`.
pub struct RealtimeSender<S> {
    write: SplitSink<WebSocketStream<S>, Message>,
}

impl<S> RealtimeSender<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Send a client event.
    ///
    /// # Errors
    /// Returns an error if validation, serialization or sending fails.
    pub async fn send(&mut self, event: ClientEvent) -> Result<()> {
        validate_client_event(&event)?;
        let json = serde_json::to_string(&event)?;
        tracing::trace!(kind = event.kind(), "Sending event: {}", safe_truncate(&json, TRACE_LOG_MAX_BYTES));
        self.write.send(Message::Text(json.into())).await?;
        Ok(())
    }

    /// Send a close frame.
    ///
    /// # Errors
    /// Returns an error if the socket is already broken.
    pub async fn close(&mut self) -> Result<()> {
        self.write.close().await?;
        Ok(())
    }
}

/// The receiving half of a split `RealtimeClient`.
pub struct RealtimeReceiver<S> {
    read: SplitStream<WebSocketStream<S>>,
}

impl<S> RealtimeReceiver<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Stream of server events that ends at the server's close frame and
    /// preserves transport errors.
    #[must_use]
    pub fn try_into_stream(self) -> BoxStream<'static, Result<ServerEvent>> {
        self.read
            .map(|res| res.map_err(Error::from))
            .take_while(|res| {
                let open = !matches!(res, Ok(Message::Close(_)));
                if !open {
                    tracing::info!("WebSocket connection closed by server");
                }
                futures::future::ready(open)
            })
            .filter_map(|res| async move {
                match res {
                    Ok(Message::Text(text)) => {
                        tracing::trace!("Received event: {}", safe_truncate(&text, TRACE_LOG_MAX_BYTES));
                        Some(ServerEvent::parse(&text))
                    }
                    Ok(_) => None,
                    Err(e) => Some(Err(e)),
                }
            })
            .boxed()
    }
}

pub(crate) fn safe_truncate(s: &str, max_bytes: usize) -> std::borrow::Cow<'_, str> {
    if s.len() <= max_bytes {
        return std::borrow::Cow::Borrowed(s);
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    std::borrow::Cow::Owned(format!(
        "{} {} {} bytes",
        &s[..end],
        TRACE_TRUNCATE_SUFFIX,
        s.len() - end
    ))
}

fn validate_client_event(event: &ClientEvent) -> Result<()> {
    match event {
        ClientEvent::InputAudioBufferAppend { audio, .. } => {
            let size = estimate_base64_decoded_len(audio)?;
            if size > MAX_INPUT_AUDIO_CHUNK_BYTES {
                return Err(Error::InvalidClientEvent(format!(
                    "input_audio_buffer.append exceeds 15MB ({size} bytes)",
                )));
            }
        }
        ClientEvent::SessionUpdate { session, .. } => validate_session_update(session)?,
        _ => {}
    }
    Ok(())
}

fn validate_session_update(session: &SessionUpdate) -> Result<()> {
    let Some(audio) = &session.audio else {
        return Ok(());
    };
    let input = audio.input.as_ref().and_then(|input| input.format.as_ref());
    let output = audio.output.as_ref().and_then(|output| output.format.as_ref());
    for format in input.into_iter().chain(output) {
        format.validate()?;
    }
    Ok(())
}

fn estimate_base64_decoded_len(s: &str) -> Result<usize> {
    let bytes = s.as_bytes();
    if bytes.len() % 4 != 0 {
        return Err(Error::InvalidClientEvent(
            "input_audio_buffer.append invalid base64 length".to_string(),
        ));
    }
    let padding = bytes.iter().rev().take_while(|&&b| b == b'=').count();
    if padding > 2 {
        return Err(Error::InvalidClientEvent(
            "input_audio_buffer.append invalid base64 padding length".to_string(),
        ));
    }
    Ok(bytes.len() / 4 * 3 - padding)
}
