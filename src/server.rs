//! Accepts media sockets and runs one relay per call.
//!
//! Only WebSocket upgrades on [`MEDIA_PATH`] are accepted; other paths are
//! refused with 404 during the handshake. The call's conversation id comes
//! from the `serverCallId` query parameter, or a fresh UUIDv7 when absent.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{StatusCode, Uri};
use tokio_tungstenite::{WebSocketStream, accept_hdr_async_with_config};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::participant::media::media_socket_config;
use crate::participant::{AiParticipant, MediaParticipant};
use crate::provider::{OpenAiRealtime, RealtimeProvider, SessionOptions};
use crate::relay::Relay;
use crate::store::ConversationStore;
use crate::tools::{ToolBridge, ToolRegistry};

pub const MEDIA_PATH: &str = "/ws";
pub const CALL_ID_PARAM: &str = "serverCallId";

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct RelayServer {
    provider: Arc<dyn RealtimeProvider>,
    options: SessionOptions,
    bridge: Arc<ToolBridge>,
    store: Option<Arc<dyn ConversationStore>>,
}

impl std::fmt::Debug for RelayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayServer")
            .field("provider", &self.provider.metadata())
            .field("bridge", &self.bridge)
            .field("has_store", &self.store.is_some())
            .finish_non_exhaustive()
    }
}

impl RelayServer {
    #[must_use]
    pub fn new(provider: Arc<dyn RealtimeProvider>, options: SessionOptions, bridge: Arc<ToolBridge>) -> Self {
        Self {
            provider,
            options,
            bridge,
            store: None,
        }
    }

    /// Server talking to the OpenAI Realtime API with `tools`.
    #[must_use]
    pub fn from_config(config: &RelayConfig, tools: ToolRegistry) -> Self {
        let provider = OpenAiRealtime::new(config.api_key.clone(), config.model.clone())
            .with_endpoint(config.endpoint.clone());
        let bridge = ToolBridge::new(Arc::new(tools)).with_detailed_errors(config.detailed_tool_errors);
        Self::new(Arc::new(provider), config.session_options(), Arc::new(bridge))
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub const fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Accept connections until `cancel` fires, then wait for running calls.
    ///
    /// # Errors
    /// Currently only returns `Ok`; accept failures are logged and skipped.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, path = MEDIA_PATH, "Relay listening");
        }
        let calls = TaskTracker::new();
        loop {
            let accepted = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    tracing::warn!("Accept failed: {err}");
                    continue;
                }
            };
            let server = Arc::clone(&self);
            let cancel = cancel.child_token();
            calls.spawn(async move {
                match server.handle_connection(stream, cancel).await {
                    Ok(()) => tracing::debug!(%peer, "Connection finished"),
                    Err(err) if err.is_cancellation() => tracing::info!(%peer, "Connection cancelled"),
                    Err(err) => tracing::warn!(%peer, "Connection ended with error: {err}"),
                }
            });
        }
        calls.close();
        tracing::info!(active = calls.len(), "Relay shutting down, waiting for calls");
        calls.wait().await;
        Ok(())
    }

    async fn handle_connection(&self, stream: TcpStream, cancel: CancellationToken) -> Result<()> {
        let mut call_id = None;
        let handshake = accept_hdr_async_with_config(
            stream,
            |request: &Request, response: Response| admit(request, response, &mut call_id),
            Some(media_socket_config()),
        );
        let socket = match tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake).await {
            Ok(Ok(socket)) => socket,
            Ok(Err(WsError::Http(response))) => {
                tracing::debug!(status = %response.status(), "Media socket refused");
                return Ok(());
            }
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => return Err(Error::Io(std::io::ErrorKind::TimedOut.into())),
        };

        let conversation_id = call_id.unwrap_or_else(|| Uuid::now_v7().to_string());
        self.run_call(conversation_id, socket, cancel).await
    }

    /// Run one call over an accepted media socket.
    ///
    /// # Errors
    /// The first participant error of the call.
    pub async fn run_call<S>(
        &self,
        conversation_id: String,
        socket: WebSocketStream<S>,
        cancel: CancellationToken,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        tracing::info!(%conversation_id, "Call accepted");
        let transport = Arc::new(MediaParticipant::new(conversation_id.clone(), "caller", socket));
        let ai = Arc::new(AiParticipant::new(
            format!("{conversation_id}:ai"),
            "assistant",
            Arc::clone(&self.provider),
            self.options.clone(),
            Arc::new(self.bridge.for_call()),
        ));
        let mut relay = Relay::new(conversation_id, transport, ai);
        if let Some(store) = &self.store {
            relay = relay.with_store(Arc::clone(store));
        }
        relay.run(cancel).await
    }
}

/// Handshake callback: only [`MEDIA_PATH`] is served.
fn admit(
    request: &Request,
    response: Response,
    call_id: &mut Option<String>,
) -> std::result::Result<Response, ErrorResponse> {
    if request.uri().path() != MEDIA_PATH {
        tracing::debug!(path = request.uri().path(), "Rejecting socket on unknown path");
        let mut refusal = ErrorResponse::new(None);
        *refusal.status_mut() = StatusCode::NOT_FOUND;
        return Err(refusal);
    }
    *call_id = call_id_from(request.uri());
    Ok(response)
}

fn call_id_from(uri: &Uri) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == CALL_ID_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}
