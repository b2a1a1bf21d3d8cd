//! Owner of one provider session.
//!
//! Two loops run per session. The update loop consumes the provider's update
//! stream strictly in arrival order, dispatches registered observers, turns
//! the updates the conversation cares about into [`Event`]s and hands every
//! update to the [`ToolBridge`]. The input loop drains an unbounded queue of
//! caller audio and conversation items into provider commands, so a slow
//! provider round-trip never stalls whoever produces the audio.

pub mod handlers;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::audio::{BufferPool, ChunkSource, StreamChunkSource};
use crate::error::{Error, Result};
use crate::events::{ConversationRole, Event};
use crate::participant::queue::{EventQueue, Queue, QueueReader};
use crate::participant::supervise_loops;
use crate::provider::{
    ConversationItem, ProviderSession, ProviderUpdate, RealtimeProvider, SessionCommands,
    SessionOptions, UpdateStream,
};
use crate::tools::ToolBridge;

pub use handlers::{UpdateHandler, UpdateHandlers};

/// Work queued for the provider by the input loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInput {
    Audio(Vec<u8>),
    Item(ConversationItem),
}

pub struct SessionOrchestrator {
    provider: Arc<dyn RealtimeProvider>,
    options: SessionOptions,
    bridge: Arc<ToolBridge>,
    handlers: UpdateHandlers,
    input: Queue<SessionInput>,
    scope: CancellationToken,
    started: AtomicBool,
    author_id: String,
    author_name: Option<String>,
}

impl std::fmt::Debug for SessionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOrchestrator")
            .field("provider", &self.provider.metadata())
            .field("author_id", &self.author_id)
            .field("handlers", &self.handlers)
            .finish_non_exhaustive()
    }
}

impl SessionOrchestrator {
    #[must_use]
    pub fn new(provider: Arc<dyn RealtimeProvider>, options: SessionOptions, bridge: Arc<ToolBridge>) -> Self {
        Self {
            provider,
            options,
            bridge,
            handlers: UpdateHandlers::new(),
            input: Queue::new(),
            scope: CancellationToken::new(),
            started: AtomicBool::new(false),
            author_id: "assistant".to_string(),
            author_name: None,
        }
    }

    /// Author stamped on every emitted event.
    #[must_use]
    pub fn with_author(mut self, author_id: impl Into<String>, author_name: Option<String>) -> Self {
        self.author_id = author_id.into();
        self.author_name = author_name;
        self
    }

    #[must_use]
    pub const fn handlers(&self) -> &UpdateHandlers {
        &self.handlers
    }

    #[must_use]
    pub const fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Queue caller audio for the provider. Empty buffers are skipped.
    ///
    /// # Errors
    /// `Error::QueueClosed` after [`dispose`](Self::dispose).
    pub fn send_input_audio(&self, audio: impl Into<Vec<u8>>) -> Result<()> {
        let audio = audio.into();
        if audio.is_empty() {
            return Ok(());
        }
        self.input.send(SessionInput::Audio(audio))
    }

    /// Queue a conversation item for the provider.
    ///
    /// # Errors
    /// `Error::QueueClosed` after [`dispose`](Self::dispose).
    pub fn add_item(&self, item: ConversationItem) -> Result<()> {
        self.input.send(SessionInput::Item(item))
    }

    /// Queue all audio from `reader`, one pooled chunk at a time. Returns the
    /// number of bytes queued.
    ///
    /// # Errors
    /// Read failures, `Error::Cancelled`, or `Error::QueueClosed`.
    pub async fn stream_input_audio<R>(
        &self,
        reader: R,
        pool: &BufferPool,
        cancel: &CancellationToken,
    ) -> Result<usize>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut source = StreamChunkSource::new(reader, pool);
        let mut total = 0;
        while let Some(chunk) = source.next_chunk(cancel).await? {
            total += chunk.len();
            self.send_input_audio(chunk)?;
        }
        tracing::debug!(bytes = total, "Queued streamed input audio");
        Ok(total)
    }

    /// Open the provider session and run both loops until `cancel` fires,
    /// the orchestrator is disposed, or the session fails. Events go to
    /// `events`. Runs once per instance.
    ///
    /// # Errors
    /// Session start failures, a provider fault, or the first loop fault.
    pub async fn run(&self, cancel: &CancellationToken, events: &EventQueue) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted(self.author_id.clone()));
        }
        let input = self
            .input
            .take_reader()
            .ok_or_else(|| Error::AlreadyStarted(self.author_id.clone()))?;

        let mut options = self.options.clone();
        options.tools.extend(self.bridge.descriptors());
        let metadata = self.provider.metadata();
        tracing::info!(
            provider = %metadata.provider,
            endpoint = %metadata.endpoint,
            model = %options.model,
            tools = options.tools.len(),
            "Starting provider session"
        );

        let session = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            () = self.scope.cancelled() => return Err(Error::Cancelled),
            session = self.provider.start_session(&options) => session?,
        };
        let ProviderSession { commands, updates } = session;

        let result = supervise_loops(
            &self.author_id,
            &self.scope,
            cancel,
            ("updates", self.consume_updates(updates, commands.as_ref(), events)),
            ("input", self.consume_input(input, commands.as_ref())),
        )
        .await;

        if let Err(err) = commands.close().await {
            tracing::debug!("Closing provider session failed: {err}");
        }
        tracing::info!(provider = %metadata.provider, "Provider session ended");
        result
    }

    async fn consume_updates(
        &self,
        mut updates: UpdateStream,
        commands: &dyn SessionCommands,
        events: &EventQueue,
    ) -> Result<()> {
        let mut response_requested = false;
        loop {
            let update = tokio::select! {
                biased;
                () = self.scope.cancelled() => return Err(Error::Cancelled),
                update = updates.next() => update,
            };
            let Some(update) = update else {
                tracing::info!("Provider update stream ended");
                return Err(Error::ConnectionClosed);
            };
            let update = update.map_err(|err| match err {
                Error::Cancelled | Error::Provider(_) => err,
                other => Error::Provider(other.to_string()),
            })?;

            self.handlers.dispatch(&update).await;

            match &update {
                ProviderUpdate::SessionConfigured if !response_requested => {
                    response_requested = true;
                    tracing::debug!("Session configured, requesting first response");
                    commands.start_response().await?;
                }
                ProviderUpdate::Error { error } => {
                    let code = error.code.clone();
                    tracing::warn!(?code, "{}", Error::Api(error.clone()));
                }
                _ => {}
            }
            if let Some(event) = self.translate(&update) {
                events.send(event)?;
            }

            self.bridge.handle_update(&update, commands, &self.scope).await?;
        }
    }

    async fn consume_input(&self, mut input: QueueReader<SessionInput>, commands: &dyn SessionCommands) -> Result<()> {
        loop {
            let next = tokio::select! {
                biased;
                () = self.scope.cancelled() => return Err(Error::Cancelled),
                next = input.recv() => next,
            };
            match next {
                None => return Ok(()),
                Some(SessionInput::Audio(audio)) => commands.send_audio(&audio).await?,
                Some(SessionInput::Item(item)) => commands.add_item(item).await?,
            }
        }
    }

    /// Event for an update, if the conversation sees one.
    fn translate(&self, update: &ProviderUpdate) -> Option<Event> {
        let event = match update {
            ProviderUpdate::PartDelta {
                output_index,
                content_index,
                audio,
                transcript,
                text,
                ..
            } => {
                let event = Event::audio_delta(
                    audio.clone(),
                    ConversationRole::Assistant,
                    transcript.clone().or_else(|| text.clone()),
                )
                .with_indices(*output_index, *content_index);
                if event.is_empty() {
                    return None;
                }
                event
            }
            ProviderUpdate::InputSpeechStarted { .. } => {
                Event::participant_started_speaking(ConversationRole::User)
            }
            ProviderUpdate::InputTranscriptionFinished {
                content_index,
                transcript,
                ..
            } => Event::transcript_finished(transcript.clone(), ConversationRole::User)
                .with_indices(0, *content_index),
            ProviderUpdate::OutputTranscriptionFinished {
                output_index,
                content_index,
                transcript,
                ..
            } => Event::transcript_finished(transcript.clone(), ConversationRole::Assistant)
                .with_indices(*output_index, *content_index),
            _ => return None,
        };
        Some(
            event
                .with_service_event_type(update.kind().as_str())
                .with_author(self.author_id.clone(), self.author_name.clone()),
        )
    }

    /// Stop both loops, reject further input and drop all observers.
    pub fn dispose(&self) {
        self.scope.cancel();
        self.input.complete();
        self.handlers.clear();
        tracing::debug!(author_id = %self.author_id, "Orchestrator disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo;
    use crate::events::EventKind;
    use crate::provider::testing::{Recorded, ScriptedSession, scripted_session};
    use crate::provider::{FinishedItem, ProviderMetadata, UpdateKind};
    use crate::tools::ToolRegistry;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Hands out one scripted session.
    struct ScriptedProvider {
        session: parking_lot::Mutex<Option<ProviderSession>>,
        seen_tools: parking_lot::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RealtimeProvider for ScriptedProvider {
        fn metadata(&self) -> ProviderMetadata {
            ProviderMetadata {
                provider: "scripted".to_string(),
                endpoint: "memory://".to_string(),
                model: "test-model".to_string(),
            }
        }

        async fn start_session(&self, options: &SessionOptions) -> Result<ProviderSession> {
            *self.seen_tools.lock() = options.tools.iter().map(|t| t.name.clone()).collect();
            self.session
                .lock()
                .take()
                .ok_or_else(|| Error::Provider("session already taken".to_string()))
        }
    }

    struct Harness {
        orchestrator: Arc<SessionOrchestrator>,
        provider: Arc<ScriptedProvider>,
        script: ScriptedSession,
        events: Arc<EventQueue>,
        cancel: CancellationToken,
        running: tokio::task::JoinHandle<Result<()>>,
    }

    fn start() -> Harness {
        let (session, script) = scripted_session();
        let provider = Arc::new(ScriptedProvider {
            session: parking_lot::Mutex::new(Some(session)),
            seen_tools: parking_lot::Mutex::new(Vec::new()),
        });
        let mut registry = ToolRegistry::new();
        demo::register(&mut registry);
        let bridge = Arc::new(ToolBridge::new(Arc::new(registry)));
        let orchestrator = Arc::new(
            SessionOrchestrator::new(provider.clone(), SessionOptions::new("test-model"), bridge)
                .with_author("ai-1", Some("Assistant".to_string())),
        );
        let events = Arc::new(EventQueue::new());
        let cancel = CancellationToken::new();
        let running = tokio::spawn({
            let orchestrator = Arc::clone(&orchestrator);
            let events = Arc::clone(&events);
            let cancel = cancel.clone();
            async move { orchestrator.run(&cancel, &events).await }
        });
        Harness {
            orchestrator,
            provider,
            script,
            events,
            cancel,
            running,
        }
    }

    async fn recorded(script: &mut ScriptedSession) -> Recorded {
        tokio::time::timeout(Duration::from_secs(2), script.recorded.recv())
            .await
            .unwrap()
            .unwrap()
    }

    async fn next_event(reader: &mut QueueReader<Event>) -> Event {
        tokio::time::timeout(Duration::from_secs(2), reader.recv())
            .await
            .unwrap()
            .unwrap()
    }

    fn delta(audio: Option<Vec<u8>>, transcript: Option<&str>, arguments: Option<&str>) -> ProviderUpdate {
        ProviderUpdate::PartDelta {
            item_id: Some("item_1".to_string()),
            output_index: 0,
            content_index: 0,
            audio,
            transcript: transcript.map(str::to_string),
            text: None,
            function_arguments: arguments.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn first_session_configured_requests_one_response() {
        let mut h = start();
        h.script.updates.unbounded_send(Ok(ProviderUpdate::SessionConfigured)).unwrap();
        h.script.updates.unbounded_send(Ok(ProviderUpdate::SessionConfigured)).unwrap();
        assert_eq!(recorded(&mut h.script).await, Recorded::StartResponse);

        h.cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(2), h.running).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert_eq!(recorded(&mut h.script).await, Recorded::Close);
        assert!(h.script.recorded.try_recv().is_err());
        assert_eq!(
            *h.provider.seen_tools.lock(),
            vec!["GetRoomCapacity".to_string(), "BookRoom".to_string()]
        );
    }

    #[tokio::test]
    async fn caller_speech_raises_an_event_without_provider_commands() {
        let mut h = start();
        let mut events = h.events.take_reader().unwrap();
        h.script
            .updates
            .unbounded_send(Ok(ProviderUpdate::InputSpeechStarted {
                item_id: None,
                audio_start_ms: 0,
            }))
            .unwrap();
        assert!(matches!(
            next_event(&mut events).await.kind(),
            EventKind::ParticipantStartedSpeaking { role: ConversationRole::User }
        ));

        h.cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(2), h.running).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert_eq!(recorded(&mut h.script).await, Recorded::Close);
        assert!(h.script.recorded.try_recv().is_err());
    }

    #[tokio::test]
    async fn updates_become_events_in_order() {
        let h = start();
        let mut events = h.events.take_reader().unwrap();
        for update in [
            delta(Some(vec![1, 2]), Some("Hel"), None),
            delta(None, None, Some(r#"{"room"#)),
            ProviderUpdate::InputSpeechStarted {
                item_id: None,
                audio_start_ms: 40,
            },
            ProviderUpdate::InputTranscriptionFinished {
                item_id: None,
                content_index: 0,
                transcript: "book a room".to_string(),
            },
            ProviderUpdate::OutputTranscriptionFinished {
                item_id: None,
                output_index: 1,
                content_index: 0,
                transcript: "Hello".to_string(),
            },
            ProviderUpdate::Other {
                kind: "rate_limits.updated".to_string(),
            },
        ] {
            h.script.updates.unbounded_send(Ok(update)).unwrap();
        }

        let first = next_event(&mut events).await;
        assert!(matches!(
            first.kind(),
            EventKind::AudioDelta { audio: Some(audio), role: ConversationRole::Assistant, transcript: Some(t) }
                if audio == &vec![1, 2] && t == "Hel"
        ));
        assert_eq!(first.author_id(), "ai-1");
        assert!(matches!(
            next_event(&mut events).await.kind(),
            EventKind::ParticipantStartedSpeaking { role: ConversationRole::User }
        ));
        assert!(matches!(
            next_event(&mut events).await.kind(),
            EventKind::TranscriptFinished { role: ConversationRole::User, transcript } if transcript == "book a room"
        ));
        let last = next_event(&mut events).await;
        assert!(matches!(
            last.kind(),
            EventKind::TranscriptFinished { role: ConversationRole::Assistant, .. }
        ));
        assert_eq!(last.output_index(), 1);

        h.cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(2), h.running).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn function_call_round_trip() {
        let mut h = start();
        let item = FinishedItem {
            item_id: Some("item_9".to_string()),
            function_name: Some("GetRoomCapacity".to_string()),
            call_id: Some("call_9".to_string()),
            arguments: Some(r#"{"roomType":"NorthAtlantisLawn"}"#.to_string()),
        };
        h.script
            .updates
            .unbounded_send(Ok(ProviderUpdate::ItemFinished {
                output_index: 0,
                item: item.clone(),
            }))
            .unwrap();
        h.script
            .updates
            .unbounded_send(Ok(ProviderUpdate::ResponseFinished {
                response_id: Some("resp_1".to_string()),
                items: vec![item],
                usage: None,
            }))
            .unwrap();

        assert_eq!(
            recorded(&mut h.script).await,
            Recorded::Item(ConversationItem::FunctionOutput {
                call_id: "call_9".to_string(),
                output: "450".to_string(),
            })
        );
        assert_eq!(recorded(&mut h.script).await, Recorded::StartResponse);
        h.cancel.cancel();
        let _ = h.running.await;
    }

    #[tokio::test]
    async fn input_audio_and_items_reach_the_session() {
        let mut h = start();
        h.orchestrator.send_input_audio(vec![7u8; 3]).unwrap();
        h.orchestrator.send_input_audio(Vec::new()).unwrap();
        h.orchestrator
            .add_item(ConversationItem::Message {
                role: ConversationRole::System,
                content: vec!["Be brief.".to_string()],
            })
            .unwrap();

        assert_eq!(recorded(&mut h.script).await, Recorded::Audio(vec![7, 7, 7]));
        assert!(matches!(recorded(&mut h.script).await, Recorded::Item(ConversationItem::Message { .. })));

        let pool = BufferPool::new(4, 2);
        let data: &[u8] = &[5; 10];
        let queued = h
            .orchestrator
            .stream_input_audio(data, &pool, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(queued, 10);
        let mut received = Vec::new();
        while received.len() < 10 {
            match recorded(&mut h.script).await {
                Recorded::Audio(chunk) => received.extend(chunk),
                other => panic!("unexpected command: {other:?}"),
            }
        }
        assert_eq!(received, vec![5; 10]);
        assert_eq!(pool.idle(), 1);

        h.orchestrator.dispose();
        assert!(matches!(h.orchestrator.send_input_audio(vec![1]), Err(Error::QueueClosed)));
        let result = tokio::time::timeout(Duration::from_secs(2), h.running).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn provider_fault_ends_run_with_error_and_observers_see_updates() {
        let h = start();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        h.orchestrator.handlers().on(UpdateKind::Other, move |_update| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        h.script
            .updates
            .unbounded_send(Ok(ProviderUpdate::Other {
                kind: "rate_limits.updated".to_string(),
            }))
            .unwrap();
        h.script
            .updates
            .unbounded_send(Err(Error::ConnectionClosed))
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), h.running).await.unwrap().unwrap();
        assert!(matches!(result, Err(Error::Provider(_))));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
