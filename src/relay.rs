//! One call: a transport participant wired to an AI participant.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::events::{Event, EventKind};
use crate::participant::{Participant, QueueReader};
use crate::store::ConversationStore;

pub struct Relay {
    conversation_id: String,
    transport: Arc<dyn Participant>,
    ai: Arc<dyn Participant>,
    store: Option<Arc<dyn ConversationStore>>,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("conversation_id", &self.conversation_id)
            .field("transport", &self.transport.id())
            .field("ai", &self.ai.id())
            .field("has_store", &self.store.is_some())
            .finish()
    }
}

impl Relay {
    #[must_use]
    pub fn new(
        conversation_id: impl Into<String>,
        transport: Arc<dyn Participant>,
        ai: Arc<dyn Participant>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            transport,
            ai,
            store: None,
        }
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.store = Some(store);
        self
    }

    #[must_use]
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Run the call until either participant stops or `cancel` fires.
    /// Stopping one participant tears the other down.
    ///
    /// # Errors
    /// The first participant error, in order of occurrence.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let (Some(from_transport), Some(from_ai)) =
            (self.transport.outbound().take_reader(), self.ai.outbound().take_reader())
        else {
            return Err(Error::AlreadyStarted(self.conversation_id.clone()));
        };
        tracing::info!(conversation_id = %self.conversation_id, "Relay started");

        let scope = cancel.child_token();
        let first_error = Mutex::new(None);
        tokio::join!(
            self.run_participant(self.transport.as_ref(), &scope, &first_error),
            self.run_participant(self.ai.as_ref(), &scope, &first_error),
            self.forward(from_transport, self.ai.as_ref()),
            self.forward(from_ai, self.transport.as_ref()),
        );

        tracing::info!(conversation_id = %self.conversation_id, "Relay finished");
        first_error.lock().take().map_or(Ok(()), Err)
    }

    async fn run_participant(
        &self,
        participant: &dyn Participant,
        scope: &CancellationToken,
        first_error: &Mutex<Option<Error>>,
    ) {
        let result = participant.start(scope.clone()).await;
        scope.cancel();
        if let Err(err) = result {
            tracing::error!(
                conversation_id = %self.conversation_id,
                participant_id = %participant.id(),
                "Participant failed: {err}"
            );
            first_error.lock().get_or_insert(err);
        }
    }

    /// Drain one participant's outbound queue into the other's inbound queue
    /// until the source completes.
    async fn forward(&self, mut from: QueueReader<Event>, to: &dyn Participant) {
        while let Some(event) = from.recv().await {
            self.record(&event).await;
            if event.is_empty() {
                continue;
            }
            if let Err(err) = to.inbound().send(event) {
                tracing::debug!(
                    conversation_id = %self.conversation_id,
                    participant_id = %to.id(),
                    "Dropping event for stopped participant: {err}"
                );
            }
        }
    }

    async fn record(&self, event: &Event) {
        let Some(store) = &self.store else {
            return;
        };
        if !matches!(event.kind(), EventKind::TranscriptFinished { .. }) || event.is_empty() {
            return;
        }
        if let Err(err) = store.append(&self.conversation_id, event.clone()).await {
            tracing::warn!(conversation_id = %self.conversation_id, "Failed to store transcript: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ConversationRole;
    use crate::participant::{EventQueue, ParticipantCore, ParticipantState};
    use crate::store::InMemoryConversationStore;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Echo-free participant: emits a script, records what it receives.
    struct Scripted {
        core: ParticipantCore,
        script: Vec<Event>,
        received: Mutex<Vec<Event>>,
        stop_after_script: bool,
    }

    impl Scripted {
        fn new(id: &str, script: Vec<Event>, stop_after_script: bool) -> Arc<Self> {
            Arc::new(Self {
                core: ParticipantCore::new(id, id),
                script,
                received: Mutex::new(Vec::new()),
                stop_after_script,
            })
        }
    }

    #[async_trait]
    impl Participant for Scripted {
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
            let mut inbound = self.core.inbound().take_reader().ok_or(Error::QueueClosed)?;
            let scope = self.core.scope().clone();
            let ingress = async {
                for event in &self.script {
                    self.core.outbound().send(event.clone())?;
                }
                if self.stop_after_script {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    scope.cancel();
                }
                Ok::<(), Error>(())
            };
            let egress = async {
                loop {
                    tokio::select! {
                        () = scope.cancelled() => return Err(Error::Cancelled),
                        event = inbound.recv() => match event {
                            Some(event) => self.received.lock().push(event),
                            None => return Ok(()),
                        },
                    }
                }
            };
            self.core.supervise(&cancel, ingress, egress).await
        }

        fn stop(&self) {
            self.core.stop();
        }
    }

    #[tokio::test]
    async fn forwards_both_ways_and_stores_transcripts() {
        let caller = Scripted::new(
            "caller",
            vec![
                Event::audio_delta(Some(vec![1]), ConversationRole::User, None),
                Event::audio_delta(None, ConversationRole::User, None),
            ],
            false,
        );
        let ai = Scripted::new(
            "ai",
            vec![
                Event::transcript_finished("book a room", ConversationRole::User),
                Event::participant_started_speaking(ConversationRole::User),
                Event::transcript_finished("  ", ConversationRole::Assistant),
                Event::transcript_finished("Done.", ConversationRole::Assistant),
            ],
            true,
        );
        let store = Arc::new(InMemoryConversationStore::new());
        let relay = Relay::new("call-7", caller.clone(), ai.clone()).with_store(store.clone());

        let result = tokio::time::timeout(Duration::from_secs(2), relay.run(CancellationToken::new()))
            .await
            .unwrap();
        assert!(result.is_ok());

        let to_ai = ai.received.lock().clone();
        assert_eq!(to_ai.len(), 1);
        assert!(!to_ai[0].is_audio_empty());

        let to_caller = caller.received.lock();
        assert!(to_caller.iter().any(|e| matches!(e.kind(), EventKind::ParticipantStartedSpeaking { .. })));

        let history = store.history("call-7").await.unwrap();
        let texts: Vec<_> = history
            .iter()
            .filter_map(|e| match e.kind() {
                EventKind::TranscriptFinished { transcript, .. } => Some(transcript.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["book a room", "Done."]);
        assert_eq!(caller.state(), ParticipantState::Stopped);
    }

    #[tokio::test]
    async fn cancellation_stops_both_participants() {
        let caller = Scripted::new("caller", Vec::new(), false);
        let ai = Scripted::new("ai", Vec::new(), false);
        let relay = Relay::new("call-8", caller.clone(), ai.clone());
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(2), relay.run(cancel))
            .await
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(ai.state(), ParticipantState::Stopped);
        assert_eq!(caller.state(), ParticipantState::Stopped);
    }
}
