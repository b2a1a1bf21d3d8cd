//! Participant speaking for the AI side of the call.
//!
//! Ingress is the orchestrator's provider session; egress forwards caller
//! audio and conversation messages into it.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{EventQueue, Participant, ParticipantCore, ParticipantState, QueueReader};
use crate::error::{Error, Result};
use crate::events::{Event, EventKind};
use crate::orchestrator::SessionOrchestrator;
use crate::provider::{ConversationItem, RealtimeProvider, SessionOptions};
use crate::tools::ToolBridge;

#[derive(Debug)]
pub struct AiParticipant {
    core: ParticipantCore,
    orchestrator: SessionOrchestrator,
}

impl AiParticipant {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        provider: Arc<dyn RealtimeProvider>,
        options: SessionOptions,
        bridge: Arc<ToolBridge>,
    ) -> Self {
        let core = ParticipantCore::new(id, name);
        let orchestrator = SessionOrchestrator::new(provider, options, bridge)
            .with_author(core.id(), Some(core.name().to_string()));
        Self { core, orchestrator }
    }

    /// The session orchestrator, e.g. to register update observers.
    #[must_use]
    pub const fn orchestrator(&self) -> &SessionOrchestrator {
        &self.orchestrator
    }

    async fn forward_inbound(&self, mut inbound: QueueReader<Event>, scope: &CancellationToken) -> Result<()> {
        loop {
            let event = tokio::select! {
                biased;
                () = scope.cancelled() => return Err(Error::Cancelled),
                event = inbound.recv() => event,
            };
            let Some(event) = event else {
                return Ok(());
            };
            match event.into_kind() {
                EventKind::AudioDelta { audio: Some(audio), .. } => {
                    self.orchestrator.send_input_audio(audio)?;
                }
                EventKind::Message { content, role } if !content.is_empty() => {
                    self.orchestrator.add_item(ConversationItem::Message { role, content })?;
                }
                other => {
                    tracing::trace!(participant_id = %self.core.id(), kind = other.name(), "Not forwarded to provider");
                }
            }
        }
    }
}

#[async_trait]
impl Participant for AiParticipant {
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
        let Some(inbound) = self.core.inbound().take_reader() else {
            return Err(Error::AlreadyStarted(self.core.id().to_string()));
        };
        let scope = self.core.scope();
        let result = self
            .core
            .supervise(
                &cancel,
                self.orchestrator.run(scope, self.core.outbound()),
                self.forward_inbound(inbound, scope),
            )
            .await;
        self.orchestrator.dispose();
        result
    }

    fn stop(&self) {
        self.core.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ConversationRole;
    use crate::provider::testing::{Recorded, ScriptedSession, scripted_session};
    use crate::provider::{ProviderMetadata, ProviderSession, ProviderUpdate};
    use crate::tools::ToolRegistry;
    use std::time::Duration;

    struct OneSession(parking_lot::Mutex<Option<ProviderSession>>);

    #[async_trait]
    impl RealtimeProvider for OneSession {
        fn metadata(&self) -> ProviderMetadata {
            ProviderMetadata {
                provider: "scripted".to_string(),
                endpoint: "memory://".to_string(),
                model: "test-model".to_string(),
            }
        }

        async fn start_session(&self, _options: &SessionOptions) -> Result<ProviderSession> {
            self.0.lock().take().ok_or(Error::ConnectionClosed)
        }
    }

    fn participant() -> (Arc<AiParticipant>, ScriptedSession) {
        let (session, script) = scripted_session();
        let provider = Arc::new(OneSession(parking_lot::Mutex::new(Some(session))));
        let bridge = Arc::new(ToolBridge::new(Arc::new(ToolRegistry::new())));
        let participant = AiParticipant::new("ai-1", "Assistant", provider, SessionOptions::new("test-model"), bridge);
        (Arc::new(participant), script)
    }

    async fn recorded(script: &mut ScriptedSession) -> Recorded {
        tokio::time::timeout(Duration::from_secs(2), script.recorded.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn inbound_audio_and_messages_reach_the_session() {
        let (participant, mut script) = participant();
        let cancel = CancellationToken::new();
        let running = tokio::spawn({
            let participant = Arc::clone(&participant);
            let cancel = cancel.clone();
            async move { participant.start(cancel).await }
        });

        participant
            .inbound()
            .send(Event::audio_delta(Some(vec![4, 5]), ConversationRole::User, None))
            .unwrap();
        participant
            .inbound()
            .send(Event::message(vec!["Hi there".to_string()], ConversationRole::Assistant))
            .unwrap();

        assert_eq!(recorded(&mut script).await, Recorded::Audio(vec![4, 5]));
        assert_eq!(
            recorded(&mut script).await,
            Recorded::Item(ConversationItem::Message {
                role: ConversationRole::Assistant,
                content: vec!["Hi there".to_string()],
            })
        );

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(2), running).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert!(matches!(
            participant.orchestrator().send_input_audio(vec![1]),
            Err(Error::QueueClosed)
        ));
    }

    #[tokio::test]
    async fn barge_in_is_emitted_and_queue_completes_on_stop() {
        let (participant, script) = participant();
        let mut outbound = participant.outbound().take_reader().unwrap();
        let running = tokio::spawn({
            let participant = Arc::clone(&participant);
            async move { participant.start(CancellationToken::new()).await }
        });

        script
            .updates
            .unbounded_send(Ok(ProviderUpdate::InputSpeechStarted {
                item_id: None,
                audio_start_ms: 120,
            }))
            .unwrap();
        let event = tokio::time::timeout(Duration::from_secs(2), outbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            event.kind(),
            EventKind::ParticipantStartedSpeaking { role: ConversationRole::User }
        ));
        assert_eq!(event.author_id(), "ai-1");

        participant.stop();
        let result = tokio::time::timeout(Duration::from_secs(2), running).await.unwrap().unwrap();
        assert!(result.is_ok());
        assert!(outbound.recv().await.is_none());
        assert_eq!(participant.state(), ParticipantState::Stopped);
    }
}
