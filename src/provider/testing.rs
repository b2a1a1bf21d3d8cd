//! In-process session doubles for unit tests.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc as fmpsc;
use tokio::sync::mpsc;

use super::{ConversationItem, ProviderSession, ProviderUpdate, SessionCommands};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Audio(Vec<u8>),
    Item(ConversationItem),
    StartResponse,
    Close,
}

/// Records every command it receives, in order.
#[derive(Debug)]
pub struct RecordingCommands {
    tx: mpsc::UnboundedSender<Recorded>,
}

impl RecordingCommands {
    fn record(&self, command: Recorded) -> Result<()> {
        self.tx.send(command).map_err(|_| Error::ConnectionClosed)
    }
}

#[async_trait]
impl SessionCommands for RecordingCommands {
    async fn send_audio(&self, audio: &[u8]) -> Result<()> {
        self.record(Recorded::Audio(audio.to_vec()))
    }

    async fn add_item(&self, item: ConversationItem) -> Result<()> {
        self.record(Recorded::Item(item))
    }

    async fn start_response(&self) -> Result<()> {
        self.record(Recorded::StartResponse)
    }

    async fn close(&self) -> Result<()> {
        self.record(Recorded::Close)
    }
}

pub fn recording_commands() -> (Arc<RecordingCommands>, mpsc::UnboundedReceiver<Recorded>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(RecordingCommands { tx }), rx)
}

/// Session whose updates are pushed by the test.
pub struct ScriptedSession {
    pub updates: fmpsc::UnboundedSender<Result<ProviderUpdate>>,
    pub recorded: mpsc::UnboundedReceiver<Recorded>,
}

pub fn scripted_session() -> (ProviderSession, ScriptedSession) {
    let (commands, recorded) = recording_commands();
    let (updates_tx, updates_rx) = fmpsc::unbounded();
    let session = ProviderSession {
        commands,
        updates: updates_rx.boxed(),
    };
    (
        session,
        ScriptedSession {
            updates: updates_tx,
            recorded,
        },
    )
}
