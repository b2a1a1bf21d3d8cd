#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

pub mod audio;
pub mod config;
pub mod demo;
pub mod error;
pub mod events;
pub mod media;
pub mod orchestrator;
pub mod participant;
pub mod protocol;
pub mod provider;
pub mod relay;
pub mod server;
pub mod store;
pub mod tools;
pub mod transport;

pub use config::{RelayConfig, RelayConfigBuilder};
pub use error::{Error, Result};
pub use events::{ConversationRole, Event, EventKind};
pub use media::{AudioData, MediaFrame};
pub use orchestrator::{SessionOrchestrator, UpdateHandlers};
pub use participant::{AiParticipant, EventQueue, MediaParticipant, Participant, ParticipantState};
pub use provider::{OpenAiRealtime, ProviderSession, ProviderUpdate, RealtimeProvider, SessionOptions};
pub use relay::Relay;
pub use server::RelayServer;
pub use store::{ConversationStore, InMemoryConversationStore};
pub use tools::{ToolBridge, ToolContext, ToolError, ToolRegistry, ToolResult};
