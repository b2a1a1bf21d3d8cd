pub mod audio;
pub mod common;
pub mod items;
pub mod response;
pub mod session;
pub mod tools;

pub use audio::{
    AudioConfig, AudioFormat, InputAudioConfig, InputAudioTranscription, OutputAudioConfig,
    TurnDetection,
};
pub use common::{ArbitraryJson, DEFAULT_MODEL, Eagerness, ItemStatus, JsonSchema, Nullable, Role, Voice};
pub use items::{ContentPart, Item};
pub use response::{Response, ResponseStatus};
pub use session::{Session, SessionKind, SessionUpdate};
pub use tools::Tool;
