//! OpenAI Realtime wire types used by the provider session.

pub mod client_events;
pub mod models;
pub mod server_events;
