//! Marketchat relay server library.
//!
//! Exposes the relay server for use in tests and embedding. The relay
//! accepts authenticated WebSocket connections, persists each chat message
//! to the conversation store, and pushes it best-effort to the two
//! participants of the conversation.

pub mod config;
pub mod history;
pub mod registry;
pub mod relay;
pub mod store;
