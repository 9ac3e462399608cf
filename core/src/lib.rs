/// chatsync - client-side chat synchronisation engine
///
/// Keeps a local conversation list, unread counters and the open conversation's
/// history consistent with a real-time chat service over a Socket.IO channel.

pub mod error;
pub mod config;
pub mod chat_types;
pub mod transport;
pub mod connection;
pub mod conversation_store;
pub mod message_store;
pub mod sync;
pub mod search;
pub mod notify;
pub mod cli_app;

pub use error::{Result, SyncError};
pub use config::Config;
pub use connection::{ConnectionManager, ConnectionState};
pub use sync::{EngineEvent, SyncEngine};
