//! Client-side state synchronisation: reducers plus the engine that drives them
pub mod engine;
pub mod reducer;

pub use engine::{EngineCommand, EngineEvent, EngineSnapshot, PeerInfo, SyncEngine};
pub use reducer::{Changes, ServerEvent, SyncState};
