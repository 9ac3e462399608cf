/// Transport binding: one persistent bidirectional event channel
pub mod loopback;
pub mod packet;
pub mod socketio;

pub use loopback::{LoopbackHandle, LoopbackTransport, Outbound};
pub use packet::{EnginePacket, OpenInfo, SocketPacket};
pub use socketio::{ReconnectPolicy, SocketIoTransport};

use crate::error::Result;
use serde_json::Value;
use std::fmt;

/// Identifier tying an acknowledgement reply to the emit that asked for it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AckId(pub u64);

impl fmt::Display for AckId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything the transport hands back to the client, in delivery order
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// An (re)connection attempt started
    Connecting { attempt: u32 },
    /// Channel is open and the namespace handshake completed
    Connected,
    /// Channel dropped or was closed
    Disconnected { reason: String },
    /// Named event pushed by the service
    Event { name: String, payload: Value },
    /// Reply to an emit that carried an ack id
    Ack { id: AckId, payload: Value },
}

/// Low-level channel. Emits are fire-and-forget; everything inbound arrives
/// through the `Inbound` channel supplied at construction.
pub trait Transport: Send {
    /// Start opening the channel. Completion is reported as `Inbound::Connected`.
    fn open(&mut self) -> Result<()>;

    /// Close the channel and stop any reconnection.
    fn close(&mut self);

    /// Emit an event without expecting a reply.
    fn emit(&mut self, event: &str, payload: Value) -> Result<()>;

    /// Emit an event whose reply will come back as `Inbound::Ack { id }`.
    fn emit_with_ack(&mut self, event: &str, payload: Value, id: AckId) -> Result<()>;
}
