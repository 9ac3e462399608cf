/// Engine.IO v4 / Socket.IO v5 text packet codec
///
/// A websocket text frame carries one Engine.IO packet: a single type digit
/// followed by its data. Engine.IO `message` packets carry a Socket.IO packet,
/// itself a type digit, an optional namespace, an optional ack id and a JSON
/// array of arguments, e.g. `42["privateMessage",{...}]` or `431[{...}]`.
use crate::error::{Result, SyncError};
use crate::transport::AckId;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Handshake data sent by the server in the Engine.IO `open` packet
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
}

fn default_ping_interval() -> u64 {
    25_000
}

fn default_ping_timeout() -> u64 {
    20_000
}

impl OpenInfo {
    /// How long the connection may stay silent before it is considered dead
    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.ping_interval + self.ping_timeout)
    }
}

/// Engine.IO transport-level packet
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenInfo),
    Close,
    Ping,
    Pong,
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(text: &str) -> Result<Self> {
        let mut chars = text.chars();
        let kind = chars
            .next()
            .ok_or_else(|| SyncError::Protocol("empty engine packet".to_string()))?;
        let data = chars.as_str();
        match kind {
            '0' => Ok(EnginePacket::Open(serde_json::from_str(data)?)),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping),
            '3' => Ok(EnginePacket::Pong),
            '4' => Ok(EnginePacket::Message(data.to_string())),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            other => Err(SyncError::Protocol(format!("unknown engine packet type '{}'", other))),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            // Clients never send `open`; kept for completeness of the type
            EnginePacket::Open(info) => format!("0{{\"sid\":\"{}\"}}", info.sid),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping => "2".to_string(),
            EnginePacket::Pong => "3".to_string(),
            EnginePacket::Message(data) => format!("4{}", data),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
}

/// Socket.IO packet on the default namespace
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect(Option<Value>),
    Disconnect,
    Event {
        name: String,
        args: Vec<Value>,
        ack: Option<AckId>,
    },
    Ack {
        id: AckId,
        args: Vec<Value>,
    },
    ConnectError(Value),
}

impl SocketPacket {
    /// Build an event packet whose single argument is `payload`
    pub fn event(name: &str, payload: Value, ack: Option<AckId>) -> Self {
        SocketPacket::Event {
            name: name.to_string(),
            args: vec![payload],
            ack,
        }
    }

    /// Encode as the data of an Engine.IO message packet (without the leading `4`)
    pub fn encode(&self) -> Result<String> {
        let out = match self {
            SocketPacket::Connect(None) => "0".to_string(),
            SocketPacket::Connect(Some(auth)) => format!("0{}", serde_json::to_string(auth)?),
            SocketPacket::Disconnect => "1".to_string(),
            SocketPacket::Event { name, args, ack } => {
                let mut array = Vec::with_capacity(args.len() + 1);
                array.push(Value::String(name.clone()));
                array.extend(args.iter().cloned());
                let body = serde_json::to_string(&array)?;
                match ack {
                    Some(id) => format!("2{}{}", id, body),
                    None => format!("2{}", body),
                }
            }
            SocketPacket::Ack { id, args } => format!("3{}{}", id, serde_json::to_string(args)?),
            SocketPacket::ConnectError(data) => format!("4{}", serde_json::to_string(data)?),
        };
        Ok(out)
    }

    pub fn decode(data: &str) -> Result<Self> {
        let mut chars = data.chars();
        let kind = chars
            .next()
            .ok_or_else(|| SyncError::Protocol("empty socket packet".to_string()))?;
        let mut rest = chars.as_str();

        // Namespaced packets look like `2/chat,["evt"]`; only the default one is used
        if rest.starts_with('/') {
            rest = match rest.find(',') {
                Some(idx) => &rest[idx + 1..],
                None => "",
            };
        }

        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        let ack = if digits > 0 {
            let id = rest[..digits]
                .parse::<u64>()
                .map_err(|e| SyncError::Protocol(format!("bad ack id: {}", e)))?;
            Some(AckId(id))
        } else {
            None
        };
        let body = &rest[digits..];

        match kind {
            '0' => {
                if body.is_empty() {
                    Ok(SocketPacket::Connect(None))
                } else {
                    Ok(SocketPacket::Connect(Some(serde_json::from_str(body)?)))
                }
            }
            '1' => Ok(SocketPacket::Disconnect),
            '2' => {
                let mut array: Vec<Value> = serde_json::from_str(body)?;
                if array.is_empty() {
                    return Err(SyncError::Protocol("event packet without a name".to_string()));
                }
                let name = match array.remove(0) {
                    Value::String(name) => name,
                    other => {
                        return Err(SyncError::Protocol(format!("event name is not a string: {}", other)));
                    }
                };
                Ok(SocketPacket::Event { name, args: array, ack })
            }
            '3' => {
                let id = ack.ok_or_else(|| SyncError::Protocol("ack packet without an id".to_string()))?;
                let args: Vec<Value> = if body.is_empty() {
                    Vec::new()
                } else {
                    serde_json::from_str(body)?
                };
                Ok(SocketPacket::Ack { id, args })
            }
            '4' => {
                let data = if body.is_empty() {
                    Value::Null
                } else {
                    serde_json::from_str(body)?
                };
                Ok(SocketPacket::ConnectError(data))
            }
            '5' | '6' => Err(SyncError::Protocol("binary packets are not supported".to_string())),
            other => Err(SyncError::Protocol(format!("unknown socket packet type '{}'", other))),
        }
    }
}

/// First argument of an event or ack, `Null` when there is none
pub fn first_arg(args: Vec<Value>) -> Value {
    args.into_iter().next().unwrap_or(Value::Null)
}
