/// Shared wire types for the chat service
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Label used for conversations touched locally before the server reports a time
pub const JUST_NOW: &str = "Just now";

/// Display name used when sending to a peer we know nothing about
pub const UNKNOWN_PEER_NAME: &str = "Unknown";

/// Explicit `null` decodes like a missing key
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// The signed-in user. Set once at login and never changed for the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    pub display_name: String,
    pub avatar: String,
}

impl UserIdentity {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, avatar: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            avatar: avatar.into(),
        }
    }
}

/// Summary of one conversation thread (one entry per peer)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// The other party's unique id
    #[serde(rename = "uuid")]
    pub peer_id: String,
    #[serde(rename = "cnName", default, deserialize_with = "null_as_default")]
    pub display_name: String,
    #[serde(rename = "avatarUrl", default, deserialize_with = "null_as_default")]
    pub avatar: String,
    /// Last activity, either a server timestamp or a relative label
    #[serde(rename = "time", default, deserialize_with = "null_as_default")]
    pub last_activity: String,
    /// Preview text of the last message, null for a brand-new conversation
    #[serde(rename = "lastMessage", default, deserialize_with = "null_as_default")]
    pub last_message: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub unread: u32,
}

impl ConversationSummary {
    /// Locally synthesized summary for a peer the server has not listed yet
    pub fn placeholder(peer_id: impl Into<String>, display_name: impl Into<String>, avatar: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            display_name: display_name.into(),
            avatar: avatar.into(),
            last_activity: JUST_NOW.to_string(),
            last_message: String::new(),
            unread: 0,
        }
    }
}

/// Delivery status as reported by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
        };
        f.write_str(s)
    }
}

/// A single private message. Only ever created from inbound events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    pub status: MessageStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub create_time: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub update_time: String,
}

impl Message {
    /// Whether this message belongs to the conversation with `peer_id`
    pub fn involves(&self, peer_id: &str) -> bool {
        self.sender_id == peer_id || self.recipient_id == peer_id
    }
}

/// Payload of the `messageHistory` push
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPayload {
    #[serde(default, deserialize_with = "null_as_default")]
    pub with_user: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub messages: Vec<Message>,
}

/// One hit from the fuzzy user search endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(rename = "uuid")]
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(rename = "cnName", default)]
    pub display_name: String,
    #[serde(rename = "avatarUrl", default)]
    pub avatar: String,
}

/// Acknowledgement returned by the service for `privateMessage`.
/// Only `success` is read; the echoed copy is kept raw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendAck {
    #[serde(default, deserialize_with = "null_as_default")]
    pub success: bool,
    #[serde(default)]
    pub message: Option<Value>,
}

/// Outbound `getHistory` body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRequest<'a> {
    pub other_user_id: &'a str,
}

/// Outbound `privateMessage` body
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage<'a> {
    pub recipient_id: &'a str,
    pub content: &'a str,
}

/// Inbound event names pushed by the service
pub mod inbound {
    pub const CONNECT: &str = "connect";
    pub const DISCONNECT: &str = "disconnect";
    pub const CONVERSATION_LIST: &str = "conversationList";
    pub const MESSAGE_HISTORY: &str = "messageHistory";
    pub const PRIVATE_MESSAGE: &str = "privateMessage";
    pub const UPDATE_CONVERSATIONS: &str = "updateConversations";
}

/// Outbound event names understood by the service
pub mod outbound {
    pub const REGISTER: &str = "register";
    pub const GET_CONVERSATIONS: &str = "getConversations";
    pub const GET_HISTORY: &str = "getHistory";
    pub const PRIVATE_MESSAGE: &str = "privateMessage";
}
