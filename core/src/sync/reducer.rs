/// Reducers: every mutation of conversation/history state goes through here,
/// one step at a time, in arrival order.
use crate::chat_types::{inbound, ConversationSummary, HistoryPayload, Message, MessageStatus};
use crate::conversation_store::ConversationStore;
use crate::error::{Result, SyncError};
use crate::message_store::MessageHistory;
use serde_json::Value;
use tracing::{debug, warn};

/// Typed inbound push from the service
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    ConversationList(Vec<ConversationSummary>),
    MessageHistory(HistoryPayload),
    PrivateMessage(Message),
    UpdateConversations,
}

impl ServerEvent {
    /// Names of the events the engine subscribes to
    pub const NAMES: [&'static str; 4] = [
        inbound::CONVERSATION_LIST,
        inbound::MESSAGE_HISTORY,
        inbound::PRIVATE_MESSAGE,
        inbound::UPDATE_CONVERSATIONS,
    ];

    /// Decode a named payload. `Ok(None)` for names this engine does not handle.
    pub fn decode(name: &str, payload: &Value) -> Result<Option<Self>> {
        let event = match name {
            inbound::CONVERSATION_LIST => ServerEvent::ConversationList(decode_summaries(payload)?),
            inbound::MESSAGE_HISTORY => ServerEvent::MessageHistory(serde_json::from_value(payload.clone())?),
            inbound::PRIVATE_MESSAGE => ServerEvent::PrivateMessage(serde_json::from_value(payload.clone())?),
            inbound::UPDATE_CONVERSATIONS => ServerEvent::UpdateConversations,
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

/// Decode a full list entry by entry. A bad entry is skipped, never the whole list.
fn decode_summaries(payload: &Value) -> Result<Vec<ConversationSummary>> {
    let items = match payload {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        other => {
            return Err(SyncError::Protocol(format!(
                "conversationList is not an array: {}",
                other
            )))
        }
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<ConversationSummary>(item.clone()) {
            Ok(summary) => out.push(summary),
            Err(e) => warn!("Skipping malformed conversation summary: {}", e),
        }
    }
    Ok(out)
}

/// What a step touched, so the caller knows what to publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Changes {
    pub conversations: bool,
    pub history: bool,
    /// The conversation list must be fetched again
    pub refresh: bool,
}

impl Changes {
    pub fn none() -> Self {
        Self::default()
    }
}

/// Conversation and history state owned by the engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncState {
    pub conversations: ConversationStore,
    pub history: MessageHistory,
    pub active_peer: Option<String>,
}

impl SyncState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total_unread(&self) -> u32 {
        self.conversations.total_unread()
    }

    /// Apply one inbound push. `self_id` is the local user.
    pub fn apply(&mut self, self_id: &str, event: ServerEvent) -> Changes {
        match event {
            ServerEvent::ConversationList(list) => {
                debug!("conversationList with {} entries", list.len());
                self.conversations.replace_all(list);
                Changes {
                    conversations: true,
                    ..Changes::none()
                }
            }
            ServerEvent::MessageHistory(payload) => {
                let mut changes = Changes::none();
                if !payload.with_user.is_empty() {
                    changes.conversations = self.conversations.set_unread(&payload.with_user, 0);
                }
                if self.active_peer.as_deref() == Some(payload.with_user.as_str()) {
                    self.history.replace(payload.messages);
                    changes.history = true;
                } else {
                    debug!(
                        "History for {} discarded, active peer is {:?}",
                        payload.with_user, self.active_peer
                    );
                }
                changes
            }
            ServerEvent::PrivateMessage(message) => {
                let mut changes = Changes::none();
                let counts_as_unread =
                    message.recipient_id == self_id && message.status == MessageStatus::Delivered;
                let sender = message.sender_id.clone();

                if let Some(active) = self.active_peer.as_deref() {
                    if message.involves(active) {
                        self.history.push(message);
                        changes.history = true;
                    }
                }

                if counts_as_unread {
                    changes.conversations = self.conversations.increment_unread(&sender);
                    if !changes.conversations {
                        debug!("Unread for unlisted sender {} not tracked", sender);
                    }
                }
                changes
            }
            ServerEvent::UpdateConversations => Changes {
                refresh: true,
                ..Changes::none()
            },
        }
    }

    /// Make `peer_id` the open conversation and mark it read locally
    pub fn open(&mut self, peer_id: &str) -> Changes {
        let switched = self.set_active(Some(peer_id));
        let had_unread = self.conversations.unread(peer_id) > 0;
        self.conversations.set_unread(peer_id, 0);
        Changes {
            conversations: had_unread,
            history: switched,
            refresh: false,
        }
    }

    /// Make `summary.peer_id` active, adding the summary if the peer is new
    pub fn start_new(&mut self, summary: ConversationSummary) -> Changes {
        let switched = self.set_active(Some(&summary.peer_id));
        let added = self.conversations.insert_if_absent(summary);
        Changes {
            conversations: added,
            history: switched,
            refresh: false,
        }
    }

    /// A send was acknowledged: update the summary only, never the history
    pub fn record_sent<F>(&mut self, peer_id: &str, content: &str, fallback: F) -> Changes
    where
        F: FnOnce() -> ConversationSummary,
    {
        self.conversations.record_sent(peer_id, content, fallback);
        Changes {
            conversations: true,
            ..Changes::none()
        }
    }

    /// Returns true when the active peer actually changed
    fn set_active(&mut self, peer_id: Option<&str>) -> bool {
        if self.active_peer.as_deref() == peer_id {
            return false;
        }
        self.active_peer = peer_id.map(str::to_string);
        self.history.switch_to(peer_id);
        true
    }
}
