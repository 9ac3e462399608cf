/// Engine integration tests
/// Drive the sync engine end to end over the in-memory transport

extern crate chatsync_core;

use chatsync_core::chat_types::{inbound, outbound, SearchResult, UserIdentity, JUST_NOW};
use chatsync_core::notify::NotificationSink;
use chatsync_core::search::UserSearch;
use chatsync_core::sync::{EngineEvent, SyncEngine};
use chatsync_core::transport::{Inbound, LoopbackHandle, LoopbackTransport};
use chatsync_core::{Config, ConnectionState, SyncError};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

const ME: &str = "me";

struct Harness {
    engine: SyncEngine<LoopbackTransport>,
    wire: LoopbackHandle,
    events: broadcast::Receiver<EngineEvent>,
}

impl Harness {
    fn new() -> Self {
        Self::with_notifier(Box::new(RecordingNotifier::default()))
    }

    fn with_notifier(notifier: Box<dyn NotificationSink>) -> Self {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let (transport, wire) = LoopbackTransport::new(tx);
        let engine = SyncEngine::new(UserIdentity::new(ME, "Me", "me.png"), transport, &Config::default())
            .with_notifier(notifier);
        let events = engine.subscribe();
        Self { engine, wire, events }
    }

    /// Started and connected, with the handshake traffic cleared
    fn connected() -> Self {
        let mut h = Self::new();
        h.engine.start().unwrap();
        h.engine.handle_inbound(Inbound::Connected);
        h.wire.clear_sent();
        h
    }

    fn push(&mut self, name: &str, payload: Value) {
        self.engine.handle_inbound(Inbound::Event {
            name: name.to_string(),
            payload,
        });
    }

    fn ack(&mut self, event: &str, payload: Value) {
        let id = self.wire.last_ack_id(event).expect("request was emitted");
        self.engine.handle_inbound(Inbound::Ack { id, payload });
    }

    fn drain_events(&mut self) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    fn unread(&self, peer: &str) -> u32 {
        self.engine.conversation(peer).map(|s| s.unread).unwrap_or(0)
    }
}

#[derive(Clone, Default)]
struct RecordingNotifier {
    calls: Arc<Mutex<Vec<(u32, String)>>>,
}

impl NotificationSink for RecordingNotifier {
    fn notify(&mut self, count: u32, avatar: &str) {
        self.calls.lock().unwrap().push((count, avatar.to_string()));
    }
}

fn summary(peer: &str, unread: u32) -> Value {
    json!({
        "uuid": peer,
        "cnName": peer.to_uppercase(),
        "avatarUrl": format!("{}.png", peer),
        "time": "2024-05-01T10:00:00Z",
        "unread": unread,
        "lastMessage": "earlier"
    })
}

fn message(from: &str, to: &str, status: &str) -> Value {
    json!({
        "id": uuid::Uuid::new_v4().to_string(),
        "senderId": from,
        "recipientId": to,
        "content": "hello",
        "status": status,
        "createTime": "2024-05-01T10:01:00Z",
        "updateTime": "2024-05-01T10:01:00Z"
    })
}

#[tokio::test]
async fn test_handshake_on_every_connected_transition() {
    let mut h = Harness::new();
    h.engine.start().unwrap();
    assert_eq!(h.wire.open_calls(), 1);
    assert_eq!(h.engine.connection_state(), ConnectionState::Connecting);

    h.engine.handle_inbound(Inbound::Connected);
    assert_eq!(h.wire.sent_named(outbound::REGISTER).len(), 1);
    assert_eq!(h.wire.sent_named(outbound::GET_CONVERSATIONS).len(), 1);
    assert_eq!(h.wire.sent_named(outbound::REGISTER)[0].payload, json!(ME));

    // A repeated notification is not a transition
    h.engine.handle_inbound(Inbound::Connected);
    assert_eq!(h.wire.sent_named(outbound::REGISTER).len(), 1);

    h.engine.handle_inbound(Inbound::Disconnected {
        reason: "transport close".to_string(),
    });
    h.engine.handle_inbound(Inbound::Connecting { attempt: 1 });
    h.engine.handle_inbound(Inbound::Connected);

    assert_eq!(h.wire.sent_named(outbound::REGISTER).len(), 2);
    assert_eq!(h.wire.sent_named(outbound::GET_CONVERSATIONS).len(), 2);
    assert_eq!(h.engine.connection().handshakes(), 2);

    let states: Vec<ConnectionState> = h
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            EngineEvent::ConnectionChanged { state } => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
        ]
    );
}

#[tokio::test]
async fn test_start_is_idempotent() {
    let mut h = Harness::new();
    h.engine.start().unwrap();
    h.engine.start().unwrap();
    assert_eq!(h.wire.open_calls(), 1);
}

#[tokio::test]
async fn test_open_conversation_resets_unread_before_reply() {
    let mut h = Harness::connected();
    h.push(inbound::CONVERSATION_LIST, json!([summary("A", 3), summary("B", 0)]));
    assert_eq!(h.engine.total_unread(), 3);

    h.engine.open_conversation("A").unwrap();
    assert_eq!(h.unread("A"), 0);
    assert_eq!(h.unread("B"), 0);
    assert_eq!(h.engine.total_unread(), 0);
    assert_eq!(h.engine.active_peer(), Some("A"));

    let requests = h.wire.sent_named(outbound::GET_HISTORY);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].payload, json!({ "otherUserId": "A" }));
    assert!(requests[0].ack.is_some());
}

#[tokio::test]
async fn test_history_reply_fills_cache_and_scrolls() {
    let mut h = Harness::connected();
    h.push(inbound::CONVERSATION_LIST, json!([summary("A", 2)]));
    h.engine.open_conversation("A").unwrap();
    h.drain_events();

    h.push(
        inbound::MESSAGE_HISTORY,
        json!({ "withUser": "A", "messages": [message("A", ME, "read"), message(ME, "A", "read")] }),
    );
    assert_eq!(h.engine.history().len(), 2);

    h.ack(outbound::GET_HISTORY, json!(null));
    let events = h.drain_events();
    assert!(events.contains(&EngineEvent::HistoryChanged {
        peer_id: Some("A".to_string()),
        len: 2
    }));
    assert!(events.contains(&EngineEvent::ScrollToLatest {
        peer_id: "A".to_string()
    }));
    assert_eq!(h.engine.pending_requests(), 0);
}

#[tokio::test]
async fn test_message_between_open_and_history_reply() {
    let mut h = Harness::connected();
    h.push(inbound::CONVERSATION_LIST, json!([summary("A", 3), summary("B", 2)]));

    h.engine.open_conversation("A").unwrap();
    assert_eq!(h.unread("A"), 0);
    assert_eq!(h.engine.total_unread(), 2);

    // Delivered before the service answers getHistory
    h.push(inbound::PRIVATE_MESSAGE, message("A", ME, "delivered"));
    assert_eq!(h.unread("A"), 1);
    assert_eq!(h.engine.total_unread(), 3);
    assert_eq!(h.engine.history().len(), 1);

    h.push(
        inbound::MESSAGE_HISTORY,
        json!({ "withUser": "A", "messages": [message("A", ME, "read"), message("A", ME, "read")] }),
    );
    assert_eq!(h.unread("A"), 0);
    assert_eq!(h.unread("B"), 2);
    assert_eq!(h.engine.total_unread(), 2);
    assert_eq!(h.engine.history().len(), 2);
}

#[tokio::test]
async fn test_history_for_other_peer_is_discarded() {
    let mut h = Harness::connected();
    h.push(inbound::CONVERSATION_LIST, json!([summary("A", 2), summary("B", 1)]));
    h.engine.open_conversation("A").unwrap();
    h.engine.open_conversation("B").unwrap();

    h.push(
        inbound::MESSAGE_HISTORY,
        json!({ "withUser": "A", "messages": [message("A", ME, "read")] }),
    );
    assert!(h.engine.history().is_empty());
    assert_eq!(h.engine.active_peer(), Some("B"));
    assert_eq!(h.engine.total_unread(), 0);
}

#[tokio::test]
async fn test_delivered_message_without_active_peer() {
    let mut h = Harness::connected();
    h.push(inbound::CONVERSATION_LIST, json!([summary("A", 0), summary("B", 2)]));

    h.push(inbound::PRIVATE_MESSAGE, message("A", ME, "delivered"));
    assert_eq!(h.unread("A"), 1);
    assert_eq!(h.engine.total_unread(), 3);
    assert!(h.engine.history().is_empty());
}

#[tokio::test]
async fn test_delivered_message_for_active_peer_counts_and_appends() {
    let mut h = Harness::connected();
    h.push(inbound::CONVERSATION_LIST, json!([summary("A", 0)]));
    h.engine.open_conversation("A").unwrap();

    h.push(inbound::PRIVATE_MESSAGE, message("A", ME, "delivered"));
    assert_eq!(h.engine.history().len(), 1);
    assert_eq!(h.unread("A"), 1);
    assert_eq!(h.engine.total_unread(), 1);
}

#[tokio::test]
async fn test_read_or_other_peer_messages_do_not_count() {
    let mut h = Harness::connected();
    h.push(inbound::CONVERSATION_LIST, json!([summary("A", 0), summary("B", 0)]));
    h.engine.open_conversation("A").unwrap();

    h.push(inbound::PRIVATE_MESSAGE, message("A", ME, "read"));
    h.push(inbound::PRIVATE_MESSAGE, message("B", ME, "delivered"));
    assert_eq!(h.engine.history().len(), 1);
    assert_eq!(h.unread("A"), 0);
    assert_eq!(h.unread("B"), 1);
}

#[tokio::test]
async fn test_conversation_list_is_full_replace() {
    let mut h = Harness::connected();
    h.push(inbound::CONVERSATION_LIST, json!([summary("A", 1), summary("B", 2)]));
    h.push(inbound::CONVERSATION_LIST, json!([summary("C", 4)]));

    assert!(h.engine.conversation("A").is_none());
    assert!(h.engine.conversation("B").is_none());
    assert_eq!(h.engine.conversations().len(), 1);
    assert_eq!(h.engine.total_unread(), 4);

    h.push(inbound::CONVERSATION_LIST, Value::Null);
    assert!(h.engine.conversations().is_empty());
    assert_eq!(h.engine.total_unread(), 0);
}

#[tokio::test]
async fn test_conversation_list_with_null_fields_still_replaces() {
    let mut h = Harness::connected();
    h.push(inbound::CONVERSATION_LIST, json!([summary("OLD", 7)]));

    h.push(
        inbound::CONVERSATION_LIST,
        json!([
            summary("A", 3),
            { "uuid": "B", "cnName": "B", "avatarUrl": null, "time": null, "unread": null, "lastMessage": null }
        ]),
    );
    assert!(h.engine.conversation("OLD").is_none());
    assert_eq!(h.engine.conversations().len(), 2);
    assert_eq!(h.unread("A"), 3);
    let b = h.engine.conversation("B").unwrap();
    assert_eq!(b.unread, 0);
    assert!(b.last_message.is_empty());
    assert_eq!(h.engine.total_unread(), 3);
}

#[tokio::test]
async fn test_update_conversations_refetches_list() {
    let mut h = Harness::connected();
    h.push(inbound::UPDATE_CONVERSATIONS, Value::Null);
    let fetches = h.wire.sent_named(outbound::GET_CONVERSATIONS);
    assert_eq!(fetches.len(), 1);
    assert_eq!(fetches[0].payload, json!(ME));
}

#[tokio::test]
async fn test_send_ack_updates_summary_but_not_history() {
    let mut h = Harness::connected();
    h.push(inbound::CONVERSATION_LIST, json!([summary("A", 0)]));
    h.engine.open_conversation("A").unwrap();
    h.push(inbound::MESSAGE_HISTORY, json!({ "withUser": "A", "messages": [] }));

    h.engine.send_message("A", "hi A").unwrap();
    let sent = h.wire.sent_named(outbound::PRIVATE_MESSAGE);
    assert_eq!(sent[0].payload, json!({ "recipientId": "A", "content": "hi A" }));

    let echo = message(ME, "A", "sent");
    h.ack(outbound::PRIVATE_MESSAGE, json!({ "success": true, "message": echo.clone() }));
    assert!(h.engine.history().is_empty());
    let a = h.engine.conversation("A").unwrap();
    assert_eq!(a.last_message, "hi A");
    assert_eq!(a.last_activity, JUST_NOW);

    h.push(inbound::PRIVATE_MESSAGE, echo);
    assert_eq!(h.engine.history().len(), 1);
}

#[tokio::test]
async fn test_successful_ack_with_odd_echo_copy_still_succeeds() {
    let mut h = Harness::connected();
    h.push(inbound::CONVERSATION_LIST, json!([summary("A", 0)]));
    h.engine.send_message("A", "numbers as ids").unwrap();
    h.drain_events();

    h.ack(
        outbound::PRIVATE_MESSAGE,
        json!({ "success": true, "message": { "id": 42, "senderId": ME } }),
    );
    assert_eq!(h.engine.conversation("A").unwrap().last_message, "numbers as ids");
    assert!(!h
        .drain_events()
        .iter()
        .any(|e| matches!(e, EngineEvent::SendFailed { .. })));
}

#[tokio::test]
async fn test_send_to_unlisted_peer_synthesizes_summary() {
    let mut h = Harness::connected();
    h.engine.send_message("Z", "first contact").unwrap();
    h.ack(outbound::PRIVATE_MESSAGE, json!({ "success": true }));

    let z = h.engine.conversation("Z").unwrap();
    assert_eq!(z.last_message, "first contact");
    assert_eq!(z.unread, 0);
}

#[tokio::test]
async fn test_rejected_send_reports_failure() {
    let mut h = Harness::connected();
    h.engine.send_message("A", "nope").unwrap();
    h.drain_events();
    h.ack(outbound::PRIVATE_MESSAGE, json!({ "success": false }));

    let events = h.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, EngineEvent::SendFailed { peer_id, content, .. } if peer_id == "A" && content == "nope")));
    assert!(h.engine.conversation("A").is_none());
}

#[tokio::test]
async fn test_send_times_out_without_ack() {
    let mut h = Harness::connected();
    h.engine.send_message("A", "anyone?").unwrap();
    h.drain_events();

    h.engine.expire_requests(Instant::now());
    assert_eq!(h.engine.pending_requests(), 1);

    h.engine.expire_requests(Instant::now() + Duration::from_secs(11));
    assert_eq!(h.engine.pending_requests(), 0);
    let events = h.drain_events();
    assert!(events.iter().any(|e| matches!(e, EngineEvent::SendFailed { .. })));

    // The late ack is dropped
    h.ack(outbound::PRIVATE_MESSAGE, json!({ "success": true }));
    assert!(h.engine.conversation("A").is_none());
}

#[tokio::test]
async fn test_disconnect_fails_outstanding_sends() {
    let mut h = Harness::connected();
    h.engine.send_message("A", "in flight").unwrap();
    h.drain_events();
    h.engine.handle_inbound(Inbound::Disconnected {
        reason: "ping timeout".to_string(),
    });
    assert_eq!(h.engine.pending_requests(), 0);
    assert!(h
        .drain_events()
        .iter()
        .any(|e| matches!(e, EngineEvent::SendFailed { .. })));
}

#[tokio::test]
async fn test_operations_need_connection_and_content() {
    let mut h = Harness::new();
    h.engine.start().unwrap();
    assert!(matches!(
        h.engine.send_message("A", "hi"),
        Err(SyncError::NotConnected(_))
    ));

    h.engine.handle_inbound(Inbound::Connected);
    assert!(matches!(h.engine.send_message("A", ""), Err(SyncError::EmptyMessage)));
    assert!(h.wire.sent_named(outbound::PRIVATE_MESSAGE).is_empty());
}

#[tokio::test]
async fn test_start_new_conversation_from_search_hit() {
    let mut h = Harness::connected();
    h.push(inbound::CONVERSATION_LIST, json!([summary("A", 1)]));
    let hit = SearchResult {
        id: "N".to_string(),
        email: "n@example.com".to_string(),
        display_name: "Newcomer".to_string(),
        avatar: "n.png".to_string(),
    };

    h.engine.start_new_conversation(&hit).unwrap();
    assert_eq!(h.engine.active_peer(), Some("N"));
    assert_eq!(h.engine.conversations().len(), 2);
    let info = h.engine.active_peer_info().unwrap();
    assert_eq!(info.display_name, "Newcomer");
    assert!(h.wire.sent_named(outbound::GET_HISTORY).is_empty());

    // Starting again with a known peer keeps the existing summary
    h.engine.start_new_conversation(&hit).unwrap();
    assert_eq!(h.engine.conversations().len(), 2);
}

#[tokio::test]
async fn test_dispose_detaches_listeners() {
    let mut h = Harness::connected();
    assert_eq!(h.engine.connection().listener_count(inbound::PRIVATE_MESSAGE), 1);
    h.engine.send_message("A", "bye").unwrap();

    h.engine.dispose();
    h.engine.dispose();
    assert!(h.engine.is_disposed());
    assert_eq!(h.wire.close_calls(), 1);
    assert_eq!(h.engine.connection_state(), ConnectionState::Disconnected);
    for name in [
        inbound::CONVERSATION_LIST,
        inbound::MESSAGE_HISTORY,
        inbound::PRIVATE_MESSAGE,
        inbound::UPDATE_CONVERSATIONS,
    ] {
        assert_eq!(h.engine.connection().listener_count(name), 0);
    }

    h.push(inbound::CONVERSATION_LIST, json!([summary("A", 5)]));
    assert_eq!(h.engine.total_unread(), 0);
    assert!(matches!(h.engine.open_conversation("A"), Err(SyncError::Disposed)));
}

#[tokio::test]
async fn test_notifies_only_when_hidden() {
    let notifier = RecordingNotifier::default();
    let calls = notifier.calls.clone();
    let mut h = Harness::with_notifier(Box::new(notifier));
    h.engine.start().unwrap();
    h.engine.handle_inbound(Inbound::Connected);
    h.push(inbound::CONVERSATION_LIST, json!([summary("A", 0)]));

    h.push(inbound::PRIVATE_MESSAGE, message("A", ME, "delivered"));
    assert!(calls.lock().unwrap().is_empty());
    assert_eq!(h.engine.title(), "You have 1 unread messages");

    h.engine.set_view_visible(false);
    assert_eq!(*calls.lock().unwrap(), vec![(1, "me.png".to_string())]);
    assert_eq!(h.engine.title(), "Chat");

    h.push(inbound::PRIVATE_MESSAGE, message("A", ME, "delivered"));
    assert_eq!(calls.lock().unwrap().last().unwrap().0, 2);
}

struct FixedSearch;

#[async_trait::async_trait]
impl UserSearch for FixedSearch {
    async fn search(&self, query: &str) -> chatsync_core::Result<Vec<SearchResult>> {
        Ok(vec![SearchResult {
            id: format!("id-{}", query),
            email: format!("{}@example.com", query),
            display_name: query.to_string(),
            avatar: String::new(),
        }])
    }
}

#[tokio::test(start_paused = true)]
async fn test_debounced_search_keeps_latest_results() {
    let mut h = Harness::connected();
    h.engine = h.engine.with_search(Arc::new(FixedSearch));

    h.engine.set_search_query("al").unwrap();
    h.engine.set_search_query("alice").unwrap();
    assert!(h.engine.is_searching());

    let outcome = h.engine.next_search_outcome().await.unwrap();
    h.engine.handle_search_outcome(outcome);
    assert!(!h.engine.is_searching());
    assert_eq!(h.engine.search_results().len(), 1);
    assert_eq!(h.engine.search_results()[0].id, "id-alice");

    let hit = h.engine.search_results()[0].clone();
    h.engine.start_new_conversation(&hit).unwrap();
    assert!(h.engine.search_query().is_empty());
    assert!(h.engine.search_results().is_empty());
}
