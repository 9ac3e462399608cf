/// The sync engine: owns the stores, listens through the connection manager
/// and exposes the operations the presentation layer calls.
use crate::chat_types::{
    outbound, ConversationSummary, HistoryRequest, Message, OutgoingMessage, SearchResult, SendAck, UserIdentity,
    UNKNOWN_PEER_NAME,
};
use crate::config::Config;
use crate::connection::{ConnectionManager, ConnectionState, RequestOutcome};
use crate::error::{Result, SyncError};
use crate::notify::{self, LogNotifier, NotificationSink};
use crate::search::{SearchDebouncer, SearchOutcome, UserSearch};
use crate::sync::reducer::{Changes, ServerEvent, SyncState};
use crate::transport::{AckId, Inbound, Transport};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// How often outstanding requests are checked for timeouts
const EXPIRY_TICK: Duration = Duration::from_millis(250);

/// Notifications for the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    ConnectionChanged { state: ConnectionState },
    ConversationsChanged { total_unread: u32 },
    HistoryChanged { peer_id: Option<String>, len: usize },
    /// History for `peer_id` finished loading; scroll to the newest message
    ScrollToLatest { peer_id: String },
    SendFailed { peer_id: String, content: String, reason: String },
    SearchResults { query: String, count: usize },
}

/// Requests from the presentation layer when the engine runs in its own task
#[derive(Debug)]
pub enum EngineCommand {
    Open(String),
    Send { peer_id: String, content: String },
    StartNew(SearchResult),
    Refresh,
    Search(String),
    SetVisible(bool),
    Snapshot(oneshot::Sender<EngineSnapshot>),
    Shutdown,
}

/// Who the open conversation is with
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerInfo {
    pub peer_id: String,
    pub display_name: String,
    pub avatar: String,
}

/// Point-in-time copy of everything a view renders
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub connection: ConnectionState,
    pub active_peer: Option<PeerInfo>,
    pub conversations: Vec<ConversationSummary>,
    pub total_unread: u32,
    pub history: Vec<Message>,
    pub search_results: Vec<SearchResult>,
    pub title: String,
}

#[derive(Debug, Clone)]
enum PendingOp {
    History { peer_id: String },
    Send { peer_id: String, content: String },
}

pub struct SyncEngine<T: Transport> {
    identity: UserIdentity,
    connection: ConnectionManager<T>,
    state: SyncState,
    inbox: mpsc::UnboundedReceiver<ServerEvent>,
    _inbox_tx: mpsc::UnboundedSender<ServerEvent>,
    pending_ops: HashMap<AckId, PendingOp>,
    debouncer: Option<SearchDebouncer>,
    search_outcomes: mpsc::UnboundedReceiver<SearchOutcome>,
    search_tx: mpsc::UnboundedSender<SearchOutcome>,
    search_delay: Duration,
    search_query: String,
    search_results: Vec<SearchResult>,
    searching: bool,
    notifier: Box<dyn NotificationSink>,
    view_visible: bool,
    last_alert_state: (u32, bool),
    events: broadcast::Sender<EngineEvent>,
    disposed: bool,
}

impl<T: Transport> SyncEngine<T> {
    /// Build the engine and subscribe it to the service's push events
    pub fn new(identity: UserIdentity, transport: T, config: &Config) -> Self {
        let mut connection = ConnectionManager::new(transport, config.ack_timeout);
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let (search_tx, search_outcomes) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(256);

        for name in ServerEvent::NAMES {
            let tx = inbox_tx.clone();
            connection.on(
                name,
                Box::new(move |payload: &Value| match ServerEvent::decode(name, payload) {
                    Ok(Some(event)) => {
                        let _ = tx.send(event);
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Dropping malformed '{}' payload: {}", name, e),
                }),
            );
        }

        Self {
            identity,
            connection,
            state: SyncState::new(),
            inbox,
            _inbox_tx: inbox_tx,
            pending_ops: HashMap::new(),
            debouncer: None,
            search_outcomes,
            search_tx,
            search_delay: config.search_debounce,
            search_query: String::new(),
            search_results: Vec::new(),
            searching: false,
            notifier: Box::new(LogNotifier),
            view_visible: true,
            last_alert_state: (0, true),
            events,
            disposed: false,
        }
    }

    /// Attach the user search collaborator
    pub fn with_search(mut self, search: Arc<dyn UserSearch>) -> Self {
        self.debouncer = Some(SearchDebouncer::new(search, self.search_delay, self.search_tx.clone()));
        self
    }

    /// Replace the default (logging) notification sink
    pub fn with_notifier(mut self, notifier: Box<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────────

    /// Open the channel for the local user
    pub fn start(&mut self) -> Result<()> {
        self.ensure_live()?;
        let before = self.connection.state();
        self.connection.connect(&self.identity.id)?;
        self.publish_state_change(before);
        Ok(())
    }

    /// Detach every listener, cancel search, fail outstanding requests and
    /// disconnect. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        for name in ServerEvent::NAMES {
            self.connection.off(name, None);
        }
        if let Some(debouncer) = self.debouncer.as_mut() {
            debouncer.cancel();
        }
        let before = self.connection.state();
        let failed = self.connection.disconnect();
        for outcome in failed {
            self.resolve(outcome);
        }
        self.pending_ops.clear();
        while self.inbox.try_recv().is_ok() {}
        self.disposed = true;
        self.publish_state_change(before);
        info!("Sync engine disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    // ─── Inbound ────────────────────────────────────────────────────────────

    /// Apply one item from the transport, to completion
    pub fn handle_inbound(&mut self, item: Inbound) {
        if self.disposed {
            debug!("Inbound after dispose ignored");
            return;
        }
        let before = self.connection.state();
        let outcomes = self.connection.handle_inbound(item);
        self.publish_state_change(before);
        self.drain_inbox();
        for outcome in outcomes {
            self.resolve(outcome);
        }
    }

    /// Fail requests whose acknowledgement is overdue
    pub fn expire_requests(&mut self, now: Instant) {
        if self.disposed {
            return;
        }
        for outcome in self.connection.expire(now) {
            self.resolve(outcome);
        }
    }

    fn drain_inbox(&mut self) {
        while let Ok(event) = self.inbox.try_recv() {
            let changes = self.state.apply(&self.identity.id, event);
            self.publish_changes(changes);
            if changes.refresh {
                if let Err(e) = self.connection.request_conversations() {
                    warn!("Conversation refresh failed: {}", e);
                }
            }
        }
    }

    fn resolve(&mut self, outcome: RequestOutcome) {
        let Some(op) = self.pending_ops.remove(&outcome.id()) else {
            return;
        };
        match (op, outcome) {
            (PendingOp::History { peer_id }, RequestOutcome::Acked { .. }) => {
                if self.state.active_peer.as_deref() == Some(peer_id.as_str()) {
                    self.publish(EngineEvent::ScrollToLatest { peer_id });
                }
            }
            (PendingOp::History { peer_id }, RequestOutcome::Failed { error, .. }) => {
                debug!("History request for {} ended without reply: {}", peer_id, error);
            }
            (PendingOp::Send { peer_id, content }, RequestOutcome::Acked { payload, .. }) => {
                match serde_json::from_value::<SendAck>(payload) {
                    Ok(ack) if ack.success => {
                        let fallback = self.fallback_summary(&peer_id);
                        let changes = self.state.record_sent(&peer_id, &content, move || fallback);
                        self.publish_changes(changes);
                    }
                    Ok(_) => self.send_failed(peer_id, content, "rejected by server".to_string()),
                    Err(e) => self.send_failed(peer_id, content, format!("bad acknowledgement: {}", e)),
                }
            }
            (PendingOp::Send { peer_id, content }, RequestOutcome::Failed { error, .. }) => {
                self.send_failed(peer_id, content, error.to_string());
            }
        }
    }

    // ─── Outbound operations ────────────────────────────────────────────────

    /// Open a conversation: mark it read right away, then load its history
    pub fn open_conversation(&mut self, peer_id: &str) -> Result<AckId> {
        self.ensure_live()?;
        let changes = self.state.open(peer_id);
        self.publish_changes(changes);

        let payload = serde_json::to_value(HistoryRequest { other_user_id: peer_id })?;
        let id = self.connection.request(outbound::GET_HISTORY, payload, Instant::now())?;
        self.pending_ops.insert(
            id,
            PendingOp::History {
                peer_id: peer_id.to_string(),
            },
        );
        Ok(id)
    }

    /// Send a message. History only grows when the service echoes it back.
    pub fn send_message(&mut self, peer_id: &str, content: &str) -> Result<AckId> {
        self.ensure_live()?;
        if content.is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        let payload = serde_json::to_value(OutgoingMessage {
            recipient_id: peer_id,
            content,
        })?;
        let id = self.connection.request(outbound::PRIVATE_MESSAGE, payload, Instant::now())?;
        self.pending_ops.insert(
            id,
            PendingOp::Send {
                peer_id: peer_id.to_string(),
                content: content.to_string(),
            },
        );
        Ok(id)
    }

    /// Start chatting with a search hit, creating its summary if needed
    pub fn start_new_conversation(&mut self, peer: &SearchResult) -> Result<()> {
        self.ensure_live()?;
        let summary = ConversationSummary::placeholder(&peer.id, &peer.display_name, &peer.avatar);
        let changes = self.state.start_new(summary);
        self.clear_search();
        self.publish_changes(changes);
        Ok(())
    }

    /// Ask the service for a fresh conversation list
    pub fn refresh_conversations(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.connection.request_conversations()
    }

    // ─── Search ─────────────────────────────────────────────────────────────

    /// Update the search box. The lookup itself is debounced.
    pub fn set_search_query(&mut self, query: &str) -> Result<()> {
        self.ensure_live()?;
        self.search_query = query.to_string();
        let Some(debouncer) = self.debouncer.as_mut() else {
            self.search_results.clear();
            return Ok(());
        };
        match debouncer.schedule(query) {
            Some(_) => self.searching = true,
            None => {
                self.searching = false;
                self.search_results.clear();
            }
        }
        Ok(())
    }

    /// Apply results from the debouncer unless a newer query superseded them
    pub fn handle_search_outcome(&mut self, outcome: SearchOutcome) {
        if self.disposed {
            return;
        }
        let current = self.debouncer.as_ref().map(SearchDebouncer::generation);
        if current != Some(outcome.generation) {
            debug!("Stale search results for {:?} discarded", outcome.query);
            return;
        }
        self.searching = false;
        self.search_results = outcome.results;
        self.publish(EngineEvent::SearchResults {
            query: outcome.query,
            count: self.search_results.len(),
        });
    }

    /// Wait for the next search outcome (used by callers driving the engine by hand)
    pub async fn next_search_outcome(&mut self) -> Option<SearchOutcome> {
        self.search_outcomes.recv().await
    }

    fn clear_search(&mut self) {
        self.search_query.clear();
        self.search_results.clear();
        self.searching = false;
        if let Some(debouncer) = self.debouncer.as_mut() {
            debouncer.schedule("");
        }
    }

    // ─── Visibility / notifications ─────────────────────────────────────────

    pub fn set_view_visible(&mut self, visible: bool) {
        self.view_visible = visible;
        self.check_alert();
    }

    pub fn is_view_visible(&self) -> bool {
        self.view_visible
    }

    pub fn title(&self) -> String {
        notify::window_title(self.total_unread(), self.view_visible)
    }

    fn check_alert(&mut self) {
        let current = (self.total_unread(), self.view_visible);
        if current == self.last_alert_state {
            return;
        }
        self.last_alert_state = current;
        if notify::should_notify(current.0, current.1) {
            self.notifier.notify(current.0, &self.identity.avatar);
        }
    }

    // ─── Read access ────────────────────────────────────────────────────────

    pub fn identity(&self) -> &UserIdentity {
        &self.identity
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn connection(&self) -> &ConnectionManager<T> {
        &self.connection
    }

    pub fn conversations(&self) -> &[ConversationSummary] {
        self.state.conversations.as_slice()
    }

    pub fn conversation(&self, peer_id: &str) -> Option<&ConversationSummary> {
        self.state.conversations.get(peer_id)
    }

    pub fn total_unread(&self) -> u32 {
        self.state.total_unread()
    }

    pub fn history(&self) -> &[Message] {
        self.state.history.messages()
    }

    pub fn active_peer(&self) -> Option<&str> {
        self.state.active_peer.as_deref()
    }

    pub fn search_query(&self) -> &str {
        &self.search_query
    }

    pub fn search_results(&self) -> &[SearchResult] {
        &self.search_results
    }

    pub fn is_searching(&self) -> bool {
        self.searching
    }

    pub fn pending_requests(&self) -> usize {
        self.pending_ops.len()
    }

    /// The open conversation's peer, from the list or else from search hits
    pub fn active_peer_info(&self) -> Option<PeerInfo> {
        let peer_id = self.state.active_peer.as_deref()?;
        if let Some(summary) = self.state.conversations.get(peer_id) {
            return Some(PeerInfo {
                peer_id: summary.peer_id.clone(),
                display_name: summary.display_name.clone(),
                avatar: summary.avatar.clone(),
            });
        }
        self.search_results.iter().find(|r| r.id == peer_id).map(|r| PeerInfo {
            peer_id: r.id.clone(),
            display_name: r.display_name.clone(),
            avatar: r.avatar.clone(),
        })
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            connection: self.connection.state(),
            active_peer: self.active_peer_info(),
            conversations: self.conversations().to_vec(),
            total_unread: self.total_unread(),
            history: self.history().to_vec(),
            search_results: self.search_results.clone(),
            title: self.title(),
        }
    }

    // ─── Helpers ────────────────────────────────────────────────────────────

    fn ensure_live(&self) -> Result<()> {
        if self.disposed {
            Err(SyncError::Disposed)
        } else {
            Ok(())
        }
    }

    fn fallback_summary(&self, peer_id: &str) -> ConversationSummary {
        match self.search_results.iter().find(|r| r.id == peer_id) {
            Some(hit) => ConversationSummary::placeholder(&hit.id, &hit.display_name, &hit.avatar),
            None => ConversationSummary::placeholder(peer_id, UNKNOWN_PEER_NAME, ""),
        }
    }

    fn send_failed(&mut self, peer_id: String, content: String, reason: String) {
        warn!("Send to {} failed: {}", peer_id, reason);
        self.publish(EngineEvent::SendFailed {
            peer_id,
            content,
            reason,
        });
    }

    fn publish_changes(&mut self, changes: Changes) {
        if changes.conversations {
            self.publish(EngineEvent::ConversationsChanged {
                total_unread: self.total_unread(),
            });
        }
        if changes.history {
            self.publish(EngineEvent::HistoryChanged {
                peer_id: self.state.active_peer.clone(),
                len: self.state.history.len(),
            });
        }
        self.check_alert();
    }

    fn publish_state_change(&self, before: ConnectionState) {
        let now = self.connection.state();
        if now != before {
            self.publish(EngineEvent::ConnectionChanged { state: now });
        }
    }

    fn publish(&self, event: EngineEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    // ─── Driver ─────────────────────────────────────────────────────────────

    fn execute(&mut self, command: EngineCommand) {
        let result = match command {
            EngineCommand::Open(peer_id) => self.open_conversation(&peer_id).map(|_| ()),
            EngineCommand::Send { peer_id, content } => match self.send_message(&peer_id, &content) {
                Ok(_) => Ok(()),
                Err(e) => {
                    self.send_failed(peer_id, content, e.to_string());
                    Ok(())
                }
            },
            EngineCommand::StartNew(peer) => self.start_new_conversation(&peer),
            EngineCommand::Refresh => self.refresh_conversations(),
            EngineCommand::Search(query) => self.set_search_query(&query),
            EngineCommand::SetVisible(visible) => {
                self.set_view_visible(visible);
                Ok(())
            }
            EngineCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
                Ok(())
            }
            EngineCommand::Shutdown => Ok(()),
        };
        if let Err(e) = result {
            warn!("Command failed: {}", e);
        }
    }

    /// Drive the engine from one task until shutdown or the command channel closes
    pub async fn run(
        mut self,
        mut inbound: mpsc::UnboundedReceiver<Inbound>,
        mut commands: mpsc::UnboundedReceiver<EngineCommand>,
    ) -> Result<()> {
        self.start()?;
        let mut tick = interval(EXPIRY_TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                item = inbound.recv() => match item {
                    Some(item) => self.handle_inbound(item),
                    None => {
                        warn!("Transport channel closed");
                        break;
                    }
                },
                command = commands.recv() => match command {
                    Some(EngineCommand::Shutdown) | None => break,
                    Some(command) => self.execute(command),
                },
                Some(outcome) = self.search_outcomes.recv() => self.handle_search_outcome(outcome),
                _ = tick.tick() => self.expire_requests(Instant::now()),
            }
        }

        self.dispose();
        Ok(())
    }
}

impl<T: Transport> Drop for SyncEngine<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}
