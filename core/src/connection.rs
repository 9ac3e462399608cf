/// Connection lifecycle, identity handshake and the listener registry
use crate::chat_types::{inbound, outbound};
use crate::error::{Result, SyncError};
use crate::transport::{AckId, Inbound, Transport};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Connection state of the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Attempting to connect
    Connecting,
    /// Connected and registered
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

pub type Listener = Box<dyn FnMut(&Value) + Send>;

/// Handle returned by `on`, used to remove exactly that listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Named listeners, several per name, called in registration order
#[derive(Default)]
struct ListenerRegistry {
    next_id: u64,
    by_name: HashMap<String, Vec<(ListenerId, Listener)>>,
}

impl ListenerRegistry {
    fn add(&mut self, name: &str, listener: Listener) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.by_name.entry(name.to_string()).or_default().push((id, listener));
        id
    }

    fn remove(&mut self, name: &str, id: Option<ListenerId>) -> usize {
        match id {
            Some(id) => {
                let Some(list) = self.by_name.get_mut(name) else {
                    return 0;
                };
                let before = list.len();
                list.retain(|(lid, _)| *lid != id);
                let removed = before - list.len();
                if list.is_empty() {
                    self.by_name.remove(name);
                }
                removed
            }
            None => self.by_name.remove(name).map(|list| list.len()).unwrap_or(0),
        }
    }

    fn dispatch(&mut self, name: &str, payload: &Value) -> usize {
        match self.by_name.get_mut(name) {
            Some(list) => {
                for (_, listener) in list.iter_mut() {
                    listener(payload);
                }
                list.len()
            }
            None => 0,
        }
    }

    fn count(&self, name: &str) -> usize {
        self.by_name.get(name).map(Vec::len).unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
struct PendingRequest {
    event: String,
    deadline: Instant,
}

/// How an outstanding request ended
#[derive(Debug)]
pub enum RequestOutcome {
    Acked { id: AckId, event: String, payload: Value },
    Failed { id: AckId, event: String, error: SyncError },
}

impl RequestOutcome {
    pub fn id(&self) -> AckId {
        match self {
            RequestOutcome::Acked { id, .. } | RequestOutcome::Failed { id, .. } => *id,
        }
    }
}

/// Sole owner of the transport and of everything registered on it
pub struct ConnectionManager<T: Transport> {
    transport: T,
    state: ConnectionState,
    user_id: Option<String>,
    opened: bool,
    listeners: ListenerRegistry,
    pending: HashMap<AckId, PendingRequest>,
    next_ack: u64,
    ack_timeout: Duration,
    handshakes: u64,
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: T, ack_timeout: Duration) -> Self {
        Self {
            transport,
            state: ConnectionState::Disconnected,
            user_id: None,
            opened: false,
            listeners: ListenerRegistry::default(),
            pending: HashMap::new(),
            next_ack: 0,
            ack_timeout,
            handshakes: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Number of register handshakes performed so far
    pub fn handshakes(&self) -> u64 {
        self.handshakes
    }

    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Open the channel for `user_id`. The handshake runs on every `Connected`.
    /// The identity is fixed for the session: a no-op call does not replace it.
    pub fn connect(&mut self, user_id: &str) -> Result<()> {
        match self.state {
            ConnectionState::Connected | ConnectionState::Connecting => {
                debug!("connect({}) ignored, already {}", user_id, self.state);
                Ok(())
            }
            ConnectionState::Disconnected => {
                info!("Connecting as {}", user_id);
                self.user_id = Some(user_id.to_string());
                self.state = ConnectionState::Connecting;
                if let Err(e) = self.transport.open() {
                    self.state = ConnectionState::Disconnected;
                    return Err(e);
                }
                self.opened = true;
                Ok(())
            }
        }
    }

    /// Close the channel. Safe to call repeatedly.
    pub fn disconnect(&mut self) -> Vec<RequestOutcome> {
        if self.opened {
            self.transport.close();
            self.opened = false;
        }
        let was = self.state;
        self.state = ConnectionState::Disconnected;
        let failed = self.fail_pending("client disconnect");
        if was != ConnectionState::Disconnected {
            info!("Disconnected by client");
            self.listeners
                .dispatch(inbound::DISCONNECT, &Value::String("client disconnect".to_string()));
        }
        failed
    }

    /// Register a listener for an inbound event name
    pub fn on(&mut self, name: &str, listener: Listener) -> ListenerId {
        self.listeners.add(name, listener)
    }

    /// Remove one listener, or every listener for `name` when `id` is `None`
    pub fn off(&mut self, name: &str, id: Option<ListenerId>) -> usize {
        self.listeners.remove(name, id)
    }

    pub fn listener_count(&self, name: &str) -> usize {
        self.listeners.count(name)
    }

    /// Fire-and-forget emit
    pub fn emit(&mut self, event: &str, payload: Value) -> Result<()> {
        if self.state != ConnectionState::Connected {
            return Err(SyncError::NotConnected(event.to_string()));
        }
        debug!("emit {}", event);
        self.transport.emit(event, payload)
    }

    /// Emit and wait for an acknowledgement, resolved through `handle_inbound`
    /// or failed by `expire`.
    pub fn request(&mut self, event: &str, payload: Value, now: Instant) -> Result<AckId> {
        if self.state != ConnectionState::Connected {
            return Err(SyncError::NotConnected(event.to_string()));
        }
        self.next_ack += 1;
        let id = AckId(self.next_ack);
        self.transport.emit_with_ack(event, payload, id)?;
        debug!("request {} #{}", event, id);
        self.pending.insert(
            id,
            PendingRequest {
                event: event.to_string(),
                deadline: now + self.ack_timeout,
            },
        );
        Ok(id)
    }

    /// Apply one inbound item. Returns the requests it resolved.
    pub fn handle_inbound(&mut self, item: Inbound) -> Vec<RequestOutcome> {
        match item {
            Inbound::Connecting { attempt } => {
                if self.state == ConnectionState::Connected {
                    warn!("Transport reported connecting while connected");
                }
                debug!("Connecting (attempt {})", attempt);
                self.state = ConnectionState::Connecting;
                Vec::new()
            }
            Inbound::Connected => {
                if self.state == ConnectionState::Connected {
                    debug!("Duplicate connected notification ignored");
                    return Vec::new();
                }
                self.state = ConnectionState::Connected;
                self.register();
                self.listeners.dispatch(inbound::CONNECT, &Value::Null);
                Vec::new()
            }
            Inbound::Disconnected { reason } => {
                if self.state == ConnectionState::Disconnected {
                    return Vec::new();
                }
                info!("Connection lost: {}", reason);
                self.state = ConnectionState::Disconnected;
                let failed = self.fail_pending("connection lost");
                self.listeners.dispatch(inbound::DISCONNECT, &Value::String(reason));
                failed
            }
            Inbound::Event { name, payload } => {
                let n = self.listeners.dispatch(&name, &payload);
                if n == 0 {
                    debug!("No listener for '{}'", name);
                }
                Vec::new()
            }
            Inbound::Ack { id, payload } => match self.pending.remove(&id) {
                Some(req) => vec![RequestOutcome::Acked {
                    id,
                    event: req.event,
                    payload,
                }],
                None => {
                    debug!("Late or unknown ack #{} dropped", id);
                    Vec::new()
                }
            },
        }
    }

    /// Fail every request whose deadline has passed
    pub fn expire(&mut self, now: Instant) -> Vec<RequestOutcome> {
        let expired: Vec<AckId> = self
            .pending
            .iter()
            .filter(|(_, req)| req.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        let mut out = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(req) = self.pending.remove(&id) {
                warn!("Request {} #{} timed out", req.event, id);
                out.push(RequestOutcome::Failed {
                    id,
                    error: SyncError::AckTimeout(req.event.clone()),
                    event: req.event,
                });
            }
        }
        out.sort_by_key(RequestOutcome::id);
        out
    }

    /// Re-announce identity and ask for a fresh conversation list
    fn register(&mut self) {
        let Some(user_id) = self.user_id.clone() else {
            warn!("Connected without a user id; skipping registration");
            return;
        };
        self.handshakes += 1;
        info!("Registering as {} (handshake #{})", user_id, self.handshakes);
        if let Err(e) = self.emit(outbound::REGISTER, Value::String(user_id.clone())) {
            warn!("register failed: {}", e);
        }
        if let Err(e) = self.emit(outbound::GET_CONVERSATIONS, Value::String(user_id)) {
            warn!("getConversations failed: {}", e);
        }
    }

    /// Request a fresh conversation list for the registered user
    pub fn request_conversations(&mut self) -> Result<()> {
        let payload = self.user_id.clone().map(Value::String).unwrap_or(Value::Null);
        self.emit(outbound::GET_CONVERSATIONS, payload)
    }

    fn fail_pending(&mut self, why: &str) -> Vec<RequestOutcome> {
        let mut out: Vec<RequestOutcome> = self
            .pending
            .drain()
            .map(|(id, req)| RequestOutcome::Failed {
                id,
                error: SyncError::Cancelled(format!("{}: {}", req.event, why)),
                event: req.event,
            })
            .collect();
        out.sort_by_key(RequestOutcome::id);
        out
    }
}
