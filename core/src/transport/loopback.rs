/// In-memory transport: records what the client emits and lets the caller
/// feed inbound traffic by hand. Used by the test suite and offline runs.
use crate::error::{Result, SyncError};
use crate::transport::{AckId, Inbound, Transport};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// One recorded emission
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub event: String,
    pub payload: Value,
    pub ack: Option<AckId>,
}

#[derive(Debug, Default)]
struct Shared {
    open: bool,
    open_calls: usize,
    close_calls: usize,
    sent: Vec<Outbound>,
}

pub struct LoopbackTransport {
    shared: Arc<Mutex<Shared>>,
}

/// Test-side view of a `LoopbackTransport`
#[derive(Clone)]
pub struct LoopbackHandle {
    shared: Arc<Mutex<Shared>>,
    inbound: mpsc::UnboundedSender<Inbound>,
}

impl LoopbackTransport {
    pub fn new(inbound: mpsc::UnboundedSender<Inbound>) -> (Self, LoopbackHandle) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        let transport = Self { shared: shared.clone() };
        (transport, LoopbackHandle { shared, inbound })
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    // A panicking test thread must not hide the recorded traffic from others
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Transport for LoopbackTransport {
    fn open(&mut self) -> Result<()> {
        let mut shared = lock(&self.shared);
        shared.open = true;
        shared.open_calls += 1;
        Ok(())
    }

    fn close(&mut self) {
        let mut shared = lock(&self.shared);
        shared.open = false;
        shared.close_calls += 1;
    }

    fn emit(&mut self, event: &str, payload: Value) -> Result<()> {
        self.record(event, payload, None)
    }

    fn emit_with_ack(&mut self, event: &str, payload: Value, id: AckId) -> Result<()> {
        self.record(event, payload, Some(id))
    }
}

impl LoopbackTransport {
    fn record(&self, event: &str, payload: Value, ack: Option<AckId>) -> Result<()> {
        let mut shared = lock(&self.shared);
        if !shared.open {
            return Err(SyncError::Connection("loopback channel is closed".to_string()));
        }
        shared.sent.push(Outbound {
            event: event.to_string(),
            payload,
            ack,
        });
        Ok(())
    }
}

impl LoopbackHandle {
    /// Queue an inbound item as if the service had sent it
    pub fn push(&self, inbound: Inbound) {
        let _ = self.inbound.send(inbound);
    }

    pub fn push_event(&self, name: &str, payload: Value) {
        self.push(Inbound::Event {
            name: name.to_string(),
            payload,
        });
    }

    pub fn is_open(&self) -> bool {
        lock(&self.shared).open
    }

    pub fn open_calls(&self) -> usize {
        lock(&self.shared).open_calls
    }

    pub fn close_calls(&self) -> usize {
        lock(&self.shared).close_calls
    }

    /// Everything emitted so far
    pub fn sent(&self) -> Vec<Outbound> {
        lock(&self.shared).sent.clone()
    }

    /// Emissions of one event name
    pub fn sent_named(&self, event: &str) -> Vec<Outbound> {
        lock(&self.shared)
            .sent
            .iter()
            .filter(|o| o.event == event)
            .cloned()
            .collect()
    }

    /// Most recent emission of `event` that asked for an ack
    pub fn last_ack_id(&self, event: &str) -> Option<AckId> {
        lock(&self.shared)
            .sent
            .iter()
            .rev()
            .find(|o| o.event == event && o.ack.is_some())
            .and_then(|o| o.ack)
    }

    pub fn clear_sent(&self) {
        lock(&self.shared).sent.clear();
    }
}
