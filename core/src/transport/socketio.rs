/// Socket.IO client transport over a websocket, with automatic reconnection
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::transport::packet::{first_arg, EnginePacket, SocketPacket};
use crate::transport::{AckId, Inbound, Transport};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};
use url::Url;

/// Used until the server's `open` packet tells us the real ping window
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(20);

/// Reconnection backoff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// 0 = unlimited
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 0,
        }
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            initial_delay: config.reconnect_delay,
            max_delay: config.max_reconnect_delay,
            max_attempts: config.max_reconnect_attempts,
        }
    }

    /// Exponential backoff capped at `max_delay`, without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Backoff plus up to 25% random jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let spread = (base.as_millis() as u64) / 4;
        let jitter = if spread > 0 {
            rand::thread_rng().gen_range(0..=spread)
        } else {
            0
        };
        base + Duration::from_millis(jitter)
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }
}

enum Command {
    Send(String),
    Close,
}

enum SessionEnd {
    ClosedByClient,
    Dropped { reason: String, was_connected: bool },
}

/// Build the Engine.IO websocket endpoint from the service base URL
pub fn websocket_endpoint(server_url: &str) -> Result<Url> {
    let mut url = Url::parse(server_url)
        .map_err(|e| SyncError::Config(format!("Invalid server URL '{}': {}", server_url, e)))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(SyncError::Config(format!("Unsupported URL scheme: {}", other))),
    };
    url.set_scheme(scheme)
        .map_err(|_| SyncError::Config(format!("Cannot use scheme {} for {}", scheme, server_url)))?;
    url.set_path("/socket.io/");
    url.set_query(Some("EIO=4&transport=websocket"));
    Ok(url)
}

pub struct SocketIoTransport {
    endpoint: Url,
    policy: ReconnectPolicy,
    inbound: mpsc::UnboundedSender<Inbound>,
    commands: Option<mpsc::UnboundedSender<Command>>,
    task: Option<JoinHandle<()>>,
}

impl SocketIoTransport {
    pub fn new(server_url: &str, policy: ReconnectPolicy, inbound: mpsc::UnboundedSender<Inbound>) -> Result<Self> {
        Ok(Self {
            endpoint: websocket_endpoint(server_url)?,
            policy,
            inbound,
            commands: None,
            task: None,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn send_packet(&self, event: &str, payload: Value, ack: Option<AckId>) -> Result<()> {
        let commands = self
            .commands
            .as_ref()
            .ok_or_else(|| SyncError::NotConnected(event.to_string()))?;
        let data = SocketPacket::event(event, payload, ack).encode()?;
        let text = EnginePacket::Message(data).encode();
        commands
            .send(Command::Send(text))
            .map_err(|_| SyncError::Connection("socket task has stopped".to_string()))
    }
}

impl Transport for SocketIoTransport {
    fn open(&mut self) -> Result<()> {
        if let Some(task) = &self.task {
            if !task.is_finished() {
                return Ok(());
            }
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let endpoint = self.endpoint.clone();
        let policy = self.policy.clone();
        let inbound = self.inbound.clone();
        info!("Opening socket to {}", endpoint);
        self.task = Some(tokio::spawn(run_socket(endpoint, policy, inbound, rx)));
        self.commands = Some(tx);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(Command::Close);
        }
        // The task exits on its own once it sees the close command
        self.task = None;
    }

    fn emit(&mut self, event: &str, payload: Value) -> Result<()> {
        self.send_packet(event, payload, None)
    }

    fn emit_with_ack(&mut self, event: &str, payload: Value, id: AckId) -> Result<()> {
        self.send_packet(event, payload, Some(id))
    }
}

impl Drop for SocketIoTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Connection loop: connect, drive the session, back off, repeat
async fn run_socket(
    endpoint: Url,
    policy: ReconnectPolicy,
    inbound: mpsc::UnboundedSender<Inbound>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        if inbound.send(Inbound::Connecting { attempt }).is_err() {
            return;
        }

        let reason = match connect_async(endpoint.as_str()).await {
            Ok((ws, _)) => {
                debug!("Websocket open to {}", endpoint);
                match drive_session(ws, &inbound, &mut commands).await {
                    SessionEnd::ClosedByClient => {
                        info!("Socket closed by client");
                        return;
                    }
                    SessionEnd::Dropped { reason, was_connected } => {
                        if was_connected {
                            attempt = 0;
                        }
                        reason
                    }
                }
            }
            Err(e) => format!("connect failed: {}", e),
        };

        warn!("Socket dropped: {}", reason);
        if inbound.send(Inbound::Disconnected { reason }).is_err() {
            return;
        }

        if policy.exhausted(attempt) {
            error!("Giving up after {} reconnect attempts", attempt);
            return;
        }

        let deadline = Instant::now() + policy.delay_for(attempt.max(1));
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => break,
                cmd = commands.recv() => match cmd {
                    Some(Command::Send(_)) => debug!("Dropping emit while reconnecting"),
                    Some(Command::Close) | None => return,
                },
            }
        }
    }
}

async fn drive_session<S>(
    ws: tokio_tungstenite::WebSocketStream<S>,
    inbound: &mpsc::UnboundedSender<Inbound>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> SessionEnd
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = ws.split();
    let mut connected = false;
    let mut liveness = HANDSHAKE_TIMEOUT;

    macro_rules! dropped {
        ($reason:expr) => {
            return SessionEnd::Dropped {
                reason: $reason,
                was_connected: connected,
            }
        };
    }

    loop {
        tokio::select! {
            frame = timeout(liveness, stream.next()) => {
                let text = match frame {
                    Err(_) => dropped!("ping timeout".to_string()),
                    Ok(None) => dropped!("connection closed".to_string()),
                    Ok(Some(Err(e))) => dropped!(e.to_string()),
                    Ok(Some(Ok(WsMessage::Text(text)))) => text,
                    Ok(Some(Ok(WsMessage::Close(_)))) => dropped!("closed by server".to_string()),
                    Ok(Some(Ok(_))) => continue,
                };

                let packet = match EnginePacket::decode(&text) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("Ignoring engine packet {:?}: {}", text, e);
                        continue;
                    }
                };

                match packet {
                    EnginePacket::Open(info) => {
                        debug!("Engine session {} opened", info.sid);
                        liveness = info.liveness_window();
                        let connect = match SocketPacket::Connect(None).encode() {
                            Ok(c) => c,
                            Err(e) => dropped!(e.to_string()),
                        };
                        if let Err(e) = sink.send(WsMessage::Text(EnginePacket::Message(connect).encode())).await {
                            dropped!(e.to_string());
                        }
                    }
                    EnginePacket::Ping => {
                        if let Err(e) = sink.send(WsMessage::Text(EnginePacket::Pong.encode())).await {
                            dropped!(e.to_string());
                        }
                    }
                    EnginePacket::Close => dropped!("engine session closed by server".to_string()),
                    EnginePacket::Message(data) => match SocketPacket::decode(&data) {
                        Ok(SocketPacket::Connect(_)) => {
                            connected = true;
                            let _ = inbound.send(Inbound::Connected);
                        }
                        Ok(SocketPacket::Disconnect) => dropped!("disconnected by server".to_string()),
                        Ok(SocketPacket::ConnectError(data)) => dropped!(format!("connect error: {}", data)),
                        Ok(SocketPacket::Event { name, args, ack }) => {
                            if ack.is_some() {
                                debug!("Server asked for an ack on '{}'; not supported", name);
                            }
                            let _ = inbound.send(Inbound::Event { name, payload: first_arg(args) });
                        }
                        Ok(SocketPacket::Ack { id, args }) => {
                            let _ = inbound.send(Inbound::Ack { id, payload: first_arg(args) });
                        }
                        Err(e) => warn!("Ignoring socket packet {:?}: {}", data, e),
                    },
                    EnginePacket::Pong | EnginePacket::Upgrade | EnginePacket::Noop => {}
                }
            }
            cmd = commands.recv() => match cmd {
                Some(Command::Send(text)) => {
                    if let Err(e) = sink.send(WsMessage::Text(text)).await {
                        dropped!(e.to_string());
                    }
                }
                Some(Command::Close) | None => {
                    if let Ok(disconnect) = SocketPacket::Disconnect.encode() {
                        let _ = sink.send(WsMessage::Text(EnginePacket::Message(disconnect).encode())).await;
                    }
                    let _ = sink.close().await;
                    return SessionEnd::ClosedByClient;
                }
            },
        }
    }
}
