//! Client connection manager
//!
//! Presents one stable logical connection to the rest of the application
//! despite an unreliable transport. The manager owns the reconnect state
//! machine:
//!
//! ```text
//! Idle -> Connecting -> Connected -> Disconnected -> Connecting -> ...
//!                          |                |
//!                          v                v  (retries exhausted)
//!                       Stopped           Error
//! ```
//!
//! `Stopped` is reachable only through an explicit `disconnect()` and cancels
//! any pending reconnect. The caller's subscription intent (topics + node
//! filter) survives reconnects and is replayed as a fresh `subscribe` frame
//! every time the phase enters `Connected`, so callers never resubscribe by
//! hand.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broadcast::{Envelope, NodeId, Topic};
use crate::client::dispatch::TelemetryState;
use crate::transport::message::ClientMessage;

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Lifecycle phase of the logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    /// Reconnect attempts exhausted. Terminal; the application should show a
    /// persistent offline indicator rather than spin.
    Error,
    /// Explicitly disconnected. Terminal.
    Stopped,
}

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub url: String,
    pub base_delay: Duration,
    pub backoff_factor: f64,
    pub max_attempts: u32,
    pub ping_interval: Duration,
    /// No inbound traffic for this long is treated as a transport close;
    /// catches sockets the OS still reports as open but whose peer is gone.
    pub idle_grace: Duration,
    pub auto_reconnect: bool,
}

impl ManagerSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            base_delay: Duration::from_millis(500),
            backoff_factor: 1.5,
            max_attempts: 5,
            ping_interval: Duration::from_secs(15),
            idle_grace: Duration::from_secs(45),
            auto_reconnect: true,
        }
    }
}

#[derive(Debug)]
enum Command {
    Send(ClientMessage),
    Disconnect,
}

#[derive(Debug, Default, Clone)]
struct Desired {
    topics: HashSet<Topic>,
    node_filter: HashSet<NodeId>,
}

enum SessionEnd {
    Stopped,
    Lost,
}

pub struct ConnectionManager {
    settings: ManagerSettings,
    desired: Arc<Mutex<Desired>>,
    telemetry: Arc<TelemetryState>,
    phase_tx: Arc<watch::Sender<ConnectionPhase>>,
    attempts: Arc<AtomicU32>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    cmd_rx: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
}

impl ConnectionManager {
    pub fn new(settings: ManagerSettings) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (phase_tx, _) = watch::channel(ConnectionPhase::Idle);
        Self {
            settings,
            desired: Arc::new(Mutex::new(Desired {
                topics: Topic::default_set().into_iter().collect(),
                node_filter: HashSet::new(),
            })),
            telemetry: Arc::new(TelemetryState::default()),
            phase_tx: Arc::new(phase_tx),
            attempts: Arc::new(AtomicU32::new(0)),
            cmd_tx,
            cmd_rx: Mutex::new(Some(cmd_rx)),
        }
    }

    /// Starts the connection task. A second call while the task is alive is
    /// a no-op; after `disconnect()` the manager stays stopped and no new
    /// task is spawned.
    pub fn connect(&self) -> Option<JoinHandle<()>> {
        // Stopped is terminal, even when the worker never ran.
        if self.phase() == ConnectionPhase::Stopped {
            return None;
        }
        let cmd_rx = self.cmd_rx.lock().unwrap().take()?;
        let worker = Worker {
            settings: self.settings.clone(),
            desired: self.desired.clone(),
            telemetry: self.telemetry.clone(),
            phase_tx: self.phase_tx.clone(),
            attempts: self.attempts.clone(),
        };
        Some(tokio::spawn(worker.run(cmd_rx)))
    }

    /// Tears the connection down for good and cancels any pending reconnect.
    /// Idempotent.
    pub fn disconnect(&self) {
        if self.cmd_rx.lock().unwrap().is_some() {
            // Never started; mark terminal directly.
            self.phase_tx.send_replace(ConnectionPhase::Stopped);
        }
        let _ = self.cmd_tx.send(Command::Disconnect);
    }

    /// Adds topics (and node-filter entries) to the desired subscription.
    /// Applied immediately when connected, otherwise on the next connect.
    pub fn subscribe(&self, topics: &[Topic], node_ids: &[NodeId]) {
        {
            let mut desired = self.desired.lock().unwrap();
            desired.topics.extend(topics.iter().copied());
            desired.node_filter.extend(node_ids.iter().cloned());
        }
        let _ = self.cmd_tx.send(Command::Send(ClientMessage::Subscribe {
            topics: topics.to_vec(),
            node_ids: if node_ids.is_empty() {
                None
            } else {
                Some(node_ids.to_vec())
            },
        }));
    }

    /// Removes topics from the desired subscription.
    pub fn unsubscribe(&self, topics: &[Topic]) {
        {
            let mut desired = self.desired.lock().unwrap();
            for topic in topics {
                desired.topics.remove(topic);
            }
        }
        let _ = self.cmd_tx.send(Command::Send(ClientMessage::Unsubscribe {
            topics: topics.to_vec(),
        }));
    }

    pub fn phase(&self) -> ConnectionPhase {
        *self.phase_tx.borrow()
    }

    /// Watch channel observers can await for phase transitions.
    pub fn watch_phase(&self) -> watch::Receiver<ConnectionPhase> {
        self.phase_tx.subscribe()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    pub fn telemetry(&self) -> Arc<TelemetryState> {
        self.telemetry.clone()
    }
}

/// Delay before reconnect attempt number `attempt` (zero-based).
pub(crate) fn backoff_delay(base: Duration, factor: f64, attempt: u32) -> Duration {
    base.mul_f64(factor.powi(attempt as i32))
}

struct Worker {
    settings: ManagerSettings,
    desired: Arc<Mutex<Desired>>,
    telemetry: Arc<TelemetryState>,
    phase_tx: Arc<watch::Sender<ConnectionPhase>>,
    attempts: Arc<AtomicU32>,
}

impl Worker {
    async fn run(self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        loop {
            self.phase_tx.send_replace(ConnectionPhase::Connecting);
            match connect_async(self.settings.url.as_str()).await {
                Ok((ws, _)) => {
                    self.attempts.store(0, Ordering::Relaxed);
                    self.phase_tx.send_replace(ConnectionPhase::Connected);
                    info!("connected to {}", self.settings.url);
                    match self.run_session(ws, &mut cmd_rx).await {
                        SessionEnd::Stopped => {
                            self.phase_tx.send_replace(ConnectionPhase::Stopped);
                            return;
                        }
                        SessionEnd::Lost => {
                            self.phase_tx.send_replace(ConnectionPhase::Disconnected);
                        }
                    }
                }
                Err(e) => {
                    warn!("connect to {} failed: {e}", self.settings.url);
                    self.phase_tx.send_replace(ConnectionPhase::Disconnected);
                }
            }

            if !self.settings.auto_reconnect {
                return;
            }
            let attempt = self.attempts.load(Ordering::Relaxed);
            if attempt >= self.settings.max_attempts {
                warn!("giving up after {attempt} reconnect attempts");
                self.phase_tx.send_replace(ConnectionPhase::Error);
                return;
            }
            self.attempts.store(attempt + 1, Ordering::Relaxed);

            let delay = backoff_delay(
                self.settings.base_delay,
                self.settings.backoff_factor,
                attempt,
            );
            debug!("reconnecting in {delay:?} (attempt {})", attempt + 1);
            let deadline = Instant::now() + delay;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => break,
                    cmd = cmd_rx.recv() => match cmd {
                        // Subscription intent is already recorded in
                        // `desired`; the frame is replayed on reconnect.
                        Some(Command::Send(_)) => {}
                        Some(Command::Disconnect) | None => {
                            self.phase_tx.send_replace(ConnectionPhase::Stopped);
                            return;
                        }
                    },
                }
            }
        }
    }

    async fn run_session(
        &self,
        ws: WsClient,
        cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    ) -> SessionEnd {
        let (mut sink, mut stream) = ws.split();

        // Replay the full desired subscription; this is what makes
        // reconnection transparent to callers.
        let replay = self.subscribe_frame();
        if Self::send(&mut sink, &replay).await.is_err() {
            return SessionEnd::Lost;
        }

        let mut ping = tokio::time::interval(self.settings.ping_interval);
        ping.tick().await; // immediate first tick
        let mut last_traffic = Instant::now();

        loop {
            let idle_deadline = last_traffic + self.settings.idle_grace;
            tokio::select! {
                msg = stream.next() => match msg {
                    Some(Ok(frame)) => {
                        last_traffic = Instant::now();
                        if frame.is_text() {
                            if let Err(end) = self.dispatch(&mut sink, &frame).await {
                                return end;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        debug!("transport error: {e}");
                        return SessionEnd::Lost;
                    }
                    None => return SessionEnd::Lost,
                },
                _ = ping.tick() => {
                    if Self::send(&mut sink, &ClientMessage::Ping).await.is_err() {
                        return SessionEnd::Lost;
                    }
                }
                _ = tokio::time::sleep_until(idle_deadline) => {
                    warn!("no traffic for {:?}, treating socket as dead", self.settings.idle_grace);
                    return SessionEnd::Lost;
                }
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Send(msg)) => {
                        if Self::send(&mut sink, &msg).await.is_err() {
                            return SessionEnd::Lost;
                        }
                    }
                    Some(Command::Disconnect) | None => {
                        let _ = sink.close().await;
                        return SessionEnd::Stopped;
                    }
                },
            }
        }
    }

    /// Decodes and routes one inbound text frame. Server liveness probes are
    /// answered with a `ping` so the registry keeps this connection alive.
    async fn dispatch(
        &self,
        sink: &mut futures_util::stream::SplitSink<WsClient, WsMessage>,
        frame: &WsMessage,
    ) -> Result<(), SessionEnd> {
        let text = frame.to_text().unwrap_or_default();
        match serde_json::from_str::<Envelope>(text) {
            Ok(envelope) => {
                let is_probe = envelope.topic == Topic::Pong
                    && envelope.data.get("probe").and_then(|p| p.as_bool()) == Some(true);
                self.telemetry.apply(envelope);
                if is_probe && Self::send(sink, &ClientMessage::Ping).await.is_err() {
                    return Err(SessionEnd::Lost);
                }
                Ok(())
            }
            Err(e) => {
                // Tolerated; the server may be a protocol version ahead.
                debug!("undecodable envelope: {e}");
                Ok(())
            }
        }
    }

    fn subscribe_frame(&self) -> ClientMessage {
        let desired = self.desired.lock().unwrap();
        ClientMessage::Subscribe {
            topics: desired.topics.iter().copied().collect(),
            node_ids: if desired.node_filter.is_empty() {
                None
            } else {
                Some(desired.node_filter.iter().cloned().collect())
            },
        }
    }

    async fn send(
        sink: &mut futures_util::stream::SplitSink<WsClient, WsMessage>,
        msg: &ClientMessage,
    ) -> Result<(), tungstenite::Error> {
        let json = match serde_json::to_string(msg) {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to serialize control frame: {e}");
                return Ok(());
            }
        };
        sink.send(WsMessage::text(json)).await
    }
}
