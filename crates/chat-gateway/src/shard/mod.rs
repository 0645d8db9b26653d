//! Shard connection state machine
//!
//! A [`Shard`] owns one persistent gateway connection: the
//! connect/identify/resume handshake, the heartbeat loop with liveness
//! detection, decompression of streamed frames, and close-code driven
//! recovery. Reconnects preserve the session where the protocol allows a
//! resume; fatal close codes surface as critical events and stop the shard.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chat_common::{ClientConfig, RetryPolicy};
use chat_core::{EventDispatcher, Intents};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::compression::Inflater;
use crate::error::ShardError;
use crate::events::{CriticalEvent, DispatchEvent};
use crate::limiter::{CommandBudget, IdentifyLimiter};
use crate::protocol::{
    CloseCode, ClosePolicy, GatewayMessage, HelloPayload, IdentifyPayload, IdentifyProperties,
    OpCode, PresenceUpdatePayload, RequestGuildMembersPayload, ResumePayload,
    VoiceStateUpdatePayload,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Resumable session bookkeeping
///
/// `sequence = 0` means no dispatch has been seen yet; the protocol
/// sequences from 1.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    /// Session id issued by READY
    pub id: Option<String>,
    /// Last dispatch sequence number received
    pub sequence: u64,
}

impl SessionState {
    /// Whether a Resume is possible instead of a fresh Identify
    #[must_use]
    pub fn can_resume(&self) -> bool {
        self.id.is_some() && self.sequence != 0
    }
}

/// Connection lifecycle phase, observable through a watch channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardPhase {
    /// No socket
    Disconnected,
    /// Transport connect in progress
    Connecting,
    /// Socket open, waiting for the server's Hello
    AwaitingHello,
    /// Identify sent, waiting for READY
    Identifying,
    /// Resume sent
    Resuming,
    /// Session established, commands may flow
    Ready,
}

/// Static configuration for one shard
#[derive(Debug, Clone)]
pub struct ShardConfig {
    /// This shard's id
    pub shard_id: u32,
    /// Total shard count the session identifies with
    pub shard_count: u32,
    /// Gateway WebSocket URL
    pub gateway_url: String,
    /// Raw authentication token
    pub token: String,
    /// Gateway intents bitmask
    pub intents: Intents,
    /// How long to wait for Hello before restarting the attempt
    pub hello_timeout: Duration,
    /// How long to wait for READY after Identify
    pub identify_timeout: Duration,
}

impl ShardConfig {
    /// Create a config with the default handshake timeouts
    #[must_use]
    pub fn new(
        shard_id: u32,
        shard_count: u32,
        gateway_url: impl Into<String>,
        token: impl Into<String>,
        intents: Intents,
    ) -> Self {
        Self {
            shard_id,
            shard_count,
            gateway_url: gateway_url.into(),
            token: token.into(),
            intents,
            hello_timeout: Duration::from_secs(10),
            identify_timeout: Duration::from_secs(30),
        }
    }

    /// Build a shard config from the client configuration
    #[must_use]
    pub fn from_client(
        config: &ClientConfig,
        shard_id: u32,
        shard_count: u32,
        gateway_url: String,
    ) -> Self {
        Self {
            shard_id,
            shard_count,
            gateway_url,
            token: config.token.clone(),
            intents: config.gateway.intents,
            hello_timeout: Duration::from_secs(config.gateway.hello_timeout_secs),
            identify_timeout: Duration::from_secs(config.gateway.identify_timeout_secs),
        }
    }
}

/// One gateway connection
pub struct Shard {
    config: ShardConfig,
    identify_limiter: Arc<IdentifyLimiter>,
    budget: CommandBudget,
    retry: RetryPolicy,

    session: Mutex<SessionState>,
    resume_url: Mutex<Option<String>>,
    phase_tx: watch::Sender<ShardPhase>,

    connecting: AtomicBool,
    closed: AtomicBool,
    // Bumped on every socket teardown; stale tasks observe the change and exit
    generation: AtomicU64,
    writer: Mutex<Option<mpsc::UnboundedSender<Message>>>,

    heartbeat_acked: AtomicBool,
    heartbeat_sent_at: Mutex<Option<Instant>>,
    latency: Mutex<Option<Duration>>,

    raw: EventDispatcher<GatewayMessage>,
    events: EventDispatcher<DispatchEvent>,
    critical: EventDispatcher<CriticalEvent>,
}

/// Resets the connecting flag when `connect()` exits by any path
struct ConnectGuard<'a>(&'a AtomicBool);

impl Drop for ConnectGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Shard {
    /// Create a disconnected shard
    #[must_use]
    pub fn new(config: ShardConfig, identify_limiter: Arc<IdentifyLimiter>) -> Arc<Self> {
        let (phase_tx, _phase_rx) = watch::channel(ShardPhase::Disconnected);
        Arc::new(Self {
            config,
            identify_limiter,
            budget: CommandBudget::new(),
            retry: RetryPolicy::gateway_default(),
            session: Mutex::new(SessionState::default()),
            resume_url: Mutex::new(None),
            phase_tx,
            connecting: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            writer: Mutex::new(None),
            heartbeat_acked: AtomicBool::new(true),
            heartbeat_sent_at: Mutex::new(None),
            latency: Mutex::new(None),
            raw: EventDispatcher::new(),
            events: EventDispatcher::new(),
            critical: EventDispatcher::new(),
        })
    }

    /// This shard's id
    #[must_use]
    pub fn shard_id(&self) -> u32 {
        self.config.shard_id
    }

    /// Current lifecycle phase
    #[must_use]
    pub fn phase(&self) -> ShardPhase {
        *self.phase_tx.borrow()
    }

    /// Subscribe to phase changes
    #[must_use]
    pub fn phase_watch(&self) -> watch::Receiver<ShardPhase> {
        self.phase_tx.subscribe()
    }

    /// Whether the session is established
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.phase() == ShardPhase::Ready
    }

    /// Round-trip latency from the last acknowledged heartbeat
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        *self.latency.lock()
    }

    /// Snapshot of the session bookkeeping
    #[must_use]
    pub fn session(&self) -> SessionState {
        self.session.lock().clone()
    }

    /// Raw messages keyed by opcode name
    #[must_use]
    pub fn raw_events(&self) -> &EventDispatcher<GatewayMessage> {
        &self.raw
    }

    /// Named dispatch events
    #[must_use]
    pub fn events(&self) -> &EventDispatcher<DispatchEvent> {
        &self.events
    }

    /// Fatal conditions that stopped the shard
    #[must_use]
    pub fn critical_events(&self) -> &EventDispatcher<CriticalEvent> {
        &self.critical
    }

    /// Open the gateway connection
    ///
    /// Fails fast when another connect is already in flight. Transport
    /// failures retry with unbounded exponential backoff; a missing Hello
    /// restarts the attempt. Returns once Hello has been processed; the
    /// identify/resume handshake continues in the background.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ShardError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ShardError::Closed);
        }
        if self
            .connecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ShardError::AlreadyConnecting(self.config.shard_id));
        }
        let _guard = ConnectGuard(&self.connecting);

        let mut attempt = 0u32;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(ShardError::Closed);
            }
            self.teardown();
            self.set_phase(ShardPhase::Connecting);

            let url = self.connect_url();
            let socket = match connect_async(&url).await {
                Ok((socket, _response)) => socket,
                Err(err) => {
                    let delay = self.retry.backoff_delay(attempt);
                    warn!(
                        shard_id = self.config.shard_id,
                        attempt,
                        error = %err,
                        ?delay,
                        "Gateway connect failed, backing off"
                    );
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            let generation = self.generation.load(Ordering::SeqCst);
            let (sink, stream) = socket.split();
            let (writer_tx, writer_rx) = mpsc::unbounded_channel();
            *self.writer.lock() = Some(writer_tx);
            tokio::spawn(write_loop(sink, writer_rx));

            self.set_phase(ShardPhase::AwaitingHello);
            let mut phase_rx = self.phase_tx.subscribe();

            let shard = Arc::clone(self);
            tokio::spawn(async move { shard.read_loop(stream, generation).await });

            let hello = tokio::time::timeout(
                self.config.hello_timeout,
                phase_rx.wait_for(|phase| !matches!(phase, ShardPhase::AwaitingHello)),
            )
            .await
            .map(|result| result.map(|phase| *phase));

            match hello {
                Ok(Ok(phase)) if phase != ShardPhase::Disconnected => {
                    debug!(shard_id = self.config.shard_id, "Hello processed");
                    return Ok(());
                }
                Ok(Ok(_)) => {
                    // Lost the socket before Hello
                    attempt += 1;
                    tokio::time::sleep(self.retry.backoff_delay(attempt)).await;
                }
                Ok(Err(_)) => return Err(ShardError::Closed),
                Err(_) => {
                    warn!(
                        shard_id = self.config.shard_id,
                        error = %ShardError::HelloTimeout,
                        "Restarting connect attempt"
                    );
                    attempt += 1;
                    tokio::time::sleep(self.retry.backoff_delay(attempt)).await;
                }
            }
        }
    }

    /// Send a command once the session is ready
    ///
    /// Waits for the `Ready` phase, then draws from the per-shard command
    /// budget. Handshake frames and heartbeats use the internal path and
    /// bypass both gates.
    pub async fn send(&self, message: GatewayMessage) -> Result<(), ShardError> {
        let mut rx = self.phase_tx.subscribe();
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(ShardError::Closed);
            }
            if *rx.borrow_and_update() == ShardPhase::Ready {
                break;
            }
            if rx.changed().await.is_err() {
                return Err(ShardError::Closed);
            }
        }
        self.budget.acquire().await;
        self.send_internal(&message)
    }

    /// Update the presence shown for this shard
    pub async fn update_presence(
        &self,
        payload: &PresenceUpdatePayload,
    ) -> Result<(), ShardError> {
        self.send(GatewayMessage::presence_update(payload)).await
    }

    /// Join, move, or leave a voice channel
    pub async fn update_voice_state(
        &self,
        payload: &VoiceStateUpdatePayload,
    ) -> Result<(), ShardError> {
        self.send(GatewayMessage::voice_state_update(payload)).await
    }

    /// Request a guild member chunk
    pub async fn request_guild_members(
        &self,
        payload: &RequestGuildMembersPayload,
    ) -> Result<(), ShardError> {
        self.send(GatewayMessage::request_guild_members(payload))
            .await
    }

    /// Close the shard permanently
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.writer.lock() = None;
        self.phase_tx.send_replace(ShardPhase::Disconnected);
        self.raw.close();
        self.events.close();
        self.critical.close();
        info!(shard_id = self.config.shard_id, "Shard closed");
    }

    // === Internals ===

    fn set_phase(&self, phase: ShardPhase) {
        let previous = self.phase_tx.send_replace(phase);
        if previous != phase {
            debug!(
                shard_id = self.config.shard_id,
                from = ?previous,
                to = ?phase,
                "Shard phase change"
            );
        }
    }

    fn connect_url(&self) -> String {
        let resumable = self.session.lock().can_resume();
        if resumable {
            if let Some(url) = self.resume_url.lock().clone() {
                return url;
            }
        }
        self.config.gateway_url.clone()
    }

    /// Drop the current socket without touching the session
    fn teardown(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        *self.writer.lock() = None;
        self.heartbeat_acked.store(true, Ordering::SeqCst);
        *self.heartbeat_sent_at.lock() = None;
    }

    /// Tear down the socket owned by `generation`
    ///
    /// The compare-exchange makes this idempotent per socket: whichever task
    /// notices the disconnect first wins, later callers see a stale
    /// generation and do nothing.
    fn begin_disconnect(&self, generation: u64) -> bool {
        if self
            .generation
            .compare_exchange(
                generation,
                generation + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return false;
        }
        *self.writer.lock() = None;
        self.set_phase(ShardPhase::Disconnected);
        true
    }

    fn clear_session(&self) {
        let mut session = self.session.lock();
        session.id = None;
        session.sequence = 0;
        drop(session);
        *self.resume_url.lock() = None;
    }

    fn last_sequence(&self) -> Option<u64> {
        let sequence = self.session.lock().sequence;
        (sequence != 0).then_some(sequence)
    }

    fn send_internal(&self, message: &GatewayMessage) -> Result<(), ShardError> {
        let json = message.to_json()?;
        let writer = self.writer.lock().clone();
        let Some(writer) = writer else {
            return Err(ShardError::NotReady(self.config.shard_id));
        };
        writer
            .send(Message::Text(json))
            .map_err(|_| ShardError::NotReady(self.config.shard_id))
    }

    fn spawn_reconnect(self: &Arc<Self>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let shard = Arc::clone(self);
        tokio::spawn(async move {
            match shard.connect().await {
                Ok(()) | Err(ShardError::AlreadyConnecting(_) | ShardError::Closed) => {}
                Err(err) => {
                    warn!(shard_id = shard.config.shard_id, error = %err, "Reconnect failed");
                }
            }
        });
    }

    async fn read_loop(self: Arc<Self>, mut stream: SplitStream<WsStream>, generation: u64) {
        let mut inflater = Inflater::new();

        while let Some(frame) = stream.next().await {
            if self.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            match frame {
                Ok(Message::Text(text)) => self.handle_payload(&text, generation),
                Ok(Message::Binary(bytes)) => match inflater.extend(&bytes) {
                    Ok(Some(text)) => self.handle_payload(&text, generation),
                    Ok(None) => {}
                    Err(err) => {
                        // Stream context is desynced; only a new socket helps
                        error!(
                            shard_id = self.config.shard_id,
                            error = %err,
                            "Decompression failed, forcing reconnect"
                        );
                        if self.begin_disconnect(generation) {
                            self.spawn_reconnect();
                        }
                        return;
                    }
                },
                Ok(Message::Close(close_frame)) => {
                    let code = close_frame.map_or(1000, |frame| u16::from(frame.code));
                    self.handle_disconnect(code, generation);
                    return;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(
                        shard_id = self.config.shard_id,
                        error = %err,
                        "Gateway socket error"
                    );
                    self.handle_disconnect(1006, generation);
                    return;
                }
            }
        }

        // Stream ended without a close frame
        if self.generation.load(Ordering::SeqCst) == generation {
            self.handle_disconnect(1006, generation);
        }
    }

    fn handle_payload(self: &Arc<Self>, text: &str, generation: u64) {
        let message = match GatewayMessage::from_json(text) {
            Ok(message) => message,
            Err(err) => {
                warn!(
                    shard_id = self.config.shard_id,
                    error = %err,
                    "Discarding unparseable gateway payload"
                );
                return;
            }
        };

        self.raw.dispatch(message.op.name(), message.clone());

        match message.op {
            OpCode::Hello => {
                if let Some(hello) = message.as_hello() {
                    self.on_hello(&hello, generation);
                } else {
                    warn!(shard_id = self.config.shard_id, "Hello without payload");
                }
            }
            OpCode::HeartbeatAck => self.on_heartbeat_ack(),
            OpCode::Heartbeat => {
                // Server asked for an immediate beat
                let beat = GatewayMessage::heartbeat(self.last_sequence());
                if self.send_internal(&beat).is_err() {
                    debug!(
                        shard_id = self.config.shard_id,
                        "Requested heartbeat had no socket"
                    );
                }
            }
            OpCode::Reconnect => {
                info!(shard_id = self.config.shard_id, "Server requested reconnect");
                if self.begin_disconnect(generation) {
                    self.spawn_reconnect();
                }
            }
            OpCode::InvalidSession => {
                let resumable = message.as_invalid_session().unwrap_or(false);
                info!(shard_id = self.config.shard_id, resumable, "Invalid session");
                if !resumable {
                    self.clear_session();
                }
                if self.begin_disconnect(generation) {
                    self.spawn_reconnect();
                }
            }
            OpCode::Dispatch => self.on_dispatch(&message),
            other => {
                debug!(
                    shard_id = self.config.shard_id,
                    op = %other,
                    "Ignoring client-direction opcode from server"
                );
            }
        }
    }

    fn on_hello(self: &Arc<Self>, hello: &HelloPayload, generation: u64) {
        let interval = Duration::from_millis(hello.heartbeat_interval);
        self.budget
            .reserve_heartbeats(hello.heartbeat_interval.div_ceil(1000));

        let shard = Arc::clone(self);
        tokio::spawn(async move { shard.heartbeat_loop(interval, generation).await });

        let can_resume = self.session.lock().can_resume();
        if can_resume {
            self.set_phase(ShardPhase::Resuming);
            let payload = {
                let session = self.session.lock();
                ResumePayload {
                    token: self.config.token.clone(),
                    session_id: session.id.clone().unwrap_or_default(),
                    seq: session.sequence,
                }
            };
            if self.send_internal(&GatewayMessage::resume(&payload)).is_ok() {
                // The resume ack is implicit and may trail an arbitrarily
                // long replay backlog, so the shard is optimistically ready
                self.set_phase(ShardPhase::Ready);
            }
        } else {
            self.set_phase(ShardPhase::Identifying);
            let shard = Arc::clone(self);
            tokio::spawn(async move { shard.identify_flow(generation).await });
        }
    }

    async fn identify_flow(self: Arc<Self>, generation: u64) {
        self.identify_limiter.acquire(self.config.shard_id).await;
        if self.generation.load(Ordering::SeqCst) != generation
            || self.closed.load(Ordering::SeqCst)
        {
            return;
        }

        let payload = IdentifyPayload {
            token: self.config.token.clone(),
            properties: IdentifyProperties::library(),
            intents: self.config.intents,
            shard: [self.config.shard_id, self.config.shard_count],
            compress: true,
        };
        if self
            .send_internal(&GatewayMessage::identify(&payload))
            .is_err()
        {
            return;
        }

        let mut phase_rx = self.phase_tx.subscribe();
        let outcome = tokio::time::timeout(
            self.config.identify_timeout,
            phase_rx
                .wait_for(|phase| matches!(phase, ShardPhase::Ready | ShardPhase::Disconnected)),
        )
        .await;

        match outcome {
            Ok(Ok(phase)) => {
                if *phase == ShardPhase::Ready {
                    info!(shard_id = self.config.shard_id, "Identify completed");
                } else {
                    warn!(
                        shard_id = self.config.shard_id,
                        "Disconnected before READY arrived"
                    );
                }
            }
            Ok(Err(_)) => {}
            Err(_) => {
                // The identify permit stays consumed; the 5s window recovers
                warn!(
                    shard_id = self.config.shard_id,
                    error = %ShardError::IdentifyTimeout,
                    "Restarting connection"
                );
                if self.begin_disconnect(generation) {
                    self.spawn_reconnect();
                }
            }
        }
    }

    async fn heartbeat_loop(self: Arc<Self>, interval: Duration, generation: u64) {
        // First beat lands at a random point in the interval so a fleet of
        // shards does not beat in lockstep
        let jitter = interval.mul_f64(rand::random::<f64>());
        tokio::time::sleep(jitter).await;

        loop {
            if self.generation.load(Ordering::SeqCst) != generation
                || self.closed.load(Ordering::SeqCst)
            {
                return;
            }
            if !self.heartbeat_acked.swap(false, Ordering::SeqCst) {
                warn!(
                    shard_id = self.config.shard_id,
                    "Heartbeat ack missed, treating connection as dead"
                );
                if self.begin_disconnect(generation) {
                    self.spawn_reconnect();
                }
                return;
            }

            *self.heartbeat_sent_at.lock() = Some(Instant::now());
            let beat = GatewayMessage::heartbeat(self.last_sequence());
            if self.send_internal(&beat).is_err() {
                return;
            }
            tokio::time::sleep(interval).await;
        }
    }

    fn on_heartbeat_ack(&self) {
        self.heartbeat_acked.store(true, Ordering::SeqCst);
        if let Some(sent_at) = *self.heartbeat_sent_at.lock() {
            *self.latency.lock() = Some(sent_at.elapsed());
        }
    }

    fn on_dispatch(&self, message: &GatewayMessage) {
        if let Some(sequence) = message.s {
            self.session.lock().sequence = sequence;
        }
        let Some(name) = message.t.as_deref() else {
            return;
        };

        match name {
            "READY" => {
                if let Some(ready) = message.as_ready() {
                    self.session.lock().id = Some(ready.session_id.clone());
                    *self.resume_url.lock() = ready.resume_gateway_url;
                    self.set_phase(ShardPhase::Ready);
                    info!(
                        shard_id = self.config.shard_id,
                        session_id = %ready.session_id,
                        "Session established"
                    );
                }
            }
            "RESUMED" => {
                debug!(shard_id = self.config.shard_id, "Session resumed");
                self.set_phase(ShardPhase::Ready);
            }
            _ => {}
        }

        self.events.dispatch(
            name,
            DispatchEvent {
                shard_id: self.config.shard_id,
                sequence: message.s,
                data: message.d.clone().unwrap_or(Value::Null),
            },
        );
    }

    fn handle_disconnect(self: &Arc<Self>, code: u16, generation: u64) {
        if !self.begin_disconnect(generation) {
            return;
        }
        let policy = CloseCode::policy_for(code);
        info!(
            shard_id = self.config.shard_id,
            code,
            ?policy,
            "Gateway connection closed"
        );

        match policy {
            ClosePolicy::Resume => self.spawn_reconnect(),
            ClosePolicy::Reidentify => {
                self.clear_session();
                self.spawn_reconnect();
            }
            ClosePolicy::Fatal => {
                if let Some(event) = CriticalEvent::from_close_code(self.config.shard_id, code) {
                    self.critical.dispatch(event.name(), event);
                }
            }
            ClosePolicy::Unhandled => {
                let event = CriticalEvent::UnhandledClose {
                    shard_id: self.config.shard_id,
                    code,
                };
                self.critical.dispatch(event.name(), event);
                let reason = CloseCode::from_u16(code)
                    .map_or_else(|| "unrecognized close code".to_string(), |c| {
                        c.description().to_string()
                    });
                error!(
                    shard_id = self.config.shard_id,
                    error = %ShardError::FatalClose { code, reason },
                    "Shard stopped on unhandled close code"
                );
            }
        }
    }
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard")
            .field("shard_id", &self.config.shard_id)
            .field("phase", &self.phase())
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(message) = rx.recv().await {
        if let Err(err) = sink.send(message).await {
            debug!(error = %err, "Gateway write task stopping");
            return;
        }
    }
    let _ = sink.close().await;
}
