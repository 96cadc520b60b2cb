//! The peer session: room membership, discovery, and action fan-out.
//!
//! One [`PeerSession`] owns one relay registration and one connection
//! registry for its `init` → `disconnect` lifetime. Three tasks run per
//! active session:
//!
//! - the relay supervisor: registers with the relay, triggers a discovery
//!   pass on every successful open, and drives the bounded reconnection
//!   controller when the link drops;
//! - the channel acceptor: answers inbound channel offers from peers that
//!   discovered us;
//! - per-channel reader/writer pairs spawned as channels open.
//!
//! Membership is eventually consistent: discovery is a best-effort
//! snapshot of the relay's listing, and peers joining later reach us
//! through their own discovery pass.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};

use crate::channel;
use crate::identity::{ParticipantId, PeerAddress};
use crate::protocol::{self, CodeAction, DrawingAction, TimerAction};
use crate::reconnect::{ReconnectController, ReconnectPolicy, RetryDecision};
use crate::registry::ConnectionRegistry;
use crate::relay::{self, RelayCommand, RelayHandle};
use crate::router::{ActionRouter, CodeHandler, DrawingHandler, TimerHandler};

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket URL of the signaling relay.
    pub relay_url: String,
    /// Bind address for the channel acceptor; port 0 picks a free port.
    pub bind_addr: String,
    /// NAT-traversal hint servers advertised at registration.
    pub stun_servers: Vec<String>,
    /// Relay reconnection schedule.
    pub reconnect: ReconnectPolicy,
    /// Per-channel outgoing message buffer.
    pub channel_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:9000".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            reconnect: ReconnectPolicy::default(),
            channel_buffer: 256,
        }
    }
}

impl SessionConfig {
    /// Default configuration pointed at `relay_url`.
    pub fn with_relay(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            ..Self::default()
        }
    }
}

/// Handlers supplied at init.
///
/// Connection, disconnection, and drawing handlers are required; the
/// rest are optional. The timer handler seeds the router's single timer
/// slot and can be replaced or cleared later through the session.
pub struct SessionCallbacks {
    pub on_connection: Box<dyn Fn(&ParticipantId) + Send + Sync>,
    pub on_disconnection: Box<dyn Fn(&ParticipantId) + Send + Sync>,
    pub on_drawing_action: DrawingHandler,
    pub on_code_action: Option<CodeHandler>,
    pub on_timer_action: Option<TimerHandler>,
    /// Invoked for the two user-visible failure cases; everything
    /// transient is absorbed below this layer.
    pub on_session_error: Option<Box<dyn Fn(SessionError) + Send + Sync>>,
}

/// Lifecycle callbacks shared with the channel and relay tasks.
pub(crate) struct LifecycleHooks {
    pub(crate) on_connection: Box<dyn Fn(&ParticipantId) + Send + Sync>,
    pub(crate) on_disconnection: Box<dyn Fn(&ParticipantId) + Send + Sync>,
    pub(crate) on_session_error: Option<Box<dyn Fn(SessionError) + Send + Sync>>,
}

/// The failures that escape this layer.
#[derive(Debug, Clone)]
pub enum SessionError {
    /// The session could not be constructed at all.
    Init(String),
    /// Bounded reconnection exhausted; only a fresh `init` recovers.
    ReconnectExhausted { attempts: u32 },
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Init(e) => write!(f, "Session initialization failed: {e}"),
            Self::ReconnectExhausted { attempts } => {
                write!(f, "Relay connection lost after {attempts} attempts")
            }
        }
    }
}

impl std::error::Error for SessionError {}

/// State held only while a session is active.
struct ActiveSession {
    address: PeerAddress,
    registry: Arc<ConnectionRegistry>,
    router: Arc<ActionRouter>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

/// A peer's membership in at most one room at a time.
pub struct PeerSession {
    config: SessionConfig,
    local_id: ParticipantId,
    active: RwLock<Option<ActiveSession>>,
}

impl PeerSession {
    /// Create an idle session with a freshly minted identity.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            local_id: ParticipantId::generate(),
            active: RwLock::new(None),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(SessionConfig::default())
    }

    /// The identity minted for this session. Stable for its lifetime;
    /// callers use it for echo suppression.
    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    /// Join `room_id`: bind the channel acceptor, register with the
    /// relay, and start discovery. Returns the local participant id.
    ///
    /// Construction failures (acceptor bind, empty room id) are the only
    /// errors returned here; relay-level trouble after this point goes
    /// through the reconnection controller instead. Re-initializing
    /// without an intervening [`disconnect`](Self::disconnect) is
    /// undefined — tear down first.
    pub async fn init(
        &self,
        room_id: &str,
        callbacks: SessionCallbacks,
    ) -> Result<ParticipantId, SessionError> {
        if room_id.is_empty() {
            return Err(SessionError::Init("room id must be non-empty".to_string()));
        }
        let address = PeerAddress::new(room_id, self.local_id.clone());

        let listener = TcpListener::bind(&self.config.bind_addr)
            .await
            .map_err(|e| SessionError::Init(format!("acceptor bind failed: {e}")))?;
        let endpoint = listener
            .local_addr()
            .map_err(|e| SessionError::Init(e.to_string()))?
            .to_string();

        let SessionCallbacks {
            on_connection,
            on_disconnection,
            on_drawing_action,
            on_code_action,
            on_timer_action,
            on_session_error,
        } = callbacks;

        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(ActionRouter::new(
            self.local_id.clone(),
            on_drawing_action,
            on_code_action,
            on_timer_action,
        ));
        let hooks = Arc::new(LifecycleHooks {
            on_connection,
            on_disconnection,
            on_session_error,
        });

        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let relay = RelayHandle::new(cmd_tx);

        let acceptor = tokio::spawn(accept_loop(
            listener,
            address.to_string(),
            self.local_id.clone(),
            registry.clone(),
            router.clone(),
            hooks.clone(),
            self.config.channel_buffer,
        ));
        let supervisor = tokio::spawn(relay_supervisor(
            self.config.clone(),
            address.clone(),
            endpoint,
            self.local_id.clone(),
            registry.clone(),
            router.clone(),
            hooks.clone(),
            relay,
            cmd_rx,
        ));

        let mut active = self.active.write().await;
        *active = Some(ActiveSession {
            address,
            registry,
            router,
            tasks: vec![acceptor, supervisor],
        });
        Ok(self.local_id.clone())
    }

    /// Leave the room: stop the session tasks, close every channel,
    /// clear the registry, release the relay registration. Idempotent.
    pub async fn disconnect(&self) {
        let Some(active) = self.active.write().await.take() else {
            return;
        };
        for task in &active.tasks {
            task.abort();
        }
        for channel in active.registry.clear().await {
            channel.close();
        }
        log::info!("Left room {}", active.address.room_id());
    }

    /// Fan a drawing action out to every open channel. Not stamped with
    /// a sender id — the drawing wire shape carries none.
    pub async fn send_drawing_action(&self, action: DrawingAction) {
        match protocol::encode(&action) {
            Ok(payload) => self.fan_out(payload).await,
            Err(e) => log::debug!("Drawing action not sent: {e}"),
        }
    }

    /// Stamp our id on a code action and fan it out.
    pub async fn send_code_action(&self, mut action: CodeAction) {
        action.sender_id = Some(self.local_id.clone());
        match protocol::encode(&action) {
            Ok(payload) => self.fan_out(payload).await,
            Err(e) => log::debug!("Code action not sent: {e}"),
        }
    }

    /// Stamp our id on a timer action and fan it out.
    pub async fn send_timer_action(&self, mut action: TimerAction) {
        action.sender_id = Some(self.local_id.clone());
        match protocol::encode(&action) {
            Ok(payload) => self.fan_out(payload).await,
            Err(e) => log::debug!("Timer action not sent: {e}"),
        }
    }

    /// Replace the router's single timer slot.
    pub async fn register_timer_action_handler(&self, handler: TimerHandler) {
        if let Some(active) = self.active.read().await.as_ref() {
            active.router.set_timer_handler(handler);
        }
    }

    /// Empty the timer slot; timer actions drop until a handler is
    /// registered again.
    pub async fn unregister_timer_action_handler(&self) {
        if let Some(active) = self.active.read().await.as_ref() {
            active.router.clear_timer_handler();
        }
    }

    /// Remote ids with a registered channel right now. An empty list
    /// means "no peers yet" and "everyone left" alike.
    pub async fn connected_peers(&self) -> Vec<ParticipantId> {
        match self.active.read().await.as_ref() {
            Some(active) => active.registry.peers().await,
            None => Vec::new(),
        }
    }

    /// Whether the session is active and at least one peer is reachable.
    pub async fn is_connected(&self) -> bool {
        match self.active.read().await.as_ref() {
            Some(active) => !active.registry.is_empty().await,
            None => false,
        }
    }

    /// Fire-and-forget transmission to every open channel; at most once
    /// per channel per call.
    async fn fan_out(&self, payload: Vec<u8>) {
        let guard = self.active.read().await;
        let Some(active) = guard.as_ref() else {
            return;
        };
        for channel in active.registry.open_channels().await {
            let _ = channel.send(payload.clone()).await;
        }
    }
}

/// Answer inbound channel offers for the session's lifetime.
async fn accept_loop(
    listener: TcpListener,
    local_address: String,
    local_id: ParticipantId,
    registry: Arc<ConnectionRegistry>,
    router: Arc<ActionRouter>,
    hooks: Arc<LifecycleHooks>,
    buffer: usize,
) {
    loop {
        match listener.accept().await {
            Ok((stream, from)) => {
                log::debug!("Inbound channel offer from {from}");
                let local_address = local_address.clone();
                let local_id = local_id.clone();
                let registry = registry.clone();
                let router = router.clone();
                let hooks = hooks.clone();
                tokio::spawn(async move {
                    match channel::accept(stream, &local_address, &local_id).await {
                        Ok((ws, remote, remote_address)) => {
                            channel::establish(
                                ws,
                                remote,
                                remote_address,
                                registry,
                                router,
                                hooks,
                                buffer,
                            )
                            .await;
                        }
                        Err(e) => log::debug!("Inbound handshake failed: {e}"),
                    }
                });
            }
            Err(e) => {
                log::warn!("Accept failed: {e}");
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}

/// Keep the relay registration alive, re-registering with linear backoff
/// until the attempt limit is reached.
#[allow(clippy::too_many_arguments)]
async fn relay_supervisor(
    config: SessionConfig,
    address: PeerAddress,
    endpoint: String,
    local_id: ParticipantId,
    registry: Arc<ConnectionRegistry>,
    router: Arc<ActionRouter>,
    hooks: Arc<LifecycleHooks>,
    relay: RelayHandle,
    mut cmd_rx: mpsc::Receiver<RelayCommand>,
) {
    let mut controller = ReconnectController::new(config.reconnect.clone());

    loop {
        match relay::register(
            &config.relay_url,
            &address.to_string(),
            &endpoint,
            &config.stun_servers,
        )
        .await
        {
            Ok(conn) => {
                controller.on_open();
                log::info!("Registered with relay as {address}");

                tokio::spawn(run_discovery(
                    relay.clone(),
                    address.clone(),
                    local_id.clone(),
                    registry.clone(),
                    router.clone(),
                    hooks.clone(),
                    config.channel_buffer,
                ));

                let err = conn.run(&mut cmd_rx).await;
                log::warn!("Relay link lost: {err}");
            }
            Err(e) => {
                log::warn!("Relay registration failed: {e}");
            }
        }

        match controller.on_disconnect() {
            RetryDecision::Retry { attempt, delay } => {
                log::info!("Reconnecting to relay, attempt {attempt} in {delay:?}");
                tokio::time::sleep(delay).await;
            }
            RetryDecision::GiveUp => {
                log::error!("Relay reconnection attempts exhausted for {address}");
                if let Some(on_error) = &hooks.on_session_error {
                    on_error(SessionError::ReconnectExhausted {
                        attempts: config.reconnect.max_attempts,
                    });
                }
                return;
            }
            RetryDecision::AlreadyFailed => return,
        }
    }
}

/// One best-effort discovery pass over the relay's current listing.
///
/// Every candidate in our room's namespace — excluding ourselves and
/// anyone already registered — gets an independent, non-blocking
/// connection attempt. Attempt failures are expected churn.
async fn run_discovery(
    relay: RelayHandle,
    address: PeerAddress,
    local_id: ParticipantId,
    registry: Arc<ConnectionRegistry>,
    router: Arc<ActionRouter>,
    hooks: Arc<LifecycleHooks>,
    buffer: usize,
) {
    let peers = match relay.list_peers().await {
        Ok(peers) => peers,
        Err(e) => {
            log::debug!("Discovery pass skipped: {e}");
            return;
        }
    };

    let self_address = address.to_string();
    for candidate in peers {
        if candidate == self_address {
            continue;
        }
        // Room isolation: only addresses under our room's prefix.
        let Some(remote_id) = PeerAddress::participant_of(&candidate, address.room_id()) else {
            continue;
        };
        if registry.contains(&remote_id).await {
            continue;
        }

        let relay = relay.clone();
        let self_address = self_address.clone();
        let local_id = local_id.clone();
        let registry = registry.clone();
        let router = router.clone();
        let hooks = hooks.clone();
        tokio::spawn(async move {
            connect_to_peer(
                relay,
                candidate,
                self_address,
                local_id,
                registry,
                router,
                hooks,
                buffer,
            )
            .await;
        });
    }
}

/// One outbound connection attempt: lookup, dial, handshake.
#[allow(clippy::too_many_arguments)]
async fn connect_to_peer(
    relay: RelayHandle,
    candidate: String,
    self_address: String,
    local_id: ParticipantId,
    registry: Arc<ConnectionRegistry>,
    router: Arc<ActionRouter>,
    hooks: Arc<LifecycleHooks>,
    buffer: usize,
) {
    let endpoint = match relay.lookup(&candidate).await {
        Ok(endpoint) => endpoint,
        Err(e) if e.is_peer_unavailable() => {
            log::debug!("Peer {candidate} no longer present");
            return;
        }
        Err(e) => {
            log::debug!("Lookup for {candidate} failed: {e}");
            return;
        }
    };

    match channel::dial(&endpoint, &self_address, &local_id).await {
        Ok((ws, remote, remote_address)) => {
            channel::establish(ws, remote, remote_address, registry, router, hooks, buffer).await;
        }
        Err(e) => {
            log::debug!("Connection attempt to {candidate} failed: {e}");
        }
    }
}
