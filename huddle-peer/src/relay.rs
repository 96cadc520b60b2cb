//! Relay client: the peer side of the signaling contract.
//!
//! One WebSocket per registration. The first frame claims the peer's
//! address; after the relay answers `Open`, the connection pumps
//! [`RelayCommand`]s (peer listing, endpoint lookup) and their responses
//! until the link drops. Peer-unavailable lookup outcomes are routed to
//! the requester and never treated as link failures; any other relay
//! error ends the connection so the reconnection controller can react.

use std::collections::VecDeque;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::signal::{SignalErrorKind, SignalMessage};

/// Relay-level failures, classified per the error taxonomy.
#[derive(Debug, Clone)]
pub enum RelayError {
    /// The lookup target is not currently registered. Expected churn
    /// during discovery; callers ignore it silently.
    PeerUnavailable(String),
    /// Our address is already registered with the relay.
    IdTaken(String),
    /// Transport or relay-reported failure.
    Transport(String),
    /// The relay link is gone.
    Closed,
}

impl RelayError {
    /// Whether this is the expected/ignorable "target peer not there"
    /// condition rather than a real failure.
    pub fn is_peer_unavailable(&self) -> bool {
        matches!(self, Self::PeerUnavailable(_))
    }
}

impl std::fmt::Display for RelayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PeerUnavailable(addr) => write!(f, "Peer unavailable: {addr}"),
            Self::IdTaken(addr) => write!(f, "Address already registered: {addr}"),
            Self::Transport(e) => write!(f, "Relay transport error: {e}"),
            Self::Closed => write!(f, "Relay connection closed"),
        }
    }
}

impl std::error::Error for RelayError {}

/// Requests issued against the current relay link.
pub(crate) enum RelayCommand {
    ListPeers {
        reply: oneshot::Sender<Result<Vec<String>, RelayError>>,
    },
    Lookup {
        address: String,
        reply: oneshot::Sender<Result<String, RelayError>>,
    },
}

/// Cheap cloneable handle for issuing relay requests.
#[derive(Clone)]
pub(crate) struct RelayHandle {
    cmd_tx: mpsc::Sender<RelayCommand>,
}

impl RelayHandle {
    pub(crate) fn new(cmd_tx: mpsc::Sender<RelayCommand>) -> Self {
        Self { cmd_tx }
    }

    /// Best-effort snapshot of all registered addresses.
    pub(crate) async fn list_peers(&self) -> Result<Vec<String>, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(RelayCommand::ListPeers { reply })
            .await
            .map_err(|_| RelayError::Closed)?;
        rx.await.map_err(|_| RelayError::Closed)?
    }

    /// Where `address` accepts direct channels.
    pub(crate) async fn lookup(&self, address: &str) -> Result<String, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(RelayCommand::Lookup {
                address: address.to_string(),
                reply,
            })
            .await
            .map_err(|_| RelayError::Closed)?;
        rx.await.map_err(|_| RelayError::Closed)?
    }
}

type RelaySocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// An open, registered relay link.
pub(crate) struct RelayConnection {
    ws: RelaySocket,
}

/// Connect to the relay and claim `address`.
///
/// Resolves once the relay confirms with `Open`; any other outcome is a
/// registration failure.
pub(crate) async fn register(
    relay_url: &str,
    address: &str,
    endpoint: &str,
    stun_servers: &[String],
) -> Result<RelayConnection, RelayError> {
    let (mut ws, _) = tokio_tungstenite::connect_async(relay_url)
        .await
        .map_err(|e| RelayError::Transport(e.to_string()))?;

    let register = SignalMessage::Register {
        address: address.to_string(),
        endpoint: endpoint.to_string(),
        stun_servers: stun_servers.to_vec(),
    };
    let encoded = register
        .encode()
        .map_err(|e| RelayError::Transport(e.to_string()))?;
    ws.send(Message::Binary(encoded.into()))
        .await
        .map_err(|e| RelayError::Transport(e.to_string()))?;

    while let Some(msg) = ws.next().await {
        match msg {
            Ok(Message::Binary(data)) => {
                let bytes: Vec<u8> = data.into();
                let signal = SignalMessage::decode(&bytes)
                    .map_err(|e| RelayError::Transport(e.to_string()))?;
                return match signal {
                    SignalMessage::Open { .. } => Ok(RelayConnection { ws }),
                    SignalMessage::Error {
                        kind: SignalErrorKind::IdTaken,
                        ..
                    } => Err(RelayError::IdTaken(address.to_string())),
                    SignalMessage::Error { message, .. } => Err(RelayError::Transport(message)),
                    other => Err(RelayError::Transport(format!(
                        "unexpected registration response: {other:?}"
                    ))),
                };
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }
    Err(RelayError::Closed)
}

impl RelayConnection {
    /// Pump commands and responses until the link drops.
    ///
    /// Returns the terminal condition; pending requests are failed with
    /// [`RelayError::Closed`] so their issuers unwind quietly.
    pub(crate) async fn run(mut self, cmd_rx: &mut mpsc::Receiver<RelayCommand>) -> RelayError {
        let mut pending_peers: VecDeque<oneshot::Sender<Result<Vec<String>, RelayError>>> =
            VecDeque::new();
        let mut pending_lookups: VecDeque<(
            String,
            oneshot::Sender<Result<String, RelayError>>,
        )> = VecDeque::new();

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else {
                        return RelayError::Closed;
                    };
                    match cmd {
                        RelayCommand::ListPeers { reply } => {
                            if self.send_signal(&SignalMessage::ListPeers).await.is_err() {
                                let _ = reply.send(Err(RelayError::Closed));
                                return RelayError::Closed;
                            }
                            pending_peers.push_back(reply);
                        }
                        RelayCommand::Lookup { address, reply } => {
                            let lookup = SignalMessage::Lookup {
                                address: address.clone(),
                            };
                            if self.send_signal(&lookup).await.is_err() {
                                let _ = reply.send(Err(RelayError::Closed));
                                return RelayError::Closed;
                            }
                            pending_lookups.push_back((address, reply));
                        }
                    }
                }

                msg = self.ws.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            let bytes: Vec<u8> = data.into();
                            match SignalMessage::decode(&bytes) {
                                Ok(SignalMessage::Peers { addresses }) => {
                                    if let Some(reply) = pending_peers.pop_front() {
                                        let _ = reply.send(Ok(addresses));
                                    }
                                }
                                Ok(SignalMessage::Endpoint { address, endpoint }) => {
                                    if let Some(reply) = take_lookup(&mut pending_lookups, &address) {
                                        let _ = reply.send(Ok(endpoint));
                                    }
                                }
                                Ok(SignalMessage::Unavailable { address }) => {
                                    if let Some(reply) = take_lookup(&mut pending_lookups, &address) {
                                        let _ = reply.send(Err(RelayError::PeerUnavailable(address)));
                                    }
                                }
                                Ok(SignalMessage::Error { message, .. }) => {
                                    // Non-unavailable relay error: hand the
                                    // link to the reconnection controller.
                                    return RelayError::Transport(message);
                                }
                                Ok(other) => {
                                    log::debug!("Ignoring unexpected relay message: {other:?}");
                                }
                                Err(e) => {
                                    log::debug!("Dropping undecodable relay frame: {e}");
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => return RelayError::Closed,
                        Some(Err(e)) => return RelayError::Transport(e.to_string()),
                        _ => {}
                    }
                }
            }
        }
    }

    async fn send_signal(&mut self, msg: &SignalMessage) -> Result<(), RelayError> {
        let encoded = msg
            .encode()
            .map_err(|e| RelayError::Transport(e.to_string()))?;
        self.ws
            .send(Message::Binary(encoded.into()))
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))
    }
}

/// Pull the pending lookup matching `address` (responses may interleave
/// when discovery fans out).
fn take_lookup(
    pending: &mut VecDeque<(String, oneshot::Sender<Result<String, RelayError>>)>,
    address: &str,
) -> Option<oneshot::Sender<Result<String, RelayError>>> {
    let pos = pending.iter().position(|(a, _)| a == address)?;
    pending.remove(pos).map(|(_, reply)| reply)
}
