//! Direct peer data channels.
//!
//! A channel is a WebSocket between two peers, dialed at the endpoint the
//! relay advertised for the remote address. Both establishment paths —
//! outbound [`dial`] and inbound [`accept`] — converge on [`establish`],
//! which registers the same lifecycle: insert into the registry and fire
//! the connection callback once the handshake completes, dispatch inbound
//! frames through the router, and on close or transport error remove the
//! registry entry (idempotent) and fire the disconnection callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::identity::ParticipantId;
use crate::protocol::ProtocolError;
use crate::registry::ConnectionRegistry;
use crate::router::ActionRouter;
use crate::session::LifecycleHooks;
use crate::signal::Handshake;

/// Commands accepted by a channel's writer task.
enum ChannelCommand {
    Frame(Vec<u8>),
    Close,
}

/// Handle to an open peer channel, stored in the connection registry.
///
/// Cloning is cheap; all clones refer to the same underlying socket.
#[derive(Clone)]
pub struct PeerChannel {
    remote: ParticipantId,
    remote_address: String,
    tx: mpsc::Sender<ChannelCommand>,
    open: Arc<AtomicBool>,
}

impl PeerChannel {
    /// Whether the channel still reports itself open.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.tx.is_closed()
    }

    /// The remote participant this channel reaches.
    pub fn remote(&self) -> &ParticipantId {
        &self.remote
    }

    /// The remote's full peer address.
    pub fn remote_address(&self) -> &str {
        &self.remote_address
    }

    /// Queue a payload for transmission. Fire-and-forget: returns `false`
    /// when the channel has already closed, which callers ignore.
    pub async fn send(&self, payload: Vec<u8>) -> bool {
        if !self.is_open() {
            return false;
        }
        self.tx.send(ChannelCommand::Frame(payload)).await.is_ok()
    }

    /// Ask the writer task to close the socket. Safe to call repeatedly.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.tx.try_send(ChannelCommand::Close);
    }

    /// A handle that is never backed by a socket, for registry tests.
    #[cfg(test)]
    pub(crate) fn stub(remote: ParticipantId) -> Self {
        let (tx, rx) = mpsc::channel(4);
        // Keep the receiver alive so `is_open` reflects the flag alone.
        std::mem::forget(rx);
        Self {
            remote_address: format!("test-{remote}"),
            remote,
            tx,
            open: Arc::new(AtomicBool::new(true)),
        }
    }
}

/// Channel establishment errors.
#[derive(Debug, Clone)]
pub enum ChannelError {
    Connect(String),
    Handshake(String),
    Protocol(ProtocolError),
}

impl std::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect(e) => write!(f, "Channel connect failed: {e}"),
            Self::Handshake(e) => write!(f, "Channel handshake failed: {e}"),
            Self::Protocol(e) => write!(f, "Channel protocol error: {e}"),
        }
    }
}

impl std::error::Error for ChannelError {}

impl From<ProtocolError> for ChannelError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

/// Outbound path: dial `endpoint` and run the `Hello`/`HelloAck`
/// handshake. Returns the socket plus the remote's identity.
pub(crate) async fn dial(
    endpoint: &str,
    local_address: &str,
    local_id: &ParticipantId,
) -> Result<
    (
        WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>,
        ParticipantId,
        String,
    ),
    ChannelError,
> {
    let url = format!("ws://{endpoint}");
    let (mut ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .map_err(|e| ChannelError::Connect(e.to_string()))?;

    let hello = Handshake::Hello {
        address: local_address.to_string(),
        participant: local_id.clone(),
    };
    ws.send(Message::Binary(hello.encode()?.into()))
        .await
        .map_err(|e| ChannelError::Connect(e.to_string()))?;

    while let Some(msg) = ws.next().await {
        match msg {
            Ok(Message::Binary(data)) => {
                let bytes: Vec<u8> = data.into();
                return match Handshake::decode(&bytes)? {
                    Handshake::HelloAck {
                        address,
                        participant,
                    } => Ok((ws, participant, address)),
                    Handshake::Hello { .. } => Err(ChannelError::Handshake(
                        "unexpected hello from acceptor".to_string(),
                    )),
                };
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }
    Err(ChannelError::Handshake(
        "channel closed before hello-ack".to_string(),
    ))
}

/// Inbound path: run the acceptor side of the handshake on a fresh TCP
/// connection. Returns the socket plus the dialer's identity.
pub(crate) async fn accept(
    stream: TcpStream,
    local_address: &str,
    local_id: &ParticipantId,
) -> Result<(WebSocketStream<TcpStream>, ParticipantId, String), ChannelError> {
    let mut ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| ChannelError::Connect(e.to_string()))?;

    while let Some(msg) = ws.next().await {
        match msg {
            Ok(Message::Binary(data)) => {
                let bytes: Vec<u8> = data.into();
                return match Handshake::decode(&bytes)? {
                    Handshake::Hello {
                        address,
                        participant,
                    } => {
                        let ack = Handshake::HelloAck {
                            address: local_address.to_string(),
                            participant: local_id.clone(),
                        };
                        ws.send(Message::Binary(ack.encode()?.into()))
                            .await
                            .map_err(|e| ChannelError::Connect(e.to_string()))?;
                        Ok((ws, participant, address))
                    }
                    Handshake::HelloAck { .. } => Err(ChannelError::Handshake(
                        "unexpected hello-ack from dialer".to_string(),
                    )),
                };
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }
    Err(ChannelError::Handshake(
        "channel closed before hello".to_string(),
    ))
}

/// Shared lifecycle for both establishment paths.
///
/// Inserts the channel (keyed insert overwrites any stale entry for the
/// same remote), fires the connection callback, then spawns the writer
/// and reader tasks. The reader task owns teardown: registry removal and
/// the disconnection callback run exactly once per channel, whether the
/// close was local or remote.
pub(crate) async fn establish<S>(
    ws: WebSocketStream<S>,
    remote: ParticipantId,
    remote_address: String,
    registry: Arc<ConnectionRegistry>,
    router: Arc<ActionRouter>,
    hooks: Arc<LifecycleHooks>,
    buffer: usize,
) -> PeerChannel
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel(buffer);
    let open = Arc::new(AtomicBool::new(true));
    let channel = PeerChannel {
        remote: remote.clone(),
        remote_address,
        tx,
        open: open.clone(),
    };

    registry.insert(channel.clone()).await;
    (hooks.on_connection)(&remote);
    log::debug!("Channel open to {remote}");

    let (mut sink, mut stream) = ws.split();

    // Writer: forward queued frames to the socket.
    tokio::spawn(async move {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                ChannelCommand::Frame(bytes) => {
                    if sink.send(Message::Binary(bytes.into())).await.is_err() {
                        break;
                    }
                }
                ChannelCommand::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    // Reader: dispatch inbound frames until the transport ends.
    tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Binary(data)) => {
                    let bytes: Vec<u8> = data.into();
                    let _ = router.dispatch(&bytes, &remote);
                }
                Ok(Message::Text(text)) => {
                    let _ = router.dispatch(text.as_bytes(), &remote);
                }
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    log::debug!("Channel transport error from {remote}: {e}");
                    break;
                }
                _ => {}
            }
        }
        open.store(false, Ordering::SeqCst);
        registry.remove(&remote).await;
        (hooks.on_disconnection)(&remote);
        log::debug!("Channel closed to {remote}");
    });

    channel
}
