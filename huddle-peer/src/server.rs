//! The signaling relay: a discovery-enabled rendezvous broker.
//!
//! Architecture:
//! ```text
//! Peer A ──┐                       ┌── Peer C
//!           ├── RelayServer ───────┤
//! Peer B ──┘   address → endpoint  └── Peer D
//!
//! Peer A ══════ direct channel (never relayed) ══════ Peer B
//! ```
//!
//! The relay holds one record per registered address: where that peer
//! accepts direct channels. It answers listings and lookups, rejects
//! duplicate registrations, and forgets a peer the moment its socket
//! drops. Room boundaries do not exist here — rooms are purely an
//! address-prefix convention between peers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;

use crate::signal::{SignalErrorKind, SignalMessage};

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to.
    pub bind_addr: String,
    /// Registration cap across all rooms.
    pub max_registrations: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9000".to_string(),
            max_registrations: 1024,
        }
    }
}

/// Relay statistics.
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    pub total_registrations: u64,
    pub rejected_registrations: u64,
    pub active_peers: usize,
    pub listings_served: u64,
    pub lookups_served: u64,
    pub lookups_unavailable: u64,
}

/// What the relay knows about one registered peer.
struct RegisteredPeer {
    endpoint: String,
}

/// The rendezvous broker.
pub struct RelayServer {
    config: RelayConfig,
    peers: Arc<RwLock<HashMap<String, RegisteredPeer>>>,
    stats: Arc<RwLock<RelayStats>>,
}

impl RelayServer {
    /// Create a relay with the given configuration.
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            peers: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(RelayStats::default())),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    /// Listen for registration sockets. Runs the accept loop forever.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Relay listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New registration socket from {addr}");

            let peers = self.peers.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, peers, stats, config).await {
                    log::error!("Registration socket error from {addr}: {e}");
                }
            });
        }
    }

    /// Serve one peer's registration socket until it drops.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        peers: Arc<RwLock<HashMap<String, RegisteredPeer>>>,
        stats: Arc<RwLock<RelayStats>>,
        config: RelayConfig,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws.split();

        // The address this socket successfully claimed, if any.
        let mut registered: Option<String> = None;

        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Binary(data)) => {
                    let bytes: Vec<u8> = data.into();
                    let signal = match SignalMessage::decode(&bytes) {
                        Ok(signal) => signal,
                        Err(e) => {
                            log::warn!("Undecodable frame from {addr}: {e}");
                            continue;
                        }
                    };

                    match signal {
                        SignalMessage::Register {
                            address,
                            endpoint,
                            stun_servers,
                        } => {
                            if registered.is_some() {
                                let err = SignalMessage::Error {
                                    kind: SignalErrorKind::Protocol,
                                    message: "socket already registered".to_string(),
                                };
                                ws_sender.send(Message::Binary(err.encode()?.into())).await?;
                                continue;
                            }

                            let accepted = {
                                let mut peers_w = peers.write().await;
                                if peers_w.contains_key(&address) {
                                    None
                                } else if peers_w.len() >= config.max_registrations {
                                    Some(Err("registration limit reached"))
                                } else {
                                    peers_w.insert(
                                        address.clone(),
                                        RegisteredPeer {
                                            endpoint: endpoint.clone(),
                                        },
                                    );
                                    Some(Ok(peers_w.len()))
                                }
                            };

                            match accepted {
                                None => {
                                    let mut s = stats.write().await;
                                    s.rejected_registrations += 1;
                                    drop(s);
                                    let err = SignalMessage::Error {
                                        kind: SignalErrorKind::IdTaken,
                                        message: format!("{address} is already registered"),
                                    };
                                    ws_sender.send(Message::Binary(err.encode()?.into())).await?;
                                    break;
                                }
                                Some(Err(reason)) => {
                                    let err = SignalMessage::Error {
                                        kind: SignalErrorKind::Protocol,
                                        message: reason.to_string(),
                                    };
                                    ws_sender.send(Message::Binary(err.encode()?.into())).await?;
                                    break;
                                }
                                Some(Ok(active)) => {
                                    {
                                        let mut s = stats.write().await;
                                        s.total_registrations += 1;
                                        s.active_peers = active;
                                    }
                                    let open = SignalMessage::Open {
                                        address: address.clone(),
                                    };
                                    ws_sender.send(Message::Binary(open.encode()?.into())).await?;
                                    log::info!(
                                        "Peer registered: {address} at {endpoint} ({} stun hints)",
                                        stun_servers.len()
                                    );
                                    registered = Some(address);
                                }
                            }
                        }

                        SignalMessage::ListPeers => {
                            let addresses: Vec<String> =
                                peers.read().await.keys().cloned().collect();
                            {
                                let mut s = stats.write().await;
                                s.listings_served += 1;
                            }
                            let reply = SignalMessage::Peers { addresses };
                            ws_sender.send(Message::Binary(reply.encode()?.into())).await?;
                        }

                        SignalMessage::Lookup { address } => {
                            let endpoint =
                                peers.read().await.get(&address).map(|p| p.endpoint.clone());
                            let reply = match endpoint {
                                Some(endpoint) => {
                                    let mut s = stats.write().await;
                                    s.lookups_served += 1;
                                    drop(s);
                                    SignalMessage::Endpoint { address, endpoint }
                                }
                                None => {
                                    let mut s = stats.write().await;
                                    s.lookups_unavailable += 1;
                                    drop(s);
                                    SignalMessage::Unavailable { address }
                                }
                            };
                            ws_sender.send(Message::Binary(reply.encode()?.into())).await?;
                        }

                        other => {
                            log::debug!("Ignoring unexpected message from {addr}: {other:?}");
                        }
                    }
                }

                Ok(Message::Close(_)) | Err(_) => break,

                Ok(Message::Ping(data)) => {
                    ws_sender.send(Message::Pong(data)).await?;
                }

                _ => {}
            }
        }

        // Cleanup: the address is gone the moment its socket is.
        if let Some(address) = registered {
            let active = {
                let mut peers_w = peers.write().await;
                peers_w.remove(&address);
                peers_w.len()
            };
            let mut s = stats.write().await;
            s.active_peers = active;
            log::info!("Peer unregistered: {address}");
        }

        Ok(())
    }

    /// Get relay statistics.
    pub async fn stats(&self) -> RelayStats {
        self.stats.read().await.clone()
    }

    /// The configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Addresses currently registered, for inspection.
    pub async fn registered_addresses(&self) -> Vec<String> {
        self.peers.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = RelayConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.max_registrations, 1024);
    }

    #[test]
    fn test_server_creation() {
        let server = RelayServer::with_defaults();
        assert_eq!(server.bind_addr(), "127.0.0.1:9000");
    }

    #[tokio::test]
    async fn test_stats_initial() {
        let server = RelayServer::with_defaults();
        let stats = server.stats().await;
        assert_eq!(stats.total_registrations, 0);
        assert_eq!(stats.rejected_registrations, 0);
        assert_eq!(stats.active_peers, 0);
        assert_eq!(stats.listings_served, 0);
        assert_eq!(stats.lookups_served, 0);
        assert_eq!(stats.lookups_unavailable, 0);
    }

    #[tokio::test]
    async fn test_no_peers_registered_initially() {
        let server = RelayServer::with_defaults();
        assert!(server.registered_addresses().await.is_empty());
    }
}
