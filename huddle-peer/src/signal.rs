//! Signaling wire protocol.
//!
//! Two small JSON message families share this module:
//!
//! - [`SignalMessage`] — spoken between a peer and the relay over the
//!   registration socket. The relay never sees channel traffic; it only
//!   brokers addresses and endpoints.
//! - [`Handshake`] — the first frames on a freshly dialed peer channel,
//!   exchanging addresses so both ends learn who they are talking to
//!   before the channel counts as open.

use serde::{Deserialize, Serialize};

use crate::identity::ParticipantId;
use crate::protocol::ProtocolError;

/// Messages exchanged with the signaling relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum SignalMessage {
    /// First frame from a registering peer: claim `address` and publish
    /// where this peer accepts direct channels. `stun_servers` are
    /// NAT-traversal hints handed through to the transport layer.
    Register {
        address: String,
        endpoint: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        stun_servers: Vec<String>,
    },
    /// Registration accepted; the address is now discoverable.
    Open { address: String },
    /// Request the current best-effort peer listing.
    ListPeers,
    /// Response to [`SignalMessage::ListPeers`].
    Peers { addresses: Vec<String> },
    /// Ask where `address` accepts direct channels.
    Lookup { address: String },
    /// Successful lookup response.
    Endpoint { address: String, endpoint: String },
    /// Lookup target is not currently registered. Expected churn during
    /// discovery, never an error condition.
    Unavailable { address: String },
    /// Relay-reported failure.
    Error {
        kind: SignalErrorKind,
        message: String,
    },
}

/// Relay error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalErrorKind {
    /// The requested address is already registered.
    IdTaken,
    /// The peer sent something the relay could not make sense of.
    Protocol,
}

impl SignalMessage {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

/// Channel-open handshake frames.
///
/// The dialer sends `Hello`; the acceptor replies `HelloAck`. Only after
/// the exchange completes does either side insert the channel into its
/// registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Handshake {
    Hello {
        address: String,
        participant: ParticipantId,
    },
    HelloAck {
        address: String,
        participant: ParticipantId,
    },
}

impl Handshake {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}
