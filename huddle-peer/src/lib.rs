//! # huddle-peer — peer mesh for the Huddle collaboration app
//!
//! Room membership and action fan-out for real-time collaboration
//! (shared whiteboard, code editor, session timer) over a peer-to-peer
//! mesh with a thin signaling relay.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐    register /      ┌─────────────┐
//! │ PeerSession │ ◄────────────────► │ RelayServer │
//! │ (per user)  │   list / lookup    │ (rendezvous)│
//! └──────┬──────┘                    └─────────────┘
//!        │ direct channels (never relayed)
//!        ▼
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ Connection  │ ──► │ ActionRouter│ ──► │ UI handlers │
//! │ Registry    │     │ (classify)  │     │ (callbacks) │
//! └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! A room is nothing but a shared address prefix: every peer registers
//! as `"{roomId}-{participantId}"` and discovers co-members by listing
//! the relay and filtering on the prefix. Membership is whatever the
//! connection registry holds right now — there is no authoritative
//! roster, and peers that join later find us through their own
//! discovery pass. Knowing a room id is the entire access model:
//! suitable for trusted-link sharing, not for adversarial settings.
//!
//! ## Modules
//!
//! - [`identity`] — participant ids and the peer address scheme
//! - [`protocol`] — drawing / code / timer action messages
//! - [`signal`] — relay and handshake wire messages
//! - [`registry`] — live channels keyed by remote participant
//! - [`router`] — inbound classification, echo suppression
//! - [`reconnect`] — bounded linear-backoff relay reconnection
//! - [`channel`] — direct peer channels (dial, accept, lifecycle)
//! - [`relay`] — the peer side of the relay contract
//! - [`session`] — the session object UI code talks to
//! - [`server`] — the rendezvous broker itself

pub mod channel;
pub mod identity;
pub mod protocol;
pub mod reconnect;
pub mod registry;
pub mod relay;
pub mod router;
pub mod server;
pub mod session;
pub mod signal;

// Re-exports for convenience
pub use channel::PeerChannel;
pub use identity::{generate_room_id, ParticipantId, PeerAddress};
pub use protocol::{
    Action, CodeAction, CodeKind, CursorPosition, DrawingAction, DrawingKind, Point,
    ProtocolError, SelectionRange, TimerAction, TimerKind, TimerMode,
};
pub use reconnect::{ReconnectController, ReconnectPolicy, ReconnectState, RetryDecision};
pub use registry::ConnectionRegistry;
pub use relay::RelayError;
pub use router::{ActionRouter, Dispatch};
pub use server::{RelayConfig, RelayServer, RelayStats};
pub use session::{PeerSession, SessionCallbacks, SessionConfig, SessionError};
