//! Participant identity and the room-scoped peer address scheme.
//!
//! A participant id is minted once per session and never changes. The
//! relay knows peers only by their full address `"{roomId}-{participantId}"`,
//! so any two addresses sharing a room prefix are co-members of that room.
//! There is no relay-side enforcement beyond this naming convention.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Alphabet for participant id suffixes (lowercase base-36).
const ID_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Alphabet for generated room ids. Excludes easily-confused glyphs
/// (I/l/1, O/o/0) so room codes survive being read aloud or retyped.
const ROOM_ALPHABET: &[u8; 55] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghjkmnpqrstuvwxyz23456789";

const ID_SUFFIX_LEN: usize = 8;
const ROOM_ID_LEN: usize = 10;

/// Opaque per-session participant identifier, e.g. `user-k3f09qzm`.
///
/// Uniqueness is probabilistic: the suffix carries ~41 bits of UUIDv4
/// entropy, which is collision-free in practice at room scale. Not
/// cryptographic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Mint a fresh participant id.
    pub fn generate() -> Self {
        Self(format!("user-{}", random_chars(ID_ALPHABET, ID_SUFFIX_LEN)))
    }

    /// Wrap an id received from the wire.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Full relay registration address: `"{roomId}-{participantId}"`.
///
/// Wire-visible; must stay bit-compatible with every client sharing the
/// relay.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    room_id: String,
    participant: ParticipantId,
}

impl PeerAddress {
    pub fn new(room_id: impl Into<String>, participant: ParticipantId) -> Self {
        Self {
            room_id: room_id.into(),
            participant,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    /// The discovery namespace for this address's room: `"{roomId}-"`.
    pub fn room_prefix(&self) -> String {
        format!("{}-", self.room_id)
    }

    /// Whether `address` belongs to `room_id`'s namespace.
    pub fn in_room(address: &str, room_id: &str) -> bool {
        address.len() > room_id.len() + 1
            && address.starts_with(room_id)
            && address.as_bytes()[room_id.len()] == b'-'
    }

    /// Extract the participant id from an address known to be in `room_id`.
    ///
    /// Returns `None` when the address is outside the room's namespace.
    pub fn participant_of(address: &str, room_id: &str) -> Option<ParticipantId> {
        if !Self::in_room(address, room_id) {
            return None;
        }
        Some(ParticipantId::from_string(&address[room_id.len() + 1..]))
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.room_id, self.participant)
    }
}

/// Generate a shareable room id (10 chars, unambiguous alphabet).
pub fn generate_room_id() -> String {
    random_chars(ROOM_ALPHABET, ROOM_ID_LEN)
}

/// Draw `len` characters from `alphabet` using UUIDv4 entropy.
fn random_chars(alphabet: &[u8], len: usize) -> String {
    let mut bits = Uuid::new_v4().as_u128();
    let base = alphabet.len() as u128;
    (0..len)
        .map(|_| {
            let c = alphabet[(bits % base) as usize] as char;
            bits /= base;
            c
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_id_format() {
        let id = ParticipantId::generate();
        let s = id.as_str();
        assert!(s.starts_with("user-"));
        assert_eq!(s.len(), "user-".len() + 8);
        assert!(s["user-".len()..]
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_participant_ids_unique() {
        let a = ParticipantId::generate();
        let b = ParticipantId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_address_format() {
        let id = ParticipantId::from_string("user-abcd1234");
        let addr = PeerAddress::new("ROOM1", id);
        assert_eq!(addr.to_string(), "ROOM1-user-abcd1234");
        assert_eq!(addr.room_prefix(), "ROOM1-");
    }

    #[test]
    fn test_in_room_prefix_match() {
        assert!(PeerAddress::in_room("ABC-user-12345678", "ABC"));
        assert!(!PeerAddress::in_room("ABCD-user-12345678", "ABC"));
        assert!(!PeerAddress::in_room("XYZ-user-12345678", "ABC"));
        assert!(!PeerAddress::in_room("ABC", "ABC"));
        assert!(!PeerAddress::in_room("ABC-", "ABC"));
    }

    #[test]
    fn test_participant_of() {
        let id = PeerAddress::participant_of("room1-user-k3f09qzm", "room1").unwrap();
        assert_eq!(id.as_str(), "user-k3f09qzm");
        assert!(PeerAddress::participant_of("room2-user-k3f09qzm", "room1").is_none());
    }

    #[test]
    fn test_room_id_alphabet() {
        let room = generate_room_id();
        assert_eq!(room.len(), 10);
        for c in room.chars() {
            assert!(ROOM_ALPHABET.contains(&(c as u8)), "unexpected char {c}");
        }
        // Confusable glyphs are excluded by construction.
        assert!(!room.contains('O') && !room.contains('0') && !room.contains('l'));
    }

    #[test]
    fn test_participant_id_serde_transparent() {
        let id = ParticipantId::from_string("user-abcd1234");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"user-abcd1234\"");
        let back: ParticipantId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
