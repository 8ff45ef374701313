//! Wire protocol shared by the Iris hub and its clients.
//!
//! Every datagram is a single kind-tagged, length-prefixed frame:
//!
//! ```text
//! [1 byte kind][4 byte big-endian payload length][payload...]
//! kind ∈ {0=Auth, 1=State, 2=Event, 3=Message, 4=Disconnect}
//! ```
//!
//! The [`codec`] module turns frames into [`Packet`]s and back. Outbound state
//! broadcasts carry a [`Snapshot`] in their State payload.

pub mod codec;

pub use codec::{encode, split_frame, Codec, CodecError, Packet, PacketKind};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Size of the frame header: kind tag plus payload length.
pub const HEADER_LEN: usize = 5;

/// Default upper bound for chat message text, in bytes.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 512;

/// Default upper bound for auth tokens, in bytes.
pub const DEFAULT_MAX_TOKEN_LEN: usize = 256;

/// Largest datagram either side is expected to send.
pub const MAX_DATAGRAM_LEN: usize = 64 * 1024;

/// Event tags reserved for messages generated by the hub itself.
pub mod event_tag {
    /// Sent to a client after a successful Auth; payload is its [`PlayerRef`](crate::PlayerRef).
    pub const ACCEPTED: u8 = 0xF0;
    /// Queued for the simulation when a player leaves, for whatever reason.
    pub const DISCONNECTED: u8 = 0xF1;

    /// Tags from `0xF0` up belong to the hub; clients may not send them.
    pub fn is_reserved(tag: u8) -> bool {
        tag >= 0xF0
    }
}

/// Opaque identifier of a connected player.
///
/// The index addresses a slot in the hub's player arena; the generation is
/// bumped each time the slot is reused so stale references never alias a new
/// player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerRef {
    index: u32,
    generation: u32,
}

impl PlayerRef {
    pub const WIRE_LEN: usize = 8;

    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn to_bytes(self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        out[..4].copy_from_slice(&self.index.to_be_bytes());
        out[4..].copy_from_slice(&self.generation.to_be_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::WIRE_LEN {
            return None;
        }
        let index = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let generation = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        Some(Self { index, generation })
    }
}

impl fmt::Display for PlayerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "player#{}v{}", self.index, self.generation)
    }
}

/// Authoritative tick snapshot as broadcast to clients.
///
/// Travels bincode-encoded inside the payload of an outbound State packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub sequence: u64,
    pub users: u32,
    pub states: BTreeMap<PlayerRef, Vec<u8>>,
}

impl Snapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}
