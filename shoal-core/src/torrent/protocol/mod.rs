//! BitTorrent wire protocol abstractions and message types.
//!
//! BitTorrent peer-to-peer protocol implementation following BEP 3.
//! Defines the fixed handshake, length-prefixed message framing, and the
//! piece availability bitfield.

pub mod bitfield;
pub mod handshake;
pub mod messages;
pub mod types;

// Re-export public API
pub use bitfield::Bitfield;
pub use handshake::{HANDSHAKE_LEN, HandshakeCodec, PROTOCOL_NAME};
pub use messages::{MessageCodec, read_message, write_message};
pub use types::{MessageId, PeerHandshake, PeerId, PeerMessage, PeerState};
