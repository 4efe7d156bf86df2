//! BitTorrent handshake serialization and deserialization

use super::types::{PeerHandshake, PeerId};
use crate::torrent::InfoHash;

/// Protocol string carried in every handshake.
pub const PROTOCOL_NAME: &str = "BitTorrent protocol";

/// Fixed handshake size: name length, name, reserved, info hash, peer id.
pub const HANDSHAKE_LEN: usize = 1 + 19 + 8 + 20 + 20;

/// Handshake serialization utilities for BitTorrent wire protocol.
pub struct HandshakeCodec;

impl HandshakeCodec {
    /// Serializes a handshake into its fixed 68-byte form.
    ///
    /// The protocol string is always the standard one regardless of
    /// `handshake.protocol`, so the layout never shifts.
    pub fn serialize_handshake(handshake: &PeerHandshake) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[0] = PROTOCOL_NAME.len() as u8;
        buf[1..20].copy_from_slice(PROTOCOL_NAME.as_bytes());
        buf[20..28].copy_from_slice(&handshake.reserved);
        buf[28..48].copy_from_slice(handshake.info_hash.as_bytes());
        buf[48..68].copy_from_slice(handshake.peer_id.as_bytes());
        buf
    }

    /// Reads the fields of a received handshake at their fixed positions.
    ///
    /// A foreign protocol string is kept as-is rather than rejected.
    pub fn deserialize_handshake(data: &[u8; HANDSHAKE_LEN]) -> PeerHandshake {
        let protocol = String::from_utf8_lossy(&data[1..20]).into_owned();

        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&data[20..28]);

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&data[28..48]);

        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&data[48..68]);

        PeerHandshake {
            protocol,
            reserved,
            info_hash: InfoHash::new(info_hash),
            peer_id: PeerId::new(peer_id),
        }
    }
}
