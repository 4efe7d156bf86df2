//! Core types and enumerations for BitTorrent wire protocol

use std::fmt;

use bytes::Bytes;

use crate::torrent::{InfoHash, PieceIndex};

/// BitTorrent peer identifier.
///
/// 20-byte identifier for peers in the BitTorrent network.
/// Used in handshakes and tracker communication to identify clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId([u8; 20]);

impl PeerId {
    /// Creates peer ID from 20-byte array.
    pub const fn new(id: [u8; 20]) -> Self {
        Self(id)
    }

    /// Returns peer ID as byte array reference.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Generates a peer ID from a client prefix followed by random bytes.
    ///
    /// Prefixes longer than 20 bytes are cut to fit.
    pub fn generate_with_prefix(prefix: &str) -> Self {
        let mut id = [0u8; 20];
        let prefix = &prefix.as_bytes()[..prefix.len().min(20)];
        id[..prefix.len()].copy_from_slice(prefix);
        for byte in &mut id[prefix.len()..] {
            *byte = rand::random();
        }
        Self(id)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Message identifier byte following the length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl MessageId {
    /// Returns the wire byte for this identifier.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageId::Choke),
            1 => Ok(MessageId::Unchoke),
            2 => Ok(MessageId::Interested),
            3 => Ok(MessageId::NotInterested),
            4 => Ok(MessageId::Have),
            5 => Ok(MessageId::Bitfield),
            6 => Ok(MessageId::Request),
            7 => Ok(MessageId::Piece),
            8 => Ok(MessageId::Cancel),
            other => Err(other),
        }
    }
}

/// BitTorrent wire protocol messages.
///
/// Keep-alive frames are consumed by the frame reader and never appear here.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerMessage {
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have {
        piece_index: PieceIndex,
    },
    Bitfield {
        bitfield: Bytes,
    },
    Request {
        piece_index: PieceIndex,
        offset: u32,
        length: u32,
    },
    Piece {
        piece_index: PieceIndex,
        offset: u32,
        data: Bytes,
    },
    Cancel {
        piece_index: PieceIndex,
        offset: u32,
        length: u32,
    },
    /// Any identifier outside the core protocol (extensions, DHT port)
    Unknown {
        id: u8,
        payload: Bytes,
    },
}

impl PeerMessage {
    /// Returns the identifier byte this message carries on the wire.
    pub fn id(&self) -> u8 {
        match self {
            PeerMessage::Choke => MessageId::Choke.as_u8(),
            PeerMessage::Unchoke => MessageId::Unchoke.as_u8(),
            PeerMessage::Interested => MessageId::Interested.as_u8(),
            PeerMessage::NotInterested => MessageId::NotInterested.as_u8(),
            PeerMessage::Have { .. } => MessageId::Have.as_u8(),
            PeerMessage::Bitfield { .. } => MessageId::Bitfield.as_u8(),
            PeerMessage::Request { .. } => MessageId::Request.as_u8(),
            PeerMessage::Piece { .. } => MessageId::Piece.as_u8(),
            PeerMessage::Cancel { .. } => MessageId::Cancel.as_u8(),
            PeerMessage::Unknown { id, .. } => *id,
        }
    }
}

/// Peer handshake information.
///
/// Initial exchange between peers to establish protocol compatibility
/// and verify info hash matching for torrent verification.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerHandshake {
    /// Protocol identifier string ("BitTorrent protocol")
    pub protocol: String,
    /// Reserved bytes for protocol extensions
    pub reserved: [u8; 8],
    /// Info hash of the torrent being shared
    pub info_hash: InfoHash,
    /// Unique identifier for the peer
    pub peer_id: PeerId,
}

impl PeerHandshake {
    /// Create handshake for BitTorrent protocol.
    pub fn new(info_hash: InfoHash, peer_id: PeerId) -> Self {
        Self {
            protocol: super::handshake::PROTOCOL_NAME.to_string(),
            reserved: [0u8; 8],
            info_hash,
            peer_id,
        }
    }
}

/// Local side of the choke/interest state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerState {
    /// Handshake and bitfield received, interest not yet declared
    #[default]
    Connected,
    /// Interested sent, waiting for the peer to unchoke us
    Interested,
    /// Unchoked; block requests may be issued
    Unchoked,
}
