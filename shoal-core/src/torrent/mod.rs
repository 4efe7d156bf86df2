//! BitTorrent peer-wire download engine

pub mod manifest;
pub mod parsing;
pub mod pending;
pub mod protocol;
pub mod scheduler;
pub mod session;
pub mod tracker;
pub mod verify;

#[cfg(test)]
pub(crate) mod test_peer;

use std::fmt;
use std::net::SocketAddr;

pub use manifest::TorrentManifest;
pub use parsing::{TorrentFileInfo, parse_torrent_bytes, parse_torrent_file};
pub use pending::{ClaimOutcome, PendingPieces, ReleaseOutcome};
pub use protocol::{Bitfield, MessageId, PeerHandshake, PeerId, PeerMessage};
pub use scheduler::{DownloadReport, DownloadScheduler};
pub use session::PeerSession;
pub use tracker::HttpTrackerClient;
pub use verify::verify_piece;

use crate::storage::StorageError;

/// SHA-1 hash identifying a unique torrent.
///
/// 20-byte SHA-1 hash of the info dictionary from a torrent file.
/// Used as peer-protocol identity and as the tracker query key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash([u8; 20]);

impl InfoHash {
    /// Creates InfoHash from 20-byte SHA-1 hash.
    pub fn new(hash: [u8; 20]) -> Self {
        Self(hash)
    }

    /// Returns reference to underlying 20-byte hash.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Zero-based index of a piece within a torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PieceIndex(pub u32);

impl PieceIndex {
    /// Creates PieceIndex from zero-based index.
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the underlying piece index as u32.
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the index as a slice position.
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PieceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn format_piece_list(pieces: &[PieceIndex]) -> String {
    pieces
        .iter()
        .map(PieceIndex::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors that can occur during torrent operations.
///
/// Per-peer variants are contained to the worker driving that peer; only
/// `NoProgress` ever fails a whole download.
#[derive(Debug, thiserror::Error)]
pub enum TorrentError {
    #[error("Failed to parse torrent file: {reason}")]
    InvalidTorrentFile { reason: String },

    #[error("Invalid torrent manifest: {reason}")]
    InvalidManifest { reason: String },

    #[error("Tracker connection failed: {url}")]
    TrackerConnectionFailed { url: String },

    #[error("Peer {address} unreachable: {reason}")]
    PeerConnectionError { address: SocketAddr, reason: String },

    #[error("Handshake with {address} failed: {reason}")]
    HandshakeFailed { address: SocketAddr, reason: String },

    #[error("Protocol error: {message}")]
    ProtocolError { message: String },

    #[error("Connection closed in the middle of a frame")]
    TruncatedFrame,

    #[error("I/O with peer {address} failed: {reason}")]
    PeerIo { address: SocketAddr, reason: String },

    #[error("Peer {address} timed out")]
    PeerTimeout { address: SocketAddr },

    #[error("Piece {index} hash mismatch")]
    PieceHashMismatch { index: PieceIndex },

    #[error("Piece {index} unavailable after {attempts} attempts")]
    PieceUnavailable { index: PieceIndex, attempts: u32 },

    #[error(
        "Download stalled with {} piece(s) outstanding: {}",
        .missing.len(),
        format_piece_list(.missing)
    )]
    NoProgress { missing: Vec<PieceIndex> },

    #[error("No peers available for torrent")]
    NoPeersAvailable,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl TorrentError {
    /// Whether the session that produced this error must be closed.
    ///
    /// A bad piece or a failed local write says nothing about the connection,
    /// so those keep the session; everything else discards it.
    pub fn is_session_fatal(&self) -> bool {
        !matches!(
            self,
            TorrentError::PieceHashMismatch { .. } | TorrentError::Storage(_)
        )
    }

    /// Whether this error is a peer timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TorrentError::PeerTimeout { .. })
    }
}
