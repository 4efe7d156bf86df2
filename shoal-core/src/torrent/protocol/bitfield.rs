//! Piece availability bitmap advertised by a peer.

use bytes::Bytes;

use crate::torrent::PieceIndex;

/// Bit-per-piece map; the high bit of byte 0 is piece 0.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bitfield(Bytes);

impl Bitfield {
    /// Wraps the raw payload of a bitfield message.
    pub fn new(bytes: Bytes) -> Self {
        Self(bytes)
    }

    /// Builds a bitfield sized for `piece_count` with the given pieces set.
    pub fn from_pieces(piece_count: u32, pieces: impl IntoIterator<Item = PieceIndex>) -> Self {
        let mut bytes = vec![0u8; piece_count.div_ceil(8) as usize];
        for piece in pieces {
            let index = piece.as_usize();
            if let Some(byte) = bytes.get_mut(index / 8) {
                *byte |= 1 << (7 - index % 8);
            }
        }
        Self(Bytes::from(bytes))
    }

    /// Whether the peer advertises `index`. Indices past the end are absent.
    pub fn has_piece(&self, index: PieceIndex) -> bool {
        let index = index.as_usize();
        self.0
            .get(index / 8)
            .is_some_and(|byte| byte & (1 << (7 - index % 8)) != 0)
    }

    /// True when no bit is set.
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|byte| *byte == 0)
    }

    /// Number of pieces advertised.
    pub fn count_available(&self) -> u32 {
        self.0.iter().map(|byte| byte.count_ones()).sum()
    }

    /// Raw bytes as sent on the wire.
    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }
}
