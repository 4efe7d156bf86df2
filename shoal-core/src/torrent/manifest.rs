//! Immutable piece-hash manifest of a single-file torrent.

use super::{InfoHash, PieceIndex, TorrentError};

/// Everything the download engine needs to know about a torrent.
///
/// Piece `i` covers bytes `i * piece_length .. i * piece_length + len_i`
/// of the output, where `len_i` is `piece_length` for every piece but the
/// last, which holds the remainder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentManifest {
    pub info_hash: InfoHash,
    pub piece_hashes: Vec<[u8; 20]>,
    pub total_length: u64,
    pub piece_length: u32,
}

impl TorrentManifest {
    /// Creates a manifest, checking the piece count against the lengths.
    ///
    /// # Errors
    /// - `TorrentError::InvalidManifest` - Zero piece length, empty torrent, or
    ///   a hash count that is not `ceil(total_length / piece_length)`
    pub fn new(
        info_hash: InfoHash,
        piece_hashes: Vec<[u8; 20]>,
        total_length: u64,
        piece_length: u32,
    ) -> Result<Self, TorrentError> {
        if piece_length == 0 {
            return Err(TorrentError::InvalidManifest {
                reason: "Piece length must be non-zero".to_string(),
            });
        }
        if total_length == 0 {
            return Err(TorrentError::InvalidManifest {
                reason: "Torrent has no content".to_string(),
            });
        }

        let expected = total_length.div_ceil(u64::from(piece_length));
        if piece_hashes.len() as u64 != expected {
            return Err(TorrentError::InvalidManifest {
                reason: format!(
                    "Expected {expected} piece hashes for {total_length} bytes, found {}",
                    piece_hashes.len()
                ),
            });
        }

        Ok(Self {
            info_hash,
            piece_hashes,
            total_length,
            piece_length,
        })
    }

    /// Number of pieces in the torrent.
    pub fn piece_count(&self) -> u32 {
        self.piece_hashes.len() as u32
    }

    /// Iterates every piece index in ascending order.
    pub fn piece_indices(&self) -> impl Iterator<Item = PieceIndex> {
        (0..self.piece_count()).map(PieceIndex::new)
    }

    /// True length of a piece, or `None` when the index is out of range.
    pub fn piece_size(&self, index: PieceIndex) -> Option<u32> {
        let count = self.piece_count();
        if index.as_u32() >= count {
            return None;
        }

        if index.as_u32() + 1 == count {
            let preceding = u64::from(self.piece_length) * u64::from(count - 1);
            Some((self.total_length - preceding) as u32)
        } else {
            Some(self.piece_length)
        }
    }

    /// Absolute byte offset of a piece within the output file.
    pub fn piece_offset(&self, index: PieceIndex) -> u64 {
        u64::from(index.as_u32()) * u64::from(self.piece_length)
    }

    /// Expected SHA-1 of a piece.
    pub fn piece_hash(&self, index: PieceIndex) -> Option<&[u8; 20]> {
        self.piece_hashes.get(index.as_usize())
    }
}
