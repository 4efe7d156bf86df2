//! Storage layer for downloaded piece data.
//!
//! Defines the piece sink interface the scheduler writes verified pieces to,
//! with a single-file implementation that writes each piece at its own
//! absolute offset.

pub mod assembler;

use async_trait::async_trait;

pub use assembler::OutputFile;

use crate::torrent::PieceIndex;

/// Destination for verified pieces.
///
/// Each piece owns the disjoint byte range `index * piece_length ..+len`,
/// so implementations may be written to concurrently without locking.
#[async_trait]
pub trait PieceSink: Send + Sync {
    /// Writes a verified piece at `index * piece_length`.
    ///
    /// # Errors
    ///
    /// - `StorageError::OutOfBounds` - If the piece would extend past the content length
    /// - `StorageError::Io` - If the write failed
    async fn write_piece(
        &self,
        index: PieceIndex,
        piece_length: u32,
        piece_bytes: Vec<u8>,
    ) -> Result<(), StorageError>;
}

/// Errors that occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Write would land outside the file's declared length
    #[error("Piece {index} at offset {offset} with {length} bytes exceeds file length {file_length}")]
    OutOfBounds {
        index: PieceIndex,
        offset: u64,
        length: usize,
        file_length: u64,
    },

    /// File system specific error occurred
    #[error("File system error: {message}")]
    FilesystemError {
        /// Description of the file system error
        message: String,
    },

    /// Standard I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
