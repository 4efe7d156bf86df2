//! Shoal Core - BitTorrent peer-wire download engine
//!
//! This crate turns a torrent's piece-hash manifest and a list of peer
//! addresses into a verified, reassembled file on disk: wire protocol codec,
//! peer sessions, concurrent piece scheduling, verification, and file assembly.

pub mod config;
pub mod storage;
pub mod torrent;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use config::ShoalConfig;
pub use storage::{OutputFile, StorageError};
pub use torrent::{DownloadReport, DownloadScheduler, TorrentError, TorrentManifest};

/// Core errors that can bubble up from any Shoal subsystem.
///
/// High-level error types representing failures in core functionality.
#[derive(Debug, thiserror::Error)]
pub enum ShoalError {
    #[error("Torrent error: {0}")]
    Torrent(#[from] TorrentError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShoalError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            ShoalError::Torrent(e) => match e {
                TorrentError::InvalidTorrentFile { reason } => {
                    format!("Invalid torrent file: {reason}")
                }
                TorrentError::TrackerConnectionFailed { url } => {
                    format!("Could not connect to tracker: {url}")
                }
                TorrentError::NoPeersAvailable => "No peers available for download".to_string(),
                TorrentError::PieceUnavailable { index, .. } => {
                    format!("Piece {index} could not be obtained from any peer")
                }
                TorrentError::NoProgress { missing } => format!(
                    "Download incomplete, {} piece(s) could not be obtained",
                    missing.len()
                ),
                _ => "Download error occurred".to_string(),
            },
            ShoalError::Storage(_) => "Storage error occurred".to_string(),
            ShoalError::Configuration { .. } => "Configuration error occurred".to_string(),
            ShoalError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            ShoalError::Configuration { .. }
                | ShoalError::Torrent(TorrentError::InvalidTorrentFile { .. })
                | ShoalError::Torrent(TorrentError::InvalidManifest { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, ShoalError>;
