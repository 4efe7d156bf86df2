//! Concurrent piece download scheduler.
//!
//! Connects to peers with bounded fan-out, then runs one worker task per
//! usable session. Workers pull the lowest pending piece their peer has,
//! download, verify, and write it, handing the piece back to the shared
//! ledger on any failure. The job succeeds only when every piece is written.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinSet;

use super::pending::{PendingPieces, ReleaseOutcome};
use super::protocol::PeerId;
use super::session::{PeerSession, SessionSettings};
use super::verify::verify_piece;
use super::{PieceIndex, TorrentError, TorrentManifest};
use crate::config::ShoalConfig;
use crate::storage::{OutputFile, PieceSink};

/// Outcome of a completed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub pieces_written: u32,
    pub bytes_written: u64,
    /// Peers that contributed at least one piece
    pub peers_used: usize,
    pub output_path: PathBuf,
}

/// Per-worker tally returned when a worker exits.
#[derive(Debug, Clone, Copy)]
struct WorkerSummary {
    pieces_written: u32,
    bytes_written: u64,
}

/// Drives a whole torrent download across many peers.
pub struct DownloadScheduler {
    manifest: Arc<TorrentManifest>,
    local_peer_id: PeerId,
    settings: SessionSettings,
    max_concurrent_connects: usize,
    max_piece_attempts: u32,
    temp_file_suffix: String,
}

impl DownloadScheduler {
    /// Creates a scheduler for `manifest` identifying itself as `local_peer_id`.
    pub fn new(manifest: TorrentManifest, local_peer_id: PeerId, config: &ShoalConfig) -> Self {
        Self {
            manifest: Arc::new(manifest),
            local_peer_id,
            settings: SessionSettings::from_config(config),
            max_concurrent_connects: config.network.max_concurrent_connects.max(1),
            max_piece_attempts: config.torrent.max_piece_attempts,
            temp_file_suffix: config.storage.temp_file_suffix.to_string(),
        }
    }

    /// The manifest being downloaded.
    pub fn manifest(&self) -> &TorrentManifest {
        &self.manifest
    }

    /// Downloads every piece into `output_path`.
    ///
    /// Content is written to a temporary sibling file and only moved to
    /// `output_path` once every piece is verified and written.
    ///
    /// # Errors
    /// - `TorrentError::NoProgress` - Peers ran out before every piece was written
    /// - `TorrentError::Storage` - Output file could not be created or finalized
    pub async fn run(
        &self,
        peers: &[SocketAddr],
        output_path: &Path,
    ) -> Result<DownloadReport, TorrentError> {
        let sessions = self.connect_peers(peers).await;

        let output = OutputFile::create(
            output_path,
            self.manifest.total_length,
            &self.temp_file_suffix,
        )
        .await?;
        let sink = Arc::new(output.clone());

        let mut report = self.run_sessions(sessions, sink).await?;
        report.output_path = output.finalize().await?;

        tracing::info!(
            "Downloaded {} piece(s), {} bytes from {} peer(s) into {}",
            report.pieces_written,
            report.bytes_written,
            report.peers_used,
            report.output_path.display()
        );
        Ok(report)
    }

    /// Downloads every piece into an arbitrary sink.
    ///
    /// The returned report carries an empty `output_path`.
    ///
    /// # Errors
    /// - `TorrentError::NoProgress` - Peers ran out before every piece was written
    pub async fn run_with_sink<W>(
        &self,
        peers: &[SocketAddr],
        sink: Arc<W>,
    ) -> Result<DownloadReport, TorrentError>
    where
        W: PieceSink + 'static,
    {
        let sessions = self.connect_peers(peers).await;
        self.run_sessions(sessions, sink).await
    }

    /// Fetches and verifies a single piece from the first peer that can serve it.
    ///
    /// # Errors
    /// - `TorrentError::InvalidManifest` - Index out of range
    /// - `TorrentError::PieceUnavailable` - No connected peer delivered a valid copy
    pub async fn download_single_piece(
        &self,
        peers: &[SocketAddr],
        index: PieceIndex,
    ) -> Result<Vec<u8>, TorrentError> {
        let (piece_length, expected_hash) = piece_layout(&self.manifest, index)?;
        let sessions = self.connect_peers(peers).await;

        let mut attempts = 0;
        for mut session in sessions {
            if !session.has_piece(index) {
                continue;
            }
            attempts += 1;

            let address = session.address();
            let result = async {
                session.establish_interest().await?;
                session.download_piece(index, piece_length).await
            }
            .await;
            session.close().await;

            match result {
                Ok(data) if verify_piece(&data, &expected_hash) => {
                    tracing::info!("Piece {index} downloaded from {address}");
                    return Ok(data);
                }
                Ok(_) => {
                    tracing::warn!("{}", TorrentError::PieceHashMismatch { index });
                }
                Err(e) => {
                    tracing::warn!("Piece {index} from {address} failed: {e}");
                }
            }
        }

        Err(TorrentError::PieceUnavailable { index, attempts })
    }

    /// Connects to every distinct address, at most `max_concurrent_connects`
    /// at a time. Peers that fail to connect or deliver a bitfield are dropped.
    pub async fn connect_peers(&self, peers: &[SocketAddr]) -> Vec<PeerSession> {
        let mut seen = HashSet::new();
        let addresses: Vec<SocketAddr> = peers
            .iter()
            .copied()
            .filter(|address| seen.insert(*address))
            .collect();

        let info_hash = self.manifest.info_hash;
        let local_peer_id = self.local_peer_id;
        let settings = self.settings;

        let sessions: Vec<PeerSession> = futures::stream::iter(addresses)
            .map(|address| async move {
                let result =
                    PeerSession::connect(address, info_hash, local_peer_id, settings).await;
                if let Err(e) = &result {
                    tracing::warn!("Dropping peer {address}: {e}");
                }
                result.ok()
            })
            .buffer_unordered(self.max_concurrent_connects)
            .filter_map(std::future::ready)
            .collect()
            .await;

        tracing::info!(
            "Connected to {} of {} peer(s)",
            sessions.len(),
            peers.len()
        );
        sessions
    }

    async fn run_sessions<S, W>(
        &self,
        sessions: Vec<PeerSession<S>>,
        sink: Arc<W>,
    ) -> Result<DownloadReport, TorrentError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        W: PieceSink + 'static,
    {
        let pending = Arc::new(PendingPieces::new(
            self.manifest.piece_indices(),
            self.max_piece_attempts,
        ));

        if sessions.is_empty() {
            tracing::warn!("No usable peers for {}", self.manifest.info_hash);
        }

        let mut workers = JoinSet::new();
        for session in sessions {
            workers.spawn(run_worker(
                session,
                self.manifest.clone(),
                pending.clone(),
                sink.clone(),
            ));
        }

        let mut report = DownloadReport {
            pieces_written: 0,
            bytes_written: 0,
            peers_used: 0,
            output_path: PathBuf::new(),
        };
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(summary) => {
                    report.pieces_written += summary.pieces_written;
                    report.bytes_written += summary.bytes_written;
                    if summary.pieces_written > 0 {
                        report.peers_used += 1;
                    }
                }
                Err(e) => tracing::error!("Download worker aborted: {e}"),
            }
        }

        if pending.is_complete() {
            Ok(report)
        } else {
            let missing = pending.outstanding();
            tracing::error!(
                "Download incomplete after all peers exited, missing {} piece(s)",
                missing.len()
            );
            Err(TorrentError::NoProgress { missing })
        }
    }
}

/// Length and expected hash of `index`.
fn piece_layout(
    manifest: &TorrentManifest,
    index: PieceIndex,
) -> Result<(u32, [u8; 20]), TorrentError> {
    match (manifest.piece_size(index), manifest.piece_hash(index)) {
        (Some(length), Some(hash)) => Ok((length, *hash)),
        _ => Err(TorrentError::InvalidManifest {
            reason: format!(
                "Piece {index} out of range for {} piece(s)",
                manifest.piece_count()
            ),
        }),
    }
}

/// Drives one session until its peer has nothing left to offer or fails.
async fn run_worker<S, W>(
    mut session: PeerSession<S>,
    manifest: Arc<TorrentManifest>,
    pending: Arc<PendingPieces>,
    sink: Arc<W>,
) -> WorkerSummary
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    W: PieceSink + ?Sized,
{
    let address = session.address();
    let mut summary = WorkerSummary {
        pieces_written: 0,
        bytes_written: 0,
    };

    if let Err(e) = session.establish_interest().await {
        tracing::warn!("Peer {address} never became ready: {e}");
        session.close().await;
        return summary;
    }

    let bitfield = session.bitfield().clone();
    // Pieces this peer served with a bad hash; left for other peers
    let mut rejected = HashSet::new();
    loop {
        let Some(index) = pending
            .claim(address, |index| {
                bitfield.has_piece(index) && !rejected.contains(&index)
            })
            .await
        else {
            tracing::info!("Peer {address} idle, nothing left it can serve");
            break;
        };

        tracing::debug!("Peer {address} downloading piece {index}");
        match fetch_piece(&mut session, &manifest, index, sink.as_ref()).await {
            Ok(bytes) => {
                pending.retire(index, address);
                summary.pieces_written += 1;
                summary.bytes_written += bytes;
                tracing::info!("Piece {index} written ({bytes} bytes) from {address}");
            }
            Err(error) => {
                if matches!(error, TorrentError::PieceHashMismatch { .. }) {
                    rejected.insert(index);
                }
                match pending.release(index, address) {
                    ReleaseOutcome::Requeued { attempts } => {
                        tracing::warn!(
                            "Piece {index} from {address} failed (attempt {attempts}): {error}"
                        );
                    }
                    ReleaseOutcome::Abandoned { attempts } => {
                        tracing::error!("{}", TorrentError::PieceUnavailable { index, attempts });
                    }
                    ReleaseOutcome::NotHeld => {
                        tracing::error!("Piece {index} was not held by {address} on release");
                    }
                }

                if error.is_session_fatal() {
                    if error.is_timeout() {
                        tracing::warn!("Peer {address} timed out, treating it as dead");
                    } else {
                        tracing::warn!("Closing session with {address}: {error}");
                    }
                    break;
                }
            }
        }
    }

    session.close().await;
    summary
}

/// Downloads, verifies, and writes one piece; returns its length.
async fn fetch_piece<S, W>(
    session: &mut PeerSession<S>,
    manifest: &TorrentManifest,
    index: PieceIndex,
    sink: &W,
) -> Result<u64, TorrentError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    W: PieceSink + ?Sized,
{
    let (piece_length, expected_hash) = piece_layout(manifest, index)?;

    let data = session.download_piece(index, piece_length).await?;
    if !verify_piece(&data, &expected_hash) {
        return Err(TorrentError::PieceHashMismatch { index });
    }

    let bytes = data.len() as u64;
    sink.write_piece(index, manifest.piece_length, data).await?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::storage::StorageError;
    use crate::torrent::test_peer::{TestPeer, sample_manifest};

    /// Sink that refuses every write.
    struct ReadOnlySink {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl PieceSink for ReadOnlySink {
        async fn write_piece(
            &self,
            _index: PieceIndex,
            _piece_length: u32,
            _piece_bytes: Vec<u8>,
        ) -> Result<(), StorageError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(StorageError::FilesystemError {
                message: "read-only file system".to_string(),
            })
        }
    }

    fn scheduler(manifest: TorrentManifest) -> DownloadScheduler {
        DownloadScheduler::new(
            manifest,
            PeerId::generate_with_prefix("-SH0001-"),
            &ShoalConfig::for_testing(),
        )
    }

    #[tokio::test]
    async fn test_unwritable_sink_exhausts_attempts() {
        let content = b"unwritable".to_vec();
        let manifest = sample_manifest(&content, 5);
        let address = TestPeer::seeding(&manifest, &content).spawn().await;

        let sink = Arc::new(ReadOnlySink {
            attempts: AtomicUsize::new(0),
        });
        let result = scheduler(manifest)
            .run_with_sink(&[address], sink.clone())
            .await;

        match result {
            Err(TorrentError::NoProgress { missing }) => {
                assert_eq!(missing, vec![PieceIndex::new(0), PieceIndex::new(1)]);
            }
            other => panic!("expected NoProgress, got {other:?}"),
        }
        // Storage failures keep the session, so each piece uses its full budget
        let cap = ShoalConfig::for_testing().torrent.max_piece_attempts as usize;
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 2 * cap);
    }

    #[tokio::test]
    async fn test_no_peers_fails_with_every_piece_missing() {
        let content = b"nobody".to_vec();
        let manifest = sample_manifest(&content, 2);

        let temp_dir = tempfile::tempdir().unwrap();
        let output = temp_dir.path().join("nobody.bin");
        let result = scheduler(manifest).run(&[], &output).await;

        match result {
            Err(TorrentError::NoProgress { missing }) => assert_eq!(missing.len(), 3),
            other => panic!("expected NoProgress, got {other:?}"),
        }
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_duplicate_addresses_connect_once() {
        let content = b"dup".to_vec();
        let manifest = sample_manifest(&content, 3);
        let address = TestPeer::seeding(&manifest, &content).spawn().await;

        let sessions = scheduler(manifest)
            .connect_peers(&[address, address, address])
            .await;
        assert_eq!(sessions.len(), 1);
    }

    #[tokio::test]
    async fn test_download_single_piece_skips_peers_without_it() {
        let content = b"0123456789".to_vec();
        let manifest = sample_manifest(&content, 4);
        let lacking = TestPeer::seeding(&manifest, &content)
            .with_pieces([PieceIndex::new(0)])
            .spawn()
            .await;
        let having = TestPeer::seeding(&manifest, &content).spawn().await;

        let piece = scheduler(manifest)
            .download_single_piece(&[lacking, having], PieceIndex::new(2))
            .await
            .unwrap();
        assert_eq!(piece, b"89");
    }

    #[tokio::test]
    async fn test_download_single_piece_rejects_corrupt_copy() {
        let content = b"abcdefgh".to_vec();
        let manifest = sample_manifest(&content, 4);
        let address = TestPeer::seeding(&manifest, &content)
            .corrupting([PieceIndex::new(1)])
            .spawn()
            .await;

        let result = scheduler(manifest)
            .download_single_piece(&[address], PieceIndex::new(1))
            .await;
        assert!(matches!(
            result,
            Err(TorrentError::PieceUnavailable { attempts: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_download_single_piece_out_of_range() {
        let content = b"abcd".to_vec();
        let manifest = sample_manifest(&content, 4);

        let result = scheduler(manifest)
            .download_single_piece(&[], PieceIndex::new(5))
            .await;
        assert!(matches!(result, Err(TorrentError::InvalidManifest { .. })));
    }
}
