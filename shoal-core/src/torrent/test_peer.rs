//! Scriptable local seeder for session and scheduler tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use super::protocol::{
    Bitfield, HANDSHAKE_LEN, HandshakeCodec, MessageCodec, PeerHandshake, PeerId, PeerMessage,
    read_message, write_message,
};
use super::verify::piece_hash;
use super::{InfoHash, PieceIndex, TorrentError, TorrentManifest};

/// Builds a manifest over `content` with a fixed test info hash.
pub(crate) fn sample_manifest(content: &[u8], piece_length: u32) -> TorrentManifest {
    let piece_hashes = content
        .chunks(piece_length as usize)
        .map(piece_hash)
        .collect();
    TorrentManifest::new(
        InfoHash::new(piece_hash(content)),
        piece_hashes,
        content.len() as u64,
        piece_length,
    )
    .unwrap()
}

/// Local peer serving a known content buffer with configurable misbehavior.
#[derive(Clone)]
pub(crate) struct TestPeer {
    info_hash: InfoHash,
    pieces: Arc<HashMap<PieceIndex, Bytes>>,
    bitfield: Bitfield,
    send_bitfield: bool,
    choke: bool,
    keep_alives: bool,
    corrupt: Vec<PieceIndex>,
    response_delay: Duration,
    stall_next_request: Arc<AtomicBool>,
    blocks_served: Arc<AtomicUsize>,
}

impl TestPeer {
    pub(crate) const PEER_ID: PeerId = PeerId::new(*b"-TP0001-testpeer0001");

    /// Seeds every piece of `content` and advertises all of them.
    pub(crate) fn seeding(manifest: &TorrentManifest, content: &[u8]) -> Self {
        let pieces: HashMap<PieceIndex, Bytes> = manifest
            .piece_indices()
            .zip(content.chunks(manifest.piece_length as usize))
            .map(|(index, chunk)| (index, Bytes::copy_from_slice(chunk)))
            .collect();

        Self {
            info_hash: manifest.info_hash,
            bitfield: Bitfield::from_pieces(manifest.piece_count(), manifest.piece_indices()),
            pieces: Arc::new(pieces),
            send_bitfield: true,
            choke: false,
            keep_alives: false,
            corrupt: Vec::new(),
            response_delay: Duration::ZERO,
            stall_next_request: Arc::new(AtomicBool::new(false)),
            blocks_served: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Advertises only `pieces`; requests for anything else drop the connection.
    pub(crate) fn with_pieces(mut self, pieces: impl IntoIterator<Item = PieceIndex>) -> Self {
        self.bitfield = Bitfield::from_pieces(self.pieces.len() as u32, pieces);
        self
    }

    /// Sends an unchoke where the bitfield belongs.
    pub(crate) fn without_bitfield(mut self) -> Self {
        self.send_bitfield = false;
        self
    }

    /// Answers interested with choke.
    pub(crate) fn choking(mut self) -> Self {
        self.choke = true;
        self
    }

    /// Precedes every block with a keep-alive frame.
    pub(crate) fn with_keep_alives(mut self) -> Self {
        self.keep_alives = true;
        self
    }

    /// Serves `pieces` with their first byte flipped.
    pub(crate) fn corrupting(mut self, pieces: impl IntoIterator<Item = PieceIndex>) -> Self {
        self.corrupt.extend(pieces);
        self
    }

    /// Sleeps before answering each request.
    pub(crate) fn with_response_delay(mut self, delay: Duration) -> Self {
        self.response_delay = delay;
        self
    }

    /// Leaves the first request received (across all connections) unanswered.
    pub(crate) fn stalling_first_request(self) -> Self {
        self.stall_next_request.store(true, Ordering::SeqCst);
        self
    }

    /// Counter of blocks this peer has sent.
    pub(crate) fn blocks_served(&self) -> Arc<AtomicUsize> {
        self.blocks_served.clone()
    }

    /// Binds an ephemeral local port and serves connections in the background.
    pub(crate) async fn spawn(self) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tracing::debug!("Test peer listening on {address}");

        tokio::spawn(async move {
            while let Ok((stream, remote)) = listener.accept().await {
                let peer = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = peer.serve(stream).await {
                        tracing::debug!("Test peer connection from {remote} ended: {e}");
                    }
                });
            }
        });

        address
    }

    async fn serve(&self, mut stream: TcpStream) -> Result<(), TorrentError> {
        let mut handshake = [0u8; HANDSHAKE_LEN];
        stream.read_exact(&mut handshake).await?;
        let reply = PeerHandshake::new(self.info_hash, Self::PEER_ID);
        stream
            .write_all(&HandshakeCodec::serialize_handshake(&reply))
            .await?;

        let first = if self.send_bitfield {
            PeerMessage::Bitfield {
                bitfield: self.bitfield.as_bytes().clone(),
            }
        } else {
            PeerMessage::Unchoke
        };
        write_message(&mut stream, &first).await?;

        loop {
            match read_message(&mut stream).await? {
                PeerMessage::Interested => {
                    let answer = if self.choke {
                        PeerMessage::Choke
                    } else {
                        PeerMessage::Unchoke
                    };
                    write_message(&mut stream, &answer).await?;
                }
                PeerMessage::Request {
                    piece_index,
                    offset,
                    length,
                } => {
                    if self.stall_next_request.swap(false, Ordering::SeqCst) {
                        continue;
                    }
                    let Some(data) = self.block(piece_index, offset, length) else {
                        return Ok(());
                    };

                    tokio::time::sleep(self.response_delay).await;
                    if self.keep_alives {
                        stream.write_all(&MessageCodec::keep_alive()).await?;
                    }
                    write_message(
                        &mut stream,
                        &PeerMessage::Piece {
                            piece_index,
                            offset,
                            data,
                        },
                    )
                    .await?;
                    self.blocks_served.fetch_add(1, Ordering::SeqCst);
                }
                _ => {}
            }
        }
    }

    fn block(&self, index: PieceIndex, offset: u32, length: u32) -> Option<Bytes> {
        if !self.bitfield.has_piece(index) {
            return None;
        }
        let piece = self.pieces.get(&index)?;
        let start = offset as usize;
        let end = start.checked_add(length as usize)?;
        if end > piece.len() {
            return None;
        }

        if offset == 0 && self.corrupt.contains(&index) {
            let mut block = piece[start..end].to_vec();
            if let Some(first) = block.first_mut() {
                *first ^= 0xFF;
            }
            Some(Bytes::from(block))
        } else {
            Some(piece.slice(start..end))
        }
    }
}
