//! A single peer connection driven by exactly one download worker.
//!
//! The session performs the handshake and bitfield exchange on connect,
//! declares interest and waits for the unchoke, then serves block-by-block
//! piece downloads with one request in flight at a time.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::protocol::{
    Bitfield, HANDSHAKE_LEN, HandshakeCodec, PeerHandshake, PeerId, PeerMessage, PeerState,
    read_message, write_message,
};
use super::{InfoHash, PieceIndex, TorrentError};
use crate::config::ShoalConfig;

/// Timeouts and sizing applied to every session.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Bound on TCP connect plus handshake and bitfield
    pub connect_timeout: Duration,
    /// Bound on each individual read or write afterwards
    pub read_timeout: Duration,
    /// Largest block requested at once
    pub block_size: u32,
}

impl SessionSettings {
    pub fn from_config(config: &ShoalConfig) -> Self {
        Self {
            connect_timeout: config.network.connect_timeout,
            read_timeout: config.network.read_timeout,
            block_size: config.torrent.block_size,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&ShoalConfig::default())
    }
}

/// Established connection to one remote peer.
pub struct PeerSession<S = TcpStream> {
    address: SocketAddr,
    peer_id: PeerId,
    bitfield: Bitfield,
    stream: S,
    state: PeerState,
    settings: SessionSettings,
}

impl PeerSession<TcpStream> {
    /// Opens a TCP connection, exchanges handshakes, and reads the bitfield.
    ///
    /// The whole exchange is bounded by `settings.connect_timeout`.
    ///
    /// # Errors
    /// - `TorrentError::PeerConnectionError` - Peer unreachable or too slow to connect
    /// - `TorrentError::HandshakeFailed` - Short or mismatched handshake
    /// - `TorrentError::ProtocolError` - First message was not a bitfield
    pub async fn connect(
        address: SocketAddr,
        info_hash: InfoHash,
        local_peer_id: PeerId,
        settings: SessionSettings,
    ) -> Result<Self, TorrentError> {
        let attempt = async {
            let stream = TcpStream::connect(address).await.map_err(|e| {
                TorrentError::PeerConnectionError {
                    address,
                    reason: e.to_string(),
                }
            })?;
            Self::from_stream(stream, address, info_hash, local_peer_id, settings).await
        };

        match timeout(settings.connect_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(TorrentError::PeerConnectionError {
                address,
                reason: format!(
                    "no handshake and bitfield within {}ms",
                    settings.connect_timeout.as_millis()
                ),
            }),
        }
    }
}

impl<S> PeerSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Runs the handshake and bitfield exchange over an already open stream.
    ///
    /// # Errors
    /// - `TorrentError::HandshakeFailed` - Short or mismatched handshake
    /// - `TorrentError::ProtocolError` - First message was not a bitfield
    pub async fn from_stream(
        mut stream: S,
        address: SocketAddr,
        info_hash: InfoHash,
        local_peer_id: PeerId,
        settings: SessionSettings,
    ) -> Result<Self, TorrentError> {
        let handshake = PeerHandshake::new(info_hash, local_peer_id);
        let handshake_failed = |reason: String| TorrentError::HandshakeFailed { address, reason };

        stream
            .write_all(&HandshakeCodec::serialize_handshake(&handshake))
            .await
            .map_err(|e| handshake_failed(format!("failed to send handshake: {e}")))?;

        let mut response = [0u8; HANDSHAKE_LEN];
        stream
            .read_exact(&mut response)
            .await
            .map_err(|e| handshake_failed(format!("failed to read handshake: {e}")))?;

        let remote = HandshakeCodec::deserialize_handshake(&response);
        if remote.info_hash != info_hash {
            return Err(handshake_failed(format!(
                "info hash mismatch, peer sent {}",
                remote.info_hash
            )));
        }
        tracing::debug!("Handshake with {address} complete, peer id {}", remote.peer_id);

        let bitfield = match read_message(&mut stream).await {
            Ok(PeerMessage::Bitfield { bitfield }) => Bitfield::new(bitfield),
            Ok(other) => {
                return Err(TorrentError::ProtocolError {
                    message: format!(
                        "expected bitfield from {address}, received message id {}",
                        other.id()
                    ),
                });
            }
            Err(TorrentError::Io(e)) => {
                return Err(TorrentError::PeerIo {
                    address,
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        };
        tracing::debug!(
            "Peer {address} advertises {} piece(s)",
            bitfield.count_available()
        );

        Ok(Self {
            address,
            peer_id: remote.peer_id,
            bitfield,
            stream,
            state: PeerState::Connected,
            settings,
        })
    }

    /// Remote socket address.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Peer id the remote side sent in its handshake.
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Pieces the remote side advertised.
    pub fn bitfield(&self) -> &Bitfield {
        &self.bitfield
    }

    /// Local interest/choke state.
    pub fn state(&self) -> PeerState {
        self.state
    }

    /// Whether the peer's bitfield has `index` set.
    pub fn has_piece(&self, index: PieceIndex) -> bool {
        self.bitfield.has_piece(index)
    }

    /// Sends interested and blocks until the peer unchokes us.
    ///
    /// # Errors
    /// - `TorrentError::ProtocolError` - Any message other than unchoke arrived first
    /// - `TorrentError::PeerTimeout` / `TorrentError::PeerIo` - Connection failure
    pub async fn establish_interest(&mut self) -> Result<(), TorrentError> {
        self.send(PeerMessage::Interested).await?;
        self.state = PeerState::Interested;

        match self.receive().await? {
            PeerMessage::Unchoke => {
                self.state = PeerState::Unchoked;
                tracing::debug!("Peer {} unchoked us", self.address);
                Ok(())
            }
            other => Err(TorrentError::ProtocolError {
                message: format!(
                    "expected unchoke from {}, received message id {}",
                    self.address,
                    other.id()
                ),
            }),
        }
    }

    /// Downloads one piece of `piece_length` bytes block by block.
    ///
    /// Each block is requested and its response awaited before the next
    /// request goes out; the payload lands at the offset the response names.
    ///
    /// # Errors
    /// - `TorrentError::ProtocolError` - Not unchoked, or a non-piece/mismatched response
    /// - `TorrentError::PeerTimeout` / `TorrentError::PeerIo` / `TorrentError::TruncatedFrame` -
    ///   Connection failure mid-download
    pub async fn download_piece(
        &mut self,
        index: PieceIndex,
        piece_length: u32,
    ) -> Result<Vec<u8>, TorrentError> {
        if self.state != PeerState::Unchoked {
            return Err(TorrentError::ProtocolError {
                message: format!("cannot request blocks from {} while choked", self.address),
            });
        }

        let mut piece_data = vec![0u8; piece_length as usize];
        let mut offset = 0u32;

        while offset < piece_length {
            let request_length = self.settings.block_size.min(piece_length - offset);
            tracing::trace!(
                "Peer {} -> request piece {index} block {offset}+{request_length}",
                self.address
            );

            self.send(PeerMessage::Request {
                piece_index: index,
                offset,
                length: request_length,
            })
            .await?;

            match self.receive().await? {
                PeerMessage::Piece {
                    piece_index,
                    offset: block_offset,
                    data,
                } if piece_index == index => {
                    copy_block_to_piece(&mut piece_data, block_offset, &data)?;
                }
                other => {
                    return Err(TorrentError::ProtocolError {
                        message: format!(
                            "expected block of piece {index} from {}, received message id {}",
                            self.address,
                            other.id()
                        ),
                    });
                }
            }

            offset += request_length;
        }

        Ok(piece_data)
    }

    /// Shuts the connection down.
    pub async fn close(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            tracing::trace!("Shutdown of {} failed: {e}", self.address);
        }
    }

    async fn send(&mut self, message: PeerMessage) -> Result<(), TorrentError> {
        let address = self.address;
        match timeout(
            self.settings.read_timeout,
            write_message(&mut self.stream, &message),
        )
        .await
        {
            Ok(result) => result.map_err(|e| into_peer_error(address, e)),
            Err(_) => Err(TorrentError::PeerTimeout { address }),
        }
    }

    async fn receive(&mut self) -> Result<PeerMessage, TorrentError> {
        let address = self.address;
        match timeout(self.settings.read_timeout, read_message(&mut self.stream)).await {
            Ok(result) => result.map_err(|e| into_peer_error(address, e)),
            Err(_) => Err(TorrentError::PeerTimeout { address }),
        }
    }
}

fn into_peer_error(address: SocketAddr, error: TorrentError) -> TorrentError {
    match error {
        TorrentError::Io(e) => TorrentError::PeerIo {
            address,
            reason: e.to_string(),
        },
        other => other,
    }
}

/// Copies block data into the piece buffer with bounds checking.
fn copy_block_to_piece(
    piece_data: &mut [u8],
    offset: u32,
    block_data: &[u8],
) -> Result<(), TorrentError> {
    let start = offset as usize;
    let end = start + block_data.len();

    if end <= piece_data.len() {
        piece_data[start..end].copy_from_slice(block_data);
        Ok(())
    } else {
        Err(TorrentError::ProtocolError {
            message: format!(
                "block {start}..{end} exceeds piece length {}",
                piece_data.len()
            ),
        })
    }
}
