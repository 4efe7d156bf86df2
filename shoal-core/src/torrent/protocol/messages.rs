//! BitTorrent wire protocol message serialization and deserialization

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::types::{MessageId, PeerMessage};
use crate::torrent::{PieceIndex, TorrentError};

/// Upper bound on a single frame; comfortably above a 16 KiB block or the
/// bitfield of any realistic torrent.
pub const MAX_FRAME_LENGTH: u32 = 1 << 21;

/// Message serialization utilities for BitTorrent wire protocol.
pub struct MessageCodec;

impl MessageCodec {
    /// Frames a raw message: big-endian `1 + payload.len()`, id, payload.
    pub fn encode_frame(id: u8, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(5 + payload.len());
        buf.put_u32(1 + payload.len() as u32);
        buf.put_u8(id);
        buf.extend_from_slice(payload);
        buf.freeze()
    }

    /// The zero-length keep-alive frame.
    pub fn keep_alive() -> Bytes {
        Bytes::from_static(&[0, 0, 0, 0])
    }

    /// Serializes a typed message into a complete frame.
    pub fn serialize_message(message: &PeerMessage) -> Bytes {
        let mut payload = BytesMut::new();

        match message {
            PeerMessage::Choke
            | PeerMessage::Unchoke
            | PeerMessage::Interested
            | PeerMessage::NotInterested => {}
            PeerMessage::Have { piece_index } => {
                payload.put_u32(piece_index.as_u32());
            }
            PeerMessage::Bitfield { bitfield } => {
                payload.extend_from_slice(bitfield);
            }
            PeerMessage::Request {
                piece_index,
                offset,
                length,
            }
            | PeerMessage::Cancel {
                piece_index,
                offset,
                length,
            } => {
                payload.put_u32(piece_index.as_u32());
                payload.put_u32(*offset);
                payload.put_u32(*length);
            }
            PeerMessage::Piece {
                piece_index,
                offset,
                data,
            } => {
                payload.put_u32(piece_index.as_u32());
                payload.put_u32(*offset);
                payload.extend_from_slice(data);
            }
            PeerMessage::Unknown { payload: raw, .. } => {
                payload.extend_from_slice(raw);
            }
        }

        Self::encode_frame(message.id(), &payload)
    }

    /// Parses a frame body (id byte followed by payload, length prefix removed).
    ///
    /// # Errors
    /// - `TorrentError::ProtocolError` - Empty body or a payload of the wrong size for its id
    pub fn parse_frame_body(mut body: Bytes) -> Result<PeerMessage, TorrentError> {
        if body.is_empty() {
            return Err(TorrentError::ProtocolError {
                message: "Frame body missing message id".to_string(),
            });
        }

        let raw_id = body.get_u8();
        let Ok(id) = MessageId::try_from(raw_id) else {
            return Ok(PeerMessage::Unknown {
                id: raw_id,
                payload: body,
            });
        };

        let expect_len = |expected: usize, body: &Bytes| {
            if body.len() == expected {
                Ok(())
            } else {
                Err(TorrentError::ProtocolError {
                    message: format!(
                        "Invalid {id:?} payload length {}, expected {expected}",
                        body.len()
                    ),
                })
            }
        };

        match id {
            MessageId::Choke => Ok(PeerMessage::Choke),
            MessageId::Unchoke => Ok(PeerMessage::Unchoke),
            MessageId::Interested => Ok(PeerMessage::Interested),
            MessageId::NotInterested => Ok(PeerMessage::NotInterested),
            MessageId::Have => {
                expect_len(4, &body)?;
                Ok(PeerMessage::Have {
                    piece_index: PieceIndex::new(body.get_u32()),
                })
            }
            MessageId::Bitfield => Ok(PeerMessage::Bitfield { bitfield: body }),
            MessageId::Request | MessageId::Cancel => {
                expect_len(12, &body)?;
                let piece_index = PieceIndex::new(body.get_u32());
                let offset = body.get_u32();
                let length = body.get_u32();
                if id == MessageId::Request {
                    Ok(PeerMessage::Request {
                        piece_index,
                        offset,
                        length,
                    })
                } else {
                    Ok(PeerMessage::Cancel {
                        piece_index,
                        offset,
                        length,
                    })
                }
            }
            MessageId::Piece => {
                if body.len() < 8 {
                    return Err(TorrentError::ProtocolError {
                        message: format!("Piece payload too short: {} bytes", body.len()),
                    });
                }
                let piece_index = PieceIndex::new(body.get_u32());
                let offset = body.get_u32();
                Ok(PeerMessage::Piece {
                    piece_index,
                    offset,
                    data: body,
                })
            }
        }
    }
}

/// Reads the next message from a stream, skipping keep-alive frames.
///
/// # Errors
/// - `TorrentError::TruncatedFrame` - Stream closed before a full frame arrived
/// - `TorrentError::ProtocolError` - Oversized or malformed frame
/// - `TorrentError::Io` - Any other read failure
pub async fn read_message<R>(reader: &mut R) -> Result<PeerMessage, TorrentError>
where
    R: AsyncRead + Unpin,
{
    loop {
        let length = reader.read_u32().await.map_err(map_read_error)?;

        if length == 0 {
            tracing::trace!("Skipping keep-alive frame");
            continue;
        }

        if length > MAX_FRAME_LENGTH {
            return Err(TorrentError::ProtocolError {
                message: format!("Frame length {length} exceeds limit {MAX_FRAME_LENGTH}"),
            });
        }

        let mut body = vec![0u8; length as usize];
        reader.read_exact(&mut body).await.map_err(map_read_error)?;

        return MessageCodec::parse_frame_body(Bytes::from(body));
    }
}

/// Serializes and writes one message, flushing the stream.
///
/// # Errors
/// - `TorrentError::Io` - Write failure
pub async fn write_message<W>(writer: &mut W, message: &PeerMessage) -> Result<(), TorrentError>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(&MessageCodec::serialize_message(message))
        .await?;
    writer.flush().await?;
    Ok(())
}

fn map_read_error(error: std::io::Error) -> TorrentError {
    if error.kind() == std::io::ErrorKind::UnexpectedEof {
        TorrentError::TruncatedFrame
    } else {
        TorrentError::Io(error)
    }
}
