//! Metainfo (.torrent) loading for single-file torrents.

use std::path::Path;

use sha1::{Digest, Sha1};

use super::{InfoHash, TorrentError, TorrentManifest};

type BencodeDict<'a> = std::collections::HashMap<&'a [u8], bencode_rs::Value<'a>>;
type ParseResult<T> = Result<T, TorrentError>;

/// Everything a .torrent file tells us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentFileInfo {
    pub manifest: TorrentManifest,
    /// Tracker URL from the `announce` key
    pub announce: String,
    /// Suggested output file name
    pub name: String,
}

/// Reads and parses a .torrent file from disk.
///
/// # Errors
///
/// - `TorrentError::Io` - If the file cannot be read
/// - `TorrentError::InvalidTorrentFile` - If the content is not a single-file torrent
pub async fn parse_torrent_file(path: &Path) -> Result<TorrentFileInfo, TorrentError> {
    let torrent_bytes = tokio::fs::read(path).await?;
    parse_torrent_bytes(&torrent_bytes)
}

/// Parses bencoded metainfo.
///
/// The info hash is the SHA-1 of the `info` dictionary exactly as it
/// appears in `torrent_bytes`.
///
/// # Errors
///
/// - `TorrentError::InvalidTorrentFile` - Malformed bencode, missing fields, or multi-file layout
/// - `TorrentError::InvalidManifest` - Piece hashes do not match the declared lengths
pub fn parse_torrent_bytes(torrent_bytes: &[u8]) -> Result<TorrentFileInfo, TorrentError> {
    let parsed = bencode_rs::Value::parse(torrent_bytes).map_err(|e| {
        TorrentError::InvalidTorrentFile {
            reason: format!("Bencode parsing failed: {e:?}"),
        }
    })?;

    let Some(bencode_rs::Value::Dictionary(root)) = parsed.first() else {
        return Err(invalid("Root element must be dictionary"));
    };

    let announce = extract_string(root, b"announce")?;
    let Some(bencode_rs::Value::Dictionary(info)) = root.get(b"info".as_slice()) else {
        return Err(invalid("Missing or invalid 'info' dictionary"));
    };

    if info.contains_key(b"files".as_slice()) {
        return Err(invalid("Multi-file torrents are not supported"));
    }

    let name = extract_string(info, b"name")?;
    let total_length = u64::try_from(extract_integer(info, b"length")?)
        .map_err(|_| invalid("Negative 'length'"))?;
    let piece_length = u32::try_from(extract_integer(info, b"piece length")?)
        .map_err(|_| invalid("'piece length' out of range"))?;

    let pieces = extract_bytes(info, b"pieces")?;
    if !pieces.len().is_multiple_of(20) {
        return Err(invalid("Invalid pieces length"));
    }
    let piece_hashes: Vec<[u8; 20]> = pieces
        .chunks_exact(20)
        .map(|chunk| {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(chunk);
            hash
        })
        .collect();

    let info_hash = calculate_info_hash(torrent_bytes)?;
    let manifest = TorrentManifest::new(info_hash, piece_hashes, total_length, piece_length)?;

    tracing::debug!(
        "Parsed torrent '{name}': {} piece(s), info hash {info_hash}",
        manifest.piece_count()
    );

    Ok(TorrentFileInfo {
        manifest,
        announce,
        name,
    })
}

/// SHA-1 over the raw bytes of the top-level `info` value.
fn calculate_info_hash(torrent_bytes: &[u8]) -> ParseResult<InfoHash> {
    let info_bytes = find_info_dictionary(torrent_bytes)?;
    Ok(InfoHash::new(Sha1::digest(info_bytes).into()))
}

/// Walks the root dictionary's entries to locate the `info` value.
fn find_info_dictionary(data: &[u8]) -> ParseResult<&[u8]> {
    if data.first() != Some(&b'd') {
        return Err(invalid("Expected dictionary start"));
    }

    let mut pos = 1;
    while data.get(pos).is_some_and(|byte| *byte != b'e') {
        let key_end = bencode_value_end(data, pos)?;
        let key = string_content(&data[pos..key_end])?;
        let value_end = bencode_value_end(data, key_end)?;

        if key == b"info" {
            return Ok(&data[key_end..value_end]);
        }
        pos = value_end;
    }

    Err(invalid("Could not find info dictionary in data"))
}

/// Position one past the end of the bencode value starting at `start`.
fn bencode_value_end(data: &[u8], start: usize) -> ParseResult<usize> {
    let mut pos = start;
    let mut depth = 0usize;

    loop {
        let byte = *data
            .get(pos)
            .ok_or_else(|| invalid("Incomplete bencode value"))?;

        match byte {
            b'd' | b'l' => {
                depth += 1;
                pos += 1;
            }
            b'e' if depth > 0 => {
                depth -= 1;
                pos += 1;
            }
            b'i' => {
                let end = data[pos..]
                    .iter()
                    .position(|b| *b == b'e')
                    .ok_or_else(|| invalid("Unterminated integer"))?;
                pos += end + 1;
            }
            b'0'..=b'9' => {
                let colon = data[pos..]
                    .iter()
                    .position(|b| *b == b':')
                    .ok_or_else(|| invalid("Invalid string format"))?;
                let length: usize = std::str::from_utf8(&data[pos..pos + colon])
                    .ok()
                    .and_then(|digits| digits.parse().ok())
                    .ok_or_else(|| invalid("Invalid string length"))?;

                pos += colon + 1 + length;
                if pos > data.len() {
                    return Err(invalid("String runs past end of data"));
                }
            }
            _ => return Err(invalid("Invalid bencode character")),
        }

        if depth == 0 {
            return Ok(pos);
        }
    }
}

/// Content of an encoded `<len>:<bytes>` string.
fn string_content(encoded: &[u8]) -> ParseResult<&[u8]> {
    let colon = encoded
        .iter()
        .position(|b| *b == b':')
        .ok_or_else(|| invalid("Dictionary key must be a string"))?;
    Ok(&encoded[colon + 1..])
}

fn extract_string(dict: &BencodeDict<'_>, key: &[u8]) -> ParseResult<String> {
    let bytes = extract_bytes(dict, key)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| TorrentError::InvalidTorrentFile {
        reason: format!("Invalid UTF-8 in field: {:?}", String::from_utf8_lossy(key)),
    })
}

fn extract_bytes<'a>(dict: &'a BencodeDict<'_>, key: &[u8]) -> ParseResult<&'a [u8]> {
    match dict.get(key) {
        Some(bencode_rs::Value::Bytes(bytes)) => Ok(bytes),
        _ => Err(TorrentError::InvalidTorrentFile {
            reason: format!(
                "Missing or invalid field: {:?}",
                String::from_utf8_lossy(key)
            ),
        }),
    }
}

fn extract_integer(dict: &BencodeDict<'_>, key: &[u8]) -> ParseResult<i64> {
    match dict.get(key) {
        Some(bencode_rs::Value::Integer(value)) => Ok(*value),
        _ => Err(TorrentError::InvalidTorrentFile {
            reason: format!(
                "Missing or invalid integer field: {:?}",
                String::from_utf8_lossy(key)
            ),
        }),
    }
}

fn invalid(reason: &str) -> TorrentError {
    TorrentError::InvalidTorrentFile {
        reason: reason.to_string(),
    }
}
