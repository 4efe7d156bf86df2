//! HTTP tracker announce for peer discovery.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use super::protocol::PeerId;
use super::{TorrentError, TorrentManifest};
use crate::config::NetworkConfig;

/// HTTP tracker client.
pub struct HttpTrackerClient {
    announce_url: String,
    client: reqwest::Client,
}

impl HttpTrackerClient {
    /// Creates a client for `announce_url` using the configured timeout and user agent.
    ///
    /// # Errors
    /// - `TorrentError::Http` - HTTP client could not be constructed
    pub fn new(announce_url: String, config: &NetworkConfig) -> Result<Self, TorrentError> {
        let client = reqwest::Client::builder()
            .timeout(config.tracker_timeout)
            .user_agent(config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()?;

        Ok(Self {
            announce_url,
            client,
        })
    }

    /// Tracker URL this client announces to.
    pub fn announce_url(&self) -> &str {
        &self.announce_url
    }

    /// Announces a fresh download and returns the peers the tracker lists.
    ///
    /// # Errors
    /// - `TorrentError::TrackerConnectionFailed` - Network failure or non-success status
    /// - `TorrentError::ProtocolError` - Malformed response or tracker-reported failure
    pub async fn announce(
        &self,
        manifest: &TorrentManifest,
        peer_id: PeerId,
        port: u16,
    ) -> Result<Vec<SocketAddr>, TorrentError> {
        let url = self.build_announce_url(manifest, peer_id, port);
        tracing::debug!("Announcing to tracker: {}", self.announce_url);

        let response = self.client.get(&url).send().await.map_err(|e| {
            tracing::warn!("HTTP request to {} failed: {e}", self.announce_url);
            TorrentError::TrackerConnectionFailed {
                url: self.announce_url.clone(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!("Tracker {} returned status {status}", self.announce_url);
            return Err(TorrentError::TrackerConnectionFailed {
                url: self.announce_url.clone(),
            });
        }

        let body = response.bytes().await?;
        let peers = parse_announce_response(&body)?;
        tracing::info!("Tracker {} returned {} peer(s)", self.announce_url, peers.len());
        Ok(peers)
    }

    fn build_announce_url(&self, manifest: &TorrentManifest, peer_id: PeerId, port: u16) -> String {
        let separator = if self.announce_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{separator}info_hash={}&peer_id={}&port={port}&uploaded=0&downloaded=0&left={}&compact=1",
            self.announce_url,
            url_encode_bytes(manifest.info_hash.as_bytes()),
            url_encode_bytes(peer_id.as_bytes()),
            manifest.total_length,
        )
    }
}

/// Percent-encodes every byte; trackers expect raw binary hashes.
fn url_encode_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| format!("%{b:02X}")).collect()
}

/// Decodes a compact peer list of 6-byte (IPv4, big-endian port) entries.
///
/// # Errors
/// - `TorrentError::ProtocolError` - Length not a multiple of 6
fn parse_compact_peers(peer_bytes: &[u8]) -> Result<Vec<SocketAddr>, TorrentError> {
    if !peer_bytes.len().is_multiple_of(6) {
        return Err(TorrentError::ProtocolError {
            message: format!("Invalid compact peer data length {}", peer_bytes.len()),
        });
    }

    Ok(peer_bytes
        .chunks_exact(6)
        .map(|chunk| {
            let ip = Ipv4Addr::new(chunk[0], chunk[1], chunk[2], chunk[3]);
            let port = u16::from_be_bytes([chunk[4], chunk[5]]);
            SocketAddr::V4(SocketAddrV4::new(ip, port))
        })
        .collect())
}

fn parse_announce_response(body: &[u8]) -> Result<Vec<SocketAddr>, TorrentError> {
    let parsed = bencode_rs::Value::parse(body).map_err(|e| TorrentError::ProtocolError {
        message: format!("Failed to parse tracker response: {e:?}"),
    })?;

    let Some(bencode_rs::Value::Dictionary(dict)) = parsed.first() else {
        return Err(TorrentError::ProtocolError {
            message: "Invalid tracker response format".to_string(),
        });
    };

    if let Some(bencode_rs::Value::Bytes(reason)) = dict.get(b"failure reason".as_slice()) {
        return Err(TorrentError::ProtocolError {
            message: format!("Tracker error: {}", String::from_utf8_lossy(reason)),
        });
    }

    match dict.get(b"peers".as_slice()) {
        Some(bencode_rs::Value::Bytes(peers)) => parse_compact_peers(peers),
        _ => Err(TorrentError::ProtocolError {
            message: "Missing compact peers in tracker response".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::torrent::InfoHash;

    fn manifest() -> TorrentManifest {
        TorrentManifest::new(InfoHash::new([0xAB; 20]), vec![[0u8; 20]; 2], 100, 64).unwrap()
    }

    #[test]
    fn test_url_encode_bytes() {
        assert_eq!(url_encode_bytes(&[0x00, 0x7F, 0xFF, b'a']), "%00%7F%FF%61");
    }

    #[test]
    fn test_announce_url_parameters() {
        let client =
            HttpTrackerClient::new("http://tracker.test/announce".to_string(), &NetworkConfig::default())
                .unwrap();
        let url = client.build_announce_url(&manifest(), PeerId::new(*b"00112233445566778899"), 6881);

        assert!(url.starts_with("http://tracker.test/announce?info_hash=%AB%AB"));
        assert!(url.contains("&peer_id=%30%30%31%31"));
        assert!(url.contains("&port=6881&uploaded=0&downloaded=0&left=100&compact=1"));
    }

    #[test]
    fn test_announce_url_with_existing_query() {
        let client = HttpTrackerClient::new(
            "http://tracker.test/announce?key=1".to_string(),
            &NetworkConfig::default(),
        )
        .unwrap();
        let url = client.build_announce_url(&manifest(), PeerId::new([0u8; 20]), 1);
        assert!(url.starts_with("http://tracker.test/announce?key=1&info_hash="));
    }

    #[test]
    fn test_parse_compact_peers() {
        let peers = parse_compact_peers(&[127, 0, 0, 1, 0x1A, 0xE1, 10, 0, 0, 2, 0, 80]).unwrap();
        assert_eq!(
            peers,
            vec![
                "127.0.0.1:6881".parse::<SocketAddr>().unwrap(),
                "10.0.0.2:80".parse::<SocketAddr>().unwrap(),
            ]
        );
        assert!(parse_compact_peers(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_failure_reason_surfaces() {
        let result = parse_announce_response(b"d14:failure reason12:unregisterede");
        assert!(matches!(
            result,
            Err(TorrentError::ProtocolError { message }) if message.contains("unregistered")
        ));
    }

    #[test]
    fn test_missing_peers_rejected() {
        assert!(parse_announce_response(b"d8:intervali900ee").is_err());
    }

    #[tokio::test]
    async fn test_announce_against_local_tracker() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            assert!(String::from_utf8_lossy(&request).contains("compact=1"));

            let mut body = b"d8:intervali900e5:peers6:".to_vec();
            body.extend_from_slice(&[127, 0, 0, 1, 0x1A, 0xE1]);
            body.push(b'e');
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(head.as_bytes()).await.unwrap();
            stream.write_all(&body).await.unwrap();
        });

        let client = HttpTrackerClient::new(
            format!("http://{address}/announce"),
            &NetworkConfig::default(),
        )
        .unwrap();
        let peers = client
            .announce(&manifest(), PeerId::new([1u8; 20]), 6881)
            .await
            .unwrap();
        assert_eq!(peers, vec!["127.0.0.1:6881".parse::<SocketAddr>().unwrap()]);
    }
}
