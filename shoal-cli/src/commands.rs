//! CLI command implementations

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::Subcommand;
use shoal_core::Result;
use shoal_core::config::ShoalConfig;
use shoal_core::torrent::session::SessionSettings;
use shoal_core::torrent::{
    DownloadScheduler, HttpTrackerClient, PeerId, PeerSession, PieceIndex, TorrentError,
    TorrentFileInfo, parse_torrent_file,
};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Print tracker, length, info hash, and piece hashes of a torrent
    Info {
        /// Path to the .torrent file
        torrent: PathBuf,
    },
    /// Ask the tracker for peers
    Peers {
        /// Path to the .torrent file
        torrent: PathBuf,
    },
    /// Handshake with one peer and print its peer id
    Handshake {
        /// Path to the .torrent file
        torrent: PathBuf,
        /// Peer address as ip:port
        peer: SocketAddr,
    },
    /// Download and verify a single piece
    DownloadPiece {
        /// File to write the piece to
        #[arg(short, long)]
        output: PathBuf,
        /// Path to the .torrent file
        torrent: PathBuf,
        /// Zero-based piece index
        index: u32,
    },
    /// Download the whole file
    Download {
        /// File to assemble the content into
        #[arg(short, long)]
        output: PathBuf,
        /// Path to the .torrent file
        torrent: PathBuf,
        /// Peer to use instead of asking the tracker (repeatable)
        #[arg(long)]
        peer: Vec<SocketAddr>,
    },
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> Result<()> {
    let config = ShoalConfig::from_env();

    match command {
        Commands::Info { torrent } => show_info(&torrent).await,
        Commands::Peers { torrent } => list_peers(&torrent, &config).await,
        Commands::Handshake { torrent, peer } => handshake(&torrent, peer, &config).await,
        Commands::DownloadPiece {
            output,
            torrent,
            index,
        } => download_piece(&torrent, PieceIndex::new(index), &output, &config).await,
        Commands::Download {
            output,
            torrent,
            peer,
        } => download(&torrent, peer, &output, &config).await,
    }
}

/// Print torrent metadata
///
/// # Errors
/// - `ShoalError::Torrent` - File unreadable or not a single-file torrent
pub async fn show_info(torrent: &Path) -> Result<()> {
    let info = parse_torrent_file(torrent).await?;
    print!("{}", format_info(&info));
    Ok(())
}

/// Print every peer the tracker returns, one per line
///
/// # Errors
/// - `ShoalError::Torrent` - Torrent invalid or tracker unreachable
pub async fn list_peers(torrent: &Path, config: &ShoalConfig) -> Result<()> {
    let info = parse_torrent_file(torrent).await?;
    let peer_id = PeerId::generate_with_prefix(config.torrent.client_id);

    for peer in announce(&info, peer_id, config).await? {
        println!("{peer}");
    }
    Ok(())
}

/// Connect to one peer and print the id it reports
///
/// # Errors
/// - `ShoalError::Torrent` - Torrent invalid or handshake failed
pub async fn handshake(torrent: &Path, peer: SocketAddr, config: &ShoalConfig) -> Result<()> {
    let info = parse_torrent_file(torrent).await?;
    let peer_id = PeerId::generate_with_prefix(config.torrent.client_id);

    let session = PeerSession::connect(
        peer,
        info.manifest.info_hash,
        peer_id,
        SessionSettings::from_config(config),
    )
    .await?;
    println!("Peer ID: {}", hex::encode(session.peer_id().as_bytes()));
    session.close().await;
    Ok(())
}

/// Download one verified piece into `output`
///
/// # Errors
/// - `ShoalError::Torrent` - No peer delivered a valid copy
/// - `ShoalError::Io` - Output could not be written
pub async fn download_piece(
    torrent: &Path,
    index: PieceIndex,
    output: &Path,
    config: &ShoalConfig,
) -> Result<()> {
    let info = parse_torrent_file(torrent).await?;
    let peer_id = PeerId::generate_with_prefix(config.torrent.client_id);
    let peers = announce(&info, peer_id, config).await?;

    let scheduler = DownloadScheduler::new(info.manifest, peer_id, config);
    let piece = scheduler.download_single_piece(&peers, index).await?;
    tokio::fs::write(output, &piece).await?;

    println!("Piece {index} downloaded to {}.", output.display());
    Ok(())
}

/// Download the whole torrent into `output`
///
/// # Errors
/// - `ShoalError::Torrent` - Peers exhausted before every piece was written
/// - `ShoalError::Storage` - Output could not be created or finalized
pub async fn download(
    torrent: &Path,
    peers: Vec<SocketAddr>,
    output: &Path,
    config: &ShoalConfig,
) -> Result<()> {
    let info = parse_torrent_file(torrent).await?;
    let peer_id = PeerId::generate_with_prefix(config.torrent.client_id);
    let peers = if peers.is_empty() {
        announce(&info, peer_id, config).await?
    } else {
        peers
    };

    let scheduler = DownloadScheduler::new(info.manifest, peer_id, config);
    let report = scheduler.run(&peers, output).await?;

    println!(
        "Downloaded {} to {}.",
        info.name,
        report.output_path.display()
    );
    Ok(())
}

async fn announce(
    info: &TorrentFileInfo,
    peer_id: PeerId,
    config: &ShoalConfig,
) -> Result<Vec<SocketAddr>> {
    let tracker = HttpTrackerClient::new(info.announce.clone(), &config.network)?;
    let peers = tracker
        .announce(&info.manifest, peer_id, config.network.listen_port)
        .await?;

    if peers.is_empty() {
        return Err(TorrentError::NoPeersAvailable.into());
    }
    Ok(peers)
}

fn format_info(info: &TorrentFileInfo) -> String {
    let manifest = &info.manifest;
    let mut text = format!(
        "Tracker URL: {}\nLength: {}\nInfo Hash: {}\nPiece Length: {}\nPiece Hashes:\n",
        info.announce, manifest.total_length, manifest.info_hash, manifest.piece_length
    );
    for hash in &manifest.piece_hashes {
        text.push_str(&hex::encode(hash));
        text.push('\n');
    }
    text
}
