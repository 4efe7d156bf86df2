//! Single output file assembled from pieces written at absolute offsets.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use super::{PieceSink, StorageError};
use crate::torrent::PieceIndex;

/// Output file shared by every download worker.
///
/// Content goes to `<path><suffix>` while the download runs and is renamed
/// to `<path>` by [`OutputFile::finalize`] once every piece is written.
#[derive(Debug, Clone)]
pub struct OutputFile {
    file: Arc<File>,
    final_path: PathBuf,
    part_path: PathBuf,
    total_length: u64,
}

impl OutputFile {
    /// Creates (or truncates) the in-progress file and sizes it to `total_length`.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - If the file cannot be created or resized
    pub async fn create(
        path: &Path,
        total_length: u64,
        temp_suffix: &str,
    ) -> Result<Self, StorageError> {
        let final_path = path.to_path_buf();
        let mut part_name = final_path.as_os_str().to_owned();
        part_name.push(temp_suffix);
        let part_path = PathBuf::from(part_name);

        let open_path = part_path.clone();
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<File> {
            let file = OpenOptions::new()
                .create(true)
                .truncate(true)
                .read(true)
                .write(true)
                .open(&open_path)?;
            file.set_len(total_length)?;
            Ok(file)
        })
        .await
        .map_err(join_error)??;

        tracing::debug!(
            "Opened output {} ({total_length} bytes)",
            part_path.display()
        );

        Ok(Self {
            file: Arc::new(file),
            final_path,
            part_path,
            total_length,
        })
    }

    /// Path the content is written to while downloading.
    pub fn part_path(&self) -> &Path {
        &self.part_path
    }

    /// Path the content ends up at.
    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Flushes the content to disk and moves it to its final path.
    ///
    /// # Errors
    ///
    /// - `StorageError::Io` - If syncing or renaming failed
    pub async fn finalize(self) -> Result<PathBuf, StorageError> {
        let file = self.file.clone();
        tokio::task::spawn_blocking(move || file.sync_all())
            .await
            .map_err(join_error)??;

        tokio::fs::rename(&self.part_path, &self.final_path).await?;
        Ok(self.final_path)
    }
}

#[async_trait]
impl PieceSink for OutputFile {
    async fn write_piece(
        &self,
        index: PieceIndex,
        piece_length: u32,
        piece_bytes: Vec<u8>,
    ) -> Result<(), StorageError> {
        let offset = u64::from(index.as_u32()) * u64::from(piece_length);
        if offset + piece_bytes.len() as u64 > self.total_length {
            return Err(StorageError::OutOfBounds {
                index,
                offset,
                length: piece_bytes.len(),
                file_length: self.total_length,
            });
        }

        let file = self.file.clone();
        tokio::task::spawn_blocking(move || write_all_at(&file, &piece_bytes, offset))
            .await
            .map_err(join_error)??;
        Ok(())
    }
}

fn join_error(error: tokio::task::JoinError) -> StorageError {
    StorageError::FilesystemError {
        message: format!("blocking file task failed: {error}"),
    }
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset)? {
            0 => return Err(std::io::ErrorKind::WriteZero.into()),
            written => {
                buf = &buf[written..];
                offset += written as u64;
            }
        }
    }
    Ok(())
}
