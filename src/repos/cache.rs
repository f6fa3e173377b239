use std::fmt::Debug;
use std::path::Path;
use std::path::PathBuf;

use bytes::Bytes;
use futures::Stream;
use futures::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("Cache entry {0} exists but is not a regular file")]
    NotAFile(PathBuf),
}

#[derive(Error, Debug)]
pub enum StreamError<E> {
    #[error("IO error {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("Stream error {0}: {1}")]
    Stream(PathBuf, E),
}

/// Downloaded chart archives, stored flat under the charts root by file name.
#[derive(Debug, Clone)]
pub struct Cache {
    pub path: PathBuf,
}

impl Cache {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn get_cache_file_path(&self, file_name: &str) -> PathBuf {
        self.path.join(file_name)
    }

    fn get_cache_temp_path(&self, file_name: &str) -> PathBuf {
        self.path.join(format!("{file_name}.tmp"))
    }

    /// Return the cached archive if one is already present.
    pub async fn get_cache_entry(&self, file_name: &str) -> Result<Option<PathBuf>, Error> {
        let file_path = self.get_cache_file_path(file_name);

        match tokio::fs::metadata(&file_path).await {
            Ok(metadata) if metadata.is_file() => {
                debug!(path = %file_path.display(), "Cache hit");
                Ok(Some(file_path))
            }
            Ok(_) => Err(Error::NotAFile(file_path)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::Io(file_path, err)),
        }
    }

    /// Write a stream into the cache.
    ///
    /// The data goes to a temporary file first and is only renamed into place once the
    /// stream has ended cleanly, so an interrupted transfer never looks like a cache hit.
    pub async fn create_cache_entry<E: Send>(
        &self,
        file_name: &str,
        stream: impl Stream<Item = Result<Bytes, E>> + Unpin + Send,
    ) -> Result<PathBuf, StreamError<E>> {
        let file_path = self.get_cache_file_path(file_name);
        let temp_path = self.get_cache_temp_path(file_name);

        tokio::fs::create_dir_all(&self.path)
            .await
            .map_err(|e| StreamError::Io(self.path.clone(), e))?;

        let result = write_stream(&temp_path, stream).await;
        if result.is_err()
            && let Err(err) = tokio::fs::remove_file(&temp_path).await
            && err.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %temp_path.display(), "Failed to remove partial download: {err}");
        }
        result?;

        tokio::fs::rename(&temp_path, &file_path)
            .await
            .map_err(|e| StreamError::Io(file_path.clone(), e))?;

        Ok(file_path)
    }

    /// Delete a cached archive; a missing file is not an error.
    pub async fn remove_cache_entry(&self, file_name: &str) -> Result<(), Error> {
        let file_path = self.get_cache_file_path(file_name);
        match tokio::fs::remove_file(&file_path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::Io(file_path, err)),
        }
    }
}

async fn write_stream<E>(
    temp_path: &Path,
    mut stream: impl Stream<Item = Result<Bytes, E>> + Unpin + Send,
) -> Result<(), StreamError<E>> {
    let mut file = tokio::fs::File::create(temp_path)
        .await
        .map_err(|e| StreamError::Io(temp_path.to_path_buf(), e))?;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| StreamError::Stream(temp_path.to_path_buf(), e))?;

        file.write_all(&chunk)
            .await
            .map_err(|e| StreamError::Io(temp_path.to_path_buf(), e))?;
    }

    file.flush()
        .await
        .map_err(|e| StreamError::Io(temp_path.to_path_buf(), e))
}
