//! Download packaged charts from helm repository mirrors.
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};
use url::Url;

use super::archive;
use super::cache::{self, Cache};
use super::hash::Sha256Hash;
use super::{MirrorErrors, MirrorFailure};
use crate::layout::ChartLayout;
use crate::transport::Credentials;
use crate::urls;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed url: {0}")]
    MalformedUrl(String),
    #[error("Unsupported scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("Cache path {0} is a directory")]
    CacheIsDirectory(PathBuf),
    #[error("Http request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Http request returned {0}")]
    Status(reqwest::StatusCode),
    #[error("Failed to download: {0}")]
    Download(#[from] cache::StreamError<reqwest::Error>),
    #[error("Failed to copy local file: {0}")]
    Copy(#[from] cache::StreamError<std::io::Error>),
    #[error("Cache error: {0}")]
    Cache(#[from] cache::Error),
    #[error("File error {0}: {1}")]
    File(PathBuf, std::io::Error),
    #[error("Failed to expand archive: {0}")]
    Expand(#[from] archive::Error),
    #[error("Archive does not contain the chart directory {0}")]
    ChartNotInArchive(String),
}

/// Outcome of the http fetcher when no mirror produced a chart.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error(transparent)]
    Mirrors(MirrorErrors<Error>),
    /// Local state that no other mirror can fix.
    #[error("{url}: {cause}")]
    Fatal { url: String, cause: Error },
}

/// A chart archive that was cached and expanded.
#[derive(Debug, Clone)]
pub struct Downloaded {
    pub chart_dir: PathBuf,
    pub archive: PathBuf,
    pub digest: Sha256Hash,
}

enum Scheme {
    File,
    Http,
}

impl Error {
    const fn is_fatal(&self) -> bool {
        matches!(self, Error::CacheIsDirectory(_))
    }
}

async fn download_file(url: &Url, file_name: &str, cache: &Cache) -> Result<PathBuf, Error> {
    let source = url
        .to_file_path()
        .map_err(|()| Error::MalformedUrl(url.to_string()))?;
    let file = tokio::fs::File::open(&source)
        .await
        .map_err(|e| Error::File(source.clone(), e))?;

    let path = cache
        .create_cache_entry(file_name, ReaderStream::new(file))
        .await?;
    info!(url = %url, "Copy succeeded");
    Ok(path)
}

async fn download_http(
    url: &Url,
    file_name: &str,
    client: &reqwest::Client,
    creds: Option<&Credentials>,
    cache: &Cache,
) -> Result<PathBuf, Error> {
    let mut request = client.get(url.clone());
    if let Some(creds) = creds {
        request = request.basic_auth(&creds.username, Some(&creds.password));
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::Status(status));
    }
    info!(url = %url, "Get succeeded");

    let path = cache
        .create_cache_entry(file_name, Box::pin(response.bytes_stream()))
        .await?;
    Ok(path)
}

async fn remove_path(path: &Path) -> Result<(), Error> {
    super::remove_path(path)
        .await
        .map_err(|e| Error::File(path.to_path_buf(), e))
}

/// Replace any previous expansion of the chart with the cached archive.
async fn expand_chart(archive_path: &Path, layout: &ChartLayout) -> Result<(), Error> {
    remove_path(layout.chart_dir()).await?;
    tokio::fs::create_dir_all(layout.release_dir())
        .await
        .map_err(|e| Error::File(layout.release_dir().to_path_buf(), e))?;

    let file = tokio::fs::File::open(archive_path)
        .await
        .map_err(|e| Error::File(archive_path.to_path_buf(), e))?;
    archive::expand(file, layout.release_dir()).await?;

    if !layout.chart_dir().is_dir() {
        let chart_name = layout
            .chart_dir()
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        return Err(Error::ChartNotInArchive(chart_name));
    }
    Ok(())
}

async fn fetch_one(
    url_str: &str,
    client: &reqwest::Client,
    creds: Option<&Credentials>,
    cache: &Cache,
    layout: &ChartLayout,
) -> Result<Downloaded, Error> {
    let url = Url::parse(url_str).map_err(|e| Error::MalformedUrl(format!("{url_str}: {e}")))?;
    let file_name =
        urls::file_name(&url).map_err(|e| Error::MalformedUrl(format!("{url_str}: {e}")))?;

    let cache_path = cache.get_cache_file_path(file_name);
    if layout.release_dir().starts_with(&cache_path) {
        return Err(Error::MalformedUrl(format!(
            "{url_str}: cache file {} collides with the chart destination",
            cache_path.display()
        )));
    }

    let scheme = match url.scheme() {
        "file" => Scheme::File,
        "http" | "https" => Scheme::Http,
        other => return Err(Error::UnsupportedScheme(other.to_string())),
    };

    let cached = cache.get_cache_entry(file_name).await.map_err(|e| match e {
        cache::Error::NotAFile(path) => Error::CacheIsDirectory(path),
        e => Error::Cache(e),
    })?;

    let archive_path = if let Some(path) = cached {
        info!(url = url_str, path = %path.display(), "Using cached archive");
        path
    } else {
        match scheme {
            Scheme::File => download_file(&url, file_name, cache).await?,
            Scheme::Http => download_http(&url, file_name, client, creds, cache).await?,
        }
    };

    if let Err(err) = expand_chart(&archive_path, layout).await {
        // The archive is presumed corrupt.
        if let Err(remove_err) = cache.remove_cache_entry(file_name).await {
            warn!(path = %archive_path.display(), "{remove_err}");
        }
        // Drop everything the archive may have written next to the chart as well.
        if let Err(remove_err) = remove_path(layout.release_dir()).await {
            warn!(path = %layout.release_dir().display(), "{remove_err}");
        }
        return Err(err);
    }

    let digest = Sha256Hash::from_async_path(&archive_path)
        .await
        .map_err(|e| Error::File(archive_path.clone(), e))?;
    debug!(digest = %digest, "Archive digest");

    Ok(Downloaded {
        chart_dir: layout.chart_dir().to_path_buf(),
        archive: archive_path,
        digest,
    })
}

/// Fetch the chart from the first mirror that yields an archive which expands cleanly.
///
/// Archives are cached in the charts root under the URL's file name and reused without
/// any network access on later calls.
pub async fn fetch(
    urls: &[String],
    client: &reqwest::Client,
    creds: Option<&Credentials>,
    cache: &Cache,
    layout: &ChartLayout,
) -> Result<Downloaded, FetchError> {
    let mut failures = MirrorErrors::new();

    for url in urls {
        match fetch_one(url, client, creds, cache, layout).await {
            Ok(downloaded) => return Ok(downloaded),
            Err(err) if err.is_fatal() => {
                error!(url = url.as_str(), "{err}");
                return Err(FetchError::Fatal {
                    url: url.clone(),
                    cause: err,
                });
            }
            Err(err) => {
                error!(url = url.as_str(), "Download failed: {err}");
                failures.push(MirrorFailure::new(url, err));
            }
        }
    }

    Err(FetchError::Mirrors(failures))
}
