use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum FileNameError {
    #[error("URL has no file name in its path")]
    NoFileName,
}

/// The last path segment of a URL, used to name the cached archive.
///
/// The segment is kept percent-encoded; it only has to be a stable, flat file name.
pub fn file_name(url: &Url) -> Result<&str, FileNameError> {
    let name = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .ok_or(FileNameError::NoFileName)?;

    if name.is_empty() || name == "." || name == ".." {
        return Err(FileNameError::NoFileName);
    }
    Ok(name)
}
