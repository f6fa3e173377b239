//! Expand gzip compressed tar archives.
use std::path::{Component, Path, PathBuf};

use async_compression::futures::bufread::GzipDecoder;
use async_tar::Archive;
use futures::StreamExt;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWriteExt, BufReader};
use tokio_util::compat::{FuturesAsyncReadCompatExt, TokioAsyncReadCompatExt};
use tracing::{debug, trace};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to read archive: {0}")]
    Read(std::io::Error),
    #[error("IO error {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("Archive entry escapes the destination: {0}")]
    UnsafePath(PathBuf),
}

/// Strip `.` components and refuse anything that could leave the destination.
fn relative_entry_path(path: &Path) -> Result<PathBuf, Error> {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(c) => result.push(c),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::UnsafePath(path.to_path_buf()));
            }
        }
    }
    Ok(result)
}

async fn create_dir_all(path: &Path) -> Result<(), Error> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| Error::Io(path.to_path_buf(), e))
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> Result<(), Error> {
    use std::os::unix::fs::PermissionsExt;

    let permissions = std::fs::Permissions::from_mode((mode & 0o777) | 0o600);
    tokio::fs::set_permissions(path, permissions)
        .await
        .map_err(|e| Error::Io(path.to_path_buf(), e))
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> Result<(), Error> {
    Ok(())
}

/// Expand a `.tgz` stream into `dest`.
///
/// Directories and regular files are recreated; links, devices and other entry types are
/// skipped. The first error aborts the expansion and whatever was already written is left
/// in place for the caller to clean up.
pub async fn expand<R>(reader: R, dest: &Path) -> Result<(), Error>
where
    R: AsyncRead + Unpin + Send,
{
    let decoder = GzipDecoder::new(BufReader::new(reader).compat());
    let archive = Archive::new(decoder);
    let mut entries = archive.entries().map_err(Error::Read)?;

    while let Some(entry) = entries.next().await {
        let entry = entry.map_err(Error::Read)?;
        let entry_type = entry.header().entry_type();
        let path: PathBuf = entry.path().map_err(Error::Read)?.into_owned().into();

        if !entry_type.is_dir() && !entry_type.is_file() {
            debug!(path = %path.display(), "Skipping {:?} entry", entry_type);
            continue;
        }

        let relative = relative_entry_path(&path)?;
        let target = dest.join(&relative);

        if entry_type.is_dir() {
            if !target.is_dir() {
                create_dir_all(&target).await?;
            }
            continue;
        }

        if relative.as_os_str().is_empty() {
            debug!(path = %path.display(), "Skipping file entry without a name");
            continue;
        }

        if let Some(parent) = target.parent()
            && !parent.is_dir()
        {
            create_dir_all(parent).await?;
        }

        let mode = entry.header().mode().unwrap_or(0o644);
        trace!(path = %target.display(), "Writing file");

        let mut file = tokio::fs::File::create(&target)
            .await
            .map_err(|e| Error::Io(target.clone(), e))?;
        let mut contents = entry.compat();
        tokio::io::copy(&mut contents, &mut file)
            .await
            .map_err(|e| Error::Io(target.clone(), e))?;
        file.flush()
            .await
            .map_err(|e| Error::Io(target.clone(), e))?;
        // Close now rather than at the end of the archive.
        drop(file);

        set_mode(&target, mode).await?;
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod fixtures {
    #![allow(clippy::unwrap_used)]
    use flate2::Compression;
    use flate2::write::GzEncoder;

    /// Build a `.tgz` holding the given files, with their parent directories as entries.
    pub fn tgz(files: &[(&str, &[u8])]) -> Vec<u8> {
        let enc = GzEncoder::new(Vec::new(), Compression::default());
        let mut tar = tar::Builder::new(enc);
        let mut dirs = std::collections::BTreeSet::new();

        for (path, contents) in files {
            if let Some((dir, _)) = path.rsplit_once('/') {
                if dirs.insert(dir.to_string()) {
                    let mut header = tar::Header::new_gnu();
                    header.set_entry_type(tar::EntryType::Directory);
                    header.set_mode(0o755);
                    header.set_size(0);
                    tar.append_data(&mut header, format!("{dir}/"), std::io::empty())
                        .unwrap();
                }
            }
            let mut header = tar::Header::new_gnu();
            header.set_mode(0o644);
            header.set_size(contents.len() as u64);
            tar.append_data(&mut header, path, *contents).unwrap();
        }

        tar.into_inner().unwrap().finish().unwrap()
    }

    /// A chart archive laid out the way `helm package` does it.
    pub fn chart_tgz(name: &str, version: &str, extra: &[(&str, &[u8])]) -> Vec<u8> {
        let chart_yaml = format!("apiVersion: v2\nname: {name}\nversion: {version}\n");
        let chart_path = format!("{name}/Chart.yaml");
        let values_path = format!("{name}/values.yaml");
        let mut files: Vec<(String, Vec<u8>)> = vec![
            (chart_path, chart_yaml.into_bytes()),
            (values_path, b"replicas: 1\n".to_vec()),
        ];
        for (path, contents) in extra {
            files.push((format!("{name}/{path}"), contents.to_vec()));
        }
        let files: Vec<(&str, &[u8])> = files
            .iter()
            .map(|(path, contents)| (path.as_str(), contents.as_slice()))
            .collect();
        tgz(&files)
    }
}
