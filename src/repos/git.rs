//! Shallow clone a chart repository from the first mirror that works.
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::{MirrorErrors, MirrorFailure};
use crate::command::{CommandError, CommandLine};
use crate::transport::Credentials;

const BRANCH_REF_PREFIX: &str = "refs/heads/";

#[derive(Error, Debug)]
pub enum Error {
    #[error("git clone failed: {0}")]
    Clone(Box<CommandError>),
    #[error("git rev-parse HEAD failed: {0}")]
    Head(Box<CommandError>),
    #[error("HEAD resolved to '{0}' which is not a commit id")]
    InvalidHead(String),
    #[error("Failed to remove {0}: {1}")]
    Remove(PathBuf, std::io::Error),
}

fn git_path() -> OsString {
    std::env::var_os("GIT_PATH").unwrap_or_else(|| "git".into())
}

/// Reduce `refs/heads/<branch>` to the branch name `git clone --branch` expects.
pub fn branch_name(branch: &str) -> &str {
    branch.strip_prefix(BRANCH_REF_PREFIX).unwrap_or(branch)
}

fn is_commit_id(id: &str) -> bool {
    matches!(id.len(), 40 | 64) && id.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Build the `git clone` command for one mirror.
///
/// Without a branch the remote's default branch is checked out.
pub fn clone_command(
    url: &str,
    branch: Option<&str>,
    creds: Option<&Credentials>,
    dest: &Path,
) -> CommandLine {
    git_clone_command(&git_path(), url, branch, creds, dest)
}

fn git_clone_command(
    git: &OsStr,
    url: &str,
    branch: Option<&str>,
    creds: Option<&Credentials>,
    dest: &Path,
) -> CommandLine {
    let mut cmd = CommandLine::new(git, vec![]).with_env("GIT_TERMINAL_PROMPT", "0");

    if let Some(creds) = creds {
        cmd = cmd.arg("-c").with_sensitive_arg(format!(
            "http.extraHeader=Authorization: {}",
            creds.basic_auth_header()
        ));
    }

    cmd = cmd
        .arg("clone")
        .arg("--quiet")
        .arg("--depth")
        .arg("1")
        .arg("--single-branch")
        .arg("--recurse-submodules")
        .arg("--shallow-submodules");

    if let Some(branch) = branch {
        cmd = cmd.arg("--branch").arg(branch_name(branch));
    }

    cmd.arg("--").arg(url).arg(dest)
}

async fn remove_dir(path: &Path) -> Result<(), Error> {
    super::remove_path(path)
        .await
        .map_err(|e| Error::Remove(path.to_path_buf(), e))
}

async fn head_commit(git: &OsStr, dest: &Path) -> Result<String, Error> {
    let output = CommandLine::new(git, vec!["rev-parse".into(), "HEAD".into()])
        .run_in(Some(dest))
        .await
        .map_err(|e| Error::Head(Box::new(e)))?;

    let commit_id = output.stdout.trim();
    if !is_commit_id(commit_id) {
        return Err(Error::InvalidHead(commit_id.to_string()));
    }
    Ok(commit_id.to_string())
}

async fn clone_one(
    git: &OsStr,
    url: &str,
    branch: Option<&str>,
    creds: Option<&Credentials>,
    dest: &Path,
) -> Result<String, Error> {
    remove_dir(dest).await?;

    let result = git_clone_command(git, url, branch, creds, dest).run().await;
    match result {
        Ok(success) => {
            info!(
                url,
                duration = %crate::duration::duration_string(&success.duration),
                "Clone succeeded"
            );
            if let Some(line) = success.stderr.lines().map(str::trim).find(|l| !l.is_empty()) {
                debug!(url, "git: {line}");
            }
        }
        Err(err) => return Err(Error::Clone(Box::new(err))),
    }

    head_commit(git, dest).await
}

/// Clone the first working mirror into `dest` and return its HEAD commit.
///
/// `dest` is wiped before every attempt and removed again after a failed one, so on
/// return it holds either one complete checkout or nothing.
pub async fn fetch(
    urls: &[String],
    branch: Option<&str>,
    creds: Option<&Credentials>,
    dest: &Path,
) -> Result<String, MirrorErrors<Error>> {
    fetch_with(&git_path(), urls, branch, creds, dest).await
}

async fn fetch_with(
    git: &OsStr,
    urls: &[String],
    branch: Option<&str>,
    creds: Option<&Credentials>,
    dest: &Path,
) -> Result<String, MirrorErrors<Error>> {
    let mut failures = MirrorErrors::new();

    for url in urls {
        match clone_one(git, url, branch, creds, dest).await {
            Ok(commit_id) => {
                info!(url = url.as_str(), commit_id = commit_id.as_str(), "commitID");
                return Ok(commit_id);
            }
            Err(err) => {
                error!(url = url.as_str(), "Clone failed: {err}");
                if let Err(remove_err) = remove_dir(dest).await {
                    warn!(path = %dest.display(), "{remove_err}");
                }
                failures.push(MirrorFailure::new(url, err));
            }
        }
    }

    error!("All urls failed");
    Err(failures)
}
