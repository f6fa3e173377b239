pub mod archive;
pub mod cache;
pub mod git;
mod hash;
pub mod helm;
pub mod meta;

use std::fmt::Display;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{Instrument, info, info_span};

pub use hash::Sha256Hash;
use meta::ChartMetadata;

use crate::config::{self, ChartSource, ConfigData, SecretData, SourceSpec};
use crate::layout::{self, ChartLayout, ReleaseIdentity};
use crate::transport::{self, Credentials, TransportConfig, TransportPool};

/// Why one mirror URL could not be used.
#[derive(Debug)]
pub struct MirrorFailure<E> {
    pub url: String,
    pub cause: E,
}

impl<E> MirrorFailure<E> {
    pub fn new(url: &str, cause: E) -> Self {
        Self {
            url: url.to_string(),
            cause,
        }
    }
}

/// Every failed mirror of one fetch, in the order they were tried.
#[derive(Debug)]
pub struct MirrorErrors<E>(Vec<MirrorFailure<E>>);

impl<E> MirrorErrors<E> {
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, failure: MirrorFailure<E>) {
        self.0.push(failure);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MirrorFailure<E>> {
        self.0.iter()
    }

    pub fn last(&self) -> Option<&MirrorFailure<E>> {
        self.0.last()
    }

    pub fn into_vec(self) -> Vec<MirrorFailure<E>> {
        self.0
    }
}

impl<E> Default for MirrorErrors<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, E> IntoIterator for &'a MirrorErrors<E> {
    type Item = &'a MirrorFailure<E>;
    type IntoIter = std::slice::Iter<'a, MirrorFailure<E>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<E: Display> Display for MirrorErrors<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return write!(f, "no mirror urls given");
        }
        write!(f, "all {} urls failed", self.0.len())?;
        for failure in &self.0 {
            write!(f, "; {}: {}", failure.url, failure.cause)?;
        }
        Ok(())
    }
}

impl<E: std::fmt::Debug + Display> std::error::Error for MirrorErrors<E> {}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid chart source: {0}")]
    Config(#[from] config::Error),
    #[error("Invalid chart layout: {0}")]
    Layout(#[from] layout::Error),
    #[error("Invalid transport settings: {0}")]
    Transport(#[from] transport::Error),
    #[error("Failed to create charts root {0}: {1}")]
    CreateRoot(PathBuf, std::io::Error),
    #[error("No mirror urls given for {0} source")]
    NoMirrors(config::SourceType),
    #[error("Git fetch failed: {0}")]
    Git(MirrorErrors<git::Error>),
    #[error("Helm repo fetch failed: {0}")]
    Helm(#[from] helm::FetchError),
    #[error("Chart path {0} does not exist in the checkout")]
    ChartPathNotFound(PathBuf),
}

/// A chart that is ready on disk.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// Directory holding the chart's `Chart.yaml`.
    pub chart_dir: PathBuf,
    /// HEAD of the checkout, for git and github sources.
    pub commit_id: Option<String>,
    /// SHA-256 of the cached archive, for helm repository sources.
    pub archive_digest: Option<Sha256Hash>,
    pub metadata: Option<ChartMetadata>,
}

/// Turns chart sources into chart directories below one charts root.
///
/// Resolutions are sequential inside a call. Callers must not resolve the same
/// [`ReleaseIdentity`] concurrently, as both calls would rewrite the same directories.
#[derive(Debug)]
pub struct Resolver {
    charts_root: PathBuf,
    transports: TransportPool,
}

/// Remove whatever sits at `path`, a directory tree, a file or a link. Nothing there is fine.
pub(crate) async fn remove_path(path: &Path) -> std::io::Result<()> {
    let result = match tokio::fs::symlink_metadata(path).await {
        Ok(metadata) if metadata.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(err) => Err(err),
    };
    match result {
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        result => result,
    }
}

#[cfg(unix)]
async fn create_root(path: &Path) -> std::io::Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true).mode(0o755);
    builder.create(path).await
}

#[cfg(not(unix))]
async fn create_root(path: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(path).await
}

impl Resolver {
    pub fn new(charts_root: impl Into<PathBuf>) -> Self {
        Self {
            charts_root: charts_root.into(),
            transports: TransportPool::new(),
        }
    }

    /// Use `CHARTS_DIR` as the charts root, or a new temporary directory.
    pub fn from_env() -> Result<Self, Error> {
        Ok(Self::new(config::charts_root_from_env()?))
    }

    pub fn charts_root(&self) -> &Path {
        &self.charts_root
    }

    /// Resolve a declared source, with transport settings and credentials in their raw form.
    ///
    /// The source, config map and secret are all validated before anything touches disk.
    pub async fn resolve_spec(
        &self,
        identity: &ReleaseIdentity,
        spec: &SourceSpec,
        config_data: Option<&ConfigData>,
        secret_data: Option<&SecretData>,
    ) -> Result<FetchOutcome, Error> {
        let source = ChartSource::try_from(spec)?;
        let transport = TransportConfig::from_config_map(config_data)?;
        let creds = Credentials::from_secret(secret_data)?;
        self.resolve(identity, &source, transport, creds.as_ref())
            .await
    }

    /// Materialize the chart for `identity` from the first mirror of `source` that works.
    pub async fn resolve(
        &self,
        identity: &ReleaseIdentity,
        source: &ChartSource,
        transport: TransportConfig,
        creds: Option<&Credentials>,
    ) -> Result<FetchOutcome, Error> {
        let span = info_span!(
            "resolve",
            name = identity.name.as_str(),
            namespace = identity.namespace.as_str(),
            chart = identity.chart_name.as_str(),
        );
        self.resolve_inner(identity, source, transport, creds)
            .instrument(span)
            .await
    }

    async fn resolve_inner(
        &self,
        identity: &ReleaseIdentity,
        source: &ChartSource,
        transport: TransportConfig,
        creds: Option<&Credentials>,
    ) -> Result<FetchOutcome, Error> {
        let layout = ChartLayout::new(&self.charts_root, identity)?;

        create_root(&self.charts_root)
            .await
            .map_err(|e| Error::CreateRoot(self.charts_root.clone(), e))?;

        if source.urls().is_empty() {
            return Err(Error::NoMirrors(source.source_type()));
        }

        let outcome = match source {
            ChartSource::Git(git) | ChartSource::GitHub(git) => {
                let chart_dir = layout::join_chart_path(layout.chart_dir(), &git.chart_path)?;
                let commit_id = git::fetch(&git.urls, git.branch(), creds, layout.chart_dir())
                    .await
                    .map_err(Error::Git)?;

                if !chart_dir.is_dir() {
                    return Err(Error::ChartPathNotFound(chart_dir));
                }

                FetchOutcome {
                    metadata: ChartMetadata::load(&chart_dir).await,
                    chart_dir,
                    commit_id: Some(commit_id),
                    archive_digest: None,
                }
            }
            ChartSource::HelmRepo(repo) => {
                let client = self.transports.client(transport)?;
                let cache = cache::Cache::new(&self.charts_root);
                let downloaded = helm::fetch(&repo.urls, &client, creds, &cache, &layout).await?;

                FetchOutcome {
                    metadata: ChartMetadata::load(&downloaded.chart_dir).await,
                    chart_dir: downloaded.chart_dir,
                    commit_id: None,
                    archive_digest: Some(downloaded.digest),
                }
            }
        };

        info!(
            chart_dir = %outcome.chart_dir.display(),
            version = outcome.metadata.as_ref().map(|m| m.version.as_str()),
            "Chart ready"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use axum::http::StatusCode;
    use tracing_subscriber::layer::SubscriberExt;

    use super::archive::fixtures::chart_tgz;
    use super::git::fixtures::{chart_repo, git, git_available};
    use super::helm::fixtures::MirrorServer;
    use super::*;
    use crate::config::{GitSource, HelmRepoSource, SourceType};
    use crate::layer::CaptureLayer;

    fn identity() -> ReleaseIdentity {
        ReleaseIdentity::new("my-release", "default", "foo")
    }

    fn helm_source(urls: Vec<String>) -> ChartSource {
        ChartSource::HelmRepo(HelmRepoSource { urls })
    }

    #[test]
    fn test_mirror_errors_display() {
        let mut errors: MirrorErrors<String> = MirrorErrors::new();
        assert_eq!(errors.to_string(), "no mirror urls given");

        errors.push(MirrorFailure::new("https://a.example/x", "timeout".to_string()));
        errors.push(MirrorFailure::new("https://b.example/x", "404".to_string()));
        assert_eq!(
            errors.to_string(),
            "all 2 urls failed; https://a.example/x: timeout; https://b.example/x: 404"
        );
        let urls: Vec<String> = errors.into_vec().into_iter().map(|f| f.url).collect();
        assert_eq!(urls, ["https://a.example/x", "https://b.example/x"]);
    }

    #[tokio::test]
    async fn test_remove_path_removes_any_entry() {
        let dir = tempfile::tempdir().unwrap();
        let tree = dir.path().join("tree");
        std::fs::create_dir_all(tree.join("a/b")).unwrap();
        std::fs::write(tree.join("a/b/c"), "x").unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, "x").unwrap();

        remove_path(&tree).await.unwrap();
        remove_path(&file).await.unwrap();
        remove_path(&dir.path().join("missing")).await.unwrap();

        assert!(!tree.exists());
        assert!(!file.exists());

        #[cfg(unix)]
        {
            let target = dir.path().join("target");
            std::fs::create_dir(&target).unwrap();
            std::fs::write(target.join("keep"), "x").unwrap();
            let link = dir.path().join("link");
            std::os::unix::fs::symlink(&target, &link).unwrap();

            remove_path(&link).await.unwrap();

            assert!(std::fs::symlink_metadata(&link).is_err());
            assert!(target.join("keep").is_file());
        }
    }

    #[tokio::test]
    async fn test_resolve_helm_repo() {
        let server = MirrorServer::start().await;
        let url = server.serve(
            "/charts/foo-1.0.0.tgz",
            StatusCode::OK,
            chart_tgz("foo", "1.0.0", &[]),
        );
        let root = tempfile::tempdir().unwrap();
        let resolver = Resolver::new(root.path().join("charts"));

        let outcome = resolver
            .resolve(
                &identity(),
                &helm_source(vec![url]),
                TransportConfig::default(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(
            outcome.chart_dir,
            root.path().join("charts/my-release/default/foo")
        );
        assert!(outcome.chart_dir.join("Chart.yaml").is_file());
        assert!(root.path().join("charts/foo-1.0.0.tgz").is_file());
        assert_eq!(outcome.commit_id, None);
        assert!(outcome.archive_digest.is_some());
        let metadata = outcome.metadata.unwrap();
        assert_eq!(metadata.name, "foo");
        assert_eq!(metadata.version, "1.0.0");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_charts_root_mode() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().unwrap();
        let charts_root = root.path().join("a/b/charts");
        let resolver = Resolver::new(&charts_root);

        let err = resolver
            .resolve(&identity(), &helm_source(vec![]), TransportConfig::default(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NoMirrors(SourceType::HelmRepo)));
        let mode = std::fs::metadata(&charts_root).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755 & !umask());
    }

    #[cfg(unix)]
    fn umask() -> u32 {
        let dir = tempfile::tempdir().unwrap();
        let probe = dir.path().join("probe");
        let mut builder = std::fs::DirBuilder::new();
        std::os::unix::fs::DirBuilderExt::mode(&mut builder, 0o777);
        builder.create(&probe).unwrap();
        let mode =
            std::os::unix::fs::PermissionsExt::mode(&std::fs::metadata(&probe).unwrap().permissions());
        !mode & 0o777
    }

    #[tokio::test]
    async fn test_resolve_all_mirrors_fail() {
        let server = MirrorServer::start().await;
        let urls = vec![
            server.url("/a/foo-1.0.0.tgz"),
            server.url("/b/foo-1.0.0.tgz"),
        ];
        let root = tempfile::tempdir().unwrap();
        let resolver = Resolver::new(root.path());

        let err = resolver
            .resolve(
                &identity(),
                &helm_source(urls.clone()),
                TransportConfig::default(),
                None,
            )
            .await
            .unwrap_err();

        let Error::Helm(helm::FetchError::Mirrors(failures)) = &err else {
            panic!("unexpected error {err}");
        };
        let failed: Vec<&str> = failures.iter().map(|f| f.url.as_str()).collect();
        assert_eq!(failed, [urls[0].as_str(), urls[1].as_str()]);
        let message = err.to_string();
        assert!(message.contains(&urls[0]) && message.contains(&urls[1]));
        assert!(!root.path().join("my-release/default/foo").exists());
        assert!(!root.path().join("foo-1.0.0.tgz").exists());
    }

    #[tokio::test]
    async fn test_resolve_spec_rejects_before_io() {
        let root = tempfile::tempdir().unwrap();
        let charts_root = root.path().join("charts");
        let resolver = Resolver::new(&charts_root);

        let missing = SourceSpec::from_yaml("sourceType: git\n").unwrap();
        let err = resolver
            .resolve_spec(&identity(), &missing, None, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Config(config::Error::MissingSourceSpec(SourceType::Git))
        ));

        let unsupported = SourceSpec::from_yaml("sourceType: s3\n").unwrap();
        let err = resolver
            .resolve_spec(&identity(), &unsupported, None, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Config(config::Error::UnsupportedSourceType(ref t)) if t == "s3"
        ));

        let bad_identity = ReleaseIdentity::new("../escape", "default", "foo");
        let err = resolver
            .resolve(
                &bad_identity,
                &helm_source(vec!["https://good.example/foo-1.0.0.tgz".to_string()]),
                TransportConfig::default(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Layout(_)));

        assert!(!charts_root.exists());
    }

    #[tokio::test]
    async fn test_resolve_spec_with_credentials() {
        let server = MirrorServer::start().await;
        let url = server.serve(
            "/charts/foo-1.0.0.tgz",
            StatusCode::OK,
            chart_tgz("foo", "1.0.0", &[]),
        );
        let spec = SourceSpec::from_yaml(&format!(
            "sourceType: HelmRepo\nhelmRepo:\n  urls:\n    - {url}\n"
        ))
        .unwrap();
        let config_data = ConfigData::from([("insecureSkipVerify".to_string(), "true".to_string())]);
        let secret_data = SecretData::from([
            ("user".to_string(), b"admin".to_vec()),
            ("password".to_string(), b"s3cret".to_vec()),
        ]);
        let root = tempfile::tempdir().unwrap();
        let resolver = Resolver::new(root.path());

        resolver
            .resolve_spec(&identity(), &spec, Some(&config_data), Some(&secret_data))
            .await
            .unwrap();

        assert_eq!(
            server.last_auth(),
            Some(Credentials::new("admin", "s3cret").basic_auth_header())
        );
    }

    #[tokio::test]
    async fn test_resolve_logs_inside_span() {
        let server = MirrorServer::start().await;
        let url = server.serve(
            "/charts/foo-1.0.0.tgz",
            StatusCode::OK,
            chart_tgz("foo", "1.0.0", &[]),
        );
        let root = tempfile::tempdir().unwrap();
        let resolver = Resolver::new(root.path());
        let (layer, mut rx) = CaptureLayer::channel();
        let _default =
            tracing::subscriber::set_default(tracing_subscriber::registry().with(layer));

        resolver
            .resolve(
                &identity(),
                &helm_source(vec![url.clone()]),
                TransportConfig::default(),
                None,
            )
            .await
            .unwrap();

        let mut entries = Vec::new();
        while let Ok(entry) = rx.try_recv() {
            entries.push(entry);
        }
        let get = entries
            .iter()
            .find(|e| e.message == "Get succeeded")
            .unwrap();
        assert_eq!(get.field_str("url"), Some(url.as_str()));
        assert_eq!(get.spans, ["resolve"]);
        assert!(entries.iter().any(|e| e.message == "Chart ready"));
    }

    #[tokio::test]
    async fn test_resolve_git() {
        if !git_available() {
            eprintln!("git not available, skipping");
            return;
        }
        let source = tempfile::tempdir().unwrap();
        let good = chart_repo(source.path());
        let expected = git(source.path(), &["rev-parse", "release-1.2"]);
        let bad = format!("file://{}", source.path().join("missing.git").display());

        let root = tempfile::tempdir().unwrap();
        let resolver = Resolver::new(root.path());
        let chart_source = ChartSource::GitHub(GitSource {
            urls: vec![bad, good],
            branch: Some("refs/heads/release-1.2".to_string()),
            chart_path: "charts/foo".to_string(),
        });

        let outcome = resolver
            .resolve(&identity(), &chart_source, TransportConfig::default(), None)
            .await
            .unwrap();

        assert_eq!(
            outcome.chart_dir,
            root.path().join("my-release/default/foo/charts/foo")
        );
        assert_eq!(outcome.commit_id, Some(expected));
        assert_eq!(outcome.archive_digest, None);
        assert_eq!(outcome.metadata.unwrap().version, "1.2.0");
    }

    #[tokio::test]
    async fn test_resolve_git_missing_chart_path() {
        if !git_available() {
            eprintln!("git not available, skipping");
            return;
        }
        let source = tempfile::tempdir().unwrap();
        let url = chart_repo(source.path());
        let root = tempfile::tempdir().unwrap();
        let resolver = Resolver::new(root.path());
        let chart_source = ChartSource::Git(GitSource {
            urls: vec![url],
            branch: None,
            chart_path: "charts/bar".to_string(),
        });

        let err = resolver
            .resolve(&identity(), &chart_source, TransportConfig::default(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ChartPathNotFound(p) if p.ends_with("charts/bar")));
    }

    #[tokio::test]
    async fn test_resolve_git_all_mirrors_fail() {
        if !git_available() {
            eprintln!("git not available, skipping");
            return;
        }
        let root = tempfile::tempdir().unwrap();
        let urls = vec![
            format!("file://{}", root.path().join("one.git").display()),
            format!("file://{}", root.path().join("two.git").display()),
        ];
        let resolver = Resolver::new(root.path().join("charts"));
        let chart_source = ChartSource::Git(GitSource {
            urls: urls.clone(),
            branch: None,
            chart_path: String::new(),
        });

        let err = resolver
            .resolve(&identity(), &chart_source, TransportConfig::default(), None)
            .await
            .unwrap_err();

        let Error::Git(failures) = err else {
            panic!("expected git failures");
        };
        assert_eq!(failures.len(), 2);
        assert!(!root.path().join("charts/my-release/default/foo").exists());
    }
}
