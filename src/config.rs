// Copyright (C) 2022 Electronic Arts, Inc. All rights reserved.

//! Chart source declarations.
//!
//! A resource declares its chart source as a `sourceType` tag plus one optional
//! sub-spec per kind. [`SourceSpec`] mirrors that declared shape; [`ChartSource`]
//! is the validated form the fetchers work with.
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Environment variable naming the root directory charts are stored under.
pub const CHARTS_DIR_ENV: &str = "CHARTS_DIR";

/// Key/value configuration, as held by a config map.
pub type ConfigData = BTreeMap<String, String>;

/// Key/value secret material, as held by a secret.
pub type SecretData = BTreeMap<String, Vec<u8>>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("sourceType '{0}' unsupported")]
    UnsupportedSourceType(String),
    #[error("{0} source type but the {0} spec is not defined")]
    MissingSourceSpec(SourceType),
    #[error("Failed to parse source spec: {0}")]
    Parse(#[from] serde_yml::Error),
    #[error("Failed to create temporary charts directory: {0}")]
    TempRoot(std::io::Error),
}

/// The kinds of source a chart can be fetched from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SourceType {
    Git,
    GitHub,
    HelmRepo,
}

impl SourceType {
    /// Match a declared tag, ignoring case.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "git" => Some(SourceType::Git),
            "github" => Some(SourceType::GitHub),
            "helmrepo" => Some(SourceType::HelmRepo),
            _ => None,
        }
    }
}

impl Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let str = match self {
            SourceType::Git => "git",
            SourceType::GitHub => "github",
            SourceType::HelmRepo => "helmrepo",
        };
        f.write_str(str)
    }
}

/// A git or github repository holding the chart.
#[derive(Serialize, Deserialize, Debug, Clone, Default, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GitSource {
    /// Mirror URLs, tried in order.
    #[serde(default)]
    pub urls: Vec<String>,
    /// Branch to check out; the repository's default branch when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Directory of the chart inside the repository.
    #[serde(default)]
    pub chart_path: String,
}

impl GitSource {
    /// The branch, with empty values treated as unset.
    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref().filter(|b| !b.is_empty())
    }
}

/// Packaged chart archives served over http(s) or from the local filesystem.
#[derive(Serialize, Deserialize, Debug, Clone, Default, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HelmRepoSource {
    /// Mirror URLs of the same archive, tried in order.
    #[serde(default)]
    pub urls: Vec<String>,
}

/// The chart source exactly as declared on a resource.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct SourceSpec {
    pub source_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<GitSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm_repo: Option<HelmRepoSource>,
}

impl SourceSpec {
    pub fn from_yaml(text: &str) -> Result<Self, Error> {
        Ok(serde_yml::from_str(text)?)
    }
}

/// A validated chart source.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ChartSource {
    Git(GitSource),
    GitHub(GitSource),
    HelmRepo(HelmRepoSource),
}

impl ChartSource {
    pub const fn source_type(&self) -> SourceType {
        match self {
            ChartSource::Git(_) => SourceType::Git,
            ChartSource::GitHub(_) => SourceType::GitHub,
            ChartSource::HelmRepo(_) => SourceType::HelmRepo,
        }
    }

    pub fn urls(&self) -> &[String] {
        match self {
            ChartSource::Git(git) | ChartSource::GitHub(git) => &git.urls,
            ChartSource::HelmRepo(repo) => &repo.urls,
        }
    }
}

impl TryFrom<&SourceSpec> for ChartSource {
    type Error = Error;

    fn try_from(spec: &SourceSpec) -> Result<Self, Self::Error> {
        let source_type = SourceType::parse(&spec.source_type)
            .ok_or_else(|| Error::UnsupportedSourceType(spec.source_type.clone()))?;

        let missing = || Error::MissingSourceSpec(source_type);
        match source_type {
            SourceType::Git => spec.git.clone().map(ChartSource::Git).ok_or_else(missing),
            SourceType::GitHub => spec
                .github
                .clone()
                .map(ChartSource::GitHub)
                .ok_or_else(missing),
            SourceType::HelmRepo => spec
                .helm_repo
                .clone()
                .map(ChartSource::HelmRepo)
                .ok_or_else(missing),
        }
    }
}

/// Pick the charts root from `CHARTS_DIR`, or create a fresh temporary one.
pub fn charts_root_from_env() -> Result<PathBuf, Error> {
    match std::env::var_os(CHARTS_DIR_ENV) {
        Some(dir) if !dir.is_empty() => {
            debug!("Using {} = {:?}", CHARTS_DIR_ENV, dir);
            Ok(PathBuf::from(dir))
        }
        _ => {
            let dir = tempfile::Builder::new()
                .prefix("charts")
                .tempdir()
                .map_err(Error::TempRoot)?
                .keep();
            info!(
                "{} is not set, using temporary directory {}",
                CHARTS_DIR_ENV,
                dir.display()
            );
            Ok(dir)
        }
    }
}
