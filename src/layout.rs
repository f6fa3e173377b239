// Copyright (C) 2022 Electronic Arts, Inc. All rights reserved.

//! Where charts are materialized on disk.
//!
//! Every resource gets `<charts_root>/<name>/<namespace>/<chart_name>`. The path only depends
//! on those four values, so repeated resolutions of the same resource land in the same place.
use std::fmt::Display;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid {field} '{value}': must be a single non-empty path component")]
    InvalidComponent { field: &'static str, value: String },
    #[error("Invalid chart path '{0}': must be relative and stay inside the repository")]
    InvalidChartPath(String),
}

/// Identity of the resource a chart is fetched for.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct ReleaseIdentity {
    pub name: String,
    pub namespace: String,
    pub chart_name: String,
}

impl ReleaseIdentity {
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        chart_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            chart_name: chart_name.into(),
        }
    }
}

impl Display for ReleaseIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}:{}", self.namespace, self.name, self.chart_name)
    }
}

fn check_component(field: &'static str, value: &str) -> Result<(), Error> {
    let mut components = Path::new(value).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(c)), None) if c == value => Ok(()),
        _ => Err(Error::InvalidComponent {
            field,
            value: value.to_string(),
        }),
    }
}

/// The directories used for one resource.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChartLayout {
    charts_root: PathBuf,
    release_dir: PathBuf,
    chart_dir: PathBuf,
}

impl ChartLayout {
    pub fn new(charts_root: &Path, identity: &ReleaseIdentity) -> Result<Self, Error> {
        check_component("name", &identity.name)?;
        check_component("namespace", &identity.namespace)?;
        check_component("chart name", &identity.chart_name)?;

        let release_dir = charts_root.join(&identity.name).join(&identity.namespace);
        let chart_dir = release_dir.join(&identity.chart_name);
        Ok(Self {
            charts_root: charts_root.to_path_buf(),
            release_dir,
            chart_dir,
        })
    }

    pub fn charts_root(&self) -> &Path {
        &self.charts_root
    }

    /// `<charts_root>/<name>/<namespace>`; archives are expanded here.
    pub fn release_dir(&self) -> &Path {
        &self.release_dir
    }

    /// `<charts_root>/<name>/<namespace>/<chart_name>`.
    pub fn chart_dir(&self) -> &Path {
        &self.chart_dir
    }
}

/// Resolve a chart path declared relative to a checkout.
///
/// Empty and `.` mean the checkout itself.
pub fn join_chart_path(checkout: &Path, chart_path: &str) -> Result<PathBuf, Error> {
    let mut result = checkout.to_path_buf();
    for component in Path::new(chart_path).components() {
        match component {
            Component::Normal(c) => result.push(c),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::InvalidChartPath(chart_path.to_string()));
            }
        }
    }
    Ok(result)
}
