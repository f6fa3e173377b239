// Copyright (C) 2022 Electronic Arts, Inc. All rights reserved.

//! Resolve chart sources into chart directories on local disk.
//!
//! A source is a git repository, a github repository, or a set of helm repository mirrors
//! serving the same packaged chart. [`Resolver::resolve`] tries each mirror in turn and
//! leaves the chart at `<charts_root>/<name>/<namespace>/<chart_name>`, ready to hand to a
//! release manager.
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::use_self)]

pub mod command;
pub mod config;
pub mod duration;
pub mod layer;
pub mod layout;
pub mod repos;
pub mod transport;
pub mod urls;

pub use config::{ChartSource, ConfigData, GitSource, HelmRepoSource, SecretData, SourceSpec, SourceType};
pub use layout::{ChartLayout, ReleaseIdentity};
pub use repos::meta::ChartMetadata;
pub use repos::{Error, FetchOutcome, MirrorErrors, MirrorFailure, Resolver, Sha256Hash};
pub use transport::{Credentials, TransportConfig};
