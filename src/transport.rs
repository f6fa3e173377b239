// Copyright (C) 2022 Electronic Arts, Inc. All rights reserved.

//! HTTP transport and credentials.
//!
//! Transport settings come from an optional config map, credentials from an optional secret.
//! Clients are pooled per distinct [`TransportConfig`] so repeated resolutions reuse
//! connections.
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ConfigData, SecretData};

const INSECURE_SKIP_VERIFY_KEY: &str = "insecureSkipVerify";
const USER_KEY: &str = "user";
const PASSWORD_KEY: &str = "password";

const MAX_IDLE_PER_HOST: usize = 100;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const TCP_KEEPALIVE: Duration = Duration::from_secs(30);
const IDLE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unable to parse {key} value '{value}' as a boolean")]
    InvalidConfig { key: &'static str, value: String },
    #[error("Secret key '{0}' is not valid UTF-8")]
    InvalidSecret(&'static str),
    #[error("Failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Transport settings for chart downloads.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct TransportConfig {
    pub insecure_skip_verify: bool,
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

impl TransportConfig {
    /// Read the transport settings from an optional config map.
    ///
    /// A missing map, a missing key, or an empty value leave certificate verification on.
    pub fn from_config_map(data: Option<&ConfigData>) -> Result<Self, Error> {
        let Some(data) = data else {
            debug!("No transport config map, using defaults");
            return Ok(Self::default());
        };

        match data.get(INSECURE_SKIP_VERIFY_KEY).map(String::as_str) {
            None | Some("") => {
                debug!("{} is not specified", INSECURE_SKIP_VERIFY_KEY);
                Ok(Self::default())
            }
            Some(value) => {
                let insecure_skip_verify =
                    parse_bool(value).ok_or_else(|| Error::InvalidConfig {
                        key: INSECURE_SKIP_VERIFY_KEY,
                        value: value.to_string(),
                    })?;
                info!(insecure_skip_verify, "Set {}", INSECURE_SKIP_VERIFY_KEY);
                Ok(Self {
                    insecure_skip_verify,
                })
            }
        }
    }

    /// Build a client with bounded idle pooling and connect/idle timeouts.
    ///
    /// No overall request timeout is set, so a server that stops responding mid-body
    /// holds the caller until the connection drops.
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .pool_idle_timeout(IDLE_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .tcp_keepalive(TCP_KEEPALIVE)
            .danger_accept_invalid_certs(self.insecure_skip_verify)
            .build()?;
        Ok(client)
    }
}

/// Basic authentication pair.
#[derive(Clone, Eq, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn secret_string(data: &SecretData, key: &'static str) -> Result<Option<String>, Error> {
    data.get(key)
        .map(|bytes| String::from_utf8(bytes.clone()).map_err(|_| Error::InvalidSecret(key)))
        .transpose()
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Read `user` and `password` from an optional secret.
    ///
    /// A secret holding neither key means unauthenticated access.
    pub fn from_secret(data: Option<&SecretData>) -> Result<Option<Self>, Error> {
        let Some(data) = data else {
            debug!("No secret defined");
            return Ok(None);
        };

        let username = secret_string(data, USER_KEY)?;
        let password = secret_string(data, PASSWORD_KEY)?;
        if username.is_none() && password.is_none() {
            debug!("Secret holds no credentials");
            return Ok(None);
        }

        debug!("Add credentials");
        Ok(Some(Self {
            username: username.unwrap_or_default(),
            password: password.unwrap_or_default(),
        }))
    }

    /// Value of an `Authorization` header for these credentials.
    pub fn basic_auth_header(&self) -> String {
        let token = STANDARD.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {token}")
    }
}

/// Clients shared across resolutions, one per transport configuration.
#[derive(Debug, Default)]
pub struct TransportPool {
    clients: Mutex<HashMap<TransportConfig, reqwest::Client>>,
}

impl TransportPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client(&self, config: TransportConfig) -> Result<reqwest::Client, Error> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&config) {
            return Ok(client.clone());
        }
        let client = config.build_client()?;
        clients.insert(config, client.clone());
        Ok(client)
    }
}
