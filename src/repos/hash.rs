use serde::{Deserialize, Serialize};
use sha256::TrySha256Digest;

/// Hex encoded SHA-256 of a cached chart archive.
#[derive(Debug, Serialize, Deserialize, Eq, PartialEq, Clone, Hash)]
pub struct Sha256Hash(String);

impl Sha256Hash {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub async fn from_async_path(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let hash = path.async_digest().await?;
        Ok(Self(hash))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
