use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// The identifying fields of a chart's `Chart.yaml`.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ChartMetadata {
    /// Read `Chart.yaml` from a chart directory.
    ///
    /// Returns `None` when the file is missing or unreadable; the caller's release manager
    /// owns chart validation.
    pub async fn load(chart_dir: &Path) -> Option<Self> {
        let path = chart_dir.join("Chart.yaml");
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(err) => {
                debug!(path = %path.display(), "No chart metadata: {err}");
                return None;
            }
        };
        match serde_yml::from_str(&text) {
            Ok(meta) => Some(meta),
            Err(err) => {
                debug!(path = %path.display(), "Unparsable chart metadata: {err}");
                None
            }
        }
    }
}
