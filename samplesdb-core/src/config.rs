use std::fs;

use anyhow::{Context, bail};
use camino::Utf8Path;
use serde::Deserialize;

/// Issuance policy for one kind of proof-of-control code.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct IssuePolicy {
    /// Minimum seconds between issuances for the same subject.
    pub interval_secs: i64,
    /// Maximum unexpired codes outstanding per subject.
    pub limit: usize,
    /// Seconds from issuance to expiry.
    pub timeout_secs: i64,
}

impl Default for IssuePolicy {
    fn default() -> Self {
        Self {
            interval_secs: 10 * 60,
            limit: 3,
            timeout_secs: 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub verification: IssuePolicy,
    pub password_reset: IssuePolicy,
}

impl Settings {
    /// Reads settings from a TOML or JSON file, chosen by extension.
    ///
    /// # Errors
    /// Fails if the file is unreadable, unparseable, or has an unknown
    /// extension.
    pub fn from_path(path: &Utf8Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path).context(format!("failed to read {path}"))?;

        let settings = match path.extension() {
            Some("toml") => toml::from_str(&contents)?,
            Some("json") => serde_json::from_str(&contents)?,
            _ => bail!("unsupported settings format: {path}"),
        };

        Ok(settings)
    }
}
