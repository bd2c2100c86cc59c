//! Application manifest (`app.toml`).
//!
//! # Responsibilities
//! - Read the optional manifest from an application directory
//! - Describe handler registrations, session overrides and static files

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

pub const MANIFEST_FILE: &str = "app.toml";

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Parsed manifest. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppManifest {
    /// Human-readable application name.
    pub display_name: Option<String>,

    pub session: SessionOverrides,

    pub static_files: StaticFilesConfig,

    pub handlers: Vec<HandlerEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionOverrides {
    /// Replaces the container-wide default max-inactive interval.
    pub max_inactive_secs: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StaticFilesConfig {
    /// Serve files when no handler pattern matches.
    pub enabled: bool,

    /// Directory, relative to the application directory.
    pub dir: String,
}

impl Default for StaticFilesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: "static".to_string(),
        }
    }
}

/// One `[[handlers]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct HandlerEntry {
    pub name: String,
    /// Code identity resolved through the module namespace.
    pub handler: String,
    pub pattern: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
}

impl AppManifest {
    pub fn parse(content: &str, path: &Path) -> Result<Self, ManifestError> {
        toml::from_str(content).map_err(|source| ManifestError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Load `app.toml` from `dir`; a missing file yields the defaults.
    pub async fn load(dir: &Path) -> Result<Self, ManifestError> {
        let path = dir.join(MANIFEST_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Self::parse(&content, &path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ManifestError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }
}
