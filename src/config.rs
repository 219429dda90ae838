//! Configuration management for haulflow.
//!
//! Settings load from `haulflow.toml` (current directory first, then the
//! data directory), with environment overrides for secrets. Everything
//! has a default so a bare `haulflow init` works with no file at all.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable holding the marketplace API token.
pub const API_TOKEN_ENV: &str = "HAULFLOW_API_TOKEN";

/// Config file name searched for in the working and data directories.
pub const CONFIG_FILE: &str = "haulflow.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid config in {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Marketplace API connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceSettings {
    /// Listing API base URL.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// API token; the HAULFLOW_API_TOKEN environment variable wins.
    #[serde(default)]
    pub api_token: Option<String>,
    /// Marketplace id stamped on records that did not extract one.
    #[serde(default)]
    pub default_marketplace_id: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.freightmarket.example.com/v2".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for MarketplaceSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_token: None,
            default_marketplace_id: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl MarketplaceSettings {
    /// Resolve the API token: environment first, then config.
    pub fn token(&self) -> Option<String> {
        std::env::var(API_TOKEN_ENV)
            .ok()
            .filter(|t| !t.is_empty())
            .or_else(|| self.api_token.clone())
    }
}

/// Top-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Where the database and default profile/warehouse files live.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Profile override directory; defaults to `<data_dir>/profiles`.
    #[serde(default)]
    pub profile_dir: Option<PathBuf>,
    /// Warehouse directory file; defaults to `<data_dir>/warehouses.toml`.
    #[serde(default)]
    pub warehouse_file: Option<PathBuf>,
    #[serde(default)]
    pub marketplace: MarketplaceSettings,
    /// OCR wall-clock budget per document, in seconds.
    #[serde(default = "default_ocr_timeout")]
    pub ocr_timeout_secs: u64,
    /// Process-wide cap on in-flight export requests.
    #[serde(default = "default_export_concurrency")]
    pub export_concurrency: usize,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("haulflow")
}

fn default_ocr_timeout() -> u64 {
    120
}

fn default_export_concurrency() -> usize {
    3
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            profile_dir: None,
            warehouse_file: None,
            marketplace: MarketplaceSettings::default(),
            ocr_timeout_secs: default_ocr_timeout(),
            export_concurrency: default_export_concurrency(),
        }
    }
}

impl Settings {
    /// Load settings, searching the working directory then the default
    /// data directory. Missing files mean defaults, not errors.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let candidates: Vec<PathBuf> = match explicit {
            Some(path) => vec![path.to_path_buf()],
            None => vec![
                PathBuf::from(CONFIG_FILE),
                default_data_dir().join(CONFIG_FILE),
            ],
        };

        for path in candidates {
            if path.is_file() {
                return Self::from_file(&path);
            }
        }
        Ok(Self::default())
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut settings: Settings =
            toml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        settings.data_dir = expand(&settings.data_dir);
        settings.profile_dir = settings.profile_dir.as_deref().map(expand);
        settings.warehouse_file = settings.warehouse_file.as_deref().map(expand);
        Ok(settings)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("haulflow.db")
    }

    pub fn profile_dir(&self) -> PathBuf {
        self.profile_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("profiles"))
    }

    pub fn warehouse_file(&self) -> PathBuf {
        self.warehouse_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("warehouses.toml"))
    }

    /// Create the data and profile directories if needed.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        fs::create_dir_all(self.profile_dir())?;
        Ok(())
    }
}

/// Expand `~` and environment variables in configured paths.
fn expand(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    PathBuf::from(shellexpand::full(&raw).map(|s| s.into_owned()).unwrap_or_else(|_| raw.into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_no_file() {
        let settings = Settings::load(Some(Path::new("/nonexistent/haulflow.toml"))).unwrap();
        assert_eq!(settings.ocr_timeout_secs, 120);
        assert_eq!(settings.export_concurrency, 3);
        assert!(settings.database_path().ends_with("haulflow.db"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            r#"
data_dir = "/tmp/haulflow-test"
ocr_timeout_secs = 30

[marketplace]
base_url = "https://api.example.com/v1"
default_marketplace_id = "central-dispatch"
"#,
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.data_dir, PathBuf::from("/tmp/haulflow-test"));
        assert_eq!(settings.ocr_timeout_secs, 30);
        assert_eq!(settings.marketplace.base_url, "https://api.example.com/v1");
        assert_eq!(
            settings.marketplace.default_marketplace_id.as_deref(),
            Some("central-dispatch")
        );
        // Derived paths follow the data dir.
        assert_eq!(
            settings.profile_dir(),
            PathBuf::from("/tmp/haulflow-test/profiles")
        );
    }

    #[test]
    fn test_malformed_config_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "data_dir = [1, 2]").unwrap();
        assert!(matches!(
            Settings::load(Some(&path)),
            Err(ConfigError::Parse { .. })
        ));
    }
}
