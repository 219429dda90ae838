//! Profile catalog loading.

use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, warn};

use super::builtin::default_profiles;
use super::{AuctionProfile, GENERIC_AUCTION};

/// Errors loading profile overrides from disk.
#[derive(Debug, Error)]
pub enum ProfileStoreError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid profile TOML in {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

/// Read-only catalog of auction profiles.
///
/// Compiled-in defaults come first; TOML files from the profile directory
/// replace defaults with the same auction type or append after them.
/// Catalog order is classification declaration order.
pub struct ProfileStore {
    profiles: Vec<AuctionProfile>,
}

impl ProfileStore {
    /// Catalog with only the compiled-in defaults.
    pub fn builtin() -> Self {
        Self {
            profiles: default_profiles(),
        }
    }

    /// Catalog with TOML overrides applied from `dir`.
    ///
    /// A missing directory is fine; an unreadable or malformed file is an
    /// error so a typo never silently reverts a tuned profile.
    pub fn load(dir: &Path) -> Result<Self, ProfileStoreError> {
        let mut store = Self::builtin();
        if !dir.is_dir() {
            debug!("no profile directory at {}, using builtins", dir.display());
            return Ok(store);
        }

        let mut entries: Vec<_> = fs::read_dir(dir)
            .map_err(|source| ProfileStoreError::Io {
                path: dir.display().to_string(),
                source,
            })?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e == "toml").unwrap_or(false))
            .collect();
        entries.sort();

        for path in entries {
            let text = fs::read_to_string(&path).map_err(|source| ProfileStoreError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let profile: AuctionProfile =
                toml::from_str(&text).map_err(|source| ProfileStoreError::Parse {
                    path: path.display().to_string(),
                    source,
                })?;
            store.upsert(profile);
        }

        Ok(store)
    }

    fn upsert(&mut self, profile: AuctionProfile) {
        if let Some(existing) = self
            .profiles
            .iter_mut()
            .find(|p| p.auction_type == profile.auction_type)
        {
            debug!(
                "profile override: {} v{} replaces v{}",
                profile.auction_type, profile.version, existing.version
            );
            *existing = profile;
        } else {
            // Appended overrides sort after builtins but before the fallback.
            let fallback_pos = self
                .profiles
                .iter()
                .position(|p| p.auction_type == GENERIC_AUCTION)
                .unwrap_or(self.profiles.len());
            self.profiles.insert(fallback_pos, profile);
        }
    }

    /// All profiles in declaration order.
    pub fn all(&self) -> &[AuctionProfile] {
        &self.profiles
    }

    /// Look up one profile by auction type.
    pub fn get(&self, auction_type: &str) -> Option<&AuctionProfile> {
        self.profiles
            .iter()
            .find(|p| p.auction_type.eq_ignore_ascii_case(auction_type))
    }

    /// The generic fallback profile for unclassified documents.
    pub fn generic(&self) -> &AuctionProfile {
        self.get(GENERIC_AUCTION).unwrap_or_else(|| {
            warn!("generic profile missing from catalog, using first entry");
            &self.profiles[0]
        })
    }
}
