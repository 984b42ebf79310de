//! Lock Store.
//!
//! The lock file (`.pinion.lock`) records, per provider, the selected version,
//! the origin it was resolved against, every package hash observed for that
//! version on any platform, and signing metadata. It is TOML, sorted by
//! provider, with sorted hash lists and no timestamps, so re-saving unchanged
//! content is byte-identical.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use pinion_schema::{PackageHash, ProviderIdentity, SigningInfo, Version};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::LockFileError;

/// Lock file format version written by this build.
pub const LOCK_FORMAT_VERSION: u32 = 1;

const HEADER: &str = "# This file is maintained automatically by \"pinion init\".\n\
                      # Manual edits may be lost in future updates.\n";

/// The persisted selection for one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    /// Provider address.
    #[serde(rename = "source")]
    pub provider: ProviderIdentity,
    /// Selected version.
    pub version: Version,
    /// Constraints that were active when the version was selected.
    #[serde(default)]
    pub constraints: String,
    /// Package source the version was resolved against.
    #[serde(default)]
    pub origin: String,
    /// Every hash known to be valid for this version, across platforms.
    #[serde(default)]
    pub hashes: BTreeSet<PackageHash>,
    /// Signing key that authenticated the package, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing: Option<SigningInfo>,
}

impl LockEntry {
    /// Whether any of `candidates` is among the recorded hashes.
    ///
    /// An entry with no recorded hashes accepts anything.
    pub fn accepts_any(&self, candidates: &BTreeSet<PackageHash>) -> bool {
        self.hashes.is_empty() || !self.hashes.is_disjoint(candidates)
    }
}

/// Lock entries keyed and ordered by provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Locks {
    entries: BTreeMap<ProviderIdentity, LockEntry>,
}

impl Locks {
    /// An empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// The entry for `provider`, if locked.
    pub fn get(&self, provider: &ProviderIdentity) -> Option<&LockEntry> {
        self.entries.get(provider)
    }

    /// Add or replace an entry. Used only while assembling a new collection.
    pub fn insert(&mut self, entry: LockEntry) {
        self.entries.insert(entry.provider.clone(), entry);
    }

    /// True when nothing is locked (first-time initialization).
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of locked providers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries in provider order.
    pub fn iter(&self) -> impl Iterator<Item = &LockEntry> {
        self.entries.values()
    }
}

impl FromIterator<LockEntry> for Locks {
    fn from_iter<I: IntoIterator<Item = LockEntry>>(iter: I) -> Self {
        let mut locks = Self::new();
        for entry in iter {
            locks.insert(entry);
        }
        locks
    }
}

#[derive(Serialize, Deserialize)]
struct LockFile {
    version: u32,
    #[serde(default, rename = "provider")]
    providers: Vec<LockEntry>,
}

/// Reads and writes the lock file at a fixed path.
///
/// The store does no locking of its own; callers hold a process-level lock
/// for the duration of a run.
#[derive(Debug, Clone)]
pub struct LockStore {
    path: PathBuf,
}

impl LockStore {
    /// A store for the lock file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The lock file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the previous selections.
    ///
    /// A missing file is a first run and yields an empty collection.
    pub async fn load(&self) -> Result<Locks, LockFileError> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            tracing::debug!("No lock file at {}", self.path.display());
            return Ok(Locks::new());
        }

        let content = fs::read_to_string(&self.path)
            .await
            .map_err(|source| LockFileError::Io {
                path: self.path.clone(),
                source,
            })?;
        let file: LockFile = toml::from_str(&content).map_err(|source| LockFileError::Parse {
            path: self.path.clone(),
            source,
        })?;

        if file.version != LOCK_FORMAT_VERSION {
            return Err(LockFileError::UnsupportedVersion {
                path: self.path.clone(),
                found: file.version,
                expected: LOCK_FORMAT_VERSION,
            });
        }

        let mut locks = Locks::new();
        for entry in file.providers {
            if locks.get(&entry.provider).is_some() {
                return Err(LockFileError::DuplicateProvider {
                    path: self.path.clone(),
                    provider: entry.provider,
                });
            }
            locks.insert(entry);
        }
        tracing::debug!(
            "Loaded {} lock entries from {}",
            locks.len(),
            self.path.display()
        );
        Ok(locks)
    }

    /// Atomically replace the lock file with `locks`.
    ///
    /// The content is written to a temporary file in the same directory and
    /// renamed over the target, so readers never see a partial file.
    pub async fn save(&self, locks: &Locks) -> Result<(), LockFileError> {
        let content = render(locks)?;
        let io_err = |source| LockFileError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let mut temp_name = self.path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);
        fs::write(&temp_path, &content).await.map_err(io_err)?;
        fs::rename(&temp_path, &self.path).await.map_err(io_err)?;

        tracing::info!(
            "Wrote {} lock entries to {}",
            locks.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// The exact bytes [`LockStore::save`] writes for `locks`.
pub fn render(locks: &Locks) -> Result<String, LockFileError> {
    let file = LockFile {
        version: LOCK_FORMAT_VERSION,
        providers: locks.iter().cloned().collect(),
    };
    let body = toml::to_string(&file)?;
    Ok(format!("{HEADER}\n{body}"))
}
