//! Shared plugin cache.
//!
//! Unpacked packages are stored once under `objects/<key>/`, where the key is
//! the BLAKE3 digest of the package's directory hash. An index record per
//! provider/version/platform (`index/<host>/<ns>/<type>/<version>/<os_arch>.json`)
//! points at the object and remembers the hashes, protocols and signing
//! metadata observed when it was stored.
//!
//! Objects are written to a staging directory and renamed into place, and
//! index records go through a temp file, so concurrent writers of the same
//! package (in this run or another process) are idempotent and readers never
//! see a partial entry.

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use pinion_schema::{HashScheme, PackageHash, Platform, ProviderIdentity, SigningInfo, Version};
use serde::{Deserialize, Serialize};
use tempfile::{NamedTempFile, TempDir};

use crate::paths;

/// What the cache remembers about one stored package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Object key (BLAKE3 hex of the directory hash).
    pub object: String,
    /// Hashes of the stored package itself.
    pub hashes: BTreeSet<PackageHash>,
    /// Archive hashes for other platforms of the same version.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub sibling_hashes: BTreeSet<PackageHash>,
    /// Protocols the package declared when fetched.
    #[serde(default)]
    pub protocols: Vec<String>,
    /// Origin the package was fetched from.
    pub origin: String,
    #[serde(default)]
    pub signing: Option<SigningInfo>,
}

impl CacheRecord {
    /// The directory hash the object is keyed by.
    pub fn directory_hash(&self) -> Option<&PackageHash> {
        self.hashes
            .iter()
            .find(|h| h.scheme() == HashScheme::Directory)
    }
}

/// A package present in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPackage {
    /// The unpacked object directory.
    pub dir: PathBuf,
    pub record: CacheRecord,
}

/// Content-addressed package cache shared across runs and configurations.
#[derive(Debug, Clone)]
pub struct PackageCache {
    root: PathBuf,
}

impl PackageCache {
    /// A cache rooted at `root`; directories are created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The cache directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(
        &self,
        provider: &ProviderIdentity,
        version: &Version,
        platform: &Platform,
    ) -> PathBuf {
        let dir = paths::package_dir(&self.root.join("index"), provider, version, platform);
        dir.with_extension("json")
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join("objects").join(key)
    }

    /// Find a stored package.
    ///
    /// Returns `None` for a missing or unreadable record, or a record whose
    /// object has gone.
    pub fn lookup(
        &self,
        provider: &ProviderIdentity,
        version: &Version,
        platform: &Platform,
    ) -> Option<CachedPackage> {
        let path = self.record_path(provider, version, platform);
        let content = fs::read_to_string(&path).ok()?;
        let record: CacheRecord = match serde_json::from_str(&content) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Ignoring unreadable cache record {}: {e}", path.display());
                return None;
            }
        };
        let dir = self.object_path(&record.object);
        if !dir.is_dir() {
            tracing::debug!("Cache record {} points at a missing object", path.display());
            return None;
        }
        Some(CachedPackage { dir, record })
    }

    /// A fresh staging directory on the same filesystem as the objects.
    pub fn staging_dir(&self) -> io::Result<TempDir> {
        let tmp = self.root.join("tmp");
        fs::create_dir_all(&tmp)?;
        tempfile::Builder::new().prefix("staging-").tempdir_in(tmp)
    }

    /// Move a staged, unpacked package into the cache and index it.
    ///
    /// If an identical object already exists the staged copy is discarded.
    pub fn store(
        &self,
        provider: &ProviderIdentity,
        version: &Version,
        platform: &Platform,
        staged: &Path,
        mut record: CacheRecord,
    ) -> io::Result<CachedPackage> {
        let dir_hash = match record.directory_hash() {
            Some(h) => h.clone(),
            None => {
                let h = PackageHash::of_directory(staged)?;
                record.hashes.insert(h.clone());
                h
            }
        };
        record.object = blake3::hash(dir_hash.as_str().as_bytes())
            .to_hex()
            .to_string();

        let object = self.object_path(&record.object);
        if object.is_dir() {
            tracing::debug!("Cache already holds object {}", record.object);
        } else {
            fs::create_dir_all(self.root.join("objects"))?;
            if let Err(e) = fs::rename(staged, &object) {
                // Another writer may have won the race with the same content.
                if !object.is_dir() {
                    return Err(e);
                }
            }
        }

        let record_path = self.record_path(provider, version, platform);
        let parent = record_path
            .parent()
            .ok_or_else(|| io::Error::other("cache record has no parent directory"))?;
        fs::create_dir_all(parent)?;
        let mut temp = NamedTempFile::new_in(parent)?;
        temp.write_all(serde_json::to_string_pretty(&record)?.as_bytes())?;
        temp.persist(&record_path).map_err(|e| e.error)?;

        tracing::debug!("Cached {provider} v{version} ({platform}) as {}", record.object);
        Ok(CachedPackage {
            dir: object,
            record,
        })
    }

    /// Make `target` point at a cached package.
    ///
    /// Uses a symlink where supported and falls back to a copy.
    pub fn link_into(cached: &CachedPackage, target: &Path) -> io::Result<()> {
        remove_existing(target)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        #[cfg(unix)]
        {
            if std::os::unix::fs::symlink(&cached.dir, target).is_ok() {
                return Ok(());
            }
        }

        fs::create_dir_all(target)?;
        let options = fs_extra::dir::CopyOptions::new().content_only(true);
        fs_extra::dir::copy(&cached.dir, target, &options)
            .map(|_| ())
            .map_err(io::Error::other)
    }
}

/// Remove whatever is at `path`: a symlink, a file or a directory tree.
pub fn remove_existing(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(cache: &PackageCache, content: &[u8]) -> (TempDir, PathBuf) {
        let staging = cache.staging_dir().unwrap();
        let pkg = staging.path().join("pkg");
        fs::create_dir_all(&pkg).unwrap();
        fs::write(pkg.join("plugin"), content).unwrap();
        (staging, pkg)
    }

    fn record(origin: &str) -> CacheRecord {
        CacheRecord {
            object: String::new(),
            hashes: BTreeSet::new(),
            sibling_hashes: BTreeSet::new(),
            protocols: vec!["5.0".into()],
            origin: origin.into(),
            signing: None,
        }
    }

    #[test]
    fn store_lookup_and_link() {
        let root = tempfile::tempdir().unwrap();
        let cache = PackageCache::new(root.path());
        let p = ProviderIdentity::parse("acme/widgets").unwrap();
        let v = Version::new(2, 7, 0);
        let platform = Platform::new("linux", "amd64");

        assert!(cache.lookup(&p, &v, &platform).is_none());

        let (_staging, pkg) = stage(&cache, b"binary");
        let stored = cache
            .store(&p, &v, &platform, &pkg, record("registry.pinion.dev"))
            .unwrap();
        assert!(stored.record.directory_hash().is_some());

        let found = cache.lookup(&p, &v, &platform).unwrap();
        assert_eq!(found, stored);

        let work = tempfile::tempdir().unwrap();
        let target = work.path().join("providers/widgets");
        PackageCache::link_into(&found, &target).unwrap();
        assert_eq!(fs::read(target.join("plugin")).unwrap(), b"binary");

        // Re-linking replaces the previous link.
        PackageCache::link_into(&found, &target).unwrap();
        assert_eq!(fs::read(target.join("plugin")).unwrap(), b"binary");
    }

    #[test]
    fn identical_content_is_stored_once() {
        let root = tempfile::tempdir().unwrap();
        let cache = PackageCache::new(root.path());
        let p = ProviderIdentity::parse("acme/widgets").unwrap();
        let v = Version::new(2, 7, 0);
        let platform = Platform::new("linux", "amd64");

        let (_a, first) = stage(&cache, b"same");
        let (_b, second) = stage(&cache, b"same");
        let one = cache.store(&p, &v, &platform, &first, record("a")).unwrap();
        let two = cache.store(&p, &v, &platform, &second, record("a")).unwrap();

        assert_eq!(one.dir, two.dir);
        let objects = fs::read_dir(root.path().join("objects")).unwrap().count();
        assert_eq!(objects, 1);
    }
}
