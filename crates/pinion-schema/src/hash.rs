//! Package content hashes.
//!
//! Two schemes are recorded in lock files:
//!
//! - `zh:` is the hex SHA-256 of a packed `.zip` archive, as published in a
//!   registry's checksum document. It can only be checked against an archive.
//! - `h1:` is the base64 SHA-256 of a directory summary: one line per file,
//!   `"<hex sha256>  <relative/path>\n"`, sorted by path. It can be checked
//!   against an unpacked package without the original archive.

use std::io::Read;
use std::path::Path;

use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::SchemaError;

/// Hashing scheme of a [`PackageHash`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HashScheme {
    /// Directory summary hash (`h1:`).
    Directory,
    /// Zip archive hash (`zh:`).
    Archive,
}

impl HashScheme {
    /// The prefix written before the hash body.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Directory => "h1:",
            Self::Archive => "zh:",
        }
    }
}

/// A scheme-prefixed package hash, e.g. `zh:1f3a...`.
///
/// Ordering is by the full string form so that hash lists in lock files are
/// stable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageHash(String);

impl PackageHash {
    /// Parse a prefixed hash string.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidHash`] for an unknown prefix or a body
    /// that is not valid for its scheme.
    pub fn parse(s: &str) -> Result<Self, SchemaError> {
        let invalid = || SchemaError::InvalidHash(s.to_string());
        if let Some(body) = s.strip_prefix(HashScheme::Archive.prefix()) {
            if body.len() != 64 || !body.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            return Ok(Self(format!("zh:{}", body.to_lowercase())));
        }
        if let Some(body) = s.strip_prefix(HashScheme::Directory.prefix()) {
            base64::engine::general_purpose::STANDARD
                .decode(body)
                .map_err(|_| invalid())?;
            return Ok(Self(s.to_string()));
        }
        Err(invalid())
    }

    /// An archive hash from a hex SHA-256 digest (as found in checksum files).
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidHash`] if `hex` is not 64 hex characters.
    pub fn archive_from_hex(hex: &str) -> Result<Self, SchemaError> {
        Self::parse(&format!("zh:{hex}"))
    }

    /// Hash a packed archive on disk.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read.
    pub fn of_archive(path: &Path) -> std::io::Result<Self> {
        Ok(Self(format!("zh:{}", sha256_file(path)?)))
    }

    /// Hash an unpacked package directory.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the tree cannot be walked or a file read.
    pub fn of_directory(dir: &Path) -> std::io::Result<Self> {
        let mut lines = Vec::new();
        for entry in WalkDir::new(dir).follow_links(true) {
            let entry = entry.map_err(std::io::Error::other)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(dir)
                .map_err(std::io::Error::other)?;
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            lines.push(format!("{}  {rel}\n", sha256_file(entry.path())?));
        }
        // Sort by path, not by digest.
        lines.sort_by(|a, b| a[66..].cmp(&b[66..]));

        let mut hasher = Sha256::new();
        for line in &lines {
            hasher.update(line.as_bytes());
        }
        let digest = base64::engine::general_purpose::STANDARD.encode(hasher.finalize());
        Ok(Self(format!("h1:{digest}")))
    }

    /// The hashing scheme.
    pub fn scheme(&self) -> HashScheme {
        if self.0.starts_with("zh:") {
            HashScheme::Archive
        } else {
            HashScheme::Directory
        }
    }

    /// The full prefixed string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Hex SHA-256 of a file, streamed.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be read.
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

impl std::fmt::Display for PackageHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for PackageHash {
    type Error = SchemaError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<PackageHash> for String {
    fn from(h: PackageHash) -> Self {
        h.0
    }
}
