//! Package sources.
//!
//! A [`PackageSource`] answers two questions for a provider: which versions
//! exist (with their protocols and platforms), and where the package for one
//! version/platform lives. It also knows how to fetch and authenticate that
//! package into a local directory.
//!
//! Implementations:
//! - [`RegistrySource`]: the HTTP provider registry protocol.
//! - [`DirectorySource`]: a local mirror directory, packed or unpacked.
//!
//! [`SourceSet`] combines several sources in priority order.

mod directory;
mod multi;
mod registry;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pinion_schema::{PackageHash, Platform, ProviderIdentity, SigningInfo, SigningTrust, Version};
use tokio_util::sync::CancellationToken;

pub use directory::DirectorySource;
pub use multi::{Candidate, SourceSet};
pub use registry::RegistrySource;

use crate::error::SourceError;

/// One version offered by a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableVersion {
    /// The version.
    pub version: Version,
    /// Plugin protocol versions the package speaks (e.g. `"5.0"`); empty when
    /// the source does not say.
    pub protocols: Vec<String>,
    /// Platforms with a package; empty when the source does not say.
    pub platforms: Vec<Platform>,
}

/// Result of [`PackageSource::query_versions`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionList {
    /// Every version offered, in no particular order.
    pub versions: Vec<AvailableVersion>,
    /// Free-text warnings the source attached to the answer.
    pub warnings: Vec<String>,
}

/// Where a package's bytes can be obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageLocation {
    /// A `.zip` archive behind an HTTP(S) URL.
    Http(String),
    /// A `.zip` archive on the local filesystem.
    Archive(PathBuf),
    /// An already unpacked package directory.
    Directory(PathBuf),
}

impl std::fmt::Display for PackageLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http(url) => write!(f, "{url}"),
            Self::Archive(p) | Self::Directory(p) => write!(f, "{}", p.display()),
        }
    }
}

/// A public key a registry says may have signed a checksum document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    /// Identifier recorded in lock files.
    pub key_id: String,
    /// Base64 Ed25519 public key.
    pub public_key: String,
}

/// Where to find the signed checksum document for a registry package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedChecksums {
    /// URL of the `"<hex>  <filename>"` document.
    pub shasums_url: String,
    /// URL of the base64 detached signature over that document.
    pub signature_url: String,
    /// Candidate signing keys.
    pub keys: Vec<PublicKey>,
}

/// Everything needed to fetch one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageMeta {
    pub provider: ProviderIdentity,
    pub version: Version,
    pub platform: Platform,
    /// Archive file name, used to look the package up in checksum documents.
    pub filename: String,
    pub location: PackageLocation,
    /// Protocols the package declares; empty when unknown.
    pub protocols: Vec<String>,
    /// Expected hex SHA-256 of the archive, when the source publishes one.
    pub sha256: Option<String>,
    pub checksums: Option<SignedChecksums>,
}

/// How a fetched package was authenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    /// Nothing was checked beyond the lock file's own hashes.
    Unauthenticated,
    /// The archive matched a checksum the source published.
    Checksum,
    /// The archive matched a checksum document with a valid signature.
    Signed(SigningInfo),
}

impl Authentication {
    /// Signing metadata, when signed.
    pub fn signing(&self) -> Option<&SigningInfo> {
        match self {
            Self::Signed(info) => Some(info),
            Self::Unauthenticated | Self::Checksum => None,
        }
    }

    /// True when signed by a key other than a first-party one.
    pub fn third_party_signed(&self) -> bool {
        matches!(self, Self::Signed(info) if info.trust == SigningTrust::ThirdParty)
    }
}

impl std::fmt::Display for Authentication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unauthenticated => write!(f, "unauthenticated"),
            Self::Checksum => write!(f, "verified checksum"),
            Self::Signed(info) => write!(f, "{}", info.trust),
        }
    }
}

/// A package unpacked into a local directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPackage {
    /// Directory holding the unpacked package.
    pub dir: PathBuf,
    pub authentication: Authentication,
    /// Hashes of the package actually fetched: its directory hash plus the
    /// archive hash when it came from an archive. Lock verification checks
    /// only these.
    pub hashes: BTreeSet<PackageHash>,
    /// Archive hashes for the same version on other platforms, taken from a
    /// signed checksum list. Recorded in the lock only once `hashes` passed.
    pub sibling_hashes: BTreeSet<PackageHash>,
}

/// Where provider packages come from.
#[async_trait]
pub trait PackageSource: Send + Sync + std::fmt::Debug {
    /// Human-readable description, used in "searched locations" lists.
    fn describe(&self) -> String;

    /// Origin recorded in lock entries for packages from this source.
    fn origin(&self, provider: &ProviderIdentity) -> String;

    /// List the versions available for `provider`.
    async fn query_versions(&self, provider: &ProviderIdentity)
    -> Result<VersionList, SourceError>;

    /// Locate the package for one version and platform.
    async fn package_meta(
        &self,
        provider: &ProviderIdentity,
        version: &Version,
        platform: &Platform,
    ) -> Result<PackageMeta, SourceError>;

    /// Fetch, authenticate and unpack the package into `dest`.
    ///
    /// `dest` must not exist yet; on error it may be left partially
    /// populated and the caller discards it.
    async fn fetch(
        &self,
        meta: &PackageMeta,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<FetchedPackage, SourceError>;

    /// A similarly named provider the user may have meant.
    async fn suggest_alternative(&self, _provider: &ProviderIdentity) -> Option<ProviderIdentity> {
        None
    }
}

/// Whether a package declaring `protocols` can be used by this build.
///
/// Packages that declare nothing are assumed compatible.
pub fn protocols_compatible(protocols: &[String]) -> bool {
    protocols.is_empty()
        || protocols.iter().any(|p| {
            p.split('.')
                .next()
                .and_then(|major| major.parse::<u64>().ok())
                .is_some_and(|major| pinion_schema::SUPPORTED_PROTOCOLS.contains(&major))
        })
}
