//! Shared value types for pinion.
//!
//! Everything here is a plain value: provider addresses, versions and
//! constraints, target platforms, package hashes and signing metadata. The
//! engine in `pinion-core` and the CLI both build on these.

mod error;
pub mod hash;
pub mod platform;
pub mod provider;
pub mod signing;
pub mod version;

pub use error::SchemaError;
pub use hash::{HashScheme, PackageHash};
pub use platform::Platform;
pub use provider::{
    BUILTIN_NAMESPACE, DEFAULT_REGISTRY_HOST, LEGACY_NAMESPACE, ProviderIdentity,
};
pub use signing::{SigningInfo, SigningTrust};
pub use version::{
    Operator, SourcedConstraint, Version, VersionConstraintSet, VersionConstraints,
};

/// Plugin protocol major versions this build of the tool can speak.
pub const SUPPORTED_PROTOCOLS: &[u64] = &[5, 6];
