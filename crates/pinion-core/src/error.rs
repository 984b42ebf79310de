//! Error types for the provider engine.
//!
//! Global failures (unreadable configuration, unreadable lock file) abort a
//! run before any provider is touched and are reported as [`InitError`].
//! Everything that can go wrong for one provider is an [`InstallError`]; those
//! are collected per provider so a single run reports every problem.

use std::path::PathBuf;

use pinion_schema::{Platform, ProviderIdentity, SchemaError, Version};
use thiserror::Error;

/// Errors reading or writing the lock file.
#[derive(Error, Debug)]
pub enum LockFileError {
    #[error("IO error on lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse lock file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize lock file: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Lock file {path} uses format version {found}, this build reads version {expected}")]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    #[error("Lock file {path} lists provider {provider} more than once")]
    DuplicateProvider {
        path: PathBuf,
        provider: ProviderIdentity,
    },
}

/// Errors loading CLI settings.
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Errors collecting requirements from the configuration tree and state.
#[derive(Error, Debug)]
pub enum CollectError {
    #[error(
        "This configuration or its associated state refers to the unqualified provider(s) {}. \
         Use a namespaced source address such as \"acme/{}\" instead.",
        .providers.join(", "),
        .providers.first().map_or("", String::as_str)
    )]
    LegacyAddresses { providers: Vec<String> },

    #[error("Module {module}: {source}")]
    InvalidRequirement {
        module: String,
        #[source]
        source: SchemaError,
    },

    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

/// Failures reported by a [`PackageSource`](crate::source::PackageSource).
///
/// This is a closed set: callers match on it exhaustively to pick the
/// remediation hint, never on message text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("provider {provider} is not known to any of the searched locations")]
    ProviderNotFound {
        provider: ProviderIdentity,
        searched: Vec<String>,
    },

    #[error("provider registry {hostname} does not have a provider named {provider}")]
    RegistryProviderUnknown {
        provider: ProviderIdentity,
        hostname: String,
    },

    #[error("host {hostname} does not offer a provider registry")]
    HostNoProviders {
        hostname: String,
        has_other_version: bool,
    },

    #[error("could not connect to {hostname}: {reason}")]
    RegistryUnreachable { hostname: String, reason: String },

    #[error("{provider} v{version} has no package for {platform}")]
    PlatformNotSupported {
        provider: ProviderIdentity,
        version: Version,
        platform: Platform,
        mirror: Option<String>,
    },

    #[error("{location} returned an invalid response: {reason}")]
    InvalidResponse { location: String, reason: String },

    #[error("checksum verification failed: {0}")]
    Checksum(String),

    #[error("signature verification failed: {0}")]
    Signature(String),

    #[error("{0}")]
    Io(String),

    #[error("the request was canceled")]
    Canceled,
}

impl From<std::io::Error> for SourceError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Broad class of an [`InstallError`], used for reporting and exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Bad addresses or unsatisfiable constraints; fix the configuration.
    Configuration,
    /// The package source could not answer.
    Source,
    /// Protocol or platform mismatch.
    Compatibility,
    /// Hash or signature verification failed.
    Integrity,
    /// The run was interrupted.
    Cancellation,
    /// Local filesystem or unexpected failures.
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Configuration => "configuration",
            Self::Source => "source",
            Self::Compatibility => "compatibility",
            Self::Integrity => "integrity",
            Self::Cancellation => "cancellation",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Why one provider failed to install.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstallError {
    #[error("{provider} is not a provider built in to pinion")]
    BuiltInUnknown { provider: ProviderIdentity },

    #[error("built-in provider {provider} is v{available}, which does not match {constraints}")]
    BuiltInConstraint {
        provider: ProviderIdentity,
        available: Version,
        constraints: String,
    },

    #[error("no available version of {provider} matches the given constraints ({constraints})")]
    NoMatchingVersion {
        provider: ProviderIdentity,
        constraints: String,
        newest_available: Option<Version>,
    },

    #[error("could not retrieve the list of available versions for {provider}: {source}")]
    Query {
        provider: ProviderIdentity,
        source: SourceError,
        suggestion: Option<ProviderIdentity>,
    },

    #[error("no compatible versions of provider {provider} were found")]
    NoCompatibleVersion { provider: ProviderIdentity },

    #[error("{provider} v{version} is not compatible with this version of pinion; v{suggested} or earlier is required")]
    ProtocolTooNew {
        provider: ProviderIdentity,
        version: Version,
        suggested: Version,
        constraints: String,
    },

    #[error("{provider} v{version} is not compatible with this version of pinion; v{suggested} is the latest compatible version")]
    ProtocolTooOld {
        provider: ProviderIdentity,
        version: Version,
        suggested: Version,
        constraints: String,
    },

    #[error("{provider} v{version} does not have a package available for {platform}")]
    PlatformNotSupported {
        provider: ProviderIdentity,
        version: Version,
        platform: Platform,
        mirror: Option<String>,
    },

    #[error("error while importing {provider} v{version} from the shared cache directory: {reason}")]
    CacheLink {
        provider: ProviderIdentity,
        version: Version,
        reason: String,
    },

    #[error("error while installing {provider} v{version}: {source}")]
    Fetch {
        provider: ProviderIdentity,
        version: Version,
        source: SourceError,
    },

    #[error("validating {provider} v{version} failed: {reason}")]
    HashMismatch {
        provider: ProviderIdentity,
        version: Version,
        reason: String,
    },

    #[error("installation of {provider} was canceled")]
    Canceled { provider: ProviderIdentity },

    #[error("{provider}: {reason}")]
    Internal {
        provider: ProviderIdentity,
        reason: String,
    },
}

impl InstallError {
    /// The provider this error belongs to.
    pub fn provider(&self) -> &ProviderIdentity {
        match self {
            Self::BuiltInUnknown { provider }
            | Self::BuiltInConstraint { provider, .. }
            | Self::NoMatchingVersion { provider, .. }
            | Self::Query { provider, .. }
            | Self::NoCompatibleVersion { provider }
            | Self::ProtocolTooNew { provider, .. }
            | Self::ProtocolTooOld { provider, .. }
            | Self::PlatformNotSupported { provider, .. }
            | Self::CacheLink { provider, .. }
            | Self::Fetch { provider, .. }
            | Self::HashMismatch { provider, .. }
            | Self::Canceled { provider }
            | Self::Internal { provider, .. } => provider,
        }
    }

    /// Broad category for reporting.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::BuiltInUnknown { .. }
            | Self::BuiltInConstraint { .. }
            | Self::NoMatchingVersion { .. } => ErrorCategory::Configuration,
            Self::Query { source, .. } | Self::Fetch { source, .. } => match source {
                SourceError::Canceled => ErrorCategory::Cancellation,
                SourceError::Checksum(_) | SourceError::Signature(_) => ErrorCategory::Integrity,
                SourceError::PlatformNotSupported { .. } => ErrorCategory::Compatibility,
                SourceError::Io(_) => ErrorCategory::Internal,
                SourceError::ProviderNotFound { .. }
                | SourceError::RegistryProviderUnknown { .. }
                | SourceError::HostNoProviders { .. }
                | SourceError::RegistryUnreachable { .. }
                | SourceError::InvalidResponse { .. } => ErrorCategory::Source,
            },
            Self::NoCompatibleVersion { .. }
            | Self::ProtocolTooNew { .. }
            | Self::ProtocolTooOld { .. }
            | Self::PlatformNotSupported { .. } => ErrorCategory::Compatibility,
            Self::HashMismatch { .. } => ErrorCategory::Integrity,
            Self::Canceled { .. } => ErrorCategory::Cancellation,
            Self::CacheLink { .. } | Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Short user-facing heading for the diagnostic.
    pub fn summary(&self) -> &'static str {
        match self {
            Self::BuiltInUnknown { .. } | Self::BuiltInConstraint { .. } => {
                "Invalid dependency on built-in provider"
            }
            Self::NoMatchingVersion { .. } => "Unsatisfiable provider version constraints",
            Self::Query {
                source: SourceError::HostNoProviders { .. },
                ..
            } => "Invalid provider registry host",
            Self::Query { .. } => "Failed to query available provider packages",
            Self::NoCompatibleVersion { .. }
            | Self::ProtocolTooNew { .. }
            | Self::ProtocolTooOld { .. }
            | Self::PlatformNotSupported { .. } => "Incompatible provider version",
            Self::CacheLink { .. } => "Failed to install provider from shared cache",
            Self::Fetch { .. } | Self::Internal { .. } => "Failed to install provider",
            Self::HashMismatch { .. } => "Failed to validate installed provider",
            Self::Canceled { .. } => "Provider installation canceled",
        }
    }

    /// Remediation advice, when there is something specific to suggest.
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::BuiltInUnknown { .. } => Some(
                "Built-in providers live in the \"builtin\" namespace; check the spelling of the provider type."
                    .to_string(),
            ),
            Self::BuiltInConstraint { available, .. } => Some(format!(
                "Built-in providers always have the version of the running tool (v{available}). Remove the version constraint."
            )),
            Self::NoMatchingVersion {
                newest_available, ..
            } => Some(match newest_available {
                Some(v) => format!(
                    "The newest available version is v{v}. Adjust the constraints in the modules listed above so that they overlap."
                ),
                None => "The source offers no release versions of this provider.".to_string(),
            }),
            Self::Query {
                provider,
                source,
                suggestion,
            } => query_hint(provider, source, suggestion.as_ref()),
            Self::NoCompatibleVersion { .. } => Some(
                "Consult the documentation for this provider for more information on compatibility between provider and pinion versions."
                    .to_string(),
            ),
            Self::ProtocolTooNew {
                suggested,
                constraints,
                ..
            } => Some(format!(
                "You need to downgrade to v{suggested} or earlier. Select it with the following constraint:\n    version = \"= {suggested}\"\n\n\
                 pinion checked all of the plugin versions matching the given constraint:\n    {constraints}\n\n\
                 Alternatively, upgrade to the latest version of pinion for compatibility with newer provider releases."
            )),
            Self::ProtocolTooOld {
                suggested,
                constraints,
                ..
            } => Some(format!(
                "Provider version {suggested} is the latest compatible version. Select it with the following version constraint:\n    version = \"= {suggested}\"\n\n\
                 pinion checked all of the plugin versions matching the given constraint:\n    {constraints}"
            )),
            Self::PlatformNotSupported {
                provider, mirror, ..
            } => Some(match mirror {
                Some(mirror) => format!(
                    "Your chosen provider mirror at {mirror} might have only a subset of the packages available in the origin registry, at {}.",
                    provider.hostname()
                ),
                None => "Provider releases are separate from pinion releases, so not all providers are available for all platforms. Other versions of this provider may support your platform.".to_string(),
            }),
            Self::CacheLink { .. } => Some(
                "Check the permissions of the shared cache directory, or remove the damaged entry so it is downloaded again."
                    .to_string(),
            ),
            Self::HashMismatch { .. } => Some(
                "The package does not match the checksums recorded in the lock file or published by its source. \
                 If you intended to change provider packages, run \"pinion init --upgrade\"."
                    .to_string(),
            ),
            Self::Fetch { source, .. } => match source {
                SourceError::Checksum(_) | SourceError::Signature(_) => Some(
                    "The package could not be authenticated and was not installed.".to_string(),
                ),
                _ => None,
            },
            Self::Canceled { .. } | Self::Internal { .. } => None,
        }
    }
}

fn query_hint(
    provider: &ProviderIdentity,
    source: &SourceError,
    suggestion: Option<&ProviderIdentity>,
) -> Option<String> {
    match source {
        SourceError::HostNoProviders {
            hostname,
            has_other_version,
        } => Some(if hostname == "github.com" && !has_other_version {
            format!(
                "The given source address {provider} specifies a GitHub repository rather than a pinion provider. \
                 Refer to the documentation of the provider to find the correct source address to use."
            )
        } else if *has_other_version {
            format!(
                "The host {hostname} offers a provider registry that is not compatible with this version of pinion, \
                 but it may be compatible with a different version."
            )
        } else {
            format!("The host {hostname} given in provider source address {provider} does not offer a provider registry.")
        }),
        SourceError::ProviderNotFound { searched, .. } => {
            let mut lines = vec!["Searched locations:".to_string()];
            lines.extend(searched.iter().map(|s| format!("  - {s}")));
            if let Some(alt) = suggestion {
                lines.push(String::new());
                lines.push(format!("Did you intend to use {}?", alt.for_display()));
            }
            Some(lines.join("\n"))
        }
        SourceError::RegistryProviderUnknown { .. } => suggestion.map(|alt| {
            format!(
                "Did you intend to use {}? If so, you must specify that source address in each module which requires that provider. \
                 To see which modules are currently depending on {}, run the following command:\n    pinion providers",
                alt.for_display(),
                provider.for_display()
            )
        }),
        SourceError::RegistryUnreachable { .. } => Some(
            "Check your network connection and any proxy settings, then try again.".to_string(),
        ),
        _ => None,
    }
}

/// Failures that abort `init` before or after per-provider work.
#[derive(Error, Debug)]
pub enum InitError {
    #[error(transparent)]
    Collect(#[from] CollectError),

    #[error(transparent)]
    LockFile(#[from] LockFileError),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("Failed to prepare directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
