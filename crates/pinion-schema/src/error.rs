use thiserror::Error;

/// Errors raised while parsing schema values from user or wire input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// A provider source address is malformed.
    #[error("Invalid provider address '{address}': {reason}")]
    InvalidAddress {
        /// The address as written.
        address: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A version string is not a valid (possibly partial) semantic version.
    #[error("Invalid version '{0}'")]
    InvalidVersion(String),

    /// A version constraint clause could not be parsed.
    #[error("Invalid version constraint '{constraint}': {reason}")]
    InvalidConstraint {
        /// The constraint string as written.
        constraint: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A package hash is missing its scheme prefix or has a malformed body.
    #[error("Invalid package hash '{0}'")]
    InvalidHash(String),

    /// A platform string is not of the form `os_arch`.
    #[error("Invalid platform '{0}': expected os_arch")]
    InvalidPlatform(String),
}
