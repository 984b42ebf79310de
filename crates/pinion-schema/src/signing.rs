//! Signing metadata recorded with authenticated packages.

use serde::{Deserialize, Serialize};

/// How much the signer of a package is trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SigningTrust {
    /// Signed by the tool vendor's own key.
    FirstParty,
    /// Signed by the provider's developer (partner or community).
    ThirdParty,
}

impl std::fmt::Display for SigningTrust {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FirstParty => write!(f, "signed by the pinion maintainers"),
            Self::ThirdParty => write!(f, "signed by a third party"),
        }
    }
}

/// Signing-key metadata recorded alongside a lock entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SigningInfo {
    /// Identifier of the key that produced the checksum signature.
    pub key_id: String,
    /// Trust classification of that key.
    pub trust: SigningTrust,
}
