//! Provider source addresses.
//!
//! A provider is addressed as `[hostname/]namespace/type`. The hostname
//! defaults to [`DEFAULT_REGISTRY_HOST`]. A single bare `type` segment is the
//! legacy unqualified form, which still parses so that callers can report it,
//! but can never be resolved.

use serde::{Deserialize, Serialize};

use crate::SchemaError;

/// Hostname assumed when an address omits it.
pub const DEFAULT_REGISTRY_HOST: &str = "registry.pinion.dev";

/// Namespace reserved for providers bundled with the tool itself.
pub const BUILTIN_NAMESPACE: &str = "builtin";

/// Namespace placeholder used for legacy unqualified addresses.
pub const LEGACY_NAMESPACE: &str = "-";

/// A globally unique provider address (hostname + namespace + type).
///
/// Ordering is lexicographic by hostname, then namespace, then type, which is
/// the order lock files are written in.
///
/// # Example
///
/// ```
/// use pinion_schema::ProviderIdentity;
///
/// let p = ProviderIdentity::parse("acme/widgets").unwrap();
/// assert_eq!(p.hostname(), "registry.pinion.dev");
/// assert_eq!(p.to_string(), "registry.pinion.dev/acme/widgets");
/// assert_eq!(p.for_display(), "acme/widgets");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProviderIdentity {
    hostname: String,
    namespace: String,
    type_name: String,
}

impl ProviderIdentity {
    /// Build an identity from already-validated parts, normalizing case.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidAddress`] if any part is empty or the
    /// type contains characters other than `[a-z0-9-]`.
    pub fn new(hostname: &str, namespace: &str, type_name: &str) -> Result<Self, SchemaError> {
        let address = format!("{hostname}/{namespace}/{type_name}");
        let invalid = |reason: &str| SchemaError::InvalidAddress {
            address: address.clone(),
            reason: reason.to_string(),
        };

        if hostname.is_empty() || namespace.is_empty() || type_name.is_empty() {
            return Err(invalid("address segments must not be empty"));
        }
        if !type_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(invalid("provider type may contain only letters, digits and dashes"));
        }
        if namespace != LEGACY_NAMESPACE
            && !namespace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(invalid("namespace may contain only letters, digits, dashes and underscores"));
        }

        Ok(Self {
            hostname: hostname.to_lowercase(),
            namespace: namespace.to_lowercase(),
            type_name: type_name.to_lowercase(),
        })
    }

    /// Parse a source address in any of its accepted forms.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::InvalidAddress`] for more than three segments or
    /// malformed segments.
    pub fn parse(address: &str) -> Result<Self, SchemaError> {
        let parts: Vec<&str> = address.trim().split('/').collect();
        match parts.as_slice() {
            [type_name] => Self::new(DEFAULT_REGISTRY_HOST, LEGACY_NAMESPACE, type_name),
            [namespace, type_name] => Self::new(DEFAULT_REGISTRY_HOST, namespace, type_name),
            [hostname, namespace, type_name] => Self::new(hostname, namespace, type_name),
            _ => Err(SchemaError::InvalidAddress {
                address: address.to_string(),
                reason: "expected [hostname/]namespace/type".to_string(),
            }),
        }
    }

    /// Identity of a provider bundled with the tool.
    pub fn builtin(type_name: &str) -> Result<Self, SchemaError> {
        Self::new(DEFAULT_REGISTRY_HOST, BUILTIN_NAMESPACE, type_name)
    }

    /// The registry hostname.
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// The namespace (organisation) segment.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The provider type segment.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// True for the legacy unqualified form (`aws` rather than `acme/aws`).
    pub fn is_legacy(&self) -> bool {
        self.namespace == LEGACY_NAMESPACE
    }

    /// True for providers bundled with the tool.
    pub fn is_builtin(&self) -> bool {
        self.hostname == DEFAULT_REGISTRY_HOST && self.namespace == BUILTIN_NAMESPACE
    }

    /// True when the address uses the default registry host.
    pub fn is_default_host(&self) -> bool {
        self.hostname == DEFAULT_REGISTRY_HOST
    }

    /// Short form for user-facing messages; omits the default hostname.
    pub fn for_display(&self) -> String {
        if self.is_default_host() {
            format!("{}/{}", self.namespace, self.type_name)
        } else {
            self.to_string()
        }
    }

    /// The same provider type under a different namespace on the same host.
    ///
    /// # Errors
    ///
    /// Returns an error if `namespace` is not a valid namespace segment.
    pub fn with_namespace(&self, namespace: &str) -> Result<Self, SchemaError> {
        Self::new(&self.hostname, namespace, &self.type_name)
    }
}

impl std::fmt::Display for ProviderIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.hostname, self.namespace, self.type_name)
    }
}

impl std::str::FromStr for ProviderIdentity {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ProviderIdentity {
    type Error = SchemaError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<ProviderIdentity> for String {
    fn from(p: ProviderIdentity) -> Self {
        p.to_string()
    }
}
