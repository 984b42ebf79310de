//! Target platforms.

use serde::{Deserialize, Serialize};

use crate::SchemaError;

/// An operating system / CPU architecture pair a provider package targets.
///
/// Rendered as `os_arch` (for example `linux_amd64`), which is the form used
/// in package file names, mirror directory names and registry URLs.
///
/// # Example
///
/// ```
/// use pinion_schema::Platform;
///
/// let p: Platform = "darwin_arm64".parse().unwrap();
/// assert_eq!(p.os(), "darwin");
/// assert_eq!(p.arch(), "arm64");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Platform {
    os: String,
    arch: String,
}

impl Platform {
    /// Build a platform from its parts.
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into().to_lowercase(),
            arch: arch.into().to_lowercase(),
        }
    }

    /// The platform this binary is running on, using Go-style names.
    pub fn current() -> Self {
        let os = match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "x86" => "386",
            other => other,
        };
        Self::new(os, arch)
    }

    /// Operating system name.
    pub fn os(&self) -> &str {
        &self.os
    }

    /// Architecture name.
    pub fn arch(&self) -> &str {
        &self.arch
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.os, self.arch)
    }
}

impl std::str::FromStr for Platform {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('_') {
            Some((os, arch)) if !os.is_empty() && !arch.is_empty() && !arch.contains('_') => {
                Ok(Self::new(os, arch))
            }
            _ => Err(SchemaError::InvalidPlatform(s.to_string())),
        }
    }
}
