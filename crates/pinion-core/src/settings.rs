//! CLI-level settings.
//!
//! Precedence, lowest first: built-in defaults, the settings file
//! (`$PINION_HOME/config.toml`, or `PINION_CONFIG`), environment variables,
//! then whatever the caller applies from command-line flags.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::SettingsError;
use crate::paths;

/// Lower and upper bound for concurrent provider pipelines.
pub const CONCURRENCY_RANGE: (usize, usize) = (1, 16);

/// Engine settings shared by every command.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Shared package cache; `None` disables the shared cache.
    pub plugin_cache_dir: Option<PathBuf>,
    /// Lock file override (exact file or containing directory).
    pub lock_file: Option<PathBuf>,
    /// Maximum number of providers processed at once.
    pub max_concurrency: usize,
    /// Registry hostname to base URL, for private or test registries.
    pub registry_hosts: BTreeMap<String, String>,
    /// Base64 Ed25519 public keys treated as first-party in addition to the
    /// built-in one.
    pub first_party_keys: Vec<String>,
    /// Timeout for each registry HTTP request.
    pub http_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            plugin_cache_dir: paths::default_plugin_cache_dir(),
            lock_file: None,
            max_concurrency: 4,
            registry_hosts: BTreeMap::new(),
            first_party_keys: Vec::new(),
            http_timeout_secs: 30,
        }
    }
}

impl Settings {
    /// Load defaults, then the settings file, then the process environment.
    pub fn load() -> Result<Self, SettingsError> {
        let path = std::env::var_os("PINION_CONFIG")
            .map(PathBuf::from)
            .or_else(paths::default_settings_path);

        let mut settings = match path {
            Some(p) if p.exists() => Self::from_file(&p)?,
            _ => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Parse a settings file, filling unspecified fields with defaults.
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay environment variables read through `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), SettingsError> {
        if let Some(dir) = lookup("PINION_PLUGIN_CACHE_DIR") {
            tracing::debug!("Plugin cache overridden by PINION_PLUGIN_CACHE_DIR: {dir}");
            self.plugin_cache_dir = if dir.is_empty() {
                None
            } else {
                Some(PathBuf::from(dir))
            };
        }
        if let Some(lock) = lookup("PINION_LOCK_FILE").filter(|s| !s.is_empty()) {
            tracing::debug!("Lock file overridden by PINION_LOCK_FILE: {lock}");
            self.lock_file = Some(PathBuf::from(lock));
        }
        if let Some(value) = lookup("PINION_MAX_CONCURRENCY") {
            self.max_concurrency = value.parse().map_err(|_| SettingsError::InvalidEnv {
                var: "PINION_MAX_CONCURRENCY",
                value,
            })?;
        }
        Ok(())
    }

    /// Worker limit, clamped to [`CONCURRENCY_RANGE`].
    pub fn concurrency(&self) -> usize {
        self.max_concurrency
            .clamp(CONCURRENCY_RANGE.0, CONCURRENCY_RANGE.1)
    }

    /// Base URL for a registry host, honouring `registry_hosts`.
    pub fn registry_base_url(&self, hostname: &str) -> String {
        self.registry_hosts
            .get(hostname)
            .cloned()
            .unwrap_or_else(|| format!("https://{hostname}"))
    }
}
