use std::path::{Path, PathBuf};

use dirs::home_dir;
use pinion_schema::{Platform, ProviderIdentity, Version};

/// Default lock file name, relative to the root configuration directory.
pub const LOCK_FILE_NAME: &str = ".pinion.lock";

/// Per-configuration working directory.
pub const WORKING_DIR_NAME: &str = ".pinion";

/// Configuration tree file read by the CLI.
pub const CONFIG_FILE_NAME: &str = "pinion.toml";

/// Returns the pinion home directory, or None if the user's home cannot be resolved.
pub fn try_pinion_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("PINION_HOME") {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".pinion"))
}

/// Default shared plugin cache: `$PINION_HOME/plugin-cache`
pub fn default_plugin_cache_dir() -> Option<PathBuf> {
    try_pinion_home().map(|h| h.join("plugin-cache"))
}

/// Default CLI settings file: `$PINION_HOME/config.toml`
pub fn default_settings_path() -> Option<PathBuf> {
    try_pinion_home().map(|h| h.join("config.toml"))
}

/// Implicit local mirror consulted before the registry: `$PINION_HOME/plugins`
pub fn user_plugins_dir() -> Option<PathBuf> {
    try_pinion_home().map(|h| h.join("plugins"))
}

/// Where installed providers live for one configuration.
pub fn working_set_dir(root: &Path) -> PathBuf {
    root.join(WORKING_DIR_NAME).join("providers")
}

/// Directory of one installed package inside a working set or cache tree.
pub fn package_dir(
    base: &Path,
    provider: &ProviderIdentity,
    version: &Version,
    platform: &Platform,
) -> PathBuf {
    base.join(provider.hostname())
        .join(provider.namespace())
        .join(provider.type_name())
        .join(version.to_string())
        .join(platform.to_string())
}

/// Resolve the lock file path.
///
/// `override_path` may name the lock file itself or a directory that should
/// contain one; an existing directory (or a path ending in a separator) is
/// treated as the latter.
pub fn lock_file_path(root: &Path, override_path: Option<&Path>) -> PathBuf {
    match override_path {
        Some(p) if p.is_dir() || p.as_os_str().to_string_lossy().ends_with('/') => {
            p.join(LOCK_FILE_NAME)
        }
        Some(p) => p.to_path_buf(),
        None => root.join(LOCK_FILE_NAME),
    }
}
