//! Requirement collection.
//!
//! Walks every module of a configuration tree and gathers, per provider, the
//! constraints each module declared. Constraints are unioned here and only
//! intersected at resolution time, so an unsatisfiable set can still name the
//! module that contributed each bound.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use pinion_schema::{ProviderIdentity, VersionConstraintSet, VersionConstraints};
use serde::Deserialize;

use crate::error::CollectError;

/// Provider requirements for a whole configuration.
pub type Requirements = BTreeMap<ProviderIdentity, VersionConstraintSet>;

/// A provider requirement as written in one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRequirement {
    /// Source address string.
    pub source: String,
    /// Version constraint string; empty when unconstrained.
    pub version: String,
}

/// Requirements declared by one module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRequirements {
    /// Module path; empty for the root module.
    pub path: String,
    /// Requirements in declaration order.
    pub requirements: Vec<RawRequirement>,
}

/// An already-parsed configuration tree.
pub trait ConfigTree {
    /// Every module with the provider requirements it declares.
    fn modules(&self) -> Vec<ModuleRequirements>;
}

/// A prior state snapshot.
pub trait StateSnapshot {
    /// Providers referenced by resources that already exist.
    fn providers(&self) -> BTreeSet<ProviderIdentity>;
}

/// Collect requirements from configuration and, optionally, prior state.
///
/// State contributes presence only: a provider mentioned only in state gets
/// an empty constraint set. Any legacy unqualified address is fatal; all of
/// them are listed in the one error.
pub fn collect(
    config: &dyn ConfigTree,
    state: Option<&dyn StateSnapshot>,
) -> Result<Requirements, CollectError> {
    let mut reqs = Requirements::new();

    for module in config.modules() {
        for raw in module.requirements {
            let provider = ProviderIdentity::parse(&raw.source).map_err(|source| {
                CollectError::InvalidRequirement {
                    module: module.path.clone(),
                    source,
                }
            })?;
            let constraints = VersionConstraints::parse(&raw.version).map_err(|source| {
                CollectError::InvalidRequirement {
                    module: module.path.clone(),
                    source,
                }
            })?;
            reqs.entry(provider)
                .or_default()
                .push(module.path.clone(), constraints);
        }
    }

    if let Some(state) = state {
        for provider in state.providers() {
            reqs.entry(provider).or_default();
        }
    }

    let legacy: Vec<String> = reqs
        .keys()
        .filter(|p| p.is_legacy())
        .map(|p| p.type_name().to_string())
        .collect();
    if !legacy.is_empty() {
        return Err(CollectError::LegacyAddresses { providers: legacy });
    }

    tracing::debug!("Collected requirements for {} provider(s)", reqs.len());
    Ok(reqs)
}

/// `pinion.toml`: a configuration tree described as a list of modules.
///
/// ```toml
/// [[module]]
/// path = ""
///
/// [module.providers]
/// widgets = { source = "acme/widgets", version = ">= 2.0, < 3.0" }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManifestConfig {
    #[serde(default, rename = "module")]
    modules: Vec<ManifestModule>,
}

#[derive(Debug, Clone, Deserialize)]
struct ManifestModule {
    #[serde(default)]
    path: String,
    #[serde(default)]
    providers: BTreeMap<String, ManifestProvider>,
}

#[derive(Debug, Clone, Deserialize)]
struct ManifestProvider {
    source: Option<String>,
    #[serde(default)]
    version: String,
}

impl ManifestConfig {
    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self, CollectError> {
        let content = std::fs::read_to_string(path).map_err(|source| CollectError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|e| CollectError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

impl ConfigTree for ManifestConfig {
    fn modules(&self) -> Vec<ModuleRequirements> {
        self.modules
            .iter()
            .map(|m| ModuleRequirements {
                path: m.path.clone(),
                requirements: m
                    .providers
                    .iter()
                    .map(|(local_name, p)| RawRequirement {
                        // Without a source the local name is all there is,
                        // which is the legacy unqualified form.
                        source: p.source.clone().unwrap_or_else(|| local_name.clone()),
                        version: p.version.clone(),
                    })
                    .collect(),
            })
            .collect()
    }
}

/// Prior state as a JSON list of managed resources.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateFile {
    #[serde(default)]
    resources: Vec<StateResource>,
}

#[derive(Debug, Clone, Deserialize)]
struct StateResource {
    provider: ProviderIdentity,
}

impl StateFile {
    /// Read and parse a state file.
    pub fn load(path: &Path) -> Result<Self, CollectError> {
        let content = std::fs::read_to_string(path).map_err(|source| CollectError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|e| CollectError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

impl StateSnapshot for StateFile {
    fn providers(&self) -> BTreeSet<ProviderIdentity> {
        self.resources.iter().map(|r| r.provider.clone()).collect()
    }
}
