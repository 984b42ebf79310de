//! Several sources combined in priority order.

use std::sync::Arc;

use futures::future::join_all;
use pinion_schema::ProviderIdentity;

use super::{AvailableVersion, PackageSource};
use crate::error::SourceError;

/// One version offered by one member of a [`SourceSet`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub available: AvailableVersion,
    /// Index of the offering source within the set.
    pub source: usize,
    /// Origin string that source records for the provider.
    pub origin: String,
}

/// Package sources consulted together, earlier sources taking priority.
#[derive(Debug, Clone, Default)]
pub struct SourceSet {
    sources: Vec<Arc<dyn PackageSource>>,
}

impl SourceSet {
    pub fn new(sources: Vec<Arc<dyn PackageSource>>) -> Self {
        Self { sources }
    }

    /// The source at `idx`.
    pub fn get(&self, idx: usize) -> Option<&Arc<dyn PackageSource>> {
        self.sources.get(idx)
    }

    /// Index of the only source recording `origin` for `provider`.
    ///
    /// `None` when no source or several sources record it; the caller then
    /// has to query to find which one offers the version.
    pub fn index_for_origin(&self, provider: &ProviderIdentity, origin: &str) -> Option<usize> {
        let mut matching = self
            .sources
            .iter()
            .enumerate()
            .filter(|(_, s)| s.origin(provider) == origin)
            .map(|(idx, _)| idx);
        match (matching.next(), matching.next()) {
            (Some(idx), None) => Some(idx),
            _ => None,
        }
    }

    /// Ask every source for versions of `provider`.
    ///
    /// Sources that do not know the provider are skipped. Any other failure
    /// fails the whole query. When no source knows the provider the registry's
    /// answer is preferred; otherwise every searched location is listed.
    pub async fn query(
        &self,
        provider: &ProviderIdentity,
    ) -> Result<(Vec<Candidate>, Vec<String>), SourceError> {
        let answers = join_all(self.sources.iter().map(|s| s.query_versions(provider))).await;

        let mut candidates = Vec::new();
        let mut warnings = Vec::new();
        let mut searched = Vec::new();
        let mut registry_unknown = None;

        for (idx, answer) in answers.into_iter().enumerate() {
            match answer {
                Ok(list) => {
                    let origin = self.sources[idx].origin(provider);
                    warnings.extend(list.warnings);
                    candidates.extend(list.versions.into_iter().map(|available| Candidate {
                        available,
                        source: idx,
                        origin: origin.clone(),
                    }));
                }
                Err(SourceError::ProviderNotFound { searched: dirs, .. }) => searched.extend(dirs),
                Err(e @ SourceError::RegistryProviderUnknown { .. }) => {
                    registry_unknown.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }

        if candidates.is_empty() {
            if let Some(e) = registry_unknown {
                return Err(e);
            }
            return Err(SourceError::ProviderNotFound {
                provider: provider.clone(),
                searched,
            });
        }
        Ok((candidates, warnings))
    }

    /// First alternative address any source suggests.
    pub async fn suggest_alternative(&self, provider: &ProviderIdentity) -> Option<ProviderIdentity> {
        for source in &self.sources {
            if let Some(alt) = source.suggest_alternative(provider).await {
                return Some(alt);
            }
        }
        None
    }
}
