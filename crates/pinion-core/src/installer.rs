//! Provider installer.
//!
//! [`Installer::ensure_provider_versions`] runs one pipeline per required
//! provider, a bounded number at a time. Each pipeline walks the same stages:
//!
//! 1. built-in check,
//! 2. lock reuse, when the locked version still satisfies the constraints and
//!    the caller did not ask for upgrades,
//! 3. otherwise a source query and newest-matching selection, with a protocol
//!    compatibility check,
//! 4. "already installed" when the working set holds a package whose hash the
//!    lock file records,
//! 5. linking from the shared cache,
//! 6. fetching from the source, verifying against the lock file, then
//!    installing through the cache or directly into the working set.
//!
//! A failing pipeline records its [`InstallError`] and the others carry on.
//! Progress goes out as [`InstallEvent`]s; the returned [`InstallReport`]
//! carries the lock entries of every provider that succeeded.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use futures::stream;
use pinion_schema::{
    PackageHash, Platform, ProviderIdentity, Version, VersionConstraintSet,
};
use tokio_util::sync::CancellationToken;

use crate::cache::{self, CacheRecord, CachedPackage, PackageCache};
use crate::error::{InstallError, SourceError};
use crate::events::{EventSink, InstallEvent};
use crate::fetch;
use crate::locks::{LockEntry, Locks};
use crate::paths;
use crate::requirements::Requirements;
use crate::source::{Authentication, Candidate, PackageMeta, SourceSet, protocols_compatible};

/// Name of the provider that is always built in.
pub const BUILTIN_PROVIDER: &str = "pinion";

/// Whether locked selections may be replaced by newer versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMode {
    /// Keep every locked version that still satisfies the constraints.
    NewProvidersOnly,
    /// Select the newest matching version for every provider.
    Upgrade,
}

/// What happened to one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The locked version was already present in the working set.
    AlreadyInstalled(Version),
    /// Built in to the tool; nothing installed or locked.
    BuiltIn(Version),
    /// A package was installed into the working set.
    Installed {
        version: Version,
        authentication: Authentication,
        from_cache: bool,
    },
    Failed(InstallError),
}

/// Non-fatal problems reported after the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallWarning {
    /// Free-text warning from a source's version list.
    Registry {
        provider: ProviderIdentity,
        message: String,
    },
    /// The newest matching version speaks an unsupported protocol and an
    /// older one was selected.
    ProtocolDowngrade {
        provider: ProviderIdentity,
        skipped: Version,
        selected: Version,
    },
}

impl std::fmt::Display for InstallWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registry { provider, message } => {
                write!(f, "{}: {message}", provider.for_display())
            }
            Self::ProtocolDowngrade {
                provider,
                skipped,
                selected,
            } => write!(
                f,
                "{} v{skipped} is not compatible with this version of pinion; selected v{selected} instead",
                provider.for_display()
            ),
        }
    }
}

/// Result of one [`Installer::ensure_provider_versions`] call.
#[derive(Debug, Clone, Default)]
pub struct InstallReport {
    /// Lock entries for every provider that succeeded (built-ins excluded).
    pub locks: Locks,
    pub outcomes: BTreeMap<ProviderIdentity, InstallOutcome>,
    pub warnings: Vec<InstallWarning>,
    /// The run was interrupted; failures are mostly cancellations.
    pub canceled: bool,
}

impl InstallReport {
    /// True when every provider succeeded and nothing was canceled.
    pub fn is_success(&self) -> bool {
        !self.canceled && self.failures().next().is_none()
    }

    /// Failed providers in address order.
    pub fn failures(&self) -> impl Iterator<Item = &InstallError> {
        self.outcomes.values().filter_map(|outcome| match outcome {
            InstallOutcome::Failed(e) => Some(e),
            _ => None,
        })
    }

    /// Whether a package was fetched with a third-party signature.
    pub fn third_party_signed(&self) -> bool {
        self.outcomes.values().any(|outcome| {
            matches!(
                outcome,
                InstallOutcome::Installed { authentication, from_cache: false, .. }
                    if authentication.third_party_signed()
            )
        })
    }
}

struct PipelineResult {
    outcome: InstallOutcome,
    entry: Option<LockEntry>,
    warnings: Vec<InstallWarning>,
}

/// The version chosen for a provider and where it came from.
struct Selection {
    version: Version,
    /// Index into the source set, when known.
    source: Option<usize>,
    origin: String,
    /// Query results, when a query happened.
    candidates: Option<Vec<Candidate>>,
}

/// Installs providers into a working set.
#[derive(Debug)]
pub struct Installer {
    sources: SourceSet,
    working_set: PathBuf,
    cache: Option<PackageCache>,
    platform: Platform,
    builtins: BTreeMap<String, Version>,
    concurrency: usize,
    events: EventSink,
}

impl Installer {
    /// An installer pulling from `sources` into `working_set`.
    pub fn new(sources: SourceSet, working_set: impl Into<PathBuf>) -> Self {
        let mut builtins = BTreeMap::new();
        if let Ok(v) = Version::parse(env!("CARGO_PKG_VERSION")) {
            builtins.insert(BUILTIN_PROVIDER.to_string(), v);
        }
        Self {
            sources,
            working_set: working_set.into(),
            cache: None,
            platform: Platform::current(),
            builtins,
            concurrency: 4,
            events: EventSink::null(),
        }
    }

    /// Share packages through `cache`.
    #[must_use]
    pub fn with_cache(mut self, cache: Option<PackageCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Install packages for `platform` instead of the host platform.
    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Replace the built-in provider table (type name to version).
    #[must_use]
    pub fn with_builtins(mut self, builtins: BTreeMap<String, Version>) -> Self {
        self.builtins = builtins;
        self
    }

    /// Process at most `n` providers at once.
    #[must_use]
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// The working set directory.
    pub fn working_set(&self) -> &Path {
        &self.working_set
    }

    /// Bring the working set in line with `reqs`.
    ///
    /// `previous` is the lock file as loaded; it is consulted, never
    /// modified.
    pub async fn ensure_provider_versions(
        &self,
        previous: &Locks,
        reqs: &Requirements,
        mode: InstallMode,
        cancel: &CancellationToken,
    ) -> InstallReport {
        self.events.emit(InstallEvent::PendingProviders(
            reqs.iter()
                .map(|(p, c)| (p.clone(), c.to_string()))
                .collect(),
        ));

        let results: Vec<(ProviderIdentity, PipelineResult)> = stream::iter(reqs.iter())
            .map(|(provider, constraints)| async move {
                let result = self
                    .ensure_one(provider, constraints, previous, mode, cancel)
                    .await;
                (provider.clone(), result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = InstallReport::default();
        for (provider, result) in results {
            if let Some(entry) = result.entry {
                report.locks.insert(entry);
            }
            report.warnings.extend(result.warnings);
            report.outcomes.insert(provider, result.outcome);
        }
        report.canceled = cancel.is_cancelled();

        self.events.emit(InstallEvent::ProvidersFetched {
            third_party_signed: report.third_party_signed(),
        });
        report
    }

    async fn ensure_one(
        &self,
        provider: &ProviderIdentity,
        constraints: &VersionConstraintSet,
        previous: &Locks,
        mode: InstallMode,
        cancel: &CancellationToken,
    ) -> PipelineResult {
        let mut warnings = Vec::new();

        if provider.is_builtin() {
            let outcome = match self.builtin(provider, constraints) {
                Ok(version) => InstallOutcome::BuiltIn(version),
                Err(e) => InstallOutcome::Failed(e),
            };
            return PipelineResult {
                outcome,
                entry: None,
                warnings,
            };
        }

        match self
            .install(provider, constraints, previous.get(provider), mode, cancel, &mut warnings)
            .await
        {
            Ok((outcome, entry)) => PipelineResult {
                outcome,
                entry: Some(entry),
                warnings,
            },
            Err(e) => {
                let e = if cancel.is_cancelled() {
                    InstallError::Canceled {
                        provider: provider.clone(),
                    }
                } else {
                    e
                };
                tracing::debug!("{provider} failed: {e}");
                PipelineResult {
                    outcome: InstallOutcome::Failed(e),
                    entry: None,
                    warnings,
                }
            }
        }
    }

    fn builtin(
        &self,
        provider: &ProviderIdentity,
        constraints: &VersionConstraintSet,
    ) -> Result<Version, InstallError> {
        let Some(version) = self.builtins.get(provider.type_name()) else {
            let e = InstallError::BuiltInUnknown {
                provider: provider.clone(),
            };
            self.events.emit(InstallEvent::BuiltInFailure {
                provider: provider.clone(),
                reason: e.to_string(),
            });
            return Err(e);
        };
        if !constraints.allows(version) {
            let e = InstallError::BuiltInConstraint {
                provider: provider.clone(),
                available: version.clone(),
                constraints: constraints.to_string(),
            };
            self.events.emit(InstallEvent::BuiltInFailure {
                provider: provider.clone(),
                reason: e.to_string(),
            });
            return Err(e);
        }
        self.events.emit(InstallEvent::BuiltIn {
            provider: provider.clone(),
        });
        Ok(version.clone())
    }

    async fn install(
        &self,
        provider: &ProviderIdentity,
        constraints: &VersionConstraintSet,
        locked: Option<&LockEntry>,
        mode: InstallMode,
        cancel: &CancellationToken,
        warnings: &mut Vec<InstallWarning>,
    ) -> Result<(InstallOutcome, LockEntry), InstallError> {
        let canceled = || InstallError::Canceled {
            provider: provider.clone(),
        };

        let reusable = locked.filter(|entry| {
            let usable = mode == InstallMode::NewProvidersOnly && constraints.allows(&entry.version);
            if !usable && mode == InstallMode::NewProvidersOnly {
                tracing::debug!(
                    "Locked {provider} v{} no longer matches {constraints}; selecting again",
                    entry.version
                );
            }
            usable
        });

        let mut selection = match reusable {
            Some(entry) => {
                self.events.emit(InstallEvent::QueryBegin {
                    provider: provider.clone(),
                    constraints: constraints.to_string(),
                    locked: true,
                });
                tracing::debug!("Reusing locked {provider} v{}", entry.version);
                Selection {
                    version: entry.version.clone(),
                    source: self.sources.index_for_origin(provider, &entry.origin),
                    origin: entry.origin.clone(),
                    candidates: None,
                }
            }
            None => {
                self.events.emit(InstallEvent::QueryBegin {
                    provider: provider.clone(),
                    constraints: constraints.to_string(),
                    locked: false,
                });
                let candidates = self.query(provider, cancel, warnings).await?;
                self.select(provider, constraints, candidates, warnings)?
            }
        };
        let version = selection.version.clone();

        if cancel.is_cancelled() {
            return Err(canceled());
        }

        // Hashes the lock file already trusts for this exact version.
        let expected: Option<&LockEntry> = locked.filter(|entry| entry.version == version);
        let target = paths::package_dir(&self.working_set, provider, &version, &self.platform);

        if let Some(entry) = expected {
            if let Some(installed) = installed_hash(&target).await {
                if entry.hashes.contains(&installed) {
                    tracing::debug!("{provider} v{version} is already installed");
                    self.events.emit(InstallEvent::AlreadyInstalled {
                        provider: provider.clone(),
                        version: version.clone(),
                    });
                    let mut entry = entry.clone();
                    entry.constraints = constraints.to_string();
                    return Ok((InstallOutcome::AlreadyInstalled(version), entry));
                }
            }
        }

        if let Some(cached) = self.cached_package(provider, &version).await {
            if !protocols_compatible(&cached.record.protocols) {
                let candidates = self.candidates_for(&mut selection, provider, cancel, warnings).await?;
                return Err(self.protocol_error(provider, &version, constraints, &candidates));
            }
            if let Some(entry) = expected {
                if !entry.accepts_any(&cached.record.hashes) {
                    return Err(self.hash_failure(
                        provider,
                        &version,
                        "the cached package does not match any checksum recorded in the lock file",
                    ));
                }
            }
            return self
                .link_cached(provider, &version, constraints, cached, &target)
                .await;
        }

        let meta = self
            .package_meta(&mut selection, provider, cancel, warnings)
            .await?;
        if !protocols_compatible(&meta.protocols) {
            let candidates = self.candidates_for(&mut selection, provider, cancel, warnings).await?;
            return Err(self.protocol_error(provider, &version, constraints, &candidates));
        }

        self.fetch_and_install(provider, constraints, &selection, &meta, expected, &target, cancel)
            .await
    }

    async fn query(
        &self,
        provider: &ProviderIdentity,
        cancel: &CancellationToken,
        warnings: &mut Vec<InstallWarning>,
    ) -> Result<Vec<Candidate>, InstallError> {
        let answer = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(SourceError::Canceled),
            answer = self.sources.query(provider) => answer,
        };

        match answer {
            Ok((candidates, source_warnings)) => {
                if !source_warnings.is_empty() {
                    self.events.emit(InstallEvent::QueryWarnings {
                        provider: provider.clone(),
                        warnings: source_warnings.clone(),
                    });
                    warnings.extend(source_warnings.into_iter().map(|message| {
                        InstallWarning::Registry {
                            provider: provider.clone(),
                            message,
                        }
                    }));
                }
                tracing::debug!("{} candidate(s) for {provider}", candidates.len());
                Ok(candidates)
            }
            Err(SourceError::Canceled) => Err(InstallError::Canceled {
                provider: provider.clone(),
            }),
            Err(source) => {
                let suggestion = match source {
                    SourceError::ProviderNotFound { .. }
                    | SourceError::RegistryProviderUnknown { .. } => {
                        self.sources.suggest_alternative(provider).await
                    }
                    _ => None,
                };
                self.events.emit(InstallEvent::QueryFailure {
                    provider: provider.clone(),
                    reason: source.to_string(),
                });
                Err(InstallError::Query {
                    provider: provider.clone(),
                    source,
                    suggestion,
                })
            }
        }
    }

    /// Pick the newest candidate satisfying `constraints` whose protocols
    /// this build speaks.
    fn select(
        &self,
        provider: &ProviderIdentity,
        constraints: &VersionConstraintSet,
        candidates: Vec<Candidate>,
        warnings: &mut Vec<InstallWarning>,
    ) -> Result<Selection, InstallError> {
        let Some(best) = constraints
            .newest_allowed(candidates.iter().map(|c| &c.available.version))
            .cloned()
        else {
            return Err(InstallError::NoMatchingVersion {
                provider: provider.clone(),
                constraints: constraints.describe_sources(),
                newest_available: candidates
                    .iter()
                    .map(|c| &c.available.version)
                    .filter(|v| !v.is_prerelease())
                    .max()
                    .cloned(),
            });
        };

        let version = if version_compatible(&candidates, &best) {
            best
        } else {
            let fallback = candidates
                .iter()
                .filter(|c| c.available.version < best)
                .filter(|c| constraints.allows(&c.available.version))
                .filter(|c| protocols_compatible(&c.available.protocols))
                .map(|c| &c.available.version)
                .max()
                .cloned();
            let Some(selected) = fallback else {
                return Err(self.protocol_error(provider, &best, constraints, &candidates));
            };
            tracing::warn!(
                "{provider} v{best} speaks an unsupported protocol; using v{selected}"
            );
            self.events.emit(InstallEvent::ProtocolIncompatible {
                provider: provider.clone(),
                version: best.clone(),
                selected: Some(selected.clone()),
            });
            warnings.push(InstallWarning::ProtocolDowngrade {
                provider: provider.clone(),
                skipped: best,
                selected: selected.clone(),
            });
            selected
        };

        // The cache is consulted by version before any source, so among
        // equal versions source priority alone decides.
        let chosen = candidates
            .iter()
            .filter(|c| c.available.version == version)
            .min_by_key(|c| c.source)
            .map(|c| (c.source, c.origin.clone()));
        let (source, origin) = match chosen {
            Some((source, origin)) => (Some(source), origin),
            None => (None, String::new()),
        };

        tracing::debug!("Selected {provider} v{version} from {origin}");
        Ok(Selection {
            version,
            source,
            origin,
            candidates: Some(candidates),
        })
    }

    /// The diagnostic for a version whose protocols this build cannot speak.
    fn protocol_error(
        &self,
        provider: &ProviderIdentity,
        version: &Version,
        constraints: &VersionConstraintSet,
        candidates: &[Candidate],
    ) -> InstallError {
        self.events.emit(InstallEvent::ProtocolIncompatible {
            provider: provider.clone(),
            version: version.clone(),
            selected: None,
        });

        let compatible: BTreeSet<&Version> = candidates
            .iter()
            .filter(|c| !c.available.version.is_prerelease())
            .filter(|c| protocols_compatible(&c.available.protocols))
            .map(|c| &c.available.version)
            .collect();
        let constraints = constraints.to_string();

        if let Some(older) = compatible.range::<&Version, _>(..version).next_back() {
            InstallError::ProtocolTooNew {
                provider: provider.clone(),
                version: version.clone(),
                suggested: (*older).clone(),
                constraints,
            }
        } else if let Some(newest) = compatible.iter().next_back() {
            InstallError::ProtocolTooOld {
                provider: provider.clone(),
                version: version.clone(),
                suggested: (*newest).clone(),
                constraints,
            }
        } else {
            InstallError::NoCompatibleVersion {
                provider: provider.clone(),
            }
        }
    }

    /// Query results for a selection, querying now if lock reuse skipped it.
    async fn candidates_for(
        &self,
        selection: &mut Selection,
        provider: &ProviderIdentity,
        cancel: &CancellationToken,
        warnings: &mut Vec<InstallWarning>,
    ) -> Result<Vec<Candidate>, InstallError> {
        if let Some(candidates) = &selection.candidates {
            return Ok(candidates.clone());
        }
        let candidates = self.query(provider, cancel, warnings).await?;
        selection.candidates = Some(candidates.clone());
        Ok(candidates)
    }

    /// Find a cache entry whose contents still hash to what was recorded.
    async fn cached_package(
        &self,
        provider: &ProviderIdentity,
        version: &Version,
    ) -> Option<CachedPackage> {
        let cache = self.cache.clone()?;
        let (p, v, platform) = (provider.clone(), version.clone(), self.platform.clone());
        let cached = tokio::task::spawn_blocking(move || cache.lookup(&p, &v, &platform))
            .await
            .ok()
            .flatten()?;
        let recorded = cached.record.directory_hash()?.clone();
        match fetch::directory_hash(&cached.dir).await {
            Ok(actual) if actual == recorded => Some(cached),
            Ok(actual) => {
                tracing::warn!(
                    "Ignoring damaged cache entry for {provider} v{version}: expected {recorded}, found {actual}"
                );
                None
            }
            Err(e) => {
                tracing::warn!("Ignoring unreadable cache entry for {provider} v{version}: {e}");
                None
            }
        }
    }

    async fn link_cached(
        &self,
        provider: &ProviderIdentity,
        version: &Version,
        constraints: &VersionConstraintSet,
        cached: CachedPackage,
        target: &Path,
    ) -> Result<(InstallOutcome, LockEntry), InstallError> {
        self.events.emit(InstallEvent::CacheLinked {
            provider: provider.clone(),
            version: version.clone(),
            cache_dir: cached.dir.clone(),
        });

        let linked = {
            let cached = cached.clone();
            let target = target.to_path_buf();
            blocking(move || PackageCache::link_into(&cached, &target)).await
        };
        if let Err(e) = linked {
            self.events.emit(InstallEvent::CacheLinkFailure {
                provider: provider.clone(),
                version: version.clone(),
                reason: e.to_string(),
            });
            return Err(InstallError::CacheLink {
                provider: provider.clone(),
                version: version.clone(),
                reason: e.to_string(),
            });
        }

        let authentication = cached
            .record
            .signing
            .clone()
            .map_or(Authentication::Unauthenticated, Authentication::Signed);
        let entry = LockEntry {
            provider: provider.clone(),
            version: version.clone(),
            constraints: constraints.to_string(),
            origin: cached.record.origin,
            hashes: cached
                .record
                .hashes
                .union(&cached.record.sibling_hashes)
                .cloned()
                .collect(),
            signing: cached.record.signing,
        };
        Ok((
            InstallOutcome::Installed {
                version: version.clone(),
                authentication,
                from_cache: true,
            },
            entry,
        ))
    }

    async fn package_meta(
        &self,
        selection: &mut Selection,
        provider: &ProviderIdentity,
        cancel: &CancellationToken,
        warnings: &mut Vec<InstallWarning>,
    ) -> Result<PackageMeta, InstallError> {
        let version = selection.version.clone();

        // A locked origin that no configured source records: find the version
        // wherever it is offered now.
        if selection.source.is_none() {
            let candidates = self.candidates_for(selection, provider, cancel, warnings).await?;
            let found = candidates
                .iter()
                .filter(|c| c.available.version == version)
                .min_by_key(|c| c.source);
            match found {
                Some(c) => {
                    selection.source = Some(c.source);
                    selection.origin = c.origin.clone();
                }
                None => {
                    return Err(InstallError::NoMatchingVersion {
                        provider: provider.clone(),
                        constraints: format!("= {version}"),
                        newest_available: candidates
                            .iter()
                            .map(|c| &c.available.version)
                            .filter(|v| !v.is_prerelease())
                            .max()
                            .cloned(),
                    });
                }
            }
        }

        let source = selection
            .source
            .and_then(|idx| self.sources.get(idx))
            .ok_or_else(|| InstallError::Internal {
                provider: provider.clone(),
                reason: "selected package source is not configured".into(),
            })?;

        let meta = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(SourceError::Canceled),
            meta = source.package_meta(provider, &version, &self.platform) => meta,
        };

        meta.map_err(|e| {
            let err = match e {
                SourceError::PlatformNotSupported {
                    provider,
                    version,
                    platform,
                    mirror,
                } => InstallError::PlatformNotSupported {
                    provider,
                    version,
                    platform,
                    mirror,
                },
                SourceError::Canceled => InstallError::Canceled {
                    provider: provider.clone(),
                },
                source => InstallError::Fetch {
                    provider: provider.clone(),
                    version: version.clone(),
                    source,
                },
            };
            self.events.emit(InstallEvent::FetchFailure {
                provider: provider.clone(),
                version: version.clone(),
                reason: err.to_string(),
            });
            err
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn fetch_and_install(
        &self,
        provider: &ProviderIdentity,
        constraints: &VersionConstraintSet,
        selection: &Selection,
        meta: &PackageMeta,
        expected: Option<&LockEntry>,
        target: &Path,
        cancel: &CancellationToken,
    ) -> Result<(InstallOutcome, LockEntry), InstallError> {
        let version = &selection.version;
        let source = selection
            .source
            .and_then(|idx| self.sources.get(idx))
            .ok_or_else(|| InstallError::Internal {
                provider: provider.clone(),
                reason: "selected package source is not configured".into(),
            })?;
        let internal = |e: io::Error| InstallError::Internal {
            provider: provider.clone(),
            reason: e.to_string(),
        };

        let staging = match &self.cache {
            Some(cache) => cache.staging_dir(),
            None => tokio::fs::create_dir_all(&self.working_set)
                .await
                .and_then(|()| {
                    tempfile::Builder::new()
                        .prefix(".staging-")
                        .tempdir_in(&self.working_set)
                }),
        }
        .map_err(internal)?;
        let dest = staging.path().join("package");

        self.events.emit(InstallEvent::FetchBegin {
            provider: provider.clone(),
            version: version.clone(),
            location: meta.location.to_string(),
        });
        tracing::info!("Fetching {provider} v{version} from {}", meta.location);

        let fetched = match source.fetch(meta, &dest, cancel).await {
            Ok(fetched) => fetched,
            Err(SourceError::Canceled) => {
                return Err(InstallError::Canceled {
                    provider: provider.clone(),
                });
            }
            Err(source) => {
                let integrity = matches!(source, SourceError::Checksum(_) | SourceError::Signature(_));
                if integrity {
                    self.events.emit(InstallEvent::HashFailure {
                        provider: provider.clone(),
                        version: version.clone(),
                        reason: source.to_string(),
                    });
                } else {
                    self.events.emit(InstallEvent::FetchFailure {
                        provider: provider.clone(),
                        version: version.clone(),
                        reason: source.to_string(),
                    });
                }
                return Err(InstallError::Fetch {
                    provider: provider.clone(),
                    version: version.clone(),
                    source,
                });
            }
        };

        if let Some(entry) = expected {
            if !entry.accepts_any(&fetched.hashes) {
                return Err(self.hash_failure(
                    provider,
                    version,
                    "the package does not match any checksum recorded in the lock file",
                ));
            }
        }
        tracing::debug!(
            "{provider} v{version} verified ({})",
            fetched.authentication
        );

        let signing = fetched.authentication.signing().cloned();
        match &self.cache {
            Some(cache) => {
                let record = CacheRecord {
                    object: String::new(),
                    hashes: fetched.hashes.clone(),
                    sibling_hashes: fetched.sibling_hashes.clone(),
                    protocols: meta.protocols.clone(),
                    origin: selection.origin.clone(),
                    signing: signing.clone(),
                };
                let (cache, p, v, platform, staged, target) = (
                    cache.clone(),
                    provider.clone(),
                    version.clone(),
                    self.platform.clone(),
                    fetched.dir.clone(),
                    target.to_path_buf(),
                );
                blocking(move || {
                    let stored = cache.store(&p, &v, &platform, &staged, record)?;
                    PackageCache::link_into(&stored, &target)
                })
                .await
                .map_err(internal)?;
            }
            None => {
                let (staged, target) = (fetched.dir.clone(), target.to_path_buf());
                blocking(move || {
                    cache::remove_existing(&target)?;
                    if let Some(parent) = target.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::rename(&staged, &target)
                })
                .await
                .map_err(internal)?;
            }
        }

        self.events.emit(InstallEvent::FetchSuccess {
            provider: provider.clone(),
            version: version.clone(),
            authentication: fetched.authentication.clone(),
        });

        let entry = LockEntry {
            provider: provider.clone(),
            version: version.clone(),
            constraints: constraints.to_string(),
            origin: selection.origin.clone(),
            // Other platforms' hashes are recorded only after the package's
            // own hashes passed the lock check above.
            hashes: fetched
                .hashes
                .union(&fetched.sibling_hashes)
                .cloned()
                .collect(),
            signing,
        };
        Ok((
            InstallOutcome::Installed {
                version: version.clone(),
                authentication: fetched.authentication,
                from_cache: false,
            },
            entry,
        ))
    }

    fn hash_failure(
        &self,
        provider: &ProviderIdentity,
        version: &Version,
        reason: &str,
    ) -> InstallError {
        self.events.emit(InstallEvent::HashFailure {
            provider: provider.clone(),
            version: version.clone(),
            reason: reason.to_string(),
        });
        InstallError::HashMismatch {
            provider: provider.clone(),
            version: version.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Whether some candidate offering `version` speaks a supported protocol.
fn version_compatible(candidates: &[Candidate], version: &Version) -> bool {
    candidates
        .iter()
        .filter(|c| &c.available.version == version)
        .any(|c| protocols_compatible(&c.available.protocols))
}

/// Directory hash of an installed package, if one is present.
async fn installed_hash(dir: &Path) -> Option<PackageHash> {
    if !tokio::fs::try_exists(dir).await.unwrap_or(false) {
        return None;
    }
    fetch::directory_hash(dir).await.ok()
}

async fn blocking<T, F>(f: F) -> io::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> io::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(io::Error::other)?
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pinion_schema::VersionConstraints;

    use super::*;
    use crate::source::DirectorySource;

    fn provider(s: &str) -> ProviderIdentity {
        ProviderIdentity::parse(s).unwrap()
    }

    fn reqs(entries: &[(&str, &str)]) -> Requirements {
        entries
            .iter()
            .map(|(p, c)| {
                let mut set = VersionConstraintSet::new();
                set.push("", VersionConstraints::parse(c).unwrap());
                (provider(p), set)
            })
            .collect()
    }

    fn mirror(versions: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for v in versions {
            let pkg = dir
                .path()
                .join("registry.pinion.dev/acme/widgets")
                .join(v)
                .join("linux_amd64");
            std::fs::create_dir_all(&pkg).unwrap();
            std::fs::write(pkg.join("plugin"), format!("widgets {v}")).unwrap();
        }
        dir
    }

    fn installer(mirror: &Path, work: &Path) -> Installer {
        Installer::new(
            SourceSet::new(vec![Arc::new(DirectorySource::new(mirror))]),
            work.join("providers"),
        )
        .with_platform(Platform::new("linux", "amd64"))
    }

    #[tokio::test]
    async fn installs_newest_matching_version() {
        let m = mirror(&["1.0.0", "2.0.0", "2.1.0", "3.0.0"]);
        let work = tempfile::tempdir().unwrap();
        let report = installer(m.path(), work.path())
            .ensure_provider_versions(
                &Locks::new(),
                &reqs(&[("acme/widgets", "~> 2.0")]),
                InstallMode::NewProvidersOnly,
                &CancellationToken::new(),
            )
            .await;

        assert!(report.is_success());
        let entry = report.locks.get(&provider("acme/widgets")).unwrap();
        assert_eq!(entry.version, Version::new(2, 1, 0));
        assert_eq!(entry.hashes.len(), 1);
        let installed = work
            .path()
            .join("providers/registry.pinion.dev/acme/widgets/2.1.0/linux_amd64/plugin");
        assert_eq!(std::fs::read_to_string(installed).unwrap(), "widgets 2.1.0");
    }

    #[tokio::test]
    async fn second_run_reports_already_installed() {
        let m = mirror(&["2.1.0"]);
        let work = tempfile::tempdir().unwrap();
        let inst = installer(m.path(), work.path());
        let r = reqs(&[("acme/widgets", ">= 2.0")]);
        let cancel = CancellationToken::new();

        let first = inst
            .ensure_provider_versions(&Locks::new(), &r, InstallMode::NewProvidersOnly, &cancel)
            .await;
        let second = inst
            .ensure_provider_versions(&first.locks, &r, InstallMode::NewProvidersOnly, &cancel)
            .await;

        assert_eq!(
            second.outcomes[&provider("acme/widgets")],
            InstallOutcome::AlreadyInstalled(Version::new(2, 1, 0))
        );
        assert_eq!(first.locks, second.locks);
    }

    #[tokio::test]
    async fn unsatisfiable_constraints_name_their_modules() {
        let m = mirror(&["1.5.0", "2.1.0", "3.2.0"]);
        let work = tempfile::tempdir().unwrap();
        let mut r = reqs(&[("acme/widgets", "< 2.0")]);
        r.get_mut(&provider("acme/widgets"))
            .unwrap()
            .push("module.net", VersionConstraints::parse(">= 3.0").unwrap());

        let report = installer(m.path(), work.path())
            .ensure_provider_versions(&Locks::new(), &r, InstallMode::Upgrade, &CancellationToken::new())
            .await;

        match &report.outcomes[&provider("acme/widgets")] {
            InstallOutcome::Failed(InstallError::NoMatchingVersion {
                constraints,
                newest_available,
                ..
            }) => {
                // Each range is satisfiable alone; together they are not.
                assert_eq!(constraints, "root: < 2.0.0; module.net: >= 3.0.0");
                assert_eq!(newest_available, &Some(Version::new(3, 2, 0)));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(report.locks.is_empty());
    }

    #[tokio::test]
    async fn builtins_are_not_locked() {
        let m = mirror(&[]);
        let work = tempfile::tempdir().unwrap();
        let builtins = BTreeMap::from([("pinion".to_string(), Version::new(0, 4, 0))]);
        let report = installer(m.path(), work.path())
            .with_builtins(builtins)
            .ensure_provider_versions(
                &Locks::new(),
                &reqs(&[("builtin/pinion", ""), ("builtin/missing", "")]),
                InstallMode::NewProvidersOnly,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(
            report.outcomes[&provider("builtin/pinion")],
            InstallOutcome::BuiltIn(Version::new(0, 4, 0))
        );
        assert!(matches!(
            report.outcomes[&provider("builtin/missing")],
            InstallOutcome::Failed(InstallError::BuiltInUnknown { .. })
        ));
        assert!(report.locks.is_empty());
    }

    #[tokio::test]
    async fn canceled_before_start_fails_every_provider_as_canceled() {
        let m = mirror(&["2.1.0"]);
        let work = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = installer(m.path(), work.path())
            .ensure_provider_versions(
                &Locks::new(),
                &reqs(&[("acme/widgets", "")]),
                InstallMode::NewProvidersOnly,
                &cancel,
            )
            .await;

        assert!(report.canceled);
        assert!(!report.is_success());
        assert!(matches!(
            report.outcomes[&provider("acme/widgets")],
            InstallOutcome::Failed(InstallError::Canceled { .. })
        ));
    }

    #[tokio::test]
    async fn shared_cache_serves_second_working_set() {
        let m = mirror(&["2.1.0"]);
        let cache_dir = tempfile::tempdir().unwrap();
        let r = reqs(&[("acme/widgets", "")]);
        let cancel = CancellationToken::new();

        let a = tempfile::tempdir().unwrap();
        let first = installer(m.path(), a.path())
            .with_cache(Some(PackageCache::new(cache_dir.path())))
            .ensure_provider_versions(&Locks::new(), &r, InstallMode::NewProvidersOnly, &cancel)
            .await;
        assert!(first.is_success());

        let b = tempfile::tempdir().unwrap();
        let second = installer(m.path(), b.path())
            .with_cache(Some(PackageCache::new(cache_dir.path())))
            .ensure_provider_versions(&first.locks, &r, InstallMode::NewProvidersOnly, &cancel)
            .await;

        assert!(matches!(
            second.outcomes[&provider("acme/widgets")],
            InstallOutcome::Installed { from_cache: true, .. }
        ));
        assert_eq!(first.locks, second.locks);
    }
}
