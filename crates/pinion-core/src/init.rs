//! `init` orchestration.
//!
//! Requirement collection, then the previous lock, then the installer, then
//! reconciliation and (only when every provider succeeded) the lock write.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pinion_schema::{ProviderIdentity, Version};
use tokio_util::sync::CancellationToken;

use crate::cache::PackageCache;
use crate::error::InitError;
use crate::events::EventSink;
use crate::installer::{InstallMode, InstallOutcome, InstallReport, Installer};
use crate::locks::LockStore;
use crate::paths;
use crate::reconcile::{LockChange, reconcile};
use crate::requirements::{self, ManifestConfig, Requirements, StateFile, StateSnapshot};
use crate::settings::Settings;
use crate::source::{DirectorySource, PackageSource, RegistrySource, SourceSet};

/// Shown once when the run was interrupted.
pub const CANCELED_NOTICE: &str = "Provider installation was canceled by an interrupt signal.";

/// Shown when any fetched package was signed by a third-party key.
pub const THIRD_PARTY_NOTE: &str = "Partner and community providers are signed by their developers. \
     Their signatures prove the package was published by the key holder, not that the pinion \
     maintainers reviewed it.";

/// Inputs for one `init` run, as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Root configuration directory.
    pub root: PathBuf,
    /// Configuration tree file; defaults to `<root>/pinion.toml`.
    pub config: Option<PathBuf>,
    /// Optional prior state file.
    pub state: Option<PathBuf>,
    /// Lock file override, taking precedence over settings.
    pub lock_file: Option<PathBuf>,
    /// Explicit plugin directories; when set, no registry is consulted.
    pub plugin_dirs: Vec<PathBuf>,
    pub upgrade: bool,
}

impl InitOptions {
    fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| self.root.join(paths::CONFIG_FILE_NAME))
    }
}

/// Everything `init` has to tell the user.
#[derive(Debug, Clone)]
pub struct InitReport {
    pub install: InstallReport,
    /// How the lock file changed; `None` when it was not written because
    /// some provider failed.
    pub lock_change: Option<LockChange>,
    pub lock_path: PathBuf,
    /// Providers without version constraints, with a suggested constraint.
    pub unconstrained: Vec<(ProviderIdentity, String)>,
}

impl InitReport {
    /// True when every provider succeeded and the lock is current.
    pub fn is_success(&self) -> bool {
        self.install.is_success()
    }

    /// Informational notes, in display order.
    pub fn notes(&self) -> Vec<String> {
        let mut notes = Vec::new();
        if self.install.canceled {
            notes.push(CANCELED_NOTICE.to_string());
            return notes;
        }
        if self.install.third_party_signed() {
            notes.push(THIRD_PARTY_NOTE.to_string());
        }
        if self.is_success() && !self.unconstrained.is_empty() {
            let mut lines = vec![
                "The following providers do not have any version constraints in configuration, \
                 so the latest version was installed.\n\n\
                 To prevent automatic upgrades to new major versions that may contain breaking \
                 changes, we recommend adding version constraints to your configuration, with the \
                 constraint strings suggested below.\n"
                    .to_string(),
            ];
            lines.extend(self.unconstrained.iter().map(|(p, suggested)| {
                format!("* {}: version = \"{suggested}\"", p.for_display())
            }));
            notes.push(lines.join("\n"));
        }
        let file_name = self
            .lock_path
            .file_name()
            .map_or_else(|| self.lock_path.display().to_string(), |n| n.to_string_lossy().to_string());
        if let Some(message) = self.lock_change.and_then(|c| c.message(&file_name)) {
            notes.push(message);
        }
        notes
    }
}

/// Collect requirements from the configuration file and optional state file.
pub fn load_requirements(opts: &InitOptions) -> Result<Requirements, InitError> {
    let config = ManifestConfig::load(&opts.config_path())?;
    let state = opts.state.as_deref().map(StateFile::load).transpose()?;
    Ok(requirements::collect(
        &config,
        state.as_ref().map(|s| s as &dyn StateSnapshot),
    )?)
}

/// Package sources for a run: explicit plugin directories only, or the
/// user plugin directory (when present) followed by the registry.
pub fn sources_for(settings: &Settings, plugin_dirs: &[PathBuf]) -> SourceSet {
    let mut sources: Vec<Arc<dyn PackageSource>> = Vec::new();
    if plugin_dirs.is_empty() {
        if let Some(dir) = paths::user_plugins_dir().filter(|d| d.is_dir()) {
            tracing::debug!("Using user plugin directory {}", dir.display());
            sources.push(Arc::new(DirectorySource::new(dir)));
        }
        sources.push(Arc::new(RegistrySource::from_settings(settings)));
    } else {
        for dir in plugin_dirs {
            sources.push(Arc::new(DirectorySource::new(dir)));
        }
    }
    SourceSet::new(sources)
}

/// Run `init` for the configuration described by `opts`.
pub async fn init(
    settings: &Settings,
    opts: &InitOptions,
    events: EventSink,
    cancel: &CancellationToken,
) -> Result<InitReport, InitError> {
    let reqs = load_requirements(opts)?;

    let lock_override = opts.lock_file.as_deref().or(settings.lock_file.as_deref());
    let store = LockStore::new(paths::lock_file_path(&opts.root, lock_override));

    let installer = Installer::new(
        sources_for(settings, &opts.plugin_dirs),
        paths::working_set_dir(&opts.root),
    )
    .with_cache(settings.plugin_cache_dir.clone().map(PackageCache::new))
    .with_concurrency(settings.concurrency())
    .with_events(events);

    let mode = if opts.upgrade {
        InstallMode::Upgrade
    } else {
        InstallMode::NewProvidersOnly
    };
    resolve(&reqs, &store, &installer, mode, cancel).await
}

/// Install `reqs` and reconcile the lock file at `store`.
pub async fn resolve(
    reqs: &Requirements,
    store: &LockStore,
    installer: &Installer,
    mode: InstallMode,
    cancel: &CancellationToken,
) -> Result<InitReport, InitError> {
    let previous = store.load().await?;
    tracing::debug!(
        "Loaded {} lock entr(ies) from {}",
        previous.len(),
        store.path().display()
    );

    prepare_dir(installer.working_set()).await?;
    let install = installer
        .ensure_provider_versions(&previous, reqs, mode, cancel)
        .await;

    let lock_change = if install.is_success() {
        let (merged, change) = reconcile(&previous, install.locks.clone());
        if change.needs_write() {
            store.save(&merged).await?;
            tracing::info!("Wrote {}", store.path().display());
        }
        Some(change)
    } else {
        tracing::debug!("Not writing the lock file; some providers failed");
        None
    };

    let unconstrained = reqs
        .iter()
        .filter(|(p, c)| !p.is_builtin() && c.is_unconstrained())
        .filter_map(|(p, _)| {
            selected_version(&install, p).map(|v| (p.clone(), v.suggested_constraint()))
        })
        .collect();

    Ok(InitReport {
        install,
        lock_change,
        lock_path: store.path().to_path_buf(),
        unconstrained,
    })
}

fn selected_version<'a>(report: &'a InstallReport, provider: &ProviderIdentity) -> Option<&'a Version> {
    match report.outcomes.get(provider)? {
        InstallOutcome::AlreadyInstalled(v) | InstallOutcome::Installed { version: v, .. } => Some(v),
        InstallOutcome::BuiltIn(_) | InstallOutcome::Failed(_) => None,
    }
}

async fn prepare_dir(dir: &Path) -> Result<(), InitError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| InitError::Io {
            path: dir.to_path_buf(),
            source,
        })
}
