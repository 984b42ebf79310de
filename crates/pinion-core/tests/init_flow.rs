use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::{Signer, SigningKey};
use pinion_core::init::{THIRD_PARTY_NOTE, resolve};
use pinion_core::source::{
    Authentication, AvailableVersion, DirectorySource, FetchedPackage, PackageLocation,
    PackageMeta, PackageSource, RegistrySource, SourceSet, VersionList,
};
use pinion_core::{
    ErrorCategory, EventSink, InstallEvent, InstallMode, InstallOutcome, Installer, LockChange,
    LockEntry, LockStore, Locks, Requirements, SourceError,
};
use pinion_schema::{
    PackageHash, Platform, ProviderIdentity, Version, VersionConstraintSet, VersionConstraints,
};
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// In-memory source that counts version queries.
#[derive(Debug)]
struct CountingSource {
    provider: ProviderIdentity,
    versions: Vec<(Version, Vec<String>)>,
    queries: AtomicUsize,
}

impl CountingSource {
    fn new(provider: &str, versions: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            provider: ProviderIdentity::parse(provider).unwrap(),
            versions: versions
                .iter()
                .map(|v| (Version::parse(v).unwrap(), vec!["5.0".to_string()]))
                .collect(),
            queries: AtomicUsize::new(0),
        })
    }

    fn with_protocols(provider: &str, versions: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            provider: ProviderIdentity::parse(provider).unwrap(),
            versions: versions
                .iter()
                .map(|(v, p)| (Version::parse(v).unwrap(), vec![(*p).to_string()]))
                .collect(),
            queries: AtomicUsize::new(0),
        })
    }

    fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    fn protocols_of(&self, version: &Version) -> Vec<String> {
        self.versions
            .iter()
            .find(|(v, _)| v == version)
            .map(|(_, p)| p.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PackageSource for CountingSource {
    fn describe(&self) -> String {
        "counting".into()
    }

    fn origin(&self, _provider: &ProviderIdentity) -> String {
        "counting".into()
    }

    async fn query_versions(&self, provider: &ProviderIdentity) -> Result<VersionList, SourceError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if *provider != self.provider {
            return Err(SourceError::ProviderNotFound {
                provider: provider.clone(),
                searched: vec![self.describe()],
            });
        }
        Ok(VersionList {
            versions: self
                .versions
                .iter()
                .map(|(version, protocols)| AvailableVersion {
                    version: version.clone(),
                    protocols: protocols.clone(),
                    platforms: vec![linux()],
                })
                .collect(),
            warnings: Vec::new(),
        })
    }

    async fn package_meta(
        &self,
        provider: &ProviderIdentity,
        version: &Version,
        platform: &Platform,
    ) -> Result<PackageMeta, SourceError> {
        Ok(PackageMeta {
            provider: provider.clone(),
            version: version.clone(),
            platform: platform.clone(),
            filename: format!("{version}.zip"),
            location: PackageLocation::Directory(PathBuf::from("/memory")),
            protocols: self.protocols_of(version),
            sha256: None,
            checksums: None,
        })
    }

    async fn fetch(
        &self,
        meta: &PackageMeta,
        dest: &Path,
        _cancel: &CancellationToken,
    ) -> Result<FetchedPackage, SourceError> {
        write_package(dest, &meta.version);
        let hash = PackageHash::of_directory(dest)?;
        Ok(FetchedPackage {
            dir: dest.to_path_buf(),
            authentication: Authentication::Unauthenticated,
            hashes: BTreeSet::from([hash]),
            sibling_hashes: BTreeSet::new(),
        })
    }
}

fn linux() -> Platform {
    Platform::new("linux", "amd64")
}

fn write_package(dir: &Path, version: &Version) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join("plugin"), format!("widgets {version}")).unwrap();
}

fn package_hash(version: &str) -> PackageHash {
    let dir = tempfile::tempdir().unwrap();
    write_package(dir.path(), &Version::parse(version).unwrap());
    PackageHash::of_directory(dir.path()).unwrap()
}

fn widgets() -> ProviderIdentity {
    ProviderIdentity::parse("acme/widgets").unwrap()
}

fn requirements(modules: &[(&str, &str, &str)]) -> Requirements {
    let mut reqs = Requirements::new();
    for (module, provider, constraint) in modules {
        reqs.entry(ProviderIdentity::parse(provider).unwrap())
            .or_insert_with(VersionConstraintSet::new)
            .push(*module, VersionConstraints::parse(constraint).unwrap());
    }
    reqs
}

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn store(&self) -> LockStore {
        LockStore::new(self.dir.path().join(".pinion.lock"))
    }

    fn installer(&self, sources: Vec<Arc<dyn PackageSource>>) -> Installer {
        Installer::new(SourceSet::new(sources), self.dir.path().join(".pinion/providers"))
            .with_platform(linux())
    }

    fn lock_bytes(&self) -> Vec<u8> {
        std::fs::read(self.dir.path().join(".pinion.lock")).unwrap()
    }
}

#[tokio::test]
async fn rerun_is_byte_identical_and_writes_nothing() {
    let ws = Workspace::new();
    let source = CountingSource::new("acme/widgets", &["1.0.0", "1.2.0"]);
    let reqs = requirements(&[("", "acme/widgets", "~> 1.0")]);
    let cancel = CancellationToken::new();

    let installer = ws.installer(vec![source.clone()]);
    let first = resolve(&reqs, &ws.store(), &installer, InstallMode::NewProvidersOnly, &cancel)
        .await
        .unwrap();
    assert_eq!(first.lock_change, Some(LockChange::Created));
    let before = ws.lock_bytes();

    let second = resolve(&reqs, &ws.store(), &installer, InstallMode::NewProvidersOnly, &cancel)
        .await
        .unwrap();
    assert_eq!(second.lock_change, Some(LockChange::Unchanged));
    assert!(second.notes().iter().all(|n| !n.contains("lock file")));
    assert_eq!(ws.lock_bytes(), before);
}

#[tokio::test]
async fn constraints_from_all_modules_are_intersected() {
    let ws = Workspace::new();
    let source = CountingSource::new("acme/widgets", &["2.0.0", "2.5.0", "2.6.3", "3.0.0"]);
    let reqs = requirements(&[
        ("", "acme/widgets", "~> 2.0"),
        ("module.network", "acme/widgets", "< 2.6"),
    ]);

    let report = resolve(
        &reqs,
        &ws.store(),
        &ws.installer(vec![source]),
        InstallMode::Upgrade,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    let locks = ws.store().load().await.unwrap();
    assert!(report.is_success());
    assert_eq!(locks.get(&widgets()).unwrap().version, Version::new(2, 5, 0));
}

#[tokio::test]
async fn valid_lock_entry_skips_the_source_query() {
    let ws = Workspace::new();
    let reqs = requirements(&[("", "acme/widgets", ">= 1.0")]);
    let cancel = CancellationToken::new();

    let old = CountingSource::new("acme/widgets", &["1.0.0"]);
    resolve(&reqs, &ws.store(), &ws.installer(vec![old]), InstallMode::NewProvidersOnly, &cancel)
        .await
        .unwrap();

    // A newer release appears, but the lock still satisfies the constraints.
    let newer = CountingSource::new("acme/widgets", &["1.0.0", "1.1.0"]);
    let report = resolve(
        &reqs,
        &ws.store(),
        &ws.installer(vec![newer.clone()]),
        InstallMode::NewProvidersOnly,
        &cancel,
    )
    .await
    .unwrap();

    assert_eq!(newer.queries(), 0);
    assert_eq!(
        report.install.outcomes[&widgets()],
        InstallOutcome::AlreadyInstalled(Version::new(1, 0, 0))
    );

    let upgraded = resolve(
        &reqs,
        &ws.store(),
        &ws.installer(vec![newer.clone()]),
        InstallMode::Upgrade,
        &cancel,
    )
    .await
    .unwrap();
    assert_eq!(newer.queries(), 1);
    assert_eq!(upgraded.lock_change, Some(LockChange::Updated));
}

#[tokio::test]
async fn hashes_for_other_platforms_survive_a_rerun() {
    let ws = Workspace::new();
    let other_platform = PackageHash::parse(
        "zh:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef",
    )
    .unwrap();
    let previous: Locks = [LockEntry {
        provider: widgets(),
        version: Version::new(1, 0, 0),
        constraints: String::new(),
        origin: "counting".into(),
        hashes: BTreeSet::from([package_hash("1.0.0"), other_platform.clone()]),
        signing: None,
    }]
    .into_iter()
    .collect();
    ws.store().save(&previous).await.unwrap();

    let reqs = requirements(&[("", "acme/widgets", "1.0.0")]);
    let report = resolve(
        &reqs,
        &ws.store(),
        &ws.installer(vec![CountingSource::new("acme/widgets", &["1.0.0"])]),
        InstallMode::NewProvidersOnly,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    // The constraint string changed, so the file is rewritten.
    assert_eq!(report.lock_change, Some(LockChange::Updated));
    let entry = ws.store().load().await.unwrap().get(&widgets()).cloned().unwrap();
    assert!(entry.hashes.contains(&other_platform));
    assert_eq!(entry.hashes.len(), 2);
}

#[tokio::test]
async fn package_not_matching_lock_is_rejected() {
    let ws = Workspace::new();
    let previous: Locks = [LockEntry {
        provider: widgets(),
        version: Version::new(1, 0, 0),
        constraints: String::new(),
        origin: "counting".into(),
        hashes: BTreeSet::from([PackageHash::parse(
            "zh:ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
        )
        .unwrap()]),
        signing: None,
    }]
    .into_iter()
    .collect();
    ws.store().save(&previous).await.unwrap();
    let before = ws.lock_bytes();

    let report = resolve(
        &requirements(&[("", "acme/widgets", "")]),
        &ws.store(),
        &ws.installer(vec![CountingSource::new("acme/widgets", &["1.0.0"])]),
        InstallMode::NewProvidersOnly,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    let failure = report.install.failures().next().unwrap();
    assert_eq!(failure.category(), ErrorCategory::Integrity);
    assert!(report.lock_change.is_none());
    assert_eq!(ws.lock_bytes(), before);
}

#[tokio::test]
async fn one_failing_provider_does_not_stop_the_others() {
    let ws = Workspace::new();
    let reqs = requirements(&[("", "acme/widgets", ""), ("", "acme/missing", "")]);

    let report = resolve(
        &reqs,
        &ws.store(),
        &ws.installer(vec![CountingSource::new("acme/widgets", &["1.0.0"])]),
        InstallMode::NewProvidersOnly,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(matches!(
        report.install.outcomes[&widgets()],
        InstallOutcome::Installed { .. }
    ));
    let failures: Vec<_> = report.install.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].category(), ErrorCategory::Source);
    assert!(failures[0].hint().unwrap().contains("Searched locations"));
    assert!(report.lock_change.is_none());
    assert!(!ws.dir.path().join(".pinion.lock").exists());
    assert!(
        ws.dir
            .path()
            .join(".pinion/providers/registry.pinion.dev/acme/widgets/1.0.0/linux_amd64/plugin")
            .exists()
    );
}

#[tokio::test]
async fn newest_incompatible_version_falls_back_to_older_release() {
    let ws = Workspace::new();
    let source = CountingSource::with_protocols(
        "acme/widgets",
        &[("1.0.0", "5.0"), ("1.1.0", "5.1"), ("1.2.0", "7.0")],
    );

    let report = resolve(
        &requirements(&[("", "acme/widgets", "~> 1.0")]),
        &ws.store(),
        &ws.installer(vec![source]),
        InstallMode::NewProvidersOnly,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(report.is_success());
    assert_eq!(report.install.warnings.len(), 1);
    let locks = ws.store().load().await.unwrap();
    assert_eq!(locks.get(&widgets()).unwrap().version, Version::new(1, 1, 0));
}

#[tokio::test]
async fn protocol_mismatch_suggests_the_boundary_version() {
    let ws = Workspace::new();
    let source = CountingSource::with_protocols(
        "acme/widgets",
        &[("1.0.0", "5.0"), ("2.0.0", "7.0")],
    );

    let report = resolve(
        &requirements(&[("", "acme/widgets", ">= 2.0")]),
        &ws.store(),
        &ws.installer(vec![source]),
        InstallMode::NewProvidersOnly,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    let failure = report.install.failures().next().unwrap();
    assert_eq!(failure.category(), ErrorCategory::Compatibility);
    let hint = failure.hint().unwrap();
    assert!(hint.contains("downgrade to v1.0.0"));
    assert!(hint.contains("version = \"= 1.0.0\""));
}

#[tokio::test]
async fn lock_messages_follow_the_change_kind() {
    let ws = Workspace::new();
    let cancel = CancellationToken::new();
    let installer = ws.installer(vec![CountingSource::new("acme/widgets", &["1.0.0", "2.0.0"])]);

    let created = resolve(
        &requirements(&[("", "acme/widgets", "~> 1.0")]),
        &ws.store(),
        &installer,
        InstallMode::NewProvidersOnly,
        &cancel,
    )
    .await
    .unwrap();
    assert!(created.notes().iter().any(|n| n.contains("created a lock file")));

    let changed = resolve(
        &requirements(&[("", "acme/widgets", "~> 2.0")]),
        &ws.store(),
        &installer,
        InstallMode::NewProvidersOnly,
        &cancel,
    )
    .await
    .unwrap();
    assert_eq!(changed.lock_change, Some(LockChange::Updated));
    assert!(changed.notes().iter().any(|n| n.contains("made some changes")));
}

#[tokio::test]
async fn events_are_bracketed_by_pending_and_fetched() {
    let ws = Workspace::new();
    let (sink, rx) = EventSink::channel();
    let installer = ws
        .installer(vec![CountingSource::new("acme/widgets", &["1.0.0"])])
        .with_events(sink);

    resolve(
        &requirements(&[("", "acme/widgets", "")]),
        &ws.store(),
        &installer,
        InstallMode::NewProvidersOnly,
        &CancellationToken::new(),
    )
    .await
    .unwrap();
    drop(installer);

    let events: Vec<InstallEvent> = rx.iter().collect();
    assert!(matches!(events.first(), Some(InstallEvent::PendingProviders(p)) if p.len() == 1));
    assert!(matches!(
        events.last(),
        Some(InstallEvent::ProvidersFetched {
            third_party_signed: false
        })
    ));
    assert!(events.iter().any(|e| matches!(
        e,
        InstallEvent::QueryBegin { locked: false, .. }
    )));
    assert!(events.iter().any(|e| matches!(e, InstallEvent::FetchSuccess { .. })));
}

#[tokio::test]
async fn stale_lock_entry_is_selected_again() {
    let ws = Workspace::new();
    let cancel = CancellationToken::new();
    let source = CountingSource::new("acme/widgets", &["1.0.0", "2.0.0", "2.1.0"]);
    let installer = ws.installer(vec![source.clone()]);

    resolve(
        &requirements(&[("", "acme/widgets", "~> 1.0")]),
        &ws.store(),
        &installer,
        InstallMode::NewProvidersOnly,
        &cancel,
    )
    .await
    .unwrap();
    assert_eq!(source.queries(), 1);

    // The locked 1.0.0 no longer satisfies the configuration.
    let report = resolve(
        &requirements(&[("", "acme/widgets", ">= 2.0")]),
        &ws.store(),
        &installer,
        InstallMode::NewProvidersOnly,
        &cancel,
    )
    .await
    .unwrap();

    assert_eq!(source.queries(), 2);
    assert!(report.is_success());
    assert_eq!(report.lock_change, Some(LockChange::Updated));
    let locks = ws.store().load().await.unwrap();
    assert_eq!(locks.get(&widgets()).unwrap().version, Version::new(2, 1, 0));
}

#[tokio::test]
async fn middle_provider_failure_leaves_the_others_installed() {
    let ws = Workspace::new();
    let reqs = requirements(&[
        ("", "acme/alpha", ""),
        ("", "acme/missing", ""),
        ("", "acme/widgets", ""),
    ]);

    let report = resolve(
        &reqs,
        &ws.store(),
        &ws.installer(vec![
            CountingSource::new("acme/alpha", &["0.3.0"]),
            CountingSource::new("acme/widgets", &["1.0.0"]),
        ]),
        InstallMode::NewProvidersOnly,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    let alpha = ProviderIdentity::parse("acme/alpha").unwrap();
    let missing = ProviderIdentity::parse("acme/missing").unwrap();
    assert!(matches!(report.install.outcomes[&alpha], InstallOutcome::Installed { .. }));
    assert!(matches!(report.install.outcomes[&widgets()], InstallOutcome::Installed { .. }));
    assert!(matches!(report.install.outcomes[&missing], InstallOutcome::Failed(_)));
    assert_eq!(report.install.failures().count(), 1);
    assert!(!report.is_success());
    assert!(report.lock_change.is_none());
    assert!(!ws.dir.path().join(".pinion.lock").exists());
}

fn directory_mirror(root: &Path) {
    let pkg = root.join("registry.pinion.dev/acme/widgets/1.0.0/linux_amd64");
    write_package(&pkg, &Version::new(1, 0, 0));
}

#[tokio::test]
async fn relocated_mirror_keeps_the_lock_unchanged() {
    let ws = Workspace::new();
    let cancel = CancellationToken::new();
    let reqs = requirements(&[("", "acme/widgets", "~> 1.0")]);

    let first_mirror = tempfile::tempdir().unwrap();
    directory_mirror(first_mirror.path());
    let created = resolve(
        &reqs,
        &ws.store(),
        &ws.installer(vec![Arc::new(DirectorySource::new(first_mirror.path()))]),
        InstallMode::NewProvidersOnly,
        &cancel,
    )
    .await
    .unwrap();
    assert_eq!(created.lock_change, Some(LockChange::Created));
    let before = ws.lock_bytes();
    let entry = ws.store().load().await.unwrap().get(&widgets()).cloned().unwrap();
    assert_eq!(entry.origin, "registry.pinion.dev");

    // Another machine: fresh working set, same mirror content elsewhere.
    std::fs::remove_dir_all(ws.dir.path().join(".pinion")).unwrap();
    let second_mirror = tempfile::tempdir().unwrap();
    directory_mirror(second_mirror.path());
    let report = resolve(
        &reqs,
        &ws.store(),
        &ws.installer(vec![Arc::new(DirectorySource::new(second_mirror.path()))]),
        InstallMode::NewProvidersOnly,
        &cancel,
    )
    .await
    .unwrap();

    assert!(matches!(
        report.install.outcomes[&widgets()],
        InstallOutcome::Installed { .. }
    ));
    assert_eq!(report.lock_change, Some(LockChange::Unchanged));
    assert_eq!(ws.lock_bytes(), before);
}

const LINUX_ZIP: &str = "pinion-provider-widgets_1.0.0_linux_amd64.zip";

fn zip_bytes(content: &[u8]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    zip.start_file("plugin", zip::write::SimpleFileOptions::default())
        .unwrap();
    zip.write_all(content).unwrap();
    zip.finish().unwrap().into_inner()
}

/// A registry serving the linux package of acme/widgets 1.0.0. Its signed
/// checksum list also names a darwin archive with `darwin_hex`.
async fn signed_registry(
    package: &[u8],
    darwin_hex: &str,
) -> (mockito::ServerGuard, Vec<mockito::Mock>) {
    let mut server = mockito::Server::new_async().await;
    let signer = SigningKey::from_bytes(&[3; 32]);
    let doc = format!(
        "{}  {LINUX_ZIP}\n{darwin_hex}  pinion-provider-widgets_1.0.0_darwin_arm64.zip\n",
        hex::encode(Sha256::digest(package))
    );
    let signature = STANDARD.encode(signer.sign(doc.as_bytes()).to_bytes());
    let download = serde_json::json!({
        "protocols": ["5.0"],
        "filename": LINUX_ZIP,
        "download_url": "/files/widgets.zip",
        "shasums_url": "/files/SHA256SUMS",
        "shasums_signature_url": "/files/SHA256SUMS.sig",
        "signing_keys": {
            "ed25519_keys": [{
                "key_id": "COMMUNITY",
                "public_key": STANDARD.encode(signer.verifying_key().to_bytes()),
            }]
        }
    });

    let mocks = vec![
        server
            .mock("GET", "/.well-known/pinion.json")
            .with_body(r#"{"providers.v1": "/v1/providers/"}"#)
            .create_async()
            .await,
        server
            .mock("GET", "/v1/providers/acme/widgets/1.0.0/download/linux/amd64")
            .with_body(download.to_string())
            .create_async()
            .await,
        server
            .mock("GET", "/files/widgets.zip")
            .with_body(package)
            .create_async()
            .await,
        server
            .mock("GET", "/files/SHA256SUMS")
            .with_body(&doc)
            .create_async()
            .await,
        server
            .mock("GET", "/files/SHA256SUMS.sig")
            .with_body(&signature)
            .create_async()
            .await,
    ];
    (server, mocks)
}

fn registry_installer(ws: &Workspace, server: &mockito::ServerGuard) -> Installer {
    let hosts = BTreeMap::from([("registry.pinion.dev".to_string(), server.url())]);
    ws.installer(vec![Arc::new(RegistrySource::new(
        reqwest::Client::new(),
        hosts,
        Vec::new(),
    ))])
}

fn locked_with(hash: PackageHash) -> Locks {
    [LockEntry {
        provider: widgets(),
        version: Version::new(1, 0, 0),
        constraints: "1.0.0".into(),
        origin: "registry.pinion.dev".into(),
        hashes: BTreeSet::from([hash]),
        signing: None,
    }]
    .into_iter()
    .collect()
}

#[tokio::test]
async fn other_platform_hash_in_signed_list_does_not_vouch_for_package() {
    let ws = Workspace::new();
    let darwin_hex = "a".repeat(64);
    ws.store()
        .save(&locked_with(PackageHash::archive_from_hex(&darwin_hex).unwrap()))
        .await
        .unwrap();
    let before = ws.lock_bytes();

    let (server, _mocks) = signed_registry(&zip_bytes(b"tampered"), &darwin_hex).await;
    let report = resolve(
        &requirements(&[("", "acme/widgets", "1.0.0")]),
        &ws.store(),
        &registry_installer(&ws, &server),
        InstallMode::NewProvidersOnly,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    let failure = report.install.failures().next().unwrap();
    assert_eq!(failure.category(), ErrorCategory::Integrity);
    assert!(report.lock_change.is_none());
    assert_eq!(ws.lock_bytes(), before);
    assert!(
        !ws.dir
            .path()
            .join(".pinion/providers/registry.pinion.dev/acme/widgets/1.0.0/linux_amd64")
            .exists()
    );
}

#[tokio::test]
async fn verified_package_adds_other_platform_hashes_and_notes_signer() {
    let ws = Workspace::new();
    let darwin_hex = "b".repeat(64);
    let package = zip_bytes(b"widgets 1.0.0");
    let linux = PackageHash::archive_from_hex(&hex::encode(Sha256::digest(&package))).unwrap();
    ws.store().save(&locked_with(linux.clone())).await.unwrap();

    let (server, _mocks) = signed_registry(&package, &darwin_hex).await;
    let report = resolve(
        &requirements(&[("", "acme/widgets", "1.0.0")]),
        &ws.store(),
        &registry_installer(&ws, &server),
        InstallMode::NewProvidersOnly,
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(report.is_success(), "{:?}", report.install.outcomes);
    assert_eq!(report.lock_change, Some(LockChange::Updated));
    let entry = ws.store().load().await.unwrap().get(&widgets()).cloned().unwrap();
    assert!(entry.hashes.contains(&linux));
    assert!(
        entry
            .hashes
            .contains(&PackageHash::archive_from_hex(&darwin_hex).unwrap())
    );
    assert_eq!(entry.hashes.len(), 3);
    assert_eq!(entry.signing.unwrap().key_id, "COMMUNITY");
    assert!(report.notes().iter().any(|n| n == THIRD_PARTY_NOTE));
}
