//! Local directory (mirror) source.
//!
//! Packages are laid out either unpacked,
//! `<dir>/<host>/<namespace>/<type>/<version>/<os_arch>/`, or packed,
//! `<dir>/<host>/<namespace>/<type>/pinion-provider-<type>_<version>_<os_arch>.zip`.
//! Nothing outside the directory is consulted.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;
use pinion_schema::{Platform, ProviderIdentity, Version};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::{
    Authentication, AvailableVersion, FetchedPackage, PackageLocation, PackageMeta, PackageSource,
    VersionList,
};
use crate::error::SourceError;
use crate::fetch;

/// A source reading packages from one local directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    /// A source rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The mirror directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn provider_dir(&self, provider: &ProviderIdentity) -> PathBuf {
        self.root
            .join(provider.hostname())
            .join(provider.namespace())
            .join(provider.type_name())
    }

    fn not_found(&self, provider: &ProviderIdentity) -> SourceError {
        SourceError::ProviderNotFound {
            provider: provider.clone(),
            searched: vec![self.describe()],
        }
    }

    /// Scan the provider directory for `(version, platform, location)`.
    async fn scan(
        &self,
        provider: &ProviderIdentity,
    ) -> Result<Vec<(Version, Platform, PackageLocation)>, SourceError> {
        let dir = self.provider_dir(provider);
        let packed_prefix = format!("pinion-provider-{}_", provider.type_name());
        tokio::task::spawn_blocking(move || scan_provider_dir(&dir, &packed_prefix))
            .await
            .map_err(|e| SourceError::Io(e.to_string()))
    }
}

fn scan_provider_dir(dir: &Path, packed_prefix: &str) -> Vec<(Version, Platform, PackageLocation)> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut found = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();

        if path.is_dir() {
            let Ok(version) = Version::parse(&name) else {
                continue;
            };
            let Ok(platforms) = std::fs::read_dir(&path) else {
                continue;
            };
            for platform_entry in platforms.flatten() {
                let platform_path = platform_entry.path();
                if !platform_path.is_dir() {
                    continue;
                }
                if let Ok(platform) = platform_entry
                    .file_name()
                    .to_string_lossy()
                    .parse::<Platform>()
                {
                    found.push((
                        version.clone(),
                        platform,
                        PackageLocation::Directory(platform_path),
                    ));
                }
            }
        } else if let Some(rest) = name
            .strip_prefix(packed_prefix)
            .and_then(|r| r.strip_suffix(".zip"))
        {
            // rest is "<version>_<os>_<arch>"
            let Some((version, platform)) = rest.split_once('_') else {
                continue;
            };
            if let (Ok(version), Ok(platform)) =
                (Version::parse(version), platform.parse::<Platform>())
            {
                found.push((version, platform, PackageLocation::Archive(path)));
            }
        }
    }
    found
}

#[async_trait]
impl PackageSource for DirectorySource {
    fn describe(&self) -> String {
        self.root.display().to_string()
    }

    /// Mirrors record the provider's hostname, so lock files do not depend
    /// on where the mirror happens to live.
    fn origin(&self, provider: &ProviderIdentity) -> String {
        provider.hostname().to_string()
    }

    async fn query_versions(
        &self,
        provider: &ProviderIdentity,
    ) -> Result<VersionList, SourceError> {
        let found = self.scan(provider).await?;
        if found.is_empty() {
            return Err(self.not_found(provider));
        }

        let mut by_version: BTreeMap<Version, BTreeSet<Platform>> = BTreeMap::new();
        for (version, platform, _) in found {
            by_version.entry(version).or_default().insert(platform);
        }
        tracing::debug!(
            "{} offers {} version(s) of {provider}",
            self.describe(),
            by_version.len()
        );

        Ok(VersionList {
            versions: by_version
                .into_iter()
                .map(|(version, platforms)| AvailableVersion {
                    version,
                    protocols: Vec::new(),
                    platforms: platforms.into_iter().collect(),
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
        let found = self.scan(provider).await?;
        if found.is_empty() {
            return Err(self.not_found(provider));
        }

        // Prefer an unpacked directory over an archive of the same package.
        let location = found
            .into_iter()
            .filter(|(v, p, _)| v == version && p == platform)
            .map(|(_, _, location)| location)
            .min_by_key(|location| !matches!(location, PackageLocation::Directory(_)))
            .ok_or_else(|| SourceError::PlatformNotSupported {
                provider: provider.clone(),
                version: version.clone(),
                platform: platform.clone(),
                mirror: Some(self.describe()),
            })?;

        Ok(PackageMeta {
            provider: provider.clone(),
            version: version.clone(),
            platform: platform.clone(),
            filename: fetch::package_filename(provider.type_name(), version, platform),
            location,
            protocols: Vec::new(),
            sha256: None,
            checksums: None,
        })
    }

    async fn fetch(
        &self,
        meta: &PackageMeta,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<FetchedPackage, SourceError> {
        if cancel.is_cancelled() {
            return Err(SourceError::Canceled);
        }

        let mut hashes = BTreeSet::new();
        match &meta.location {
            PackageLocation::Directory(src) => fetch::copy_package_dir(src, dest).await?,
            PackageLocation::Archive(archive) => {
                hashes.insert(fetch::archive_hash(archive).await?);
                fetch::unpack_archive(archive, dest).await?;
            }
            PackageLocation::Http(url) => {
                return Err(SourceError::InvalidResponse {
                    location: url.clone(),
                    reason: "directory sources only hold local packages".into(),
                });
            }
        }

        if cancel.is_cancelled() {
            return Err(SourceError::Canceled);
        }
        hashes.insert(fetch::directory_hash(dest).await?);

        Ok(FetchedPackage {
            dir: dest.to_path_buf(),
            authentication: Authentication::Unauthenticated,
            hashes,
            sibling_hashes: BTreeSet::new(),
        })
    }

    async fn suggest_alternative(&self, provider: &ProviderIdentity) -> Option<ProviderIdentity> {
        let host_dir = self.root.join(provider.hostname());
        let provider = provider.clone();
        tokio::task::spawn_blocking(move || closest_provider(&host_dir, &provider))
            .await
            .ok()
            .flatten()
    }
}

/// The provider under `host_dir` whose type best fuzzy-matches `provider`'s.
fn closest_provider(host_dir: &Path, provider: &ProviderIdentity) -> Option<ProviderIdentity> {
    let matcher = SkimMatcherV2::default();

    WalkDir::new(host_dir)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_dir())
        .filter_map(|e| {
            let rel = e.path().strip_prefix(host_dir).ok()?;
            let namespace = rel.parent()?.to_str()?;
            let type_name = rel.file_name()?.to_str()?;
            let candidate =
                ProviderIdentity::new(provider.hostname(), namespace, type_name).ok()?;
            if candidate == *provider {
                return None;
            }
            let score = matcher.fuzzy_match(type_name, provider.type_name())?;
            Some((score, candidate))
        })
        .max_by(|(a, pa), (b, pb)| a.cmp(b).then_with(|| pb.cmp(pa)))
        .map(|(_, candidate)| candidate)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn provider(s: &str) -> ProviderIdentity {
        ProviderIdentity::parse(s).unwrap()
    }

    fn write_zip(path: &Path, files: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, content) in files {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(content).unwrap();
        }
        zip.finish().unwrap();
    }

    fn mirror() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let widgets = dir.path().join("registry.pinion.dev/acme/widgets");
        std::fs::create_dir_all(widgets.join("2.6.0/linux_amd64")).unwrap();
        std::fs::write(widgets.join("2.6.0/linux_amd64/plugin"), b"v2.6.0").unwrap();
        write_zip(
            &widgets.join("pinion-provider-widgets_2.7.0_linux_amd64.zip"),
            &[("plugin", b"v2.7.0")],
        );
        write_zip(
            &widgets.join("pinion-provider-widgets_2.7.0_darwin_arm64.zip"),
            &[("plugin", b"v2.7.0-mac")],
        );
        dir
    }

    #[tokio::test]
    async fn finds_packed_and_unpacked_versions() {
        let dir = mirror();
        let source = DirectorySource::new(dir.path());
        let list = source.query_versions(&provider("acme/widgets")).await.unwrap();

        let versions: Vec<String> = list.versions.iter().map(|v| v.version.to_string()).collect();
        assert_eq!(versions, vec!["2.6.0", "2.7.0"]);
        assert_eq!(list.versions[1].platforms.len(), 2);
    }

    #[tokio::test]
    async fn fetch_archive_records_both_hashes() {
        let dir = mirror();
        let source = DirectorySource::new(dir.path());
        let p = provider("acme/widgets");
        let meta = source
            .package_meta(&p, &Version::new(2, 7, 0), &Platform::new("linux", "amd64"))
            .await
            .unwrap();
        assert!(matches!(meta.location, PackageLocation::Archive(_)));

        let out = tempfile::tempdir().unwrap();
        let dest = out.path().join("pkg");
        let fetched = source
            .fetch(&meta, &dest, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(std::fs::read(dest.join("plugin")).unwrap(), b"v2.7.0");
        assert_eq!(fetched.authentication, Authentication::Unauthenticated);
        assert_eq!(fetched.hashes.len(), 2);
        assert!(fetched.sibling_hashes.is_empty());
    }

    #[test]
    fn origin_is_the_provider_hostname() {
        let a = DirectorySource::new("/srv/mirror");
        let b = DirectorySource::new("/home/someone/mirror");
        let p = provider("example.com/acme/widgets");
        assert_eq!(a.origin(&p), "example.com");
        assert_eq!(a.origin(&p), b.origin(&p));
    }

    #[tokio::test]
    async fn missing_platform_names_mirror() {
        let dir = mirror();
        let source = DirectorySource::new(dir.path());
        let err = source
            .package_meta(
                &provider("acme/widgets"),
                &Version::new(2, 6, 0),
                &Platform::new("darwin", "arm64"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::PlatformNotSupported { mirror: Some(_), .. }));
    }

    #[tokio::test]
    async fn unknown_provider_lists_directory_and_suggests() {
        let dir = mirror();
        let source = DirectorySource::new(dir.path());
        let missing = provider("other/widget");

        match source.query_versions(&missing).await.unwrap_err() {
            SourceError::ProviderNotFound { searched, .. } => {
                assert_eq!(searched, vec![dir.path().display().to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        let alt = source.suggest_alternative(&missing).await.unwrap();
        assert_eq!(alt, provider("acme/widgets"));
    }
}
