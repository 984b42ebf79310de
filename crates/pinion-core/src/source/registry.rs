//! HTTP provider registry source.
//!
//! Each hostname is resolved through service discovery
//! (`/.well-known/pinion.json`), which names the base path of the
//! `providers.v1` API. Discovery results are cached for the lifetime of the
//! source.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use pinion_schema::{Platform, ProviderIdentity, Version};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::{
    Authentication, AvailableVersion, FetchedPackage, PackageLocation, PackageMeta, PackageSource,
    PublicKey, SignedChecksums, VersionList,
};
use crate::error::SourceError;
use crate::fetch::{self, USER_AGENT};
use crate::settings::Settings;

const DISCOVERY_PATH: &str = ".well-known/pinion.json";
const PROVIDERS_SERVICE: &str = "providers.v1";

#[derive(Deserialize)]
struct VersionsResponse {
    #[serde(default)]
    versions: Vec<VersionEntry>,
    #[serde(default)]
    warnings: Vec<String>,
}

#[derive(Deserialize)]
struct VersionEntry {
    version: String,
    #[serde(default)]
    protocols: Vec<String>,
    #[serde(default)]
    platforms: Vec<PlatformEntry>,
}

#[derive(Deserialize)]
struct PlatformEntry {
    os: String,
    arch: String,
}

#[derive(Deserialize)]
struct DownloadResponse {
    #[serde(default)]
    protocols: Vec<String>,
    filename: String,
    download_url: String,
    shasums_url: Option<String>,
    shasums_signature_url: Option<String>,
    shasum: Option<String>,
    #[serde(default)]
    signing_keys: SigningKeys,
}

#[derive(Deserialize, Default)]
struct SigningKeys {
    #[serde(default)]
    ed25519_keys: Vec<KeyEntry>,
}

#[derive(Deserialize)]
struct KeyEntry {
    key_id: String,
    public_key: String,
}

#[derive(Deserialize)]
struct LegacyLookup {
    id: String,
}

/// A source backed by provider registries reachable over HTTP(S).
#[derive(Debug)]
pub struct RegistrySource {
    client: Client,
    hosts: BTreeMap<String, String>,
    first_party_keys: Vec<String>,
    discovered: Mutex<HashMap<String, Result<Url, SourceError>>>,
}

impl RegistrySource {
    /// Build a registry source from explicit parts.
    pub fn new(
        client: Client,
        hosts: BTreeMap<String, String>,
        first_party_keys: Vec<String>,
    ) -> Self {
        Self {
            client,
            hosts,
            first_party_keys,
            discovered: Mutex::new(HashMap::new()),
        }
    }

    /// Build a registry source honouring host overrides, trusted keys and
    /// the HTTP timeout from `settings`.
    pub fn from_settings(settings: &Settings) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.http_timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to default HTTP client: {e}");
                Client::new()
            });
        Self::new(
            client,
            settings.registry_hosts.clone(),
            settings.first_party_keys.clone(),
        )
    }

    fn base_url(&self, hostname: &str) -> String {
        self.hosts
            .get(hostname)
            .cloned()
            .unwrap_or_else(|| format!("https://{hostname}"))
    }

    /// The `providers.v1` base URL for `hostname`, discovering it on first use.
    async fn providers_url(&self, hostname: &str) -> Result<Url, SourceError> {
        let mut discovered = self.discovered.lock().await;
        if let Some(result) = discovered.get(hostname) {
            return result.clone();
        }
        let result = self.discover(hostname).await;
        discovered.insert(hostname.to_string(), result.clone());
        result
    }

    async fn discover(&self, hostname: &str) -> Result<Url, SourceError> {
        let base = self.base_url(hostname);
        let invalid = |reason: String| SourceError::InvalidResponse {
            location: base.clone(),
            reason,
        };
        let base_url = Url::parse(&format!("{}/", base.trim_end_matches('/')))
            .map_err(|e| invalid(e.to_string()))?;
        let url = base_url
            .join(DISCOVERY_PATH)
            .map_err(|e| invalid(e.to_string()))?;

        tracing::debug!("Discovering services for {hostname} at {url}");
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| unreachable_host(hostname, &e))?;

        let no_providers = |has_other_version| SourceError::HostNoProviders {
            hostname: hostname.to_string(),
            has_other_version,
        };
        if !response.status().is_success() {
            return Err(no_providers(false));
        }
        let services: HashMap<String, serde_json::Value> = match response.json().await {
            Ok(services) => services,
            Err(_) => return Err(no_providers(false)),
        };

        match services.get(PROVIDERS_SERVICE).and_then(|v| v.as_str()) {
            Some(path) => url.join(path).map_err(|e| invalid(e.to_string())),
            None => {
                let other = services.keys().any(|k| k.starts_with("providers."));
                Err(no_providers(other))
            }
        }
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        hostname: &str,
        url: &Url,
    ) -> Result<Option<T>, SourceError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| unreachable_host(hostname, &e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .map_err(|e| SourceError::InvalidResponse {
                location: url.to_string(),
                reason: e.to_string(),
            })?;
        response
            .json()
            .await
            .map(Some)
            .map_err(|e| SourceError::InvalidResponse {
                location: url.to_string(),
                reason: e.to_string(),
            })
    }

    fn join(base: &Url, path: &str) -> Result<Url, SourceError> {
        base.join(path).map_err(|e| SourceError::InvalidResponse {
            location: base.to_string(),
            reason: e.to_string(),
        })
    }
}

fn unreachable_host(hostname: &str, e: &reqwest::Error) -> SourceError {
    SourceError::RegistryUnreachable {
        hostname: hostname.to_string(),
        reason: e.to_string(),
    }
}

#[async_trait]
impl PackageSource for RegistrySource {
    fn describe(&self) -> String {
        "provider registries".to_string()
    }

    fn origin(&self, provider: &ProviderIdentity) -> String {
        provider.hostname().to_string()
    }

    async fn query_versions(
        &self,
        provider: &ProviderIdentity,
    ) -> Result<VersionList, SourceError> {
        let base = self.providers_url(provider.hostname()).await?;
        let url = Self::join(
            &base,
            &format!("{}/{}/versions", provider.namespace(), provider.type_name()),
        )?;

        tracing::debug!("Querying {url}");
        let Some(body) = self
            .get_json::<VersionsResponse>(provider.hostname(), &url)
            .await?
        else {
            return Err(SourceError::RegistryProviderUnknown {
                provider: provider.clone(),
                hostname: provider.hostname().to_string(),
            });
        };

        let versions = body
            .versions
            .into_iter()
            .filter_map(|entry| match Version::parse(&entry.version) {
                Ok(version) => Some(AvailableVersion {
                    version,
                    protocols: entry.protocols,
                    platforms: entry
                        .platforms
                        .into_iter()
                        .map(|p| Platform::new(p.os, p.arch))
                        .collect(),
                }),
                Err(e) => {
                    tracing::warn!("Ignoring {provider} version from registry: {e}");
                    None
                }
            })
            .collect();

        Ok(VersionList {
            versions,
            warnings: body.warnings,
        })
    }

    async fn package_meta(
        &self,
        provider: &ProviderIdentity,
        version: &Version,
        platform: &Platform,
    ) -> Result<PackageMeta, SourceError> {
        let base = self.providers_url(provider.hostname()).await?;
        let url = Self::join(
            &base,
            &format!(
                "{}/{}/{}/download/{}/{}",
                provider.namespace(),
                provider.type_name(),
                version,
                platform.os(),
                platform.arch()
            ),
        )?;

        let Some(body) = self
            .get_json::<DownloadResponse>(provider.hostname(), &url)
            .await?
        else {
            return Err(SourceError::PlatformNotSupported {
                provider: provider.clone(),
                version: version.clone(),
                platform: platform.clone(),
                mirror: None,
            });
        };

        let download_url = Self::join(&url, &body.download_url)?;
        let checksums = match (body.shasums_url, body.shasums_signature_url) {
            (Some(shasums), Some(signature)) => Some(SignedChecksums {
                shasums_url: Self::join(&url, &shasums)?.to_string(),
                signature_url: Self::join(&url, &signature)?.to_string(),
                keys: body
                    .signing_keys
                    .ed25519_keys
                    .into_iter()
                    .map(|k| PublicKey {
                        key_id: k.key_id,
                        public_key: k.public_key,
                    })
                    .collect(),
            }),
            _ => None,
        };

        Ok(PackageMeta {
            provider: provider.clone(),
            version: version.clone(),
            platform: platform.clone(),
            filename: body.filename,
            location: PackageLocation::Http(download_url.to_string()),
            protocols: body.protocols,
            sha256: body.shasum.map(|s| s.to_lowercase()),
            checksums,
        })
    }

    async fn fetch(
        &self,
        meta: &PackageMeta,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<FetchedPackage, SourceError> {
        let PackageLocation::Http(url) = &meta.location else {
            return Err(SourceError::InvalidResponse {
                location: meta.location.to_string(),
                reason: "registry packages must be fetched over HTTP".into(),
            });
        };

        let mut hashes = std::collections::BTreeSet::new();
        let mut sibling_hashes = std::collections::BTreeSet::new();
        let mut authentication = Authentication::Unauthenticated;
        let mut expected = meta.sha256.clone();

        if let Some(checksums) = &meta.checksums {
            let doc = fetch::get_bytes(&self.client, &checksums.shasums_url, cancel).await?;
            let signature = fetch::get_bytes(&self.client, &checksums.signature_url, cancel).await?;
            let signature = String::from_utf8_lossy(&signature);
            let signing =
                fetch::verify_signature(&doc, &signature, &checksums.keys, &self.first_party_keys)?;

            let doc = String::from_utf8_lossy(&doc);
            let listed = fetch::parse_checksums(&doc)
                .into_iter()
                .find(|(_, name)| name == &meta.filename)
                .map(|(hex, _)| hex)
                .ok_or_else(|| {
                    SourceError::Checksum(format!(
                        "checksum list has no entry for {}",
                        meta.filename
                    ))
                })?;
            if let Some(published) = &meta.sha256 {
                if published != &listed {
                    return Err(SourceError::Checksum(format!(
                        "registry reported SHA-256 {published} but the signed checksum list has {listed}"
                    )));
                }
            }
            expected = Some(listed);
            sibling_hashes.extend(fetch::archive_hashes_for(
                &doc,
                meta.provider.type_name(),
                &meta.version,
            ));
            authentication = Authentication::Signed(signing);
        } else if meta.sha256.is_some() {
            authentication = Authentication::Checksum;
        }

        let staging = tempfile::tempdir()?;
        let archive = staging.path().join(&meta.filename);
        let actual =
            fetch::download(&self.client, url, &archive, expected.as_deref(), cancel).await?;
        hashes.insert(
            pinion_schema::PackageHash::archive_from_hex(&actual)
                .map_err(|e| SourceError::Checksum(e.to_string()))?,
        );

        if cancel.is_cancelled() {
            return Err(SourceError::Canceled);
        }
        fetch::unpack_archive(&archive, dest).await?;
        hashes.insert(fetch::directory_hash(dest).await?);
        sibling_hashes.retain(|h| !hashes.contains(h));

        tracing::info!(
            "Fetched {} v{} ({authentication})",
            meta.provider,
            meta.version
        );
        Ok(FetchedPackage {
            dir: dest.to_path_buf(),
            authentication,
            hashes,
            sibling_hashes,
        })
    }

    async fn suggest_alternative(&self, provider: &ProviderIdentity) -> Option<ProviderIdentity> {
        let base = self.providers_url(provider.hostname()).await.ok()?;
        let url = Self::join(&base, &format!("-/{}/versions", provider.type_name())).ok()?;
        let lookup = self
            .get_json::<LegacyLookup>(provider.hostname(), &url)
            .await
            .ok()??;
        let (namespace, type_name) = lookup.id.split_once('/')?;
        let alternative = ProviderIdentity::new(provider.hostname(), namespace, type_name).ok()?;
        (alternative != *provider).then_some(alternative)
    }
}
