//! Download, unpack and authenticate provider packages.
//!
//! Downloads stream to disk while hashing with SHA-256; a mismatch removes the
//! partial file. Every await point races the run's cancellation token.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use futures::StreamExt;
use pinion_schema::{PackageHash, Platform, SigningInfo, SigningTrust, Version};
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::error::SourceError;
use crate::source::PublicKey;

/// Base64 Ed25519 public key of the pinion maintainers' provider signing key.
pub const FIRST_PARTY_KEY: &str = "wFDFY3pE+oYp//PMzOIwDLNipj2Z2V/FQUUmb0MyRFo=";

/// User agent sent with every registry request.
pub const USER_AGENT: &str = concat!("pinion/", env!("CARGO_PKG_VERSION"));

/// Conventional archive name for a provider package.
pub fn package_filename(type_name: &str, version: &Version, platform: &Platform) -> String {
    format!("pinion-provider-{type_name}_{version}_{platform}.zip")
}

/// Fetch a small document into memory.
pub async fn get_bytes(
    client: &Client,
    url: &str,
    cancel: &CancellationToken,
) -> Result<Vec<u8>, SourceError> {
    let request = async {
        let response = client
            .get(url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await
            .map_err(|e| http_error(url, &e))?
            .error_for_status()
            .map_err(|e| http_error(url, &e))?;
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| http_error(url, &e))
    };
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(SourceError::Canceled),
        result = request => result,
    }
}

/// Stream `url` into `dest`, returning the hex SHA-256 of what was written.
///
/// When `expected` is given and does not match, `dest` is removed and a
/// checksum error returned.
pub async fn download(
    client: &Client,
    url: &str,
    dest: &Path,
    expected: Option<&str>,
    cancel: &CancellationToken,
) -> Result<String, SourceError> {
    let response = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(SourceError::Canceled),
        r = client.get(url).header(reqwest::header::USER_AGENT, USER_AGENT).send() => r,
    }
    .map_err(|e| http_error(url, &e))?
    .error_for_status()
    .map_err(|e| http_error(url, &e))?;

    let mut file = File::create(dest).await?;
    let mut stream = response.bytes_stream();
    let mut hasher = Sha256::new();

    loop {
        let chunk = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                drop(file);
                tokio::fs::remove_file(dest).await.ok();
                return Err(SourceError::Canceled);
            }
            next = stream.next() => next,
        };
        let Some(chunk) = chunk else { break };
        let chunk = chunk.map_err(|e| http_error(url, &e))?;
        file.write_all(&chunk).await?;
        hasher.write_all(&chunk)?;
    }

    file.flush().await?;
    let actual = hex::encode(hasher.finalize());

    if let Some(expected) = expected {
        if !actual.eq_ignore_ascii_case(expected) {
            tokio::fs::remove_file(dest).await.ok();
            return Err(SourceError::Checksum(format!(
                "archive has SHA-256 {actual}, expected {expected}"
            )));
        }
    }

    tracing::debug!("Downloaded {url} ({actual})");
    Ok(actual)
}

/// Extract a `.zip` archive into `dest`.
pub async fn unpack_archive(archive: &Path, dest: &Path) -> Result<(), SourceError> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<(), SourceError> {
        let file = std::fs::File::open(&archive)?;
        let mut zip = zip::ZipArchive::new(file).map_err(|e| {
            SourceError::Io(format!("{} is not a valid zip archive: {e}", archive.display()))
        })?;
        std::fs::create_dir_all(&dest)?;
        zip.extract(&dest)
            .map_err(|e| SourceError::Io(format!("failed to extract {}: {e}", archive.display())))
    })
    .await
    .map_err(|e| SourceError::Io(e.to_string()))?
}

/// Copy an unpacked package directory's contents into `dest`.
pub async fn copy_package_dir(src: &Path, dest: &Path) -> Result<(), SourceError> {
    let src = src.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<(), SourceError> {
        std::fs::create_dir_all(&dest)?;
        let options = fs_extra::dir::CopyOptions::new().content_only(true);
        fs_extra::dir::copy(&src, &dest, &options)
            .map(|_| ())
            .map_err(|e| SourceError::Io(format!("failed to copy {}: {e}", src.display())))
    })
    .await
    .map_err(|e| SourceError::Io(e.to_string()))?
}

/// Directory hash of an unpacked package, computed off the async runtime.
pub async fn directory_hash(dir: &Path) -> Result<PackageHash, SourceError> {
    let dir: PathBuf = dir.to_path_buf();
    tokio::task::spawn_blocking(move || PackageHash::of_directory(&dir))
        .await
        .map_err(|e| SourceError::Io(e.to_string()))?
        .map_err(SourceError::from)
}

/// Archive hash of a local `.zip`, computed off the async runtime.
pub async fn archive_hash(archive: &Path) -> Result<PackageHash, SourceError> {
    let archive = archive.to_path_buf();
    tokio::task::spawn_blocking(move || PackageHash::of_archive(&archive))
        .await
        .map_err(|e| SourceError::Io(e.to_string()))?
        .map_err(SourceError::from)
}

/// Parse a checksum document into `(hex, filename)` pairs.
pub fn parse_checksums(doc: &str) -> Vec<(String, String)> {
    doc.lines()
        .filter_map(|line| {
            let (hash, name) = line.trim().split_once(char::is_whitespace)?;
            Some((hash.to_lowercase(), name.trim().to_string()))
        })
        .collect()
}

/// Archive hashes for every platform of one provider version listed in a
/// checksum document.
pub fn archive_hashes_for(
    doc: &str,
    type_name: &str,
    version: &Version,
) -> BTreeSet<PackageHash> {
    let prefix = format!("pinion-provider-{type_name}_{version}_");
    parse_checksums(doc)
        .into_iter()
        .filter(|(_, name)| {
            name.strip_prefix(&prefix)
                .is_some_and(|rest| rest.ends_with(".zip"))
        })
        .filter_map(|(hex, _)| PackageHash::archive_from_hex(&hex).ok())
        .collect()
}

/// Verify a detached signature over a checksum document.
///
/// Tries each candidate key; the first that verifies wins. The key is
/// first-party when its public key is [`FIRST_PARTY_KEY`] or listed in
/// `first_party`.
pub fn verify_signature(
    doc: &[u8],
    signature_b64: &str,
    keys: &[PublicKey],
    first_party: &[String],
) -> Result<SigningInfo, SourceError> {
    let engine = base64::engine::general_purpose::STANDARD;
    let signature_bytes = engine
        .decode(signature_b64.trim())
        .map_err(|_| SourceError::Signature("signature is not valid base64".into()))?;
    let signature = Signature::from_bytes(
        signature_bytes
            .as_slice()
            .try_into()
            .map_err(|_| SourceError::Signature("signature has the wrong length".into()))?,
    );

    for key in keys {
        let Ok(public_bytes) = engine.decode(key.public_key.trim()) else {
            tracing::warn!("Skipping signing key {} with invalid encoding", key.key_id);
            continue;
        };
        let Ok(public_bytes) = <[u8; 32]>::try_from(public_bytes.as_slice()) else {
            continue;
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&public_bytes) else {
            continue;
        };
        if verifying_key.verify(doc, &signature).is_ok() {
            let first = key.public_key.trim() == FIRST_PARTY_KEY
                || first_party.iter().any(|k| k.trim() == key.public_key.trim());
            return Ok(SigningInfo {
                key_id: key.key_id.clone(),
                trust: if first {
                    SigningTrust::FirstParty
                } else {
                    SigningTrust::ThirdParty
                },
            });
        }
    }

    Err(SourceError::Signature(format!(
        "none of the {} published signing key(s) produced this signature",
        keys.len()
    )))
}

fn http_error(url: &str, e: &reqwest::Error) -> SourceError {
    if e.is_connect() || e.is_timeout() {
        let hostname = reqwest::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| url.to_string());
        SourceError::RegistryUnreachable {
            hostname,
            reason: e.to_string(),
        }
    } else {
        SourceError::InvalidResponse {
            location: url.to_string(),
            reason: e.to_string(),
        }
    }
}
