//! Installer progress events.
//!
//! The engine reports progress exclusively through [`InstallEvent`] values
//! sent down one ordered channel. Provider pipelines running concurrently all
//! hold clones of the same [`EventSink`]; the channel serializes them. The
//! presentation layer drains the receiver on its own thread.

use std::path::PathBuf;
use std::sync::mpsc::{Receiver, Sender, channel};

use pinion_schema::{ProviderIdentity, Version};

use crate::source::Authentication;

/// Everything the installer reports while it works.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallEvent {
    /// Emitted once before any pipeline starts, with each provider's
    /// constraints as a display string.
    PendingProviders(Vec<(ProviderIdentity, String)>),
    /// A provider was found built in to the tool.
    BuiltIn { provider: ProviderIdentity },
    /// A built-in provider cannot be used.
    BuiltInFailure {
        provider: ProviderIdentity,
        reason: String,
    },
    /// Version selection started; `locked` means the lock entry is reused and
    /// no source query happens.
    QueryBegin {
        provider: ProviderIdentity,
        constraints: String,
        locked: bool,
    },
    /// The source attached warnings to its version list.
    QueryWarnings {
        provider: ProviderIdentity,
        warnings: Vec<String>,
    },
    /// The source could not list versions.
    QueryFailure {
        provider: ProviderIdentity,
        reason: String,
    },
    /// The selected version is already present in the working set.
    AlreadyInstalled {
        provider: ProviderIdentity,
        version: Version,
    },
    /// The selected version is being linked from the shared cache.
    CacheLinked {
        provider: ProviderIdentity,
        version: Version,
        cache_dir: PathBuf,
    },
    /// Linking from the shared cache failed.
    CacheLinkFailure {
        provider: ProviderIdentity,
        version: Version,
        reason: String,
    },
    /// A package download or copy started.
    FetchBegin {
        provider: ProviderIdentity,
        version: Version,
        location: String,
    },
    /// A package was fetched, verified and installed.
    FetchSuccess {
        provider: ProviderIdentity,
        version: Version,
        authentication: Authentication,
    },
    /// A package could not be fetched.
    FetchFailure {
        provider: ProviderIdentity,
        version: Version,
        reason: String,
    },
    /// A package did not match the expected hashes or signature.
    HashFailure {
        provider: ProviderIdentity,
        version: Version,
        reason: String,
    },
    /// The best candidate speaks an unsupported plugin protocol. With
    /// `selected` set, an older compatible version was chosen instead;
    /// otherwise the provider fails.
    ProtocolIncompatible {
        provider: ProviderIdentity,
        version: Version,
        selected: Option<Version>,
    },
    /// Every pipeline finished. `third_party_signed` is set when any fetched
    /// package was signed by its developer rather than the maintainers.
    ProvidersFetched { third_party_signed: bool },
}

/// Sending half of the event channel.
///
/// A sink without a receiver (see [`EventSink::null`]) drops every event.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<Sender<InstallEvent>>,
}

impl EventSink {
    /// A connected sink and the receiver that drains it.
    pub fn channel() -> (Self, Receiver<InstallEvent>) {
        let (tx, rx) = channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that discards everything.
    pub fn null() -> Self {
        Self::default()
    }

    /// Send one event. A hung-up receiver is ignored.
    pub fn emit(&self, event: InstallEvent) {
        if let Some(tx) = &self.tx {
            tx.send(event).ok();
        }
    }
}
