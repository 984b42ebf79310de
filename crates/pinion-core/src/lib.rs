pub mod cache;
pub mod error;
pub mod events;
pub mod fetch;
pub mod init;
pub mod installer;
pub mod locks;
pub mod paths;
pub mod reconcile;
pub mod requirements;
pub mod settings;
pub mod source;

pub use error::{
    CollectError, ErrorCategory, InitError, InstallError, LockFileError, SettingsError, SourceError,
};
pub use events::{EventSink, InstallEvent};
pub use init::{InitOptions, InitReport, init};
pub use installer::{InstallMode, InstallOutcome, InstallReport, InstallWarning, Installer};
pub use locks::{LockEntry, LockStore, Locks};
pub use reconcile::{LockChange, reconcile};
pub use requirements::{ConfigTree, Requirements, StateSnapshot, collect};
pub use settings::Settings;
