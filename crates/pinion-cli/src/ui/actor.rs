//! Event renderer thread.
//!
//! Provider pipelines run concurrently and all emit into one channel. A single
//! thread owns the receiving end and stdout, so progress lines never tear and
//! the engine never waits on the terminal.

use std::sync::mpsc::Receiver;
use std::thread;

use crossterm::style::Stylize;
use pinion_core::InstallEvent;

/// Handle to the renderer thread.
#[derive(Debug)]
pub struct EventRenderer {
    handle: thread::JoinHandle<()>,
}

impl EventRenderer {
    /// Start draining `events`; the thread exits when every sender is gone.
    pub fn spawn(events: Receiver<InstallEvent>) -> Self {
        let handle = thread::spawn(move || {
            for event in events {
                if let Some(line) = render(&event) {
                    println!("{line}");
                }
            }
        });
        Self { handle }
    }

    /// Wait until every event has been rendered.
    pub fn join(self) {
        if self.handle.join().is_err() {
            tracing::warn!("Event renderer thread panicked");
        }
    }
}

/// One progress line for `event`, or `None` for events reported only in the
/// final diagnostics.
pub fn render(event: &InstallEvent) -> Option<String> {
    let line = match event {
        InstallEvent::PendingProviders(_) => {
            format!("\n{}", "Initializing provider plugins...".bold())
        }
        InstallEvent::BuiltIn { provider } => {
            format!("- {} is built in to pinion", provider.for_display().bold())
        }
        InstallEvent::QueryBegin {
            provider,
            constraints,
            locked,
        } => {
            let provider = provider.for_display();
            if *locked {
                format!("- Reusing previous version of {provider} from the dependency lock file")
            } else if constraints.is_empty() {
                format!("- Finding latest version of {provider}...")
            } else {
                format!("- Finding {provider} versions matching \"{constraints}\"...")
            }
        }
        InstallEvent::QueryWarnings { provider, warnings } => {
            let mut lines = vec![format!(
                "{} the registry returned warnings for {}:",
                "Warning:".yellow().bold(),
                provider.for_display()
            )];
            lines.extend(warnings.iter().map(|w| format!("  - {w}")));
            lines.join("\n")
        }
        InstallEvent::AlreadyInstalled { provider, version } => format!(
            "- Using previously-installed {} v{version}",
            provider.for_display()
        ),
        InstallEvent::CacheLinked {
            provider, version, ..
        } => format!(
            "- Using {} v{version} from the shared cache directory",
            provider.for_display()
        ),
        InstallEvent::FetchBegin {
            provider, version, ..
        } => format!("- Installing {} v{version}...", provider.for_display()),
        InstallEvent::FetchSuccess {
            provider,
            version,
            authentication,
        } => format!(
            "- Installed {} v{version} ({})",
            provider.for_display(),
            authentication.to_string().green()
        ),
        InstallEvent::ProtocolIncompatible {
            provider,
            version,
            selected: Some(selected),
        } => format!(
            "{} {} v{version} is not compatible with this version of pinion; using v{selected}",
            "Warning:".yellow().bold(),
            provider.for_display()
        ),
        InstallEvent::ProtocolIncompatible { selected: None, .. }
        | InstallEvent::BuiltInFailure { .. }
        | InstallEvent::QueryFailure { .. }
        | InstallEvent::CacheLinkFailure { .. }
        | InstallEvent::FetchFailure { .. }
        | InstallEvent::HashFailure { .. }
        | InstallEvent::ProvidersFetched { .. } => return None,
    };
    Some(line)
}
