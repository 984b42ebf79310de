use anyhow::{Context, Result, bail};
use pinion_core::{EventSink, InitOptions, Settings};
use tokio_util::sync::CancellationToken;

use crate::ui::actor::EventRenderer;
use crate::ui::diagnostics;

/// `pinion init`
pub async fn init(opts: &InitOptions) -> Result<()> {
    let settings = Settings::load().context("Failed to load pinion settings")?;

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::debug!("Interrupt received; canceling provider installation");
                cancel.cancel();
            }
        })
    };

    let (sink, events) = EventSink::channel();
    let renderer = EventRenderer::spawn(events);

    let result = pinion_core::init(&settings, opts, sink, &cancel).await;
    interrupt.abort();
    // The sink was dropped with the installer, so the renderer drains and exits.
    renderer.join();

    let report = result?;
    diagnostics::print_report(&report);

    if report.install.canceled {
        bail!("provider installation was canceled");
    }
    let failed = report.install.failures().count();
    if failed > 0 {
        bail!("{failed} provider(s) could not be installed");
    }
    Ok(())
}
