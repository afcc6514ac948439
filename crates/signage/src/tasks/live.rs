use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::select;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::fingerprint::Fingerprint;
use crate::platform::ViewerControl;
use crate::quiescence::{QuiescenceWatcher, QuietTick};
use crate::state::StateStore;

/// Watches the live directory and restarts the viewer when it settles on
/// content nobody has announced yet. Pipeline publishes are already
/// announced through the recorded fingerprint.
pub async fn run(
    settings: Arc<Settings>,
    state: Arc<dyn StateStore>,
    viewer: Arc<dyn ViewerControl>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut watcher = QuiescenceWatcher::primed(
        settings.live_dir.clone(),
        settings.ignore.clone(),
        settings.live_watch,
    )
    .with_context(|| format!("failed to scan {}", settings.live_dir.display()))?;
    let mut ticker = interval(watcher.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(
        dir = %watcher.dir().display(),
        poll = ?watcher.poll_interval(),
        quiet = ?watcher.quiet_period(),
        "live watcher started"
    );

    loop {
        select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match watcher.poll(Instant::now()) {
            Ok(QuietTick::Stable(fingerprint)) => {
                on_settled(state.as_ref(), viewer.as_ref(), &fingerprint);
            }
            Ok(QuietTick::SettledEmpty) => debug!("live directory emptied"),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "failed to scan live directory"),
        }
    }

    info!("live watcher stopped");
    Ok(())
}

/// Returns whether a restart was requested.
pub fn on_settled(
    state: &dyn StateStore,
    viewer: &dyn ViewerControl,
    fingerprint: &Fingerprint,
) -> bool {
    match state.published() {
        Ok(Some(recorded)) if recorded == *fingerprint => {
            debug!(%fingerprint, "live content matches last publish; restart already requested");
            return false;
        }
        Ok(_) => {}
        Err(err) => warn!(error = %err, "cannot read published fingerprint"),
    }
    viewer.request_restart("live content changed");
    if let Err(err) = state.set_published(fingerprint) {
        warn!(error = %err, "failed to record live fingerprint");
    }
    true
}
