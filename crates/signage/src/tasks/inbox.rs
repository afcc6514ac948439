use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::select;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::error::Error;
use crate::pipeline::PublishPipeline;
use crate::quiescence::{QuiescenceWatcher, QuietTick};

/// Polls the inbox and runs the pipeline each time it settles. The watcher
/// starts without a baseline so uploads left from before a restart are
/// converted too. The loop is blocked while a run is in progress.
pub async fn run(
    settings: Arc<Settings>,
    pipeline: Arc<PublishPipeline>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut watcher = QuiescenceWatcher::new(
        settings.inbox_dir.clone(),
        settings.ignore.clone(),
        settings.inbox_watch,
    );
    let mut ticker = interval(watcher.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(
        dir = %watcher.dir().display(),
        poll = ?watcher.poll_interval(),
        quiet = ?watcher.quiet_period(),
        "inbox watcher started"
    );

    loop {
        select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match watcher.poll(Instant::now()) {
            Ok(QuietTick::Stable(fingerprint)) => {
                info!(%fingerprint, "inbox settled; starting conversion");
                let pipeline = Arc::clone(&pipeline);
                let outcome = tokio::task::spawn_blocking(move || pipeline.run())
                    .await
                    .context("conversion task panicked")?;
                match outcome {
                    Ok(report) => debug!(summary = %report.summary(), "conversion complete"),
                    Err(Error::AlreadyRunning) => {
                        warn!("PROCESSING marker present; skipping this settle")
                    }
                    Err(err) => warn!(error = %err, "conversion failed; result recorded in READY"),
                }
            }
            Ok(QuietTick::SettledEmpty) => debug!("inbox emptied before settling"),
            Ok(QuietTick::Changed) => debug!("inbox changed; quiet period restarted"),
            Ok(QuietTick::Idle | QuietTick::Settling { .. }) => {}
            Err(err) => warn!(error = %err, "failed to scan inbox"),
        }
    }

    info!("inbox watcher stopped");
    Ok(())
}
