use std::sync::Arc;

use anyhow::Result;
use tokio::select;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::status::{StatusReporter, StatusTick};

pub async fn run(
    settings: Arc<Settings>,
    reporter: StatusReporter,
    cancel: CancellationToken,
) -> Result<()> {
    let mut ticker = interval(settings.status_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval = ?settings.status_interval, "status reporter started");

    loop {
        select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match reporter.tick(settings.local_now()) {
            Ok(StatusTick::Written(name)) => debug!(name, "status snapshot refreshed"),
            Ok(StatusTick::Cleared(_)) => {}
            Err(err) => warn!(error = %err, "failed to update status snapshot"),
        }
    }

    info!("status reporter stopped");
    Ok(())
}
