use anyhow::Result;
use tokio::select;
use tokio::time::{Interval, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ConfigStore;
use crate::mode::ModeCoordinator;

fn new_ticker(period: std::time::Duration) -> Interval {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Re-reads the config every tick and drives the mode coordinator with the
/// fresh snapshot. Persisted mode and power make the first tick after a
/// restart a no-op when nothing changed.
pub async fn run(mut config: ConfigStore, cancel: CancellationToken) -> Result<()> {
    let mut settings = config.current();
    let mut coordinator = ModeCoordinator::from_settings(&settings);
    let mut ticker = new_ticker(settings.schedule_poll_interval);
    info!(
        config = %config.path().display(),
        interval = ?settings.schedule_poll_interval,
        "schedule loop started"
    );

    loop {
        select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if config.reload() {
            settings = config.current();
            coordinator = ModeCoordinator::from_settings(&settings);
            if ticker.period() != settings.schedule_poll_interval {
                ticker = new_ticker(settings.schedule_poll_interval);
                ticker.reset();
            }
            info!("configuration reloaded");
        }

        let now = settings.local_now();
        let outcome = coordinator.tick(&settings, now);
        debug!(
            %now,
            active = outcome.decision.active,
            mode = %outcome.decision.mode,
            power = %outcome.decision.power,
            mode_changed = outcome.mode_changed,
            power_changed = outcome.power_changed,
            "schedule tick"
        );
    }

    info!("schedule loop stopped");
    Ok(())
}
