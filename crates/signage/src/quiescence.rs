//! Poll-driven "has this directory settled?" detector.

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::config::WatchSettings;
use crate::fingerprint::{Fingerprint, IgnoreSet, Observation, observe};

/// Outcome of feeding one observation into [`QuietState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuietTick {
    /// Nothing pending and nothing changed.
    Idle,
    /// Fingerprint differs from the previous tick; the quiet clock restarted.
    Changed,
    /// A change is pending but the quiet period has not elapsed.
    Settling { remaining: Duration },
    /// Settled with content present. Emitted once per settle.
    Stable(Fingerprint),
    /// Settled but the directory is empty; the pending change is dropped.
    SettledEmpty,
}

#[derive(Debug, Clone)]
pub struct QuietState {
    quiet_period: Duration,
    last_fingerprint: Option<Fingerprint>,
    last_change: Option<Instant>,
    pending: bool,
}

impl QuietState {
    /// No baseline: the first observation counts as a change, so content
    /// left over from before a restart is still acted on.
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            last_fingerprint: None,
            last_change: None,
            pending: false,
        }
    }

    /// Baseline taken from `fingerprint`; only later changes count.
    pub fn primed(quiet_period: Duration, fingerprint: Fingerprint) -> Self {
        Self {
            last_fingerprint: Some(fingerprint),
            ..Self::new(quiet_period)
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn observe(&mut self, observation: &Observation, now: Instant) -> QuietTick {
        if self.last_fingerprint.as_ref() != Some(&observation.fingerprint) {
            self.last_fingerprint = Some(observation.fingerprint.clone());
            self.last_change = Some(now);
            self.pending = true;
            return QuietTick::Changed;
        }

        if !self.pending {
            return QuietTick::Idle;
        }

        let since = self.last_change.unwrap_or(now);
        let elapsed = now.saturating_duration_since(since);
        if elapsed < self.quiet_period {
            return QuietTick::Settling {
                remaining: self.quiet_period - elapsed,
            };
        }

        self.pending = false;
        if observation.entries == 0 {
            QuietTick::SettledEmpty
        } else {
            QuietTick::Stable(observation.fingerprint.clone())
        }
    }
}

/// Binds a [`QuietState`] to a directory and its polling configuration.
#[derive(Debug)]
pub struct QuiescenceWatcher {
    dir: PathBuf,
    ignore: IgnoreSet,
    settings: WatchSettings,
    state: QuietState,
}

impl QuiescenceWatcher {
    pub fn new(dir: PathBuf, ignore: IgnoreSet, settings: WatchSettings) -> Self {
        let state = QuietState::new(settings.quiet_period);
        Self {
            dir,
            ignore,
            settings,
            state,
        }
    }

    /// Uses the directory's current content as the baseline.
    pub fn primed(dir: PathBuf, ignore: IgnoreSet, settings: WatchSettings) -> io::Result<Self> {
        let baseline = observe(&dir, &ignore)?;
        let state = QuietState::primed(settings.quiet_period, baseline.fingerprint);
        Ok(Self {
            dir,
            ignore,
            settings,
            state,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn poll_interval(&self) -> Duration {
        self.settings.poll_interval
    }

    pub fn quiet_period(&self) -> Duration {
        self.settings.quiet_period
    }

    pub fn poll(&mut self, now: Instant) -> io::Result<QuietTick> {
        let observation = observe(&self.dir, &self.ignore)?;
        Ok(self.state.observe(&observation, now))
    }
}
