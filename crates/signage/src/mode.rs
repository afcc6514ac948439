//! Schedule → content mode and display power, written only on change.

use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::Settings;
use crate::platform::display_power::DisplayPowerController;
use crate::platform::viewer::RestartCommand;
use crate::platform::{DisplayPower, ViewerControl};
use crate::state::{FileStateStore, Mode, PowerState, StateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModePolicy {
    /// Power the panel off outside the schedule.
    pub hdmi_control: bool,
    /// Keep the off-deck running while the panel is powered off.
    pub off_schedule_slides: bool,
}

impl ModePolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            hdmi_control: settings.hdmi_control,
            off_schedule_slides: settings.off_schedule_slides,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub active: bool,
    pub mode: Mode,
    pub power: PowerState,
}

pub fn decide(active: bool, policy: ModePolicy) -> Decision {
    let (mode, power) = match (active, policy.hdmi_control) {
        (true, _) => (Mode::Normal, PowerState::On),
        (false, true) if policy.off_schedule_slides => (Mode::OffDeck, PowerState::Off),
        (false, true) => (Mode::None, PowerState::Off),
        (false, false) => (Mode::OffDeck, PowerState::On),
    };
    Decision {
        active,
        mode,
        power,
    }
}

/// What one tick changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TickOutcome {
    pub decision: Decision,
    pub mode_changed: bool,
    pub power_changed: bool,
}

pub struct ModeCoordinator {
    state: Arc<dyn StateStore>,
    viewer: Arc<dyn ViewerControl>,
    display: Arc<dyn DisplayPower>,
}

impl ModeCoordinator {
    pub fn new(
        state: Arc<dyn StateStore>,
        viewer: Arc<dyn ViewerControl>,
        display: Arc<dyn DisplayPower>,
    ) -> Self {
        Self {
            state,
            viewer,
            display,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            Arc::new(FileStateStore::from_settings(settings)),
            Arc::new(RestartCommand::new(settings.restart_command.clone())),
            Arc::new(DisplayPowerController::new(settings.power.clone())),
        )
    }

    pub fn evaluate(settings: &Settings, now: NaiveDateTime) -> Decision {
        decide(
            settings.schedule.is_active_at(&now),
            ModePolicy::from_settings(settings),
        )
    }

    pub fn tick(&self, settings: &Settings, now: NaiveDateTime) -> TickOutcome {
        self.apply(Self::evaluate(settings, now))
    }

    /// Persists and acts on `decision`. When the panel is switched on, power
    /// goes first so the restarted viewer comes up on a live display.
    pub fn apply(&self, decision: Decision) -> TickOutcome {
        let (mode_changed, power_changed) = if decision.power == PowerState::On {
            let power_changed = self.apply_power(decision.power);
            (self.apply_mode(decision.mode), power_changed)
        } else {
            let mode_changed = self.apply_mode(decision.mode);
            (mode_changed, self.apply_power(decision.power))
        };
        TickOutcome {
            decision,
            mode_changed,
            power_changed,
        }
    }

    fn apply_mode(&self, mode: Mode) -> bool {
        let current = self.state.mode().unwrap_or_else(|err| {
            warn!(error = %err, "cannot read mode file; rewriting");
            None
        });
        if current == Some(mode) {
            return false;
        }
        if let Err(err) = self.state.set_mode(mode) {
            warn!(error = %err, mode = %mode, "failed to persist mode");
            return false;
        }
        info!(
            from = current.map(|m| m.as_str()).unwrap_or("unknown"),
            to = %mode,
            "content mode changed"
        );
        self.viewer
            .request_restart(&format!("content mode changed to {mode}"));
        true
    }

    fn apply_power(&self, power: PowerState) -> bool {
        let current = self.state.power().unwrap_or_else(|err| {
            warn!(error = %err, "cannot read power file; rewriting");
            None
        });
        if current == Some(power) {
            return false;
        }
        if let Err(err) = self.state.set_power(power) {
            warn!(error = %err, power = %power, "failed to persist power state");
            return false;
        }
        info!(
            from = current.map(|p| p.as_str()).unwrap_or("unknown"),
            to = %power,
            "display power changed"
        );
        self.display.set_power(power);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_table() {
        let policy = |hdmi_control, off_schedule_slides| ModePolicy {
            hdmi_control,
            off_schedule_slides,
        };
        for hdmi in [true, false] {
            for slides in [true, false] {
                let d = decide(true, policy(hdmi, slides));
                assert_eq!((d.mode, d.power), (Mode::Normal, PowerState::On));
            }
        }
        let d = decide(false, policy(true, false));
        assert_eq!((d.mode, d.power), (Mode::None, PowerState::Off));
        let d = decide(false, policy(true, true));
        assert_eq!((d.mode, d.power), (Mode::OffDeck, PowerState::Off));
        let d = decide(false, policy(false, false));
        assert_eq!((d.mode, d.power), (Mode::OffDeck, PowerState::On));
        let d = decide(false, policy(false, true));
        assert_eq!((d.mode, d.power), (Mode::OffDeck, PowerState::On));
    }
}
