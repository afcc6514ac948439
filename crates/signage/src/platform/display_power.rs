use std::fmt;
use std::fs;
use std::io;
use std::path::PathBuf;

use tracing::{debug, info, warn};

use super::DisplayPower;
use super::shell::{CommandRunner, default_runner};
use crate::state::PowerState;

#[derive(Debug, Clone, Default)]
pub struct DisplayPowerPlan {
    pub sysfs: Option<PowerSysfs>,
    pub on_command: Option<String>,
    pub off_command: Option<String>,
}

impl DisplayPowerPlan {
    pub fn is_empty(&self) -> bool {
        self.sysfs.is_none() && self.on_command.is_none() && self.off_command.is_none()
    }
}

/// A control file such as `/sys/class/backlight/*/bl_power` or a CEC bridge.
#[derive(Debug, Clone)]
pub struct PowerSysfs {
    pub path: PathBuf,
    pub on_value: String,
    pub off_value: String,
}

#[derive(Debug, Clone)]
pub struct PowerReport {
    pub state: PowerState,
    pub sysfs: Option<SysfsExecution>,
    pub command: Option<CommandExecution>,
}

impl PowerReport {
    pub fn success(&self) -> bool {
        self.sysfs.as_ref().is_some_and(|s| s.outcome == SysfsOutcome::Written)
            || self.command.as_ref().is_some_and(|c| c.success)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysfsOutcome {
    Written,
    /// Missing or read-only interface; the display does not support it.
    Unsupported,
    Failed,
}

#[derive(Debug, Clone)]
pub struct SysfsExecution {
    pub path: PathBuf,
    pub value: String,
    pub outcome: SysfsOutcome,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CommandExecution {
    pub command: String,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stderr: String,
}

/// Drives the display power interface described by a [`DisplayPowerPlan`].
/// Every failure is logged and reported, never returned as an error.
#[derive(Clone)]
pub struct DisplayPowerController {
    plan: DisplayPowerPlan,
    runner: CommandRunner,
}

impl fmt::Debug for DisplayPowerController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayPowerController")
            .field("plan", &self.plan)
            .finish_non_exhaustive()
    }
}

impl DisplayPowerController {
    pub fn new(plan: DisplayPowerPlan) -> Self {
        Self::with_runner(plan, default_runner())
    }

    pub fn with_runner(plan: DisplayPowerPlan, runner: CommandRunner) -> Self {
        let plan = DisplayPowerPlan {
            on_command: plan.on_command.filter(|cmd| !cmd.trim().is_empty()),
            off_command: plan.off_command.filter(|cmd| !cmd.trim().is_empty()),
            ..plan
        };
        Self { plan, runner }
    }

    pub fn plan(&self) -> &DisplayPowerPlan {
        &self.plan
    }

    pub fn apply(&self, state: PowerState) -> PowerReport {
        let mut report = PowerReport {
            state,
            sysfs: None,
            command: None,
        };
        if self.plan.is_empty() {
            debug!(?state, "no display power interface configured");
            return report;
        }

        if let Some(sysfs) = &self.plan.sysfs {
            report.sysfs = Some(sysfs.execute(state));
        }

        let command = match state {
            PowerState::On => self.plan.on_command.as_deref(),
            PowerState::Off => self.plan.off_command.as_deref(),
        };
        if let Some(command) = command {
            let execution = self.run(command);
            if execution.success {
                debug!(?state, command, "display power command succeeded");
            } else {
                let exit = execution
                    .exit_code
                    .map(|code| code.to_string())
                    .unwrap_or_else(|| "signal".to_string());
                warn!(
                    ?state,
                    exit_code = exit,
                    stderr = execution.stderr,
                    command,
                    "display power command failed"
                );
            }
            report.command = Some(execution);
        }

        if report.success() {
            info!(state = %state, "display power applied");
        }
        report
    }

    fn run(&self, command: &str) -> CommandExecution {
        match (self.runner)(command) {
            Ok(output) => CommandExecution {
                command: command.to_string(),
                success: output.success(),
                exit_code: output.status.code(),
                stderr: output.stderr,
            },
            Err(err) => CommandExecution {
                command: command.to_string(),
                success: false,
                exit_code: None,
                stderr: err.to_string(),
            },
        }
    }
}

impl DisplayPower for DisplayPowerController {
    fn set_power(&self, state: PowerState) {
        self.apply(state);
    }
}

impl PowerSysfs {
    fn execute(&self, state: PowerState) -> SysfsExecution {
        let value = match state {
            PowerState::On => &self.on_value,
            PowerState::Off => &self.off_value,
        };

        let (outcome, error) = match fs::write(&self.path, value) {
            Ok(()) => {
                debug!(path = %self.path.display(), value, ?state, "wrote display power value");
                (SysfsOutcome::Written, None)
            }
            Err(err) if interface_unsupported(&err) => {
                debug!(
                    path = %self.path.display(),
                    error = %err,
                    "display power interface not writable; skipping"
                );
                (SysfsOutcome::Unsupported, Some(err.to_string()))
            }
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    value,
                    ?state,
                    error = %err,
                    "failed to write display power value"
                );
                (SysfsOutcome::Failed, Some(err.to_string()))
            }
        };

        SysfsExecution {
            path: self.path.clone(),
            value: value.clone(),
            outcome,
            error,
        }
    }
}

/// Missing, locked-down or read-only sysfs nodes mean the attached display
/// has no such control.
fn interface_unsupported(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound
            | io::ErrorKind::PermissionDenied
            | io::ErrorKind::ReadOnlyFilesystem
    )
}
