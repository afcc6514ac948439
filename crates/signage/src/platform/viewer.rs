use std::fmt;

use tracing::{info, warn};

use super::ViewerControl;
use super::shell::{CommandRunner, default_runner};

/// Restarts the slideshow viewer through its process supervisor.
#[derive(Clone)]
pub struct RestartCommand {
    command: Option<String>,
    runner: CommandRunner,
}

impl fmt::Debug for RestartCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestartCommand")
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

impl RestartCommand {
    /// `None` disables restarts; requests are only logged.
    pub fn new(command: Option<String>) -> Self {
        Self::with_runner(command, default_runner())
    }

    pub fn with_runner(command: Option<String>, runner: CommandRunner) -> Self {
        Self { command, runner }
    }
}

impl ViewerControl for RestartCommand {
    fn request_restart(&self, reason: &str) {
        let Some(command) = self.command.as_deref() else {
            info!(reason, "viewer restart requested; no restart command configured");
            return;
        };
        match (self.runner)(command) {
            Ok(output) if output.success() => {
                info!(reason, command, "viewer restart requested");
            }
            Ok(output) => warn!(
                reason,
                command,
                exit_code = ?output.status.code(),
                stderr = output.stderr.trim(),
                "viewer restart command failed"
            ),
            Err(err) => warn!(reason, command, error = %err, "viewer restart command failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::shell::CommandOutput;
    use crate::platform::shell::testing::status;
    use std::sync::{Arc, Mutex};

    #[test]
    fn runs_the_configured_command() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&calls);
        let runner: CommandRunner = Arc::new(move |command: &str| -> anyhow::Result<CommandOutput> {
            seen.lock().unwrap().push(command.to_string());
            Ok(CommandOutput {
                status: status(3),
                stdout: String::new(),
                stderr: "unit not found".into(),
            })
        });
        let viewer = RestartCommand::with_runner(Some("systemctl restart viewer".into()), runner);
        viewer.request_restart("content published");
        assert_eq!(*calls.lock().unwrap(), vec!["systemctl restart viewer"]);
    }

    #[test]
    fn disabled_command_runs_nothing() {
        let runner: CommandRunner =
            Arc::new(|_: &str| -> anyhow::Result<CommandOutput> { panic!("runner must not be called") });
        RestartCommand::with_runner(None, runner).request_restart("mode changed");
    }
}
