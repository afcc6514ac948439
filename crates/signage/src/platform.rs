//! Adapters for the outside world: shell commands, the display power
//! interface and the slideshow viewer's process supervisor.

pub mod display_power;
pub mod shell;
pub mod viewer;

use crate::state::PowerState;

/// Best-effort request to restart the slideshow viewer.
pub trait ViewerControl: Send + Sync {
    fn request_restart(&self, reason: &str);
}

/// Best-effort write to the display's power interface.
pub trait DisplayPower: Send + Sync {
    fn set_power(&self, state: PowerState);
}
