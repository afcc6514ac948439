pub mod config;
pub mod error;
pub mod fingerprint;
pub mod logging;
pub mod markers;
pub mod mode;
pub mod overview;
pub mod pipeline;
pub mod platform;
pub mod quiescence;
pub mod state;
pub mod status;
pub mod tasks {
    pub mod inbox;
    pub mod live;
    pub mod schedule;
    pub mod status;
}

pub use error::{Error, Result};
