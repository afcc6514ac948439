use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Library error type for pipeline, marker and state-store operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A `PROCESSING` marker is already present in the inbox.
    #[error("a conversion run is already in progress")]
    AlreadyRunning,

    /// Filesystem operation failed on a specific path.
    #[error("failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The inbox could not be copied into the working snapshot.
    #[error("failed to snapshot {}: {source}", path.display())]
    Snapshot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The external document converter failed or produced nothing.
    #[error("failed to render {file}: {reason}")]
    Render { file: String, reason: String },

    /// An image could not be decoded, scaled or written.
    #[error("failed to prepare {file}: {reason}")]
    Groom { file: String, reason: String },

    /// Staged slides could not be moved into the live directory.
    #[error("failed to publish into {}: {source}", path.display())]
    Publish {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
