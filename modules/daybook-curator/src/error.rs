use thiserror::Error;
use uuid::Uuid;

/// Reasons a curator run cannot be started.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CuratorError {
    #[error("A curator run is already in progress")]
    AlreadyRunning,

    #[error("No curator session with id {0}")]
    UnknownSession(Uuid),
}
