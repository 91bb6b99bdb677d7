use link_core::LinkError;

#[derive(Debug, thiserror::Error)]
pub enum VehicleError {
    #[error("vehicle did not complete initialization")]
    NotReady,
    #[error("unknown mode {0:?} for this vehicle type")]
    UnknownMode(String),
    #[error("rc channel {0} out of range (1-8)")]
    InvalidChannel(u8),
    #[error("command index {index} out of range (count {len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("unknown attribute {0:?}")]
    UnknownTopic(String),
    #[error(transparent)]
    Link(#[from] LinkError),
}

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("failed to spawn script thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Problems with a single inbound frame. Logged by the dispatcher loop, never fatal.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("vehicle requested command {0} which is not in the upload")]
    UnknownItem(u16),
    #[error(transparent)]
    Link(#[from] LinkError),
}
