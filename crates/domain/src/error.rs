use std::time::Duration;

/// Shared error type used across all session-bridge crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    /// The agent core refused or failed to create a context for a key.
    /// Nothing was stored in the registry.
    #[error("session {key}: context creation failed: {message}")]
    SessionCreation { key: String, message: String },

    /// The agent core failed to tear a context down.  The registry entry
    /// has already been removed when this is returned.
    #[error("session {key}: context teardown failed: {message}")]
    ContextTeardown { key: String, message: String },

    /// An owner-loop call did not complete in time and was force-stopped.
    #[error("cross-loop timeout after {timeout:?}: {operation}")]
    CrossLoopTimeout { operation: String, timeout: Duration },

    /// The agent core's turn failed.
    #[error("turn failed: {0}")]
    Turn(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    /// The target runtime has shut down (or its thread is gone).
    #[error("loop closed: {0}")]
    LoopClosed(String),

    /// A blocking wait was attempted on a thread that drives a runtime.
    #[error("refusing to block a runtime thread: {0}")]
    WouldBlockLoop(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
