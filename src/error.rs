//! Error types for SSH sessions, device templates and session replay.
//!
//! Only connectivity problems are errors. Unexpected or empty command output
//! is handled by the parser, which simply yields fewer records.

use thiserror::Error;
use tokio::sync::mpsc::error::SendError;

/// Errors that can occur while opening or driving a device session.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// The target mode cannot be reached from the current mode.
    ///
    /// This occurs when trying to switch to a mode that is not reachable
    /// through any path in the device's mode graph.
    #[error("unreachable state {0}")]
    UnreachableState(String),

    /// The SSH channel was disconnected while waiting for a prompt.
    ///
    /// This typically happens when the remote device closes the connection
    /// unexpectedly during initialization or command execution.
    #[error("channel disconnect on wait prompt")]
    ChannelDisconnectError,

    /// The session has already been closed.
    #[error("connect closed")]
    ConnectClosedError,

    /// Command execution timed out.
    ///
    /// The error contains the partial output received before the timeout.
    #[error("exec command timeout: {0}")]
    ExecTimeout(String),

    /// No prompt was seen before the init timeout expired.
    #[error("init prompt timeout: {0}")]
    InitTimeout(String),

    /// A device handler was built from invalid regex or mode configuration.
    #[error("invalid device handler config: {0}")]
    InvalidDeviceHandlerConfig(String),

    /// Unknown device template name.
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// A replayed session asked for a command that was never recorded.
    #[error("replay mismatch: {0}")]
    ReplayMismatchError(String),

    /// A replayed connection attempt that failed when it was recorded.
    #[error("recorded connect failure for {device_addr}: {reason}")]
    RecordedConnectFailure { device_addr: String, reason: String },

    /// Internal bookkeeping failure (lock poisoning, encoding).
    #[error("internal error: {0}")]
    InternalServerError(String),

    /// An error occurred in the async-ssh2-tokio library.
    ///
    /// Covers unreachable hosts and rejected credentials.
    #[error("async ssh2 error: {0}")]
    Ssh2Error(#[from] async_ssh2_tokio::Error),

    /// An error occurred in the russh library.
    #[error("russh error: {0}")]
    RusshError(#[from] russh::Error),

    /// Failed to send data through the channel.
    #[error("Failed to send data: {0}")]
    SendDataError(#[from] SendError<String>),
}
