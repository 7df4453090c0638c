//! External stream process management.
//!
//! A [`StreamLauncher`] knows how to start the transport process for one
//! rendition; a [`StreamSupervisor`] owns at most one such process on behalf
//! of a session and enforces replace-before-start.

pub mod launcher;
pub mod supervisor;

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

pub use launcher::{FfmpegLauncher, StreamLauncher, StreamProcess, StreamTarget};
pub use supervisor::StreamSupervisor;

/// Errors raised by stream processes.
#[derive(Debug, Error)]
pub enum StreamError {
    /// External process could not be launched.
    #[error("failed to start stream for {filename}: {reason}")]
    StartFailed { filename: String, reason: String },

    /// External process could not be terminated cleanly.
    #[error("failed to stop stream process: {reason}")]
    StopFailed { reason: String },
}

/// Result type for stream operations.
pub type StreamResult<T> = Result<T, StreamError>;

/// Opaque identifier of one launched stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(Uuid);

impl Default for StreamHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamHandle {
    /// Creates a fresh, unique handle.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a stream handle as seen by its supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// Process is alive.
    Running,
    /// Process ended on its own (finished or crashed).
    Exited,
    /// Process was stopped by the supervisor.
    Stopped,
    /// Handle was never issued by this supervisor.
    Unknown,
}
