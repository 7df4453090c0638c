//! Per-connection session protocol.
//!
//! A session walks `AwaitCapabilities -> CatalogSent -> Streaming -> Closed`.
//! [`Session`] holds the state machine and reacts to one line at a time;
//! [`run_session`] drives it over a byte stream with read timeouts.

pub mod connection;
pub mod machine;
pub mod request;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub use connection::run_session;
pub use machine::{Reaction, Session, SessionState};
pub use request::{Capabilities, StreamRequest};

use crate::catalog::RenditionCatalog;
use crate::config::{CascadeConfig, ReadyHandshake, ServerConfig, StreamConfig};
use crate::media::MediaFormat;
use crate::policy::SelectionPolicy;
use crate::stream::StreamLauncher;
use crate::usage::UsageRecorder;

/// Session-fatal protocol and transport errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Line could not be parsed for the current state.
    #[error("malformed request '{line}': {reason}")]
    MalformedRequest { line: String, reason: String },

    /// Requested filename is not in the catalog for the negotiated format.
    #[error("unknown rendition {filename} for format {format}")]
    UnknownRendition {
        filename: String,
        format: MediaFormat,
    },

    /// Socket read or write failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    pub(crate) fn malformed(line: &str, reason: impl Into<String>) -> Self {
        SessionError::MalformedRequest {
            line: line.trim().to_string(),
            reason: reason.into(),
        }
    }
}

/// Why a session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    /// Client closed its side of the connection.
    ClientDisconnected,
    /// Server ended the session after an advisory (no affordable tier).
    ServerClosed,
    /// No line arrived within the read timeout.
    TimedOut { after: Duration },
    /// Session-fatal error.
    Failed(SessionError),
}

/// Monotonic identifier assigned to each accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Read timeouts applied by the session driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    /// Applies to every read before the first stream request
    pub handshake: Duration,
    /// Applies while streaming
    pub idle: Option<Duration>,
}

impl From<&ServerConfig> for SessionTimeouts {
    fn from(config: &ServerConfig) -> Self {
        Self {
            handshake: config.handshake_timeout,
            idle: config.idle_timeout,
        }
    }
}

/// Everything a session borrows from the server.
///
/// Cloning is cheap; the catalog and policy are shared read-only.
#[derive(Clone)]
pub struct SessionContext {
    pub catalog: Arc<RenditionCatalog>,
    pub policy: Arc<SelectionPolicy>,
    pub launcher: Arc<dyn StreamLauncher>,
    pub usage: Arc<dyn UsageRecorder>,
    pub stream: StreamConfig,
    pub ready_handshake: ReadyHandshake,
    pub timeouts: SessionTimeouts,
}

impl SessionContext {
    /// Assembles the shared session context from server configuration.
    pub fn new(
        config: &CascadeConfig,
        catalog: RenditionCatalog,
        launcher: Arc<dyn StreamLauncher>,
        usage: Arc<dyn UsageRecorder>,
    ) -> Self {
        Self {
            catalog: Arc::new(catalog),
            policy: Arc::new(config.policy.clone()),
            launcher,
            usage,
            stream: config.stream.clone(),
            ready_handshake: config.server.ready_handshake,
            timeouts: SessionTimeouts::from(&config.server),
        }
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("catalog", &self.catalog.len())
            .field("policy", &self.policy)
            .field("stream", &self.stream)
            .field("ready_handshake", &self.ready_handshake)
            .field("timeouts", &self.timeouts)
            .finish()
    }
}
