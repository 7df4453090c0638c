//! Cascade Core - Adaptive streaming session protocol and rendition catalog
//!
//! This crate provides the building blocks of the Cascade streaming server:
//! the rendition catalog and its synthesis, the bandwidth selection policy,
//! the per-connection session protocol, external stream process supervision
//! and the connection dispatcher.

pub mod catalog;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod media;
pub mod policy;
pub mod session;
pub mod stream;
pub mod tracing_setup;
pub mod usage;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-export main types for convenient access
pub use catalog::{CatalogError, FfmpegTranscoder, Rendition, RenditionCatalog, RenditionKey};
pub use client::{CatalogClient, CatalogListing, ClientError};
pub use config::CascadeConfig;
pub use dispatcher::ConnectionDispatcher;
pub use media::{MediaFormat, Resolution, Transport};
pub use policy::{PolicyError, SelectionPolicy};
pub use session::{SessionContext, SessionError};
pub use stream::{FfmpegLauncher, StreamError, StreamSupervisor};
pub use usage::{CsvUsageLog, NoopUsageRecorder, UsageRecorder};

/// Errors that can bubble up from any Cascade subsystem.
#[derive(Debug, thiserror::Error)]
pub enum CascadeError {
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CascadeError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            CascadeError::Catalog(e) => match e {
                CatalogError::ContentDirMissing { path } => {
                    format!("Content directory {} does not exist", path.display())
                }
                CatalogError::SynthesisFailed { output, .. } => {
                    format!("Could not create {}", output.display())
                }
                CatalogError::Io { .. } => "Could not read the content directory".to_string(),
            },
            CascadeError::Session(SessionError::UnknownRendition { filename, .. }) => {
                format!("{filename} is not in the catalog")
            }
            CascadeError::Session(_) => "Session protocol error occurred".to_string(),
            CascadeError::Stream(_) => "Streaming error occurred".to_string(),
            CascadeError::Client(ClientError::Connect { addr, .. }) => {
                format!("Could not connect to server at {addr}")
            }
            CascadeError::Client(_) => "Lost connection to the server".to_string(),
            CascadeError::Policy(e) => format!("Invalid bandwidth thresholds: {e}"),
            CascadeError::Configuration { reason } => format!("Invalid configuration: {reason}"),
            CascadeError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            CascadeError::Configuration { .. }
                | CascadeError::Policy(_)
                | CascadeError::Catalog(CatalogError::ContentDirMissing { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, CascadeError>;
